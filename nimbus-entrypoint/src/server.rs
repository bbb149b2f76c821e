//! HTTP surface of the entry point.
//!
//! - `GET /entry-point/service/{sourceIP}/{userToken}`: JSON route decision
//!   for a user at an explicit address.
//! - `GET /entry-point/service/{userToken}`: the same, for the calling client.
//! - `GET /entry-point/redirect?userToken=..`: `302` to the selected load
//!   balancer, or `204` when no site will take the user.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use nimbus_core::{RouteDecision, Router, RouterError};

const EP_PATH: &str = "entry-point";
const SERVICE_PATH: &str = "service";
const REDIRECT_PATH: &str = "redirect";

/// Headers that may carry the original client address, most trusted first.
const FORWARDING_HEADERS: [&str; 5] = [
    "x-forwarded-for",
    "proxy-client-ip",
    "wl-proxy-client-ip",
    "http_client_ip",
    "http_x_forwarded_for",
];

/// Starts the entry point on `listener`, terminating TLS when an acceptor is given.
pub async fn start_server(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    router: Arc<Router>,
) -> std::io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, tls = tls_acceptor.is_some(), "entry point listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let router = Arc::clone(&router);
        let service = service_fn(move |req| {
            let router = Arc::clone(&router);
            async move { Ok::<_, Infallible>(handle_request(&router, req, peer).await) }
        });

        if let Some(acceptor) = &tls_acceptor {
            let acceptor = acceptor.clone();
            tokio::task::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        let io = TokioIo::new(tls_stream);
                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            tracing::debug!(%peer, error = %err, "error serving connection");
                        }
                    }
                    Err(e) => tracing::warn!(%peer, error = %e, "TLS handshake failed"),
                }
            });
        } else {
            let io = TokioIo::new(stream);
            tokio::task::spawn(async move {
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!(%peer, error = %err, "error serving connection");
                }
            });
        }
    }
}

/// Route one HTTP request.
pub(crate) async fn handle_request<B>(router: &Router, req: Request<B>, peer: SocketAddr) -> Response<Full<Bytes>> {
    let (parts, _) = req.into_parts();
    if parts.method != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "only GET is supported");
    }

    let segments: Vec<&str> = parts.uri.path().trim_matches('/').split('/').collect();
    match segments.as_slice() {
        [EP_PATH, SERVICE_PATH, source, token] => match source.parse::<IpAddr>() {
            Ok(source) => service(router, source, token).await,
            Err(_) => text(StatusCode::BAD_REQUEST, "invalid source IP"),
        },
        [EP_PATH, SERVICE_PATH, token] => service(router, client_ip(&parts.headers, peer), token).await,
        [EP_PATH, REDIRECT_PATH] => match user_token(parts.uri.query()) {
            Some(token) => redirect(router, client_ip(&parts.headers, peer), &token).await,
            None => text(StatusCode::BAD_REQUEST, "missing userToken"),
        },
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn service(router: &Router, source: IpAddr, token: &str) -> Response<Full<Bytes>> {
    match route(router, source, token).await {
        Ok(decision) => match serde_json::to_vec(&decision) {
            Ok(body) => {
                let mut response = Response::new(Full::new(Bytes::from(body)));
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot encode route decision");
                text(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
            }
        },
        Err(response) => response,
    }
}

async fn redirect(router: &Router, source: IpAddr, token: &str) -> Response<Full<Bytes>> {
    let decision = match route(router, source, token).await {
        Ok(decision) => decision,
        Err(response) => return response,
    };

    let Some(address) = decision.redirect_address else {
        return text(StatusCode::NO_CONTENT, "");
    };
    match HeaderValue::try_from(address) {
        Ok(location) => {
            let mut response = text(StatusCode::FOUND, "");
            response.headers_mut().insert(header::LOCATION, location);
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "load balancer address is not a valid Location");
            text(StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect address")
        }
    }
}

async fn route(router: &Router, source: IpAddr, token: &str) -> Result<RouteDecision, Response<Full<Bytes>>> {
    match router.route(source, token).await {
        Ok(decision) => {
            tracing::info!(
                user = token,
                %source,
                site = decision.selected_cloud_site_code.as_deref().unwrap_or("-"),
                processed = decision.processed,
                "user routed"
            );
            Ok(decision)
        }
        Err(e @ (RouterError::NotConfigured | RouterError::Closed)) => {
            tracing::warn!(user = token, error = %e, "router unavailable");
            Err(text(StatusCode::SERVICE_UNAVAILABLE, "router unavailable"))
        }
        Err(e) => {
            tracing::error!(user = token, error = %e, "routing failed");
            Err(text(StatusCode::INTERNAL_SERVER_ERROR, "routing failed"))
        }
    }
}

/// The user token of a redirect query. Both `userToken` and `UserToken` are accepted.
fn user_token(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, value)| key.eq_ignore_ascii_case("userToken") && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

/// The client address: the first usable forwarding header, else the peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    for name in FORWARDING_HEADERS {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let first = value.split(',').next().unwrap_or_default().trim();
        if first.is_empty() || first.eq_ignore_ascii_case("unknown") {
            continue;
        }
        match first.parse() {
            Ok(ip) => return ip,
            Err(_) => tracing::debug!(header = name, value = first, "ignoring unparsable client address"),
        }
    }
    peer.ip()
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use http_body_util::BodyExt;
    use nimbus_core::latency::LookupLatency;
    use nimbus_core::sites::PredefinedCostSite;
    use nimbus_core::{RouterSettings, RoutingTable, SharedSite, SiteInfo};

    const PEER: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1)), 50000);
    const FORWARDED: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

    fn router() -> Router {
        let site_ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));
        let site = PredefinedCostSite::new(
            SiteInfo::with_ip("SYD", "-", "http://syd.example.net", site_ip),
            Some(HashSet::from(["alice".to_string()])),
            1.0,
            Duration::from_millis(5),
        )
        .unwrap();
        let latencies = LookupLatency::new()
            .with(PEER.ip(), site_ip, 10.0)
            .with(FORWARDED, site_ip, 80.0);
        let settings = RouterSettings {
            latency_sla: 40.0,
            batch_period: Duration::from_millis(50),
            site_response_timeout: Duration::from_millis(200),
            max_request_period: Duration::from_secs(1),
        };
        let sites: Vec<SharedSite> = vec![Arc::new(site)];
        Router::with_table(RoutingTable::new(sites, Arc::new(latencies), settings).unwrap())
    }

    fn get(uri: &str) -> Request<()> {
        Request::get(uri).body(()).unwrap()
    }

    async fn body(response: Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn client_ip_prefers_the_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, PEER), PEER.ip());

        headers.insert("x-forwarded-for", HeaderValue::from_static("unknown"));
        headers.insert("proxy-client-ip", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers, PEER), FORWARDED);

        headers.insert("x-forwarded-for", HeaderValue::from_static("2001:db8::1"));
        assert_eq!(client_ip(&headers, PEER), "2001:db8::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn garbage_forwarding_headers_fall_back_to_the_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_ip(&headers, PEER), PEER.ip());
    }

    #[test]
    fn user_token_accepts_either_spelling() {
        assert_eq!(user_token(Some("userToken=alice")).as_deref(), Some("alice"));
        assert_eq!(user_token(Some("x=1&UserToken=bob%40corp")).as_deref(), Some("bob@corp"));
        assert_eq!(user_token(Some("userToken=")), None);
        assert_eq!(user_token(None), None);
    }

    #[tokio::test(start_paused = true)]
    async fn service_path_returns_the_decision_as_json() {
        let router = router();
        let response = handle_request(&router, get("/entry-point/service/10.1.1.1/alice"), PEER).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(json["selectedCloudSiteCode"], "SYD");
        assert_eq!(json["redirectAddress"], "http://syd.example.net");
        assert!(json.get("processed").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn service_path_accepts_a_bare_token() {
        let router = router();
        let mut req = get("/entry-point/service/bob");
        req.headers_mut().insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        let response = handle_request(&router, req, PEER).await;

        let json: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert!(json["selectedCloudSiteCode"].is_null());
        assert!(json["redirectAddress"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn redirect_sends_eligible_users_to_the_load_balancer() {
        let router = router();
        let response = handle_request(&router, get("/entry-point/redirect?userToken=alice"), PEER).await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "http://syd.example.net");
    }

    #[tokio::test(start_paused = true)]
    async fn redirect_without_a_site_is_no_content() {
        let router = router();
        let response = handle_request(&router, get("/entry-point/redirect?userToken=mallory"), PEER).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let router = router();
        let cases = [
            ("/entry-point/service/not-an-ip/alice", StatusCode::BAD_REQUEST),
            ("/entry-point/redirect", StatusCode::BAD_REQUEST),
            ("/entry-point/elsewhere", StatusCode::NOT_FOUND),
            ("/", StatusCode::NOT_FOUND),
        ];
        for (uri, status) in cases {
            assert_eq!(handle_request(&router, get(uri), PEER).await.status(), status, "{uri}");
        }

        let post = Request::post("/entry-point/redirect?userToken=alice").body(()).unwrap();
        assert_eq!(handle_request(&router, post, PEER).await.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn unconfigured_router_is_unavailable() {
        let router = Router::new();
        let response = handle_request(&router, get("/entry-point/service/10.1.1.1/alice"), PEER).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
