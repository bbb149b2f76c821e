//! Nimbus Admission Control
//!
//! Serves the admission-control endpoint of one site over HTTP/1.1:
//!
//! - `GET /admission-control/service?userTokens=a&userTokens=b` answers a
//!   batch enquiry with a JSON array of verdicts, one per token, in order.
//! - `GET /admission-control/definition` returns the site's data centre.
//!
//! The verdicts come from an [`AdmissionController`]; this crate only does
//! the transport.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use nimbus_core::admission::{AdmissionController, AC_DEFINITION_PATH, AC_PATH, AC_SERVICE_PATH, USER_TOKENS_PARAM};

/// HTTP front of an [`AdmissionController`].
#[derive(Debug)]
pub struct AdmissionService {
    controller: AdmissionController,
    enquiries: AtomicU64,
}

impl AdmissionService {
    /// Serve verdicts from `controller`.
    pub fn new(controller: AdmissionController) -> Arc<Self> {
        Arc::new(Self {
            controller,
            enquiries: AtomicU64::new(0),
        })
    }

    /// Number of batch enquiries answered so far.
    pub fn enquiries(&self) -> u64 {
        self.enquiries.load(Ordering::Relaxed)
    }

    /// Answer one HTTP request.
    pub fn handle<B>(&self, req: &Request<B>) -> Response<Full<Bytes>> {
        if req.method() != Method::GET {
            return empty(StatusCode::METHOD_NOT_ALLOWED);
        }

        let mut segments = req.uri().path().trim_matches('/').split('/');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(AC_PATH), Some(AC_SERVICE_PATH), None) => {
                let tokens = user_tokens(req.uri().query());
                self.enquiries.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(users = tokens.len(), "admission enquiry");
                json(&self.controller.enquire(tokens.as_slice()))
            }
            (Some(AC_PATH), Some(AC_DEFINITION_PATH), None) => json(self.controller.definition()),
            _ => empty(StatusCode::NOT_FOUND),
        }
    }
}

/// Decode every `userTokens` value of a query string, in order.
fn user_tokens(query: Option<&str>) -> Vec<String> {
    let Some(query) = query else {
        return Vec::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key == USER_TOKENS_PARAM)
        .map(|(_, value)| value.into_owned())
        .collect()
}

fn json<T: serde::Serialize + ?Sized>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "cannot encode admission reply");
            empty(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Accept connections on `listener` until accepting fails.
pub async fn serve(listener: TcpListener, service: Arc<AdmissionService>) -> std::io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "admission control listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = Arc::clone(&service);

        tokio::task::spawn(async move {
            let io = TokioIo::new(stream);
            let handler = service_fn(move |req| {
                let response = service.handle(&req);
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                tracing::debug!(%peer, error = %e, "admission connection closed with error");
            }
        });
    }
}

/// Bind `addr` and serve in a background task, returning the bound address.
pub async fn spawn(addr: SocketAddr, service: Arc<AdmissionService>) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = serve(listener, service).await {
            tracing::error!(error = %e, "admission control stopped");
        }
    });
    Ok(local)
}
