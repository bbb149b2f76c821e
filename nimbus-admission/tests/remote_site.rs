//! Remote sites talking to a real admission-control server on loopback.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use nimbus_admission::AdmissionService;
use nimbus_core::admission::{AdmissionController, AllowList, FixedCost};
use nimbus_core::latency::LookupLatency;
use nimbus_core::sites::{LinkState, PredefinedCostSite, RemoteSite, RemoteSiteSettings};
use nimbus_core::{
    DataCentre, Router, RouterSettings, RoutingTable, SharedSite, Site, SiteInfo, UserRequest,
};

const USER_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 127, 127, 127));
const LOCALHOST: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

fn data_centre() -> DataCentre {
    DataCentre {
        location_code: "ap-southeast-2".into(),
        provider_code: "aws".into(),
        tags: BTreeSet::from(["gpu".to_string()]),
        cost: 0.12,
    }
}

fn admission(users: &[&str], cost: f64) -> Arc<AdmissionService> {
    AdmissionService::new(AdmissionController::new(
        Arc::new(AllowList::new(users.iter().copied())),
        Arc::new(FixedCost(cost)),
        data_centre(),
    ))
}

fn remote(name: &str, admission_controller: String, ip: u8, settings: RemoteSiteSettings) -> RemoteSite {
    let info = SiteInfo::with_ip(
        name,
        admission_controller,
        format!("http://127.0.0.{ip}"),
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, ip)),
    );
    RemoteSite::new(info, settings).unwrap()
}

fn fast_retry() -> RemoteSiteSettings {
    RemoteSiteSettings {
        connect_timeout: Duration::from_secs(2),
        reconnection_interval: Duration::from_millis(300),
    }
}

/// A loopback address nobody is listening on.
async fn vacant_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind(LOCALHOST).await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn verdicts_are_recorded_and_definition_cached() {
    let service = admission(&["alice"], 2.5);
    let addr = nimbus_admission::spawn(LOCALHOST, Arc::clone(&service)).await.unwrap();
    let site = remote("SYD", format!("http://{addr}"), 1, RemoteSiteSettings::default());

    let alice = UserRequest::shared(USER_IP, "alice");
    let bob = UserRequest::shared(USER_IP, "bob");
    site.enquire(&[alice.clone(), bob.clone()]).await;

    let viable = alice.viable_responses();
    assert_eq!(viable.len(), 1);
    assert_eq!(viable[0].cost(), 2.5);
    assert_eq!(viable[0].site().name, "SYD");

    assert!(bob.is_processed());
    assert!(bob.viable_responses().is_empty());

    assert_eq!(site.link_state(), LinkState::Connected);
    assert_eq!(site.info().definition(), Some(&data_centre()));
    assert_eq!(service.enquiries(), 1);
}

#[tokio::test]
async fn back_off_is_a_last_resort_cost() {
    let service = AdmissionService::new(AdmissionController::new(
        Arc::new(AllowList::new(["alice"]).backing_off()),
        Arc::new(FixedCost(1.0)),
        data_centre(),
    ));
    let addr = nimbus_admission::spawn(LOCALHOST, service).await.unwrap();
    let site = remote("SYD", format!("http://{addr}"), 1, RemoteSiteSettings::default());

    let alice = UserRequest::shared(USER_IP, "alice");
    site.enquire(&[alice.clone()]).await;

    assert_eq!(alice.viable_responses()[0].cost(), f64::MAX);
}

#[tokio::test]
async fn unreachable_site_is_left_alone_until_the_interval_passes() {
    let addr = vacant_addr().await;
    let site = remote("SYD", format!("http://{addr}"), 1, fast_retry());

    let first = UserRequest::shared(USER_IP, "alice");
    site.enquire(&[first.clone()]).await;
    assert!(!first.is_processed());
    assert!(matches!(site.link_state(), LinkState::Disconnected { .. }));

    // The server comes up, but the circuit is still open.
    let service = admission(&["alice"], 1.0);
    nimbus_admission::spawn(addr, Arc::clone(&service)).await.unwrap();

    let second = UserRequest::shared(USER_IP, "alice");
    site.enquire(&[second.clone()]).await;
    assert!(!second.is_processed());
    assert_eq!(service.enquiries(), 0);

    tokio::time::sleep(Duration::from_millis(350)).await;

    let third = UserRequest::shared(USER_IP, "alice");
    site.enquire(&[third.clone()]).await;
    assert!(third.is_processed());
    assert_eq!(service.enquiries(), 1);
    assert_eq!(site.link_state(), LinkState::Connected);
}

#[tokio::test]
async fn error_status_opens_the_circuit() {
    let service = admission(&["alice"], 1.0);
    let addr = nimbus_admission::spawn(LOCALHOST, Arc::clone(&service)).await.unwrap();
    // The service lives at the root, so this base path answers 404.
    let site = remote("SYD", format!("http://{addr}/nested"), 1, fast_retry());

    let request = UserRequest::shared(USER_IP, "alice");
    site.enquire(&[request.clone()]).await;

    assert!(!request.is_processed());
    assert!(matches!(site.link_state(), LinkState::Disconnected { .. }));
    assert!(site.info().definition().is_none());
    assert_eq!(service.enquiries(), 0);
}

#[tokio::test]
async fn closed_site_makes_no_calls() {
    let service = admission(&["alice"], 1.0);
    let addr = nimbus_admission::spawn(LOCALHOST, Arc::clone(&service)).await.unwrap();
    let site = remote("SYD", format!("http://{addr}"), 1, RemoteSiteSettings::default());

    site.close();
    let request = UserRequest::shared(USER_IP, "alice");
    site.enquire(&[request.clone()]).await;

    assert!(!request.is_processed());
    assert_eq!(service.enquiries(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn router_picks_the_cheapest_remote_site_within_sla() {
    let sydney = nimbus_admission::spawn(LOCALHOST, admission(&["alice", "bob"], 3.0)).await.unwrap();
    let dublin = nimbus_admission::spawn(LOCALHOST, admission(&["alice"], 1.0)).await.unwrap();
    let down = vacant_addr().await;

    let sites: Vec<SharedSite> = vec![
        Arc::new(remote("SYD", format!("http://{sydney}"), 1, fast_retry())),
        Arc::new(remote("DUB", format!("http://{dublin}"), 2, fast_retry())),
        Arc::new(remote("DOWN", format!("http://{down}"), 3, fast_retry())),
        Arc::new(
            PredefinedCostSite::new(
                SiteInfo::with_ip("FAR", "-", "127.0.0.4", IpAddr::V4(Ipv4Addr::new(127, 0, 0, 4))),
                None,
                0.5,
                Duration::ZERO,
            )
            .unwrap(),
        ),
    ];
    let latencies = LookupLatency::new()
        .with(USER_IP, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 12.0)
        .with(USER_IP, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2)), 30.0)
        .with(USER_IP, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 3)), 1.0)
        .with(USER_IP, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 4)), 250.0);
    let settings = RouterSettings {
        latency_sla: 40.0,
        batch_period: Duration::from_millis(20),
        site_response_timeout: Duration::from_secs(2),
        max_request_period: Duration::from_secs(5),
    };
    let router = Router::with_table(RoutingTable::new(sites, Arc::new(latencies), settings).unwrap());

    let (alice, bob, carol) = tokio::join!(
        router.route(USER_IP, "alice"),
        router.route(USER_IP, "bob"),
        router.route(USER_IP, "carol"),
    );

    // FAR is cheapest for everyone but too slow; DUB beats SYD on cost.
    let alice = alice.unwrap();
    assert_eq!(alice.selected_cloud_site_code.as_deref(), Some("DUB"));
    assert_eq!(alice.redirect_address.as_deref(), Some("http://127.0.0.2"));
    assert_eq!(alice.definition, Some(data_centre()));

    assert_eq!(bob.unwrap().selected_cloud_site_code.as_deref(), Some("SYD"));
    // Only FAR admits carol; nothing is within the SLA so the fastest admitting site wins.
    assert_eq!(carol.unwrap().selected_cloud_site_code.as_deref(), Some("FAR"));

    router.close();
}

/// Serves `service`, but never answers the definition endpoint in time.
async fn spawn_with_stalled_definition(service: Arc<AdmissionService>) -> SocketAddr {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;

    let listener = tokio::net::TcpListener::bind(LOCALHOST).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let handler = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let service = Arc::clone(&service);
                    async move {
                        if req.uri().path().ends_with("/definition") {
                            tokio::time::sleep(Duration::from_secs(10)).await;
                        }
                        Ok::<_, std::convert::Infallible>(service.handle(&req))
                    }
                });
                let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), handler).await;
            });
        }
    });
    addr
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_definition_does_not_hold_back_verdicts() {
    let service = admission(&["alice"], 2.0);
    let addr = spawn_with_stalled_definition(Arc::clone(&service)).await;

    let sites: Vec<SharedSite> = vec![Arc::new(remote("SYD", format!("http://{addr}"), 1, fast_retry()))];
    let latencies = LookupLatency::new().with(USER_IP, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 12.0);
    let settings = RouterSettings {
        latency_sla: 40.0,
        batch_period: Duration::from_millis(20),
        site_response_timeout: Duration::from_millis(500),
        max_request_period: Duration::from_secs(5),
    };
    let router = Router::with_table(RoutingTable::new(sites, Arc::new(latencies), settings).unwrap());

    let decision = router.route(USER_IP, "alice").await.unwrap();

    assert!(decision.processed);
    assert_eq!(decision.selected_cloud_site_code.as_deref(), Some("SYD"));
    assert_eq!(decision.definition, None);
    assert_eq!(service.enquiries(), 1);

    router.close();
}
