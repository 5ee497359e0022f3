use autoapply_dashboard::{
    ConnectionManager, ConnectionState, DashboardEvent, Reconciler, WsConnector,
};
use autoapply_portal::{
    build_state,
    chaos::ChaosConfig,
    config::{Credential, PortalConfig},
    routes::AppState,
    seed,
    workflow::RunOptions,
};
use autoapply_storage::PortalStore;
use std::{net::SocketAddr, time::Duration};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::timeout,
};

struct Portal {
    addr: SocketAddr,
    state: AppState,
    stop: Option<oneshot::Sender<()>>,
    server: JoinHandle<std::io::Result<()>>,
}

impl Portal {
    async fn start() -> Self {
        let config = PortalConfig {
            chaos: ChaosConfig::disabled(),
            apply_pacing: Duration::ZERO,
            ..PortalConfig::default()
        };
        let store = PortalStore::open_in_memory().expect("store");
        let state = build_state(&config, store);
        seed::reseed(&state.submissions, 3).expect("seed");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(autoapply_portal::serve(listener, state.clone(), async move {
            let _ = stopped.await;
        }));
        Self {
            addr,
            state,
            stop: Some(stop),
            server,
        }
    }

    fn stream_url(&self) -> String {
        format!("ws://{}/ws/dashboard", self.addr)
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = timeout(Duration::from_secs(5), &mut self.server).await;
        self.server.abort();
    }
}

async fn wait_for_listener(state: &AppState, email: &str) {
    for _ in 0..100 {
        if state.hub.is_connected(email).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("dashboard never registered on the portal");
}

#[tokio::test]
async fn dashboard_follows_a_live_auto_apply_run() {
    let portal = Portal::start().await;
    let user = Credential::demo();
    let connector = WsConnector::new(&portal.stream_url(), &user.token).expect("url");
    let manager = ConnectionManager::new(connector).with_reconnect_delay(Duration::from_millis(200));
    let mut connection_state = manager.subscribe_state();
    let (events_tx, mut events_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connection = tokio::spawn(manager.run(events_tx, shutdown_rx));

    let mut view = Reconciler::new();
    let first = timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("connected in time")
        .expect("event");
    assert_eq!(first, DashboardEvent::Connected);
    view.apply(first);
    assert_eq!(*connection_state.borrow_and_update(), ConnectionState::Open);
    wait_for_listener(&portal.state, &user.email).await;

    let run = portal
        .state
        .driver
        .start(
            user.clone(),
            RunOptions {
                max_jobs: 2,
                auto_apply: true,
            },
        )
        .expect("start");
    let summary = timeout(Duration::from_secs(10), run)
        .await
        .expect("run finished")
        .expect("join");
    assert_eq!(summary.applied, 2);

    let folded = timeout(Duration::from_secs(5), async {
        while let Some(event) = events_rx.recv().await {
            view.apply(event);
            let settled = view.queue().len() == 2
                && view.queue().iter().all(|entry| entry.status == "SUBMITTED");
            if view.status().current_phase == "completed" && settled {
                return true;
            }
        }
        false
    })
    .await
    .expect("completed status in time");
    assert!(folded);

    assert!(view.is_connected());
    assert!(!view.is_running());
    assert_eq!(view.ranked().len(), 2);
    assert_eq!(view.status().tasks_in_progress, 0);
    assert!(view.status().tasks_completed >= 2);
    assert!(view
        .logs()
        .iter()
        .any(|entry| entry.message == "Connected to real-time server"));

    shutdown_tx.send(true).expect("shutdown");
    assert_eq!(
        timeout(Duration::from_secs(5), connection)
            .await
            .expect("teardown in time")
            .expect("join"),
        ConnectionState::Closed
    );
    portal.stop().await;
}

#[tokio::test]
async fn rejected_credential_keeps_retrying_until_teardown() {
    let portal = Portal::start().await;
    let connector = WsConnector::new(&portal.stream_url(), "not-a-token").expect("url");
    let manager = ConnectionManager::new(connector).with_reconnect_delay(Duration::from_millis(50));
    let (events_tx, mut events_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connection = tokio::spawn(manager.run(events_tx, shutdown_rx));

    for _ in 0..2 {
        let event = timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("event in time")
            .expect("event");
        assert!(matches!(event, DashboardEvent::ConnectError { .. }));
    }
    assert!(!portal.state.hub.is_connected(&Credential::demo().email).await);

    shutdown_tx.send(true).expect("shutdown");
    timeout(Duration::from_secs(5), connection)
        .await
        .expect("teardown in time")
        .expect("join");
    portal.stop().await;
}

#[tokio::test]
async fn server_loss_is_reported_once() {
    let portal = Portal::start().await;
    let user = Credential::demo();
    let connector = WsConnector::new(&portal.stream_url(), &user.token).expect("url");
    let manager = ConnectionManager::new(connector).with_reconnect_delay(Duration::from_secs(30));
    let (events_tx, mut events_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connection = tokio::spawn(manager.run(events_tx, shutdown_rx));

    let connected = timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("connected in time")
        .expect("event");
    assert_eq!(connected, DashboardEvent::Connected);
    wait_for_listener(&portal.state, &user.email).await;

    portal.stop().await;

    let lost = timeout(Duration::from_secs(10), events_rx.recv())
        .await
        .expect("loss in time")
        .expect("event");
    assert!(matches!(lost, DashboardEvent::Disconnected { .. }));
    assert!(
        timeout(Duration::from_millis(300), events_rx.recv())
            .await
            .is_err(),
        "no second event while the reconnect timer is pending"
    );

    shutdown_tx.send(true).expect("shutdown");
    timeout(Duration::from_secs(5), connection)
        .await
        .expect("teardown in time")
        .expect("join");
}
