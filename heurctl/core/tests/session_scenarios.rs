//! End-to-end client scenarios against a scripted in-memory server.
//!
//! Each test runs `JobClient::run` next to a driver future that plays the
//! server and the user, on a paused clock.

use std::time::Duration;

use heurctl_core::reconcile::ALGORITHMS_KEY;
use heurctl_core::{
    ClientInput, ClientStatus, CloseKind, CommandKind, ConfigStore, ConnectionStatus,
    InMemoryConnector, JobClient, MemoryConfigStore, Notice, NoticeEvent, NoticeLevel, ServerEnd,
    SessionState, Transport, TransportConfig, UserCommand, NOTICE_TTL,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(60);

struct Rig {
    connector: InMemoryConnector,
    server: ServerEnd,
    status: watch::Receiver<ClientStatus>,
    notices: broadcast::Receiver<NoticeEvent>,
    input: mpsc::Sender<ClientInput>,
}

fn setup(
    store: MemoryConfigStore,
) -> (JobClient<MemoryConfigStore>, Rig, mpsc::Receiver<ClientInput>) {
    let connector = InMemoryConnector::new();
    let server = connector.accept_next();
    let config = TransportConfig::new("ws://test/ws")
        .with_max_retries(3)
        .with_initial_delay_ms(1000);
    let client = JobClient::new(Transport::new(config, connector.clone()), store, NOTICE_TTL);
    let (input, rx) = mpsc::channel(16);

    let rig = Rig {
        connector,
        server,
        status: client.watch_status(),
        notices: client.notices().subscribe(),
        input,
    };
    (client, rig, rx)
}

fn get_params(algorithm: &str, alg_progress: f64) -> Value {
    json!({
        "type": "get_params",
        "message": {
            "algorithms": [
                {"name": algorithm, "params": [{"name": "Agents", "value": 20, "type": "int"}], "isUsed": true}
            ],
            "shared_params": [{"name": "Dimension", "min": 2, "max": 10, "type": "int"}],
            "functions_data": [
                {"name": "sphere", "code": "def sphere(x):\n    return sum(v * v for v in x)", "bounds": [-5, 5], "isCustom": false}
            ],
            "progressInfo": {"alg_progress": alg_progress, "param_progress": 0},
            "isPaused": false,
            "isStarted": false
        }
    })
}

impl Rig {
    async fn send(&self, input: ClientInput) {
        self.input.send(input).await.expect("client stopped");
    }

    async fn command(&self, command: UserCommand) {
        self.send(ClientInput::Command(command)).await;
    }

    async fn frame(&mut self) -> Value {
        timeout(WAIT, self.server.next_json())
            .await
            .expect("no frame from client")
            .expect("connection closed")
    }

    async fn notice(&mut self) -> Notice {
        loop {
            let event = timeout(WAIT, self.notices.recv())
                .await
                .expect("no notice shown")
                .expect("notice channel closed");
            if let NoticeEvent::Shown(notice) = event {
                return notice;
            }
        }
    }

    async fn wait(&mut self, f: impl FnMut(&ClientStatus) -> bool) -> ClientStatus {
        timeout(WAIT, self.status.wait_for(f))
            .await
            .expect("status never reached")
            .expect("client dropped")
            .clone()
    }

    /// Answer the client's opening `get_params` and wait for the config
    async fn handshake(&mut self, reply: Value) {
        assert_eq!(self.frame().await, json!({"type": "get_params"}));
        self.server.push_json(&reply);
        self.wait(|s| !s.config.algorithms.is_empty()).await;
    }

    /// Start a job and let the server acknowledge it
    async fn start_job(&mut self) -> Value {
        self.command(UserCommand::Start).await;
        let pending = self.notice().await;
        assert_eq!(pending.message, "Starting…");
        assert_eq!(pending.level, NoticeLevel::Pending);

        let frame = self.frame().await;
        self.server.push_json(&json!({"type": "start"}));
        let ack = self.notice().await;
        assert_eq!(ack.message, "Started successfully");
        assert_eq!(ack.level, NoticeLevel::Success);
        self.wait(|s| s.session == SessionState::Running).await;
        frame
    }

    async fn shutdown(&self) {
        self.send(ClientInput::Shutdown).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_is_acknowledged_and_guard_released() {
    let (mut client, mut rig, rx) = setup(MemoryConfigStore::new());

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;
        let frame = rig.start_job().await;

        assert_eq!(frame["type"], "start");
        assert_eq!(frame["selected_function"]["name"], "sphere");
        assert!(frame.get("resume").is_none());
        let args: Vec<&str> = frame["algorithms"][0]["args"]
            .as_array()
            .expect("args")
            .iter()
            .filter_map(|a| a["name"].as_str())
            .collect();
        assert_eq!(args, vec!["Agents", "Dimension"]);

        let status = rig.wait(|s| s.in_flight.is_none()).await;
        assert_eq!(status.session, SessionState::Running);
        rig.shutdown().await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_progress_updates_only_its_own_gauge() {
    let (mut client, mut rig, rx) = setup(MemoryConfigStore::new());

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;
        rig.start_job().await;

        rig.server.push_json(&json!({
            "type": "progress",
            "message": {"type": "alg_progress", "progress": 42}
        }));
        let status = rig.wait(|s| s.progress.alg > 0.0).await;
        assert_eq!(status.progress.alg, 42.0);
        assert_eq!(status.progress.param, 0.0);
        assert_eq!(status.session, SessionState::Running);

        // Garbage is dropped by the router; the pipeline keeps going.
        rig.server.push_text("not json");
        rig.server.push_json(&json!({"type": "telemetry"}));
        rig.server.push_json(&json!({
            "type": "progress",
            "message": {"type": "param_progress", "progress": 7.5}
        }));
        let status = rig.wait(|s| s.progress.param > 0.0).await;
        assert_eq!(status.progress.alg, 42.0);
        assert_eq!(status.progress.param, 7.5);
        rig.shutdown().await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();
    assert_eq!(client.router().stats().dropped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_surfaces_once_and_sends_nothing() {
    let (mut client, mut rig, rx) = setup(MemoryConfigStore::new());

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;
        rig.start_job().await;

        rig.server
            .push_json(&json!({"type": "error", "message": "Invalid bounds"}));
        let notice = rig.notice().await;
        assert_eq!(notice.message, "Invalid bounds");
        assert_eq!(notice.level, NoticeLevel::Error);

        let status = rig.wait(|s| s.session == SessionState::Error).await;
        assert_eq!(status.in_flight, None);
        assert_eq!(rig.server.try_next_frame(), None);
        rig.shutdown().await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();
    assert_eq!(client.session().last_error(), Some("Invalid bounds"));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_command_is_dropped_with_a_notice() {
    let (mut client, mut rig, rx) = setup(MemoryConfigStore::new());

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;

        rig.command(UserCommand::Start).await;
        assert_eq!(rig.notice().await.message, "Starting…");
        assert_eq!(rig.frame().await["type"], "start");

        rig.command(UserCommand::Start).await;
        let rejected = rig.notice().await;
        assert_eq!(rejected.level, NoticeLevel::Muted);
        assert_eq!(
            rejected.message,
            "Still waiting for the server to confirm start"
        );

        let status = rig.wait(|s| s.in_flight.is_some()).await;
        assert_eq!(status.in_flight, Some(CommandKind::Start));
        assert_eq!(status.session, SessionState::Starting);
        assert_eq!(rig.server.try_next_frame(), None);
        rig.shutdown().await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_pause_keeps_progress() {
    let (mut client, mut rig, rx) = setup(MemoryConfigStore::new());

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;
        rig.start_job().await;
        rig.server.push_json(&json!({"type": "progress", "message": 30}));
        rig.wait(|s| s.progress.alg > 0.0).await;

        rig.command(UserCommand::Pause).await;
        assert_eq!(rig.notice().await.message, "Pausing…");
        assert_eq!(rig.frame().await, json!({"type": "pause"}));
        rig.server.push_json(&json!({"type": "pause"}));
        assert_eq!(rig.notice().await.message, "Paused successfully");
        rig.wait(|s| s.session == SessionState::Paused).await;

        rig.command(UserCommand::Start).await;
        assert_eq!(rig.notice().await.message, "Resuming…");
        let frame = rig.frame().await;
        assert_eq!(frame["type"], "start");
        assert_eq!(frame["resume"], true);

        rig.server.push_json(&json!({"type": "start"}));
        let status = rig.wait(|s| s.session == SessionState::Running).await;
        assert_eq!(status.progress.alg, 30.0);
        rig.shutdown().await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_then_finished_is_ignored() {
    let (mut client, mut rig, rx) = setup(MemoryConfigStore::new());

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;
        rig.start_job().await;

        rig.command(UserCommand::Stop).await;
        assert_eq!(rig.notice().await.message, "Stopping…");
        assert_eq!(rig.frame().await, json!({"type": "stop"}));
        rig.server.push_json(&json!({"type": "stop"}));
        assert_eq!(rig.notice().await.message, "Stopped successfully");
        rig.wait(|s| s.session == SessionState::Stopped).await;

        // A late result for the stopped job changes nothing.
        rig.server
            .push_json(&json!({"type": "finished", "message": "All runs complete"}));
        rig.server.push_json(&json!({"type": "progress", "message": 55}));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let status = rig.wait(|_| true).await;
        assert_eq!(status.session, SessionState::Stopped);
        assert_eq!(status.progress.alg, 0.0);
        rig.shutdown().await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();
    assert!(client.session().result().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_finished_stores_result() {
    let (mut client, mut rig, rx) = setup(MemoryConfigStore::new());

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;
        rig.start_job().await;

        rig.server.push_json(&json!({
            "type": "finished",
            "message": {"result": {"bat": [0.5]}, "figures": ["convergence.png"]}
        }));
        let notice = rig.notice().await;
        assert_eq!(notice.message, "Finished successfully");
        assert_eq!(notice.level, NoticeLevel::Success);
        rig.wait(|s| s.session == SessionState::Finished).await;
        rig.shutdown().await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();
    let stored = client.session().result().expect("result stored");
    assert_eq!(stored.figures, json!(["convergence.png"]));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_keeps_cached_configuration() {
    let store = MemoryConfigStore::new();
    let (mut client, mut rig, rx) = setup(store.clone());
    let second = rig.connector.accept_next();

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;
        assert!(store.contains(ALGORITHMS_KEY));

        rig.server.close(CloseKind::Unclean);
        rig.server = second;
        assert_eq!(rig.frame().await, json!({"type": "get_params"}));

        rig.server.push_json(&get_params("gwo", 10.0));
        let status = rig.wait(|s| s.progress.alg > 0.0).await;
        let names: Vec<&str> = status
            .config
            .algorithms
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["bat"]);
        assert_eq!(status.link.generation, 2);
        assert_eq!(status.link.status, ConnectionStatus::Open);
        rig.shutdown().await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();

    // Backoff before the reconnect was the initial delay.
    let attempts = rig.connector.attempts();
    assert_eq!(attempts.len(), 2);

    let cached = store.load(ALGORITHMS_KEY).unwrap().expect("cached");
    assert_eq!(cached[0]["name"], "bat");

    // A fresh client starts from the cache.
    let (restarted, _rig, _rx) = setup(store);
    assert_eq!(restarted.reconciler().current().algorithms[0].name, "bat");
}

#[tokio::test(start_paused = true)]
async fn test_local_edits_reach_the_start_command() {
    let (mut client, mut rig, rx) = setup(MemoryConfigStore::new());

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;

        rig.send(ClientInput::SelectFunction("rastrigin".into())).await;
        let unknown = rig.notice().await;
        assert_eq!(unknown.message, "Unknown function `rastrigin`");
        assert_eq!(unknown.level, NoticeLevel::Muted);

        rig.send(ClientInput::SetAlgorithmEnabled {
            name: "bat".into(),
            enabled: false,
        })
        .await;
        rig.wait(|s| s.config.algorithms.iter().all(|a| !a.is_used))
            .await;

        rig.command(UserCommand::Start).await;
        let rejected = rig.notice().await;
        assert_eq!(rejected.level, NoticeLevel::Muted);
        assert!(rejected.message.starts_with("Invalid job configuration"));
        assert_eq!(rig.server.try_next_frame(), None);

        rig.send(ClientInput::SetAlgorithmEnabled {
            name: "bat".into(),
            enabled: true,
        })
        .await;
        rig.wait(|s| s.config.algorithms.iter().all(|a| a.is_used))
            .await;
        let frame = rig.start_job().await;
        assert_eq!(frame["algorithms"][0]["name"], "bat");
        rig.shutdown().await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_notices_expire_after_their_own_ttl() {
    let (mut client, mut rig, rx) = setup(MemoryConfigStore::new());

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;

        rig.command(UserCommand::Pause).await;
        let first = rig.notice().await;
        tokio::time::sleep(Duration::from_millis(3000)).await;
        rig.command(UserCommand::Pause).await;
        let second = rig.notice().await;
        assert_eq!(first.message, second.message);
        assert_ne!(first.id, second.id);

        let expired = timeout(WAIT, rig.notices.recv()).await.unwrap().unwrap();
        assert_eq!(expired, NoticeEvent::Expired(first.id));
        let expired = timeout(WAIT, rig.notices.recv()).await.unwrap().unwrap();
        assert_eq!(expired, NoticeEvent::Expired(second.id));
        rig.shutdown().await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();
    assert!(client.notices().visible().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_connection_cleanly() {
    let (mut client, mut rig, rx) = setup(MemoryConfigStore::new());

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;
        rig.command(UserCommand::Pause).await;
        rig.notice().await;
        rig.shutdown().await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();

    assert!(rig.server.closed_by_client());
    assert!(client.notices().visible().is_empty());
    let status = rig.status.borrow().clone();
    assert_eq!(status.link.status, ConnectionStatus::Closed);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(rig.connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_show_one_connection_lost_notice() {
    let connector = InMemoryConnector::new();
    let config = TransportConfig::new("ws://test/ws")
        .with_max_retries(2)
        .with_initial_delay_ms(1000);
    let mut client = JobClient::new(
        Transport::new(config, connector.clone()),
        MemoryConfigStore::new(),
        NOTICE_TTL,
    );
    let mut notices = client.notices().subscribe();
    let mut status = client.watch_status();
    let (input, rx) = mpsc::channel(16);

    let driver = async {
        let event = timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        let NoticeEvent::Shown(notice) = event else {
            panic!("expected a notice, got {event:?}");
        };
        assert_eq!(notice.message, "Connection to server lost");
        assert_eq!(notice.level, NoticeLevel::Error);

        let state = status.wait_for(|s| s.link.gave_up).await.unwrap().clone();
        assert_eq!(state.link.status, ConnectionStatus::Closed);

        // Only the expiry follows; no second notice.
        let event = timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        assert_eq!(event, NoticeEvent::Expired(notice.id));
        assert!(timeout(Duration::from_secs(30), notices.recv()).await.is_err());

        input.send(ClientInput::Shutdown).await.unwrap();
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();
    assert_eq!(connector.attempt_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_server_close_shows_one_closed_notice_without_retry() {
    let (mut client, mut rig, rx) = setup(MemoryConfigStore::new());

    let driver = async {
        rig.handshake(get_params("bat", 0.0)).await;
        rig.server.close(CloseKind::Clean);

        let notice = rig.notice().await;
        assert_eq!(notice.message, "Connection closed by server");
        let state = rig.wait(|s| s.link.closed_by_server).await;
        assert_eq!(state.link.status, ConnectionStatus::Closed);
        assert!(!state.link.gave_up);

        // Expiry is the only follow-up; the link is never retried.
        let event = timeout(WAIT, rig.notices.recv()).await.unwrap().unwrap();
        assert_eq!(event, NoticeEvent::Expired(notice.id));
        assert!(timeout(Duration::from_secs(30), rig.notices.recv()).await.is_err());
        assert_eq!(rig.connector.attempt_count(), 1);

        rig.send(ClientInput::Shutdown).await;
    };

    let (result, ()) = tokio::join!(client.run(rx), driver);
    result.unwrap();
}
