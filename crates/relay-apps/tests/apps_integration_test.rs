//! End-to-end tests for the bundled applications.
//!
//! Every test boots a real `ApplicationManager` with the bundled loader and
//! drives the applications through a shell, exactly as the `relay` binary
//! does. Applications whose state a test inspects are registered with a
//! per-URL loader so the test keeps a handle to the instance.

use relay_apps::echo::{EchoProxy, ECHO};
use relay_apps::echo_client::EchoClient;
use relay_apps::pingpong::{
    PingPongClient, PingPongClientStub, PingPongServiceProxy, PINGPONG,
};
use relay_apps::share_echo::{ShareEcho, ShareEchoTarget};
use relay_apps::register_bundled;
use relay_kernel::{Application, ApplicationManager, FnLoader};
use relay_types::EndpointId;
use relay_wire::pipe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn manager() -> Arc<ApplicationManager> {
    let manager = ApplicationManager::new();
    register_bundled(&manager);
    manager
}

/// Serve `url` with a shared instance the test can inspect.
fn install<A: Application + 'static>(manager: &ApplicationManager, url: &str, app: &Arc<A>) {
    let app = Arc::clone(app);
    manager.set_loader_for_url(
        url,
        Arc::new(FnLoader::new(move |_| {
            Ok(Arc::clone(&app) as Arc<dyn Application>)
        })),
    );
}

/// Poll until `url` is no longer running.
async fn stopped(manager: &ApplicationManager, url: &str) {
    let url = EndpointId::from(url);
    timeout(WAIT, async {
        while manager.is_running(&url) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{url} is still running"));
}

struct Collector(mpsc::UnboundedSender<u16>);

impl PingPongClient for Collector {
    fn pong(&self, value: u16) {
        let _ = self.0.send(value);
    }
}

// ---------------------------------------------------------------------------
// Echo
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_echo_server_round_trip() {
    let manager = manager();
    let shell = manager.create_shell("test:driver");
    let echo = EchoProxy::new(shell.connect_service("mojo:echo_server", &ECHO).await.unwrap());

    let reply = timeout(WAIT, echo.echo_string("Hello World".to_string()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, Ok(Some("Hello World".to_string())));
}

#[tokio::test]
async fn test_echo_client_reaches_server_and_quits() {
    let manager = manager();
    let client = Arc::new(EchoClient::new());
    install(&manager, "mojo:echo_client", &client);

    let app = manager.run("mojo:echo_client").await.unwrap();
    timeout(WAIT, app.wait()).await.unwrap();

    assert!(!app.is_running());
    assert_eq!(client.response().as_deref(), Some("Hello World"));
    assert!(manager.is_running(&EndpointId::from("mojo:echo_server")));
}

#[tokio::test]
async fn test_echo_client_uses_url_argument() {
    let manager = manager();
    manager.add_url_mapping("mojo:other_echo", "mojo:echo_server?other");
    manager.set_args_for_url(
        "mojo:echo_client",
        vec!["mojo:echo_client".to_string(), "mojo:other_echo".to_string()],
    );
    let client = Arc::new(EchoClient::new());
    install(&manager, "mojo:echo_client", &client);

    let app = manager.run("mojo:echo_client").await.unwrap();
    timeout(WAIT, app.wait()).await.unwrap();
    assert_eq!(client.response().as_deref(), Some("Hello World"));
}

#[tokio::test]
async fn test_echo_quit_stops_server() {
    let manager = manager();
    let shell = manager.create_shell("test:driver");
    let echo = EchoProxy::new(shell.connect_service("mojo:echo_server", &ECHO).await.unwrap());
    echo.echo_string(None).await.unwrap().unwrap();

    echo.quit().unwrap();
    stopped(&manager, "mojo:echo_server").await;
}

// ---------------------------------------------------------------------------
// Ping-pong
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ping_service_to_pong_client() {
    let manager = manager();
    let shell = manager.create_shell("test:driver");
    let service =
        PingPongServiceProxy::new(shell.connect_service("mojo:pingpong", &PINGPONG).await.unwrap());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Arc::new(PingPongClientStub::new(Collector(tx)));
    service.set_client(&client);

    service.ping(0).unwrap();
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(1));
    service.ping(100).unwrap();
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(101));

    service.quit().unwrap();
    stopped(&manager, "mojo:pingpong").await;
}

#[tokio::test]
async fn test_ping_target_url() {
    let manager = manager();
    let shell = manager.create_shell("test:driver");
    let service =
        PingPongServiceProxy::new(shell.connect_service("mojo:pingpong", &PINGPONG).await.unwrap());

    let ok = timeout(WAIT, service.ping_target_url("mojo:pingpong_target", 10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ok, Ok(true));
    // The target was told to quit once the last pong arrived.
    stopped(&manager, "mojo:pingpong_target").await;
    assert!(manager.is_running(&EndpointId::from("mojo:pingpong")));

    // A zero count is rejected before the target is started.
    let err = service.ping_target_url("mojo:pingpong_target", 0).await.unwrap();
    assert_eq!(err.unwrap_err().code, 400);
    assert!(!manager.is_running(&EndpointId::from("mojo:pingpong_target")));
}

#[tokio::test]
async fn test_ping_target_service() {
    let manager = manager();
    let shell = manager.create_shell("test:driver");
    let service =
        PingPongServiceProxy::new(shell.connect_service("mojo:pingpong", &PINGPONG).await.unwrap());
    let target = PingPongServiceProxy::new(
        shell
            .connect_service("mojo:pingpong_target", &PINGPONG)
            .await
            .unwrap(),
    );

    // The target serves one end; pingpong pings through the other.
    let (served, pinged) = pipe();
    target.get_ping_pong_service(served).unwrap();
    let ok = timeout(WAIT, service.ping_target_service(pinged, 5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ok, Ok(true));
    stopped(&manager, "mojo:pingpong_target").await;
}

#[tokio::test]
async fn test_ping_target_unknown_url_is_reported() {
    let manager = manager();
    let shell = manager.create_shell("test:driver");
    let service =
        PingPongServiceProxy::new(shell.connect_service("mojo:pingpong", &PINGPONG).await.unwrap());

    let err = service.ping_target_url("bad:identifier", 3).await.unwrap().unwrap_err();
    assert_eq!(err.code, 503);
    assert!(err.message.contains("bad:identifier"));
}

// ---------------------------------------------------------------------------
// Share-echo
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_share_echo_both_sides_quit() {
    let manager = manager();
    let share = Arc::new(ShareEcho::new());
    let target = Arc::new(ShareEchoTarget::new());
    install(&manager, "mojo:share_echo", &share);
    install(&manager, "mojo:share_echo_target", &target);
    manager.set_args_for_url(
        "mojo:share_echo",
        vec![
            "mojo:share_echo".to_string(),
            "mojo:share_echo_target".to_string(),
        ],
    );

    let app = manager.run("mojo:share_echo").await.unwrap();
    timeout(WAIT, app.wait()).await.unwrap();
    stopped(&manager, "mojo:share_echo_target").await;

    assert_eq!(
        share.response().as_deref(),
        Some("ShareEchoTarget: ShareEcho")
    );
    assert_eq!(
        target.response().as_deref(),
        Some("ShareEcho: ShareEchoTarget")
    );
    assert!(manager.running().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_share_echo_on_multi_thread_runtime() {
    for run in 0..100 {
        let manager = manager();
        let share = Arc::new(ShareEcho::new());
        let target = Arc::new(ShareEchoTarget::new());
        install(&manager, "mojo:share_echo", &share);
        install(&manager, "mojo:share_echo_target", &target);
        manager.set_args_for_url(
            "mojo:share_echo",
            vec![
                "mojo:share_echo".to_string(),
                "mojo:share_echo_target".to_string(),
            ],
        );

        let app = manager.run("mojo:share_echo").await.unwrap();
        timeout(WAIT, app.wait())
            .await
            .unwrap_or_else(|_| panic!("share_echo still running in run {run}"));
        stopped(&manager, "mojo:share_echo_target").await;
        assert_eq!(
            share.response().as_deref(),
            Some("ShareEchoTarget: ShareEcho")
        );
        assert_eq!(
            target.response().as_deref(),
            Some("ShareEcho: ShareEchoTarget")
        );
    }
}

#[tokio::test]
async fn test_share_echo_without_target_does_nothing() {
    let manager = manager();
    let share = Arc::new(ShareEcho::new());
    install(&manager, "mojo:share_echo", &share);

    let app = manager.run("mojo:share_echo").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(app.is_running());
    assert!(share.response().is_none());
    assert!(app.context().shell().connections().is_empty());
    app.quit();
}
