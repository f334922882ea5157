//! Interactive session behavior against the in-memory engine

use async_trait::async_trait;
use dockyard_core::session::Session;
use dockyard_core::terminal::{SizeNotifier, TerminalSizing};
use dockyard_core::test_support::{AttachBehavior, MockCall, MockEngine};
use dockyard_core::{LifecycleManager, NetworkManager};
use dockyard_provider::{ContainerSpec, ContainerState, EngineHandle, ProviderError, TtySize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;

fn setup() -> (Arc<MockEngine>, LifecycleManager) {
    let mock = Arc::new(MockEngine::new());
    let engine: EngineHandle = mock.clone();
    let network = NetworkManager::new(engine.clone(), "dockyard-network");
    (mock, LifecycleManager::new(engine, network))
}

fn mysql_spec() -> ContainerSpec {
    ContainerSpec::new("mysql:8.0.16").cmd(["mysql", "-h", "gitbase", "-u", "root"])
}

async fn attach(lifecycle: &LifecycleManager) -> Session {
    Session::attach_with_sizing(lifecycle, mysql_spec(), "dockyard-mysql", None)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_remote_close_ends_session_with_exit_code() {
    let (mock, lifecycle) = setup();
    mock.set_attach_behavior(AttachBehavior::Output(b"bye\r\n".to_vec()));
    mock.set_wait_result(Ok(3));

    let mut session = attach(&lifecycle).await;

    // Local input that never ends
    let (_keep_open, local_in) = tokio::io::duplex(64);
    let (local_out, mut captured) = tokio::io::duplex(64 * 1024);

    tokio::time::timeout(Duration::from_secs(5), session.pipe(local_in, local_out))
        .await
        .expect("session did not finish")
        .unwrap();

    let mut out = String::new();
    captured.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "bye\r\n");
    assert_eq!(session.exit_code().await, 3);
    assert_eq!(session.exit_code().await, 3);
}

#[tokio::test]
async fn test_local_eof_half_closes_and_drains_output() {
    let (mock, lifecycle) = setup();
    mock.set_attach_behavior(AttachBehavior::Echo);

    let mut session = attach(&lifecycle).await;
    let local_in = std::io::Cursor::new(b"SELECT 1;\n".to_vec());
    let (local_out, mut captured) = tokio::io::duplex(64 * 1024);

    tokio::time::timeout(Duration::from_secs(5), session.pipe(local_in, local_out))
        .await
        .expect("session did not finish")
        .unwrap();

    let mut out = String::new();
    captured.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "SELECT 1;\n");
    assert_eq!(session.exit_code().await, 0);
}

struct BrokenInput;

impl AsyncRead for BrokenInput {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "terminal went away",
        )))
    }
}

#[tokio::test]
async fn test_local_input_error_ends_session_immediately() {
    let (mock, lifecycle) = setup();
    mock.set_attach_behavior(AttachBehavior::Silent);

    let mut session = attach(&lifecycle).await;
    let (local_out, _captured) = tokio::io::duplex(64);

    let err = tokio::time::timeout(Duration::from_secs(5), session.pipe(BrokenInput, local_out))
        .await
        .expect("session waited for output after an input error")
        .unwrap_err();
    assert!(err.to_string().contains("terminal went away"));

    session.close();
    session.close();
}

#[tokio::test]
async fn test_wait_failure_reports_sentinel_code() {
    let (mock, lifecycle) = setup();
    mock.set_wait_result(Err(ProviderError::ConnectionError("engine went away".into())));

    let mut session = attach(&lifecycle).await;
    assert_eq!(session.exit_code().await, 1);
}

#[tokio::test]
async fn test_run_to_completion_returns_remote_status() {
    let (mock, lifecycle) = setup();
    mock.set_attach_behavior(AttachBehavior::Output(b"+---+\n| 1 |\n+---+\n".to_vec()));
    mock.set_wait_result(Ok(0));

    let mut session = attach(&lifecycle).await;
    let mut out = Vec::new();
    let code = session.run_to_completion(&mut out).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(out, b"+---+\n| 1 |\n+---+\n");
    assert!(session.run_to_completion(Vec::new()).await.is_err());
}

#[tokio::test]
async fn test_attach_creates_interactive_container_on_network() {
    let (mock, lifecycle) = setup();
    let session = attach(&lifecycle).await;

    let spec = mock.spec_of("dockyard-mysql").unwrap();
    assert!(spec.interactive);
    assert_eq!(
        mock.networks_of(session.container_id()),
        vec!["dockyard-network"]
    );

    let calls = mock.get_calls();
    let id = session.container_id().0.clone();
    let attach = calls
        .iter()
        .position(|c| *c == MockCall::Attach { id: id.clone() })
        .unwrap();
    let start = calls
        .iter()
        .position(|c| *c == MockCall::Start { id: id.clone() })
        .unwrap();
    assert!(attach < start);
}

#[tokio::test]
async fn test_attach_replaces_leftover_container() {
    let (mock, lifecycle) = setup();
    let leftover = mock.add_container("dockyard-mysql", "mysql:8.0.16", ContainerState::Stopped);

    let session = attach(&lifecycle).await;

    assert_ne!(session.container_id(), &leftover);
    assert_eq!(mock.count_named("dockyard-mysql"), 1);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (mock, lifecycle) = setup();
    mock.set_wait_result(Ok(7));

    let mut session = attach(&lifecycle).await;
    session.remove_on_interrupt();
    session.close();
    session.close();
    assert_eq!(session.exit_code().await, 7);
    session.close();
}

struct ChannelNotifier(mpsc::UnboundedReceiver<()>);

#[async_trait]
impl SizeNotifier for ChannelNotifier {
    async fn changed(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

#[tokio::test]
async fn test_session_follows_terminal_size() {
    let (mock, lifecycle) = setup();
    let (tx, rx) = mpsc::unbounded_channel();
    let sizing = TerminalSizing {
        notifier: Box::new(ChannelNotifier(rx)),
        size: Arc::new(|| Some(TtySize::new(40, 132))),
    };

    let session =
        Session::attach_with_sizing(&lifecycle, mysql_spec(), "dockyard-mysql", Some(sizing))
            .await
            .unwrap();
    tx.send(()).unwrap();

    let id = session.container_id().0.clone();
    let expected = MockCall::Resize {
        id,
        size: TtySize::new(40, 132),
    };
    let mut resizes = 0;
    for _ in 0..100 {
        resizes = mock.get_calls().iter().filter(|c| **c == expected).count();
        if resizes >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(resizes, 2);
}
