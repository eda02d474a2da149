//! End-to-end integration tests for the podshell bridge.
//!
//! These tests run the real HTTP server on a loopback port and drive it with
//! a WebSocket client, using a scripted executor in place of a cluster:
//! - Request validation and admission
//! - Input, output and resize flows
//! - Exit sequence and error frames
//! - Server shutdown

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge::{
    BridgeServer, Config, ExecClientProvider, ExecError, ExecStream, ExecTarget, RemoteExecutor,
    ServerState, SizeEvent, StreamOptions,
};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Scripted executor
// =============================================================================

#[derive(Clone, Copy, Debug)]
enum Script {
    /// Echo stdin to stdout, report resizes as `<cols>x<rows>`.
    Echo,
    /// Record stdin and never finish on its own.
    Hang,
    /// Fail when opening the stream.
    SetupFails,
}

#[derive(Clone)]
struct ScriptedProvider {
    script: Script,
    stdin_log: Arc<Mutex<Vec<u8>>>,
    targets: Arc<Mutex<Vec<ExecTarget>>>,
}

impl ScriptedProvider {
    fn new(script: Script) -> Self {
        Self {
            script,
            stdin_log: Arc::new(Mutex::new(Vec::new())),
            targets: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn stdin(&self) -> Vec<u8> {
        self.stdin_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecClientProvider for ScriptedProvider {
    async fn acquire(&self) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedProvider {
    async fn open(
        &self,
        target: &ExecTarget,
        _command: &[String],
    ) -> Result<Box<dyn ExecStream>, ExecError> {
        self.targets.lock().unwrap().push(target.clone());
        match self.script {
            Script::SetupFails => Err(ExecError::Setup(format!(
                "pods \"{}\" not found",
                target.pod
            ))),
            script => Ok(Box::new(ScriptedStream {
                script,
                stdin_log: Arc::clone(&self.stdin_log),
            })),
        }
    }
}

struct ScriptedStream {
    script: Script,
    stdin_log: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl ExecStream for ScriptedStream {
    async fn stream(&mut self, mut options: StreamOptions) -> Result<(), ExecError> {
        match self.script {
            Script::Echo => {
                let output = Arc::clone(&options.stdout);
                let sizes = Arc::clone(&options.size);
                tokio::spawn(async move {
                    loop {
                        match sizes.next_size().await {
                            SizeEvent::Resize(size) => {
                                let line = format!("{}x{}", size.width, size.height);
                                if output.write_chunk(line.as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                            SizeEvent::Unchanged => continue,
                            SizeEvent::Closed => break,
                        }
                    }
                });
                while let Some(chunk) = options.stdin.next_chunk().await {
                    self.stdin_log.lock().unwrap().extend_from_slice(&chunk);
                    options.stdout.write_chunk(&chunk).await?;
                }
                Ok(())
            }
            Script::Hang => {
                // Pump stdin on its own task, like a real transport does, so
                // bytes queued right before cancellation are still observed.
                let mut stdin = options.stdin;
                let log = Arc::clone(&self.stdin_log);
                tokio::spawn(async move {
                    while let Some(chunk) = stdin.next_chunk().await {
                        log.lock().unwrap().extend_from_slice(&chunk);
                    }
                });
                std::future::pending().await
            }
            Script::SetupFails => unreachable!("setup fails before streaming"),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn create_test_config() -> Config {
    let mut config = Config::default();
    config.server.bind = "127.0.0.1:0".to_string();
    config.session.exit_grace_ms = 50;
    config
}

async fn start_server(config: Config, provider: ScriptedProvider) -> (BridgeServer, SocketAddr) {
    let mut server = BridgeServer::new(config, Arc::new(provider));
    let addr = server.start().await.unwrap();
    (server, addr)
}

async fn connect(addr: SocketAddr, pod: &str, container: &str) -> Result<Client, WsError> {
    let url = format!("ws://{}/api/pod/{}/{}/exec", addr, pod, container);
    connect_async(url).await.map(|(client, _)| client)
}

async fn next_frame(client: &mut Client) -> Option<Message> {
    tokio::time::timeout(Duration::from_secs(3), client.next())
        .await
        .expect("timed out waiting for a frame")
        .map(|frame| frame.expect("websocket error"))
}

/// Next frame that is not a protocol ping.
async fn next_data_frame(client: &mut Client) -> Option<Message> {
    loop {
        match next_frame(client).await {
            Some(Message::Ping(_)) | Some(Message::Pong(_)) => continue,
            other => return other,
        }
    }
}

/// Drains the socket until it closes, returning every text frame seen.
async fn drain_text_frames(client: &mut Client) -> Vec<String> {
    let mut texts = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(3), client.next()).await {
        match frame {
            Ok(Message::Text(text)) => texts.push(text.as_str().to_string()),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    texts
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn wait_for_stdin(provider: &ScriptedProvider, expected: &[u8]) {
    let waited = tokio::time::timeout(Duration::from_secs(3), async {
        while provider.stdin() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        waited.is_ok(),
        "stdin was {:?}",
        String::from_utf8_lossy(&provider.stdin())
    );
}

async fn wait_for_sessions(server: &BridgeServer, expected: usize) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while server.registry().count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session count did not settle");
}

// =============================================================================
// Validation and Admission Tests
// =============================================================================

#[tokio::test]
async fn test_whitespace_identifier_rejected_before_upgrade() {
    let provider = ScriptedProvider::new(Script::Echo);
    let (server, addr) = start_server(create_test_config(), provider.clone()).await;

    match connect(addr, "%20", "app").await {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), 400);
            let body = response.body().clone().unwrap_or_default();
            assert_eq!(
                String::from_utf8_lossy(&body),
                r#"{"code":400,"message":"Invalid container"}"#
            );
        }
        other => panic!("expected HTTP 400, got {:?}", other.map(|_| ())),
    }

    assert!(provider.targets.lock().unwrap().is_empty());
    assert_eq!(server.registry().count(), 0);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_empty_identifier_rejected() {
    let (server, addr) = start_server(create_test_config(), ScriptedProvider::new(Script::Echo)).await;

    let response = http_get(addr, "/api/pod/web//exec").await;
    assert!(response.starts_with("HTTP/1.1 400"), "{}", response);
    assert!(response.contains(r#"{"code":400,"message":"Invalid container"}"#));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_plain_http_request_is_not_upgraded() {
    let (server, addr) = start_server(create_test_config(), ScriptedProvider::new(Script::Echo)).await;

    let response = http_get(addr, "/api/pod/web/app/exec").await;
    assert!(!response.starts_with("HTTP/1.1 101"), "{}", response);
    assert_eq!(server.registry().count(), 0);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_session_limit() {
    let mut config = create_test_config();
    config.session.max_sessions = 1;
    let (server, addr) = start_server(config, ScriptedProvider::new(Script::Hang)).await;

    let _first = connect(addr, "web", "app").await.unwrap();
    wait_for_sessions(&server, 1).await;

    match connect(addr, "web", "app").await {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), 503);
            let body = response.body().clone().unwrap_or_default();
            assert_eq!(
                String::from_utf8_lossy(&body),
                r#"{"code":503,"message":"Too many sessions"}"#
            );
        }
        other => panic!("expected HTTP 503, got {:?}", other.map(|_| ())),
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_health_reports_sessions() {
    let (server, addr) = start_server(create_test_config(), ScriptedProvider::new(Script::Hang)).await;

    let response = http_get(addr, "/health").await;
    assert!(response.contains(r#"{"status":"ok","sessions":0}"#), "{}", response);

    let _client = connect(addr, "web", "app").await.unwrap();
    wait_for_sessions(&server, 1).await;

    let response = http_get(addr, "/health").await;
    assert!(response.contains(r#"{"status":"ok","sessions":1}"#), "{}", response);

    server.stop().await.unwrap();
}

// =============================================================================
// Session Flow Tests
// =============================================================================

#[tokio::test]
async fn test_target_uses_configured_namespace() {
    let mut config = create_test_config();
    config.exec.namespace = "ctf-ns".to_string();
    let provider = ScriptedProvider::new(Script::Echo);
    let (server, addr) = start_server(config, provider.clone()).await;

    let mut client = connect(addr, "web-1", "app").await.unwrap();
    client.send(Message::Text("x".into())).await.unwrap();
    next_data_frame(&mut client).await;

    let targets = provider.targets.lock().unwrap().clone();
    assert_eq!(targets, vec![ExecTarget::new("ctf-ns", "web-1", "app")]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_input_relayed_and_output_binary() {
    let provider = ScriptedProvider::new(Script::Echo);
    let (server, addr) = start_server(create_test_config(), provider.clone()).await;

    let mut client = connect(addr, "web", "app").await.unwrap();
    client
        .send(Message::Text(r#"{"op":"input","data":"ls\n"}"#.into()))
        .await
        .unwrap();
    client.send(Message::Text(r#"{"op":"ping","t":1}"#.into())).await.unwrap();
    client.send(Message::Text("not json {".into())).await.unwrap();

    assert_eq!(
        next_data_frame(&mut client).await,
        Some(Message::Binary("ls\n".into()))
    );
    assert_eq!(
        next_data_frame(&mut client).await,
        Some(Message::Binary("not json {".into()))
    );
    assert_eq!(provider.stdin(), b"ls\nnot json {".to_vec());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_resize_reaches_remote() {
    let provider = ScriptedProvider::new(Script::Echo);
    let (server, addr) = start_server(create_test_config(), provider.clone()).await;

    let mut client = connect(addr, "web", "app").await.unwrap();
    client
        .send(Message::Text(r#"{"op":"resize","cols":100,"rows":30}"#.into()))
        .await
        .unwrap();

    assert_eq!(
        next_data_frame(&mut client).await,
        Some(Message::Binary("100x30".into()))
    );
    assert!(provider.stdin().is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_exit_sequence_closes_without_error() {
    let provider = ScriptedProvider::new(Script::Hang);
    let (server, addr) = start_server(create_test_config(), provider.clone()).await;

    let mut client = connect(addr, "web", "app").await.unwrap();
    client.send(Message::Text("sleep 1000\r".into())).await.unwrap();
    client.send(Message::Text(r#"{"op":"exit"}"#.into())).await.unwrap();

    let texts = drain_text_frames(&mut client).await;
    assert!(texts.is_empty(), "unexpected text frames: {:?}", texts);
    wait_for_stdin(&provider, b"sleep 1000\r\x03exit\n").await;

    wait_for_sessions(&server, 0).await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_setup_failure_sends_error_frame() {
    let (server, addr) =
        start_server(create_test_config(), ScriptedProvider::new(Script::SetupFails)).await;

    let mut client = connect(addr, "ghost", "app").await.unwrap();
    let texts = drain_text_frames(&mut client).await;

    assert_eq!(
        texts,
        vec![r#"{"op":"error","data":"Failed to create executor: setup failed: pods \"ghost\" not found"}"#
            .to_string()]
    );

    wait_for_sessions(&server, 0).await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_client_close_runs_exit_sequence() {
    let provider = ScriptedProvider::new(Script::Hang);
    let (server, addr) = start_server(create_test_config(), provider.clone()).await;

    let mut client = connect(addr, "web", "app").await.unwrap();
    wait_for_sessions(&server, 1).await;
    client.close(None).await.unwrap();

    wait_for_sessions(&server, 0).await;
    wait_for_stdin(&provider, b"\x03exit\n").await;

    server.stop().await.unwrap();
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_stop_closes_active_sessions() {
    let (server, addr) = start_server(create_test_config(), ScriptedProvider::new(Script::Hang)).await;

    let mut client = connect(addr, "web", "app").await.unwrap();
    wait_for_sessions(&server, 1).await;

    server.stop().await.unwrap();
    assert_eq!(server.state().await, ServerState::Stopped);
    assert_eq!(server.registry().count(), 0);

    let texts = drain_text_frames(&mut client).await;
    assert!(texts.is_empty());
}
