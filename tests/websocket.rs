//! Live websocket sessions against a server bound to an ephemeral port.

mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use common::{offline_config, offline_context, BracketSpeech, DIMS};
use lectio::context::AppContext;
use lectio::embedding::HashingProvider;
use lectio::error::GenerationError;
use lectio::generation::{GenerationEngine, Prompt, TextGenerator, TextStream};
use lectio::ingest::ingest_upload;
use lectio::server::router;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sets the flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Emits one sentence every 10ms and never finishes.
struct EndlessGenerator {
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl TextGenerator for EndlessGenerator {
    fn name(&self) -> &str {
        "endless"
    }

    async fn stream_text(&self, _prompt: &Prompt) -> Result<TextStream, GenerationError> {
        let flag = DropFlag(Arc::clone(&self.dropped));
        Ok(Box::pin(stream::unfold(flag, |flag| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Some((Ok("The story goes on. ".to_string()), flag))
        })))
    }
}

async fn spawn_server(ctx: Arc<AppContext>) -> (SocketAddr, CancellationToken) {
    let shutdown = CancellationToken::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(ctx, shutdown.clone());
    let token = shutdown.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .unwrap();
    });
    (addr, shutdown)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/socket_audio", addr))
        .await
        .unwrap();
    client
}

async fn next_message(client: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("socket closed")
        .unwrap()
}

async fn wait_for_connections(ctx: &AppContext, expected: usize) {
    for _ in 0..100 {
        if ctx.connections.len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {} connections, found {}",
        expected,
        ctx.connections.len()
    );
}

#[tokio::test]
async fn turn_sends_audio_then_text() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());
    ingest_upload(&ctx, "notes.txt", b"Saturn has rings of ice. They are mostly water.")
        .await
        .unwrap();
    let (addr, shutdown) = spawn_server(Arc::clone(&ctx)).await;

    let mut client = connect(addr).await;
    client
        .send(Message::Text("user:Tell me about Saturn?".into()))
        .await
        .unwrap();

    assert_eq!(
        next_message(&mut client).await,
        Message::Binary(b"[Saturn has rings of ice.]".to_vec().into())
    );
    assert_eq!(
        next_message(&mut client).await,
        Message::Binary(b"[They are mostly water.]".to_vec().into())
    );
    assert_eq!(
        next_message(&mut client).await,
        Message::Text("Saturn has rings of ice. They are mostly water.".into())
    );

    shutdown.cancel();
}

#[tokio::test]
async fn malformed_frame_keeps_the_connection_open() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());
    ingest_upload(&ctx, "notes.txt", b"Saturn has rings of ice.")
        .await
        .unwrap();
    let (addr, shutdown) = spawn_server(Arc::clone(&ctx)).await;

    let mut client = connect(addr).await;
    client
        .send(Message::Text("no separator here".into()))
        .await
        .unwrap();
    client
        .send(Message::Text("user:Saturn?".into()))
        .await
        .unwrap();

    assert!(matches!(next_message(&mut client).await, Message::Binary(_)));
    assert_eq!(
        next_message(&mut client).await,
        Message::Text("Saturn has rings of ice.".into())
    );

    shutdown.cancel();
}

#[tokio::test]
async fn each_turn_gets_only_its_own_text() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());
    ingest_upload(&ctx, "notes.txt", b"Saturn has rings of ice.")
        .await
        .unwrap();
    let (addr, shutdown) = spawn_server(Arc::clone(&ctx)).await;

    let mut client = connect(addr).await;
    for _ in 0..2 {
        client
            .send(Message::Text("user:Saturn?".into()))
            .await
            .unwrap();
        assert!(matches!(next_message(&mut client).await, Message::Binary(_)));
        assert_eq!(
            next_message(&mut client).await,
            Message::Text("Saturn has rings of ice.".into())
        );
    }

    shutdown.cancel();
}

#[tokio::test]
async fn connections_are_registered_until_close() {
    let tmp = TempDir::new().unwrap();
    let ctx = offline_context(tmp.path());
    let (addr, shutdown) = spawn_server(Arc::clone(&ctx)).await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    wait_for_connections(&ctx, 2).await;

    first.close(None).await.unwrap();
    wait_for_connections(&ctx, 1).await;

    second.close(None).await.unwrap();
    wait_for_connections(&ctx, 0).await;

    shutdown.cancel();
}

#[tokio::test]
async fn disconnect_mid_turn_drops_the_generation() {
    let tmp = TempDir::new().unwrap();
    let dropped = Arc::new(AtomicBool::new(false));
    let engine = GenerationEngine::new(
        Arc::new(EndlessGenerator {
            dropped: Arc::clone(&dropped),
        }),
        Arc::new(BracketSpeech),
        Duration::from_secs(5),
    );
    let ctx = Arc::new(AppContext::new(
        offline_config(tmp.path()),
        Arc::new(HashingProvider::new(DIMS)),
        Arc::new(engine),
    ));
    let (addr, shutdown) = spawn_server(Arc::clone(&ctx)).await;

    let mut client = connect(addr).await;
    client
        .send(Message::Text("user:Tell me a story!".into()))
        .await
        .unwrap();
    assert_eq!(
        next_message(&mut client).await,
        Message::Binary(b"[The story goes on.]".to_vec().into())
    );
    assert!(!dropped.load(Ordering::SeqCst));

    client.close(None).await.unwrap();
    wait_for_connections(&ctx, 0).await;

    for _ in 0..100 {
        if dropped.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(dropped.load(Ordering::SeqCst), "generation outlived the connection");

    shutdown.cancel();
}
