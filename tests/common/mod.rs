//! Shared harness: a real router on 127.0.0.1:0 backed by a temp data dir,
//! a recording push provider, and a small JSON WebSocket client.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use parley_server::db::models::UserRecord;
use parley_server::notify::dedupe::DedupeCache;
use parley_server::notify::push::{PushError, PushMessage, PushProvider, PushReport};
use parley_server::state::{AppState, GatewaySettings};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Push provider that records every call.
#[derive(Default)]
pub struct RecordingPush {
    pub calls: Mutex<Vec<(Vec<String>, PushMessage)>>,
}

#[async_trait]
impl PushProvider for RecordingPush {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> Result<PushReport, PushError> {
        self.calls
            .lock()
            .unwrap()
            .push((tokens.to_vec(), message.clone()));
        Ok(PushReport {
            success: tokens.len(),
            failure: 0,
        })
    }
}

impl RecordingPush {
    pub fn snapshot(&self) -> Vec<(Vec<String>, PushMessage)> {
        self.calls.lock().unwrap().clone()
    }

    /// Wait until at least `n` pushes were recorded (or give up after 2s).
    pub async fn wait_for(&self, n: usize) -> Vec<(Vec<String>, PushMessage)> {
        for _ in 0..40 {
            let calls = self.snapshot();
            if calls.len() >= n {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.snapshot()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub state: AppState,
    pub pushes: Arc<RecordingPush>,
    _tmp_dir: tempfile::TempDir,
}

/// Start the server on a random port.
pub async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = parley_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = parley_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let pushes = Arc::new(RecordingPush::default());
    let state = AppState::new(
        db,
        jwt_secret,
        GatewaySettings::default(),
        pushes.clone(),
        DedupeCache::new(Duration::from_secs(3600)),
    );

    let app = parley_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        base_url: format!("http://{}", addr),
        state,
        pushes,
        _tmp_dir: tmp_dir,
    }
}

impl TestServer {
    /// Insert a user directly (registration is external) and issue a token.
    pub async fn create_user(&self, name: &str) -> (UserRecord, String) {
        let name = name.to_string();
        let email = format!("{}@example.com", name.to_lowercase());
        let user = self
            .state
            .store(move |conn| parley_server::db::users::insert_user(conn, &name, &email, ""))
            .await
            .expect("insert user");
        let token = parley_server::auth::jwt::issue_token(&self.state.jwt_secret, &user, 30)
            .expect("issue token");
        (user, token)
    }

    pub async fn add_push_token(&self, user_id: &str, token: &str) {
        let (user_id, token) = (user_id.to_string(), token.to_string());
        self.state
            .store(move |conn| parley_server::db::users::add_push_token(conn, &user_id, &token))
            .await
            .expect("add push token");
    }

    /// Create a conversation through the REST API as `token`'s user.
    pub async fn create_conversation(&self, token: &str, kind: &str, participants: &[&str]) -> Value {
        let resp = reqwest::Client::new()
            .post(format!("{}/api/conversations", self.base_url))
            .bearer_auth(token)
            .json(&json!({ "type": kind, "participants": participants }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "create conversation: {}", resp.status());
        resp.json().await.unwrap()
    }

    pub async fn connect(&self, token: &str) -> WsClient {
        WsClient::connect(self.addr, token).await
    }
}

/// JSON-frame WebSocket client. Events that arrive while waiting for an ack
/// are buffered for later `next_event` calls.
pub struct WsClient {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    buffered: VecDeque<Value>,
    next_ack: u64,
}

impl WsClient {
    pub async fn connect(addr: SocketAddr, token: &str) -> Self {
        let url = format!("ws://{}/ws?token={}", addr, token);
        let (stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("Failed to connect WebSocket");
        let (write, read) = stream.split();
        let mut client = Self {
            write,
            read,
            buffered: VecDeque::new(),
            next_ack: 1,
        };
        client.next_event("user:registered").await;
        client
    }

    async fn read_frame(&mut self, wait: Duration) -> Option<Value> {
        loop {
            match tokio::time::timeout(wait, self.read.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Some(serde_json::from_str(text.as_str()).expect("server sent invalid JSON"));
                }
                Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
                _ => return None,
            }
        }
    }

    /// Fire an event without an ack id.
    pub async fn emit(&mut self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data });
        self.write
            .send(Message::Text(frame.to_string().into()))
            .await
            .unwrap();
    }

    /// Send an event with an ack id and return the ack's data.
    pub async fn request(&mut self, event: &str, data: Value) -> Value {
        let ack = self.next_ack;
        self.next_ack += 1;
        let frame = json!({ "event": event, "data": data, "ack": ack });
        self.write
            .send(Message::Text(frame.to_string().into()))
            .await
            .unwrap();

        loop {
            let frame = self
                .read_frame(Duration::from_secs(3))
                .await
                .unwrap_or_else(|| panic!("no ack for {}", event));
            if frame.get("ack").and_then(Value::as_u64) == Some(ack) {
                return frame["data"].clone();
            }
            self.buffered.push_back(frame);
        }
    }

    /// Wait for the next event with this name, skipping others.
    pub async fn next_event(&mut self, name: &str) -> Value {
        if let Some(pos) = self.buffered.iter().position(|f| f["event"] == name) {
            let frame = self.buffered.remove(pos).unwrap();
            return frame["data"].clone();
        }
        loop {
            let frame = self
                .read_frame(Duration::from_secs(3))
                .await
                .unwrap_or_else(|| panic!("no {} event", name));
            if frame["event"] == name {
                return frame["data"].clone();
            }
            self.buffered.push_back(frame);
        }
    }

    /// Assert no event with this name arrives within `wait`.
    pub async fn assert_no_event(&mut self, name: &str, wait: Duration) {
        assert!(
            !self.buffered.iter().any(|f| f["event"] == name),
            "unexpected buffered {} event",
            name
        );
        while let Some(frame) = self.read_frame(wait).await {
            assert_ne!(frame["event"], name, "unexpected {} event", name);
            self.buffered.push_back(frame);
        }
    }

    pub async fn close(mut self) {
        let _ = self.write.send(Message::Close(None)).await;
    }
}
