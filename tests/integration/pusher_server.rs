//! Minimal Pusher-protocol server for driving the client over a real socket
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

pub const SOCKET_ID: &str = "abc";

enum ServerCommand {
    Frame(String),
    Close,
}

#[derive(Default)]
struct ServerState {
    connections: AtomicUsize,
    frames: Mutex<Vec<Value>>,
    client: Mutex<Option<mpsc::UnboundedSender<ServerCommand>>>,
    activity_timeout: AtomicUsize,
}

/// Accepts clients, acknowledges subscriptions and records every frame it receives
pub struct FakePusherServer {
    pub port: u16,
    state: Arc<ServerState>,
    accept_task: JoinHandle<()>,
}

impl FakePusherServer {
    pub async fn start() -> Self {
        Self::with_activity_timeout(120).await
    }

    /// Start a server that announces `seconds` as its activity timeout
    pub async fn with_activity_timeout(seconds: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(ServerState::default());
        state.activity_timeout.store(seconds, Ordering::SeqCst);

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&accept_state)));
            }
        });

        Self {
            port,
            state,
            accept_task,
        }
    }

    /// Endpoint in the form the client expects
    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/app/test?protocol=7", self.port)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Frames received so far with the given event name
    pub fn frames_named(&self, event: &str) -> Vec<Value> {
        self.state
            .frames
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame["event"] == event)
            .cloned()
            .collect()
    }

    /// Send an event to the connected client, with `data` string-encoded as Pusher does
    pub fn push(&self, event: &str, channel: Option<&str>, data: Value) -> bool {
        let mut frame = json!({
            "event": event,
            "data": data.to_string(),
        });
        if let Some(channel) = channel {
            frame["channel"] = json!(channel);
        }
        self.send(ServerCommand::Frame(frame.to_string()))
    }

    /// Close the current client's socket from the server side
    pub fn drop_client(&self) -> bool {
        self.send(ServerCommand::Close)
    }

    fn send(&self, command: ServerCommand) -> bool {
        self.state
            .client
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(command).is_ok())
    }
}

impl Drop for FakePusherServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<ServerState>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    state.connections.fetch_add(1, Ordering::SeqCst);

    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    *state.client.lock().unwrap() = Some(tx);

    let established = json!({
        "event": "pusher:connection_established",
        "data": json!({
            "socket_id": SOCKET_ID,
            "activity_timeout": state.activity_timeout.load(Ordering::SeqCst),
        })
        .to_string(),
    });
    if sink.send(Message::Text(established.to_string().into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(ServerCommand::Frame(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(ServerCommand::Close) | None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    state.frames.lock().unwrap().push(frame.clone());

                    if let Some(reply) = reply_to(&frame) {
                        if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }
}

fn reply_to(frame: &Value) -> Option<Value> {
    match frame["event"].as_str()? {
        "pusher:subscribe" => Some(json!({
            "event": "pusher_internal:subscription_succeeded",
            "channel": frame["data"]["channel"],
            "data": "{}",
        })),
        "pusher:ping" => Some(json!({ "event": "pusher:pong", "data": "{}" })),
        _ => None,
    }
}
