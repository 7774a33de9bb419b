//! In-process mock of the middleware's DDP WebSocket endpoint.
//!
//! Listens on `127.0.0.1:0` and answers a fixed set of methods so the
//! integration tests can exercise the real transport and receive loop.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use truenas_client::SessionConfig;

pub const API_KEY: &str = "test-key";

/// How the mock answers the `connect` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Connected,
    Failed,
    Silent,
}

#[derive(Default)]
struct MockState {
    ack: Option<Ack>,
    seen_ids: Mutex<Vec<String>>,
    auth_header: Mutex<Option<String>>,
    pongs: AtomicUsize,
    connections: AtomicUsize,
}

pub struct MockMiddleware {
    addr: SocketAddr,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockMiddleware {
    pub async fn start() -> Self {
        Self::start_with(Ack::Connected).await
    }

    pub async fn start_with(ack: Ack) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            ack: Some(ack),
            ..Default::default()
        });

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, accept_state.clone()));
            }
        });

        Self { addr, state, task }
    }

    /// Session config pointing at this mock over plain `ws://`.
    pub fn config(&self) -> SessionConfig {
        self.config_with_key(API_KEY)
    }

    pub fn config_with_key(&self, key: &str) -> SessionConfig {
        SessionConfig::new(self.addr.to_string(), key)
            .with_tls(false)
            .with_call_timeout(Duration::from_secs(5))
            .with_handshake_timeout(Duration::from_secs(2))
    }

    /// Every call id received so far, in arrival order.
    pub fn seen_ids(&self) -> Vec<String> {
        self.state.seen_ids.lock().unwrap().clone()
    }

    pub fn auth_header(&self) -> Option<String> {
        self.state.auth_header.lock().unwrap().clone()
    }

    pub fn pongs(&self) -> usize {
        self.state.pongs.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockMiddleware {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type Outbox = mpsc::UnboundedSender<Message>;

fn send(outbox: &Outbox, frame: Value) {
    let _ = outbox.send(Message::text(frame.to_string()));
}

fn result(outbox: &Outbox, id: &str, value: Value) {
    send(outbox, json!({"msg": "result", "id": id, "result": value}));
}

fn error(outbox: &Outbox, id: &str, error: Value) {
    send(outbox, json!({"msg": "result", "id": id, "error": error}));
}

async fn handle_connection(stream: TcpStream, state: Arc<MockState>) {
    let header_state = state.clone();
    let record_auth = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        *header_state.auth_header.lock().unwrap() = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(resp)
    };
    let ws = match tokio_tungstenite::accept_hdr_async(stream, record_auth).await {
        Ok(ws) => ws,
        Err(_) => return,
    };
    state.connections.fetch_add(1, Ordering::SeqCst);

    let (mut sink, mut stream) = ws.split();
    let (outbox, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut dropped = false;
    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();

        match frame["msg"].as_str() {
            Some("connect") => match state.ack {
                Some(Ack::Connected) => {
                    send(&outbox, json!({"msg": "connected", "session": "mock-session"}))
                }
                Some(Ack::Failed) => send(&outbox, json!({"msg": "failed", "version": "1"})),
                _ => {}
            },
            Some("pong") => {
                state.pongs.fetch_add(1, Ordering::SeqCst);
            }
            Some("method") => {
                let id = frame["id"].as_str().unwrap().to_string();
                state.seen_ids.lock().unwrap().push(id.clone());
                let method = frame["method"].as_str().unwrap_or_default();
                if method == "drop" {
                    dropped = true;
                    break;
                }
                handle_method(&outbox, &id, method, frame["params"].clone());
            }
            _ => {}
        }
    }

    if dropped {
        // Tear the socket down without a close frame.
        writer.abort();
        return;
    }
    drop(outbox);
    let _ = writer.await;
}

fn handle_method(outbox: &Outbox, id: &str, method: &str, params: Value) {
    match method {
        "auth.login_with_api_key" => {
            result(outbox, id, json!(params[0] == json!(API_KEY)));
        }
        "ping" => result(outbox, id, json!(true)),
        "echo" => result(outbox, id, params),
        "fail" => error(outbox, id, json!({"message": "not found"})),
        "validation" => error(
            outbox,
            id,
            json!({"reason": "", "extra": [["vm_create.name", "Name is required", 22]]}),
        ),
        "delay" => {
            // params: [millis, value]
            let millis = params[0].as_u64().unwrap_or(0);
            let value = params[1].clone();
            let outbox = outbox.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                result(&outbox, &id, value);
            });
        }
        "never" => {}
        "duplicate" => {
            result(outbox, id, json!(1));
            result(outbox, id, json!(2));
        }
        "push" => {
            result(outbox, "req999999", json!("unsolicited"));
            send(outbox, json!({"msg": "ping", "id": "keepalive"}));
            send(outbox, json!({"msg": "nosub", "id": "sub1"}));
            result(outbox, id, json!(true));
        }
        "nomsg" => {
            send(outbox, json!({"note": "frame without msg", "id": id}));
            result(outbox, id, json!("after"));
        }
        "garbage" => {
            let _ = outbox.send(Message::text("this is not json"));
        }
        "ping_burst" => {
            // params: [count]
            let count = params[0].as_u64().unwrap_or(0);
            for n in 0..count {
                send(outbox, json!({"msg": "ping", "id": format!("burst{}", n)}));
            }
            result(outbox, id, json!(count));
        }
        "job.start" => result(outbox, id, json!(42)),
        "job.fail" => result(outbox, id, json!(13)),
        "core.job_wait" => match params[0].as_i64() {
            Some(42) => result(outbox, id, json!("done")),
            _ => error(outbox, id, json!({"reason": "job exploded"})),
        },
        "core.subscribe" => {
            result(outbox, id, Value::Null);
            let outbox = outbox.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                for fields in [
                    json!({"id": 5, "state": "RUNNING", "progress": {"percent": 50.0}}),
                    json!({"id": 6, "state": "SUCCESS", "result": "other"}),
                    json!({"id": 5, "state": "SUCCESS", "result": "ok", "progress": {"percent": 100.0}}),
                    json!({"id": 9, "state": "FAILED", "error": "boom"}),
                ] {
                    send(
                        &outbox,
                        json!({
                            "msg": "changed",
                            "collection": "core.get_jobs",
                            "id": fields["id"].clone(),
                            "fields": fields,
                        }),
                    );
                }
            });
        }
        _ => error(
            outbox,
            id,
            json!({"reason": format!("[ENOMETHOD] Method {} not found", method)}),
        ),
    }
}
