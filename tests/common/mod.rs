//! Shared test harness: an in-process WebSocket JSON-RPC server speaking the
//! `eth_subscribe` / `eth_subscription` subset the ingestion core consumes.
//! Keeps the integration tests hermetic instead of depending on a local anvil
//! node or live endpoints.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub struct MockRpcServer {
    url: String,
    notify_tx: broadcast::Sender<Value>,
    accept_task: JoinHandle<()>,
}

impl MockRpcServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let (notify_tx, _) = broadcast::channel::<Value>(256);

        let notify = notify_tx.clone();
        let accept_task = tokio::spawn(async move {
            let mut next_sub_id = 1u64;
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let sub_id = format!("0x{:x}", next_sub_id);
                next_sub_id += 1;
                tokio::spawn(serve_connection(socket, sub_id, notify.subscribe()));
            }
        });

        Self {
            url: format!("ws://{}", addr),
            notify_tx,
            accept_task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Pushes one pending-transaction payload to every subscribed client.
    pub fn broadcast_transaction(&self, result: Value) {
        let _ = self.notify_tx.send(result);
    }

    /// A well-formed hex-encoded pending transaction carrying a DEX swap selector.
    pub fn swap_payload(hash_byte: u8) -> Value {
        let mut hash = [0u8; 32];
        hash[31] = hash_byte;
        json!({
            "hash": format!("0x{}", hex::encode(hash)),
            "from": "0xa7d9ddbe1f17865597fbd27ec712455208b6b76d",
            "to": "0xf02c1c8e6114b1dbe8937a39260b5b0a374432bb",
            "value": "0xde0b6b3a7640000",
            "gasPrice": "0x4a817c800",
            "gas": "0x5208",
            "nonce": format!("0x{:x}", hash_byte),
            "input": "0x7ff36ab500000000000000000000000000000000000000000000000000000000000000a0",
            "chainId": "0x2105"
        })
    }
}

impl Drop for MockRpcServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(
    socket: TcpStream,
    sub_id: String,
    mut notifications: broadcast::Receiver<Value>,
) {
    let Ok(mut ws) = accept_async(socket).await else {
        return;
    };
    let mut subscribed = false;
    loop {
        tokio::select! {
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(request) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    if request.get("method").and_then(|m| m.as_str()) == Some("eth_subscribe") {
                        let id = request.get("id").and_then(|i| i.as_u64()).unwrap_or(0);
                        let response = json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": sub_id,
                        });
                        if ws.send(Message::Text(response.to_string())).await.is_err() {
                            return;
                        }
                        subscribed = true;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if ws.send(Message::Pong(payload)).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            notification = notifications.recv(), if subscribed => {
                let Ok(result) = notification else {
                    continue;
                };
                let frame = json!({
                    "jsonrpc": "2.0",
                    "method": "eth_subscription",
                    "params": { "subscription": sub_id, "result": result },
                });
                if ws.send(Message::Text(frame.to_string())).await.is_err() {
                    return;
                }
            }
        }
    }
}
