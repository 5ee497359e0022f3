use crate::config::StreamConfig;
use autoapply_core::stream_event::{encode_event, StreamEvent};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex, Notify, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

const OUTBOUND_QUEUE: usize = 256;

struct Client {
    conn_id: String,
    user_email: String,
    sender: mpsc::Sender<Message>,
    last_seen: Arc<AsyncMutex<Instant>>,
    closed: Notify,
}

impl Client {
    async fn touch(&self) {
        let mut last = self.last_seen.lock().await;
        *last = Instant::now();
    }

    async fn last_seen(&self) -> Instant {
        *self.last_seen.lock().await
    }

    /// Queues one frame, waiting at most `write_timeout` for queue space.
    async fn send_frame(&self, frame: &str, write_timeout: Duration) -> bool {
        let send = self.sender.send(Message::Text(frame.to_string()));
        matches!(tokio::time::timeout(write_timeout, send).await, Ok(Ok(())))
    }

    fn close(&self, reason: &str) {
        let _ = self.sender.try_send(Message::Close(Some(CloseFrame {
            code: 1000,
            reason: reason.to_string().into(),
        })));
        self.closed.notify_one();
    }
}

/// Per-user fan-out of stream events to every live dashboard connection.
/// Nothing is buffered for users without a connection.
pub struct EventHub {
    config: StreamConfig,
    conn_counter: AtomicU64,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    by_user: RwLock<HashMap<String, HashMap<String, Arc<Client>>>>,
}

impl EventHub {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            clients: RwLock::new(HashMap::new()),
            by_user: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    async fn register_client(&self, client: Arc<Client>) {
        self.clients
            .write()
            .await
            .insert(client.conn_id.clone(), client.clone());
        self.by_user
            .write()
            .await
            .entry(client.user_email.clone())
            .or_default()
            .insert(client.conn_id.clone(), client.clone());
        info!(
            event = "client_connected",
            conn_id = %client.conn_id,
            user = %client.user_email
        );
    }

    async fn remove_client(&self, client: &Client, reason: &str) {
        let removed = self.clients.write().await.remove(&client.conn_id).is_some();
        {
            let mut by_user = self.by_user.write().await;
            if let Some(entries) = by_user.get_mut(&client.user_email) {
                entries.remove(&client.conn_id);
                if entries.is_empty() {
                    by_user.remove(&client.user_email);
                }
            }
        }
        client.close(reason);
        if removed {
            info!(
                event = "client_disconnected",
                conn_id = %client.conn_id,
                user = %client.user_email,
                reason = reason
            );
        }
    }

    pub async fn is_connected(&self, user_email: &str) -> bool {
        self.connection_count(user_email).await > 0
    }

    pub async fn connection_count(&self, user_email: &str) -> usize {
        self.by_user
            .read()
            .await
            .get(user_email)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    async fn snapshot_user(&self, user_email: &str) -> Vec<Arc<Client>> {
        self.by_user
            .read()
            .await
            .get(user_email)
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Sends `event` to all of the user's connections and returns how many
    /// accepted it. A connection that cannot keep up is dropped.
    pub async fn send_to_user(&self, user_email: &str, event: &StreamEvent) -> usize {
        let targets = self.snapshot_user(user_email).await;
        if targets.is_empty() {
            debug!(event = "stream_no_listener", user = user_email, kind = event.kind.type_name());
            return 0;
        }
        let frame = match encode_event(event, self.config.max_frame_bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = "frame_rejected", user = user_email, error = %err);
                return 0;
            }
        };
        let mut delivered = 0;
        for client in targets {
            if client.send_frame(&frame, self.config.write_timeout).await {
                delivered += 1;
            } else {
                warn!(event = "send_error", conn_id = %client.conn_id);
                self.remove_client(&client, "send_error").await;
            }
        }
        delivered
    }

    /// Closes every live connection; returns how many were open.
    pub async fn close_all(&self, reason: &str) -> usize {
        let clients = self
            .clients
            .read()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for client in &clients {
            self.remove_client(client, reason).await;
        }
        clients.len()
    }

    pub fn start_stale_reaper(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if self.config.stale_seconds == 0 {
            return None;
        }
        let stale_after = Duration::from_secs(self.config.stale_seconds);
        let interval = stale_after / 2;
        let hub = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let clients = hub
                    .clients
                    .read()
                    .await
                    .values()
                    .cloned()
                    .collect::<Vec<_>>();
                for client in clients {
                    let last_seen = client.last_seen().await;
                    if Instant::now().duration_since(last_seen) > stale_after {
                        warn!(event = "stale_close", conn_id = %client.conn_id);
                        hub.remove_client(&client, "stale").await;
                    }
                }
            }
        }))
    }

    fn start_ping(self: Arc<Self>, client: Arc<Client>) -> Option<JoinHandle<()>> {
        if self.config.ping_interval.is_zero() {
            return None;
        }
        let interval = self.config.ping_interval;
        let hub = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if client.sender.send(Message::Ping(Vec::new())).await.is_err() {
                    warn!(event = "ping_failed", conn_id = %client.conn_id);
                    hub.remove_client(&client, "ping_failed").await;
                    return;
                }
            }
        }))
    }

    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, user_email: String) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let write_timeout = self.config.write_timeout;
        let mut write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                match tokio::time::timeout(write_timeout, ws_sender.send(msg)).await {
                    Ok(Ok(())) if !closing => {}
                    _ => return,
                }
            }
        });

        let client = Arc::new(Client {
            conn_id: self.next_conn_id(),
            user_email,
            sender: tx,
            last_seen: Arc::new(AsyncMutex::new(Instant::now())),
            closed: Notify::new(),
        });
        self.register_client(client.clone()).await;
        let ping_task = self.clone().start_ping(client.clone());

        loop {
            let next = tokio::select! {
                _ = client.closed.notified() => break,
                next = ws_receiver.next() => next,
            };
            let msg = match next {
                Some(Ok(value)) => value,
                Some(Err(err)) => {
                    warn!(event = "read_error", conn_id = %client.conn_id, error = %err);
                    break;
                }
                None => break,
            };
            client.touch().await;
            match msg {
                Message::Close(_) => {
                    info!(event = "client_close", conn_id = %client.conn_id);
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Text(text) => {
                    if text.len() > self.config.max_frame_bytes {
                        warn!(event = "message_too_large", conn_id = %client.conn_id, size = text.len());
                        continue;
                    }
                    debug!(event = "message_ignored", conn_id = %client.conn_id, raw = %text);
                }
                Message::Binary(bytes) => {
                    debug!(event = "binary_ignored", conn_id = %client.conn_id, size = bytes.len());
                }
            }
        }

        self.remove_client(&client, "disconnect").await;
        if let Some(ping_task) = ping_task {
            ping_task.abort();
        }
        if tokio::time::timeout(write_timeout, &mut write_task).await.is_err() {
            write_task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) async fn attach_local(&self, user_email: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let client = Arc::new(Client {
            conn_id: self.next_conn_id(),
            user_email: user_email.to_string(),
            sender: tx,
            last_seen: Arc::new(AsyncMutex::new(Instant::now())),
            closed: Notify::new(),
        });
        self.register_client(client).await;
        rx
    }
}
