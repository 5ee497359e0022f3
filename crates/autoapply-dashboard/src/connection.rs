use crate::reconciler::DashboardEvent;
use autoapply_core::stream_event::{decode_event, DEFAULT_MAX_FRAME_BYTES};
use futures_util::{future::BoxFuture, stream::BoxStream, FutureExt, StreamExt};
use std::{pin::Pin, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    time::Sleep,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    ClosedRetrying,
    /// Terminal; reached only through teardown.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("stream closed by server")]
    Closed,
}

/// Text frames of one live connection. Dropping it closes the connection.
pub type EventFrames = BoxStream<'static, Result<String, StreamError>>;

/// Opens one event stream using the credential the connector was built with.
pub trait StreamConnector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<EventFrames, StreamError>>;
}

pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    /// Appends the credential to `base` as the `token` query parameter.
    pub fn new(base: &str, token: &str) -> Result<Self, StreamError> {
        let mut url = Url::parse(base).map_err(|err| StreamError::InvalidUrl(err.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(StreamError::InvalidUrl(format!("unsupported scheme {other}"))),
        }
        url.query_pairs_mut().append_pair("token", token);
        Ok(Self { url })
    }

    /// The endpoint without its query string, safe to log.
    pub fn endpoint(&self) -> String {
        let mut endpoint = self.url.clone();
        endpoint.set_query(None);
        endpoint.to_string()
    }
}

impl StreamConnector for WsConnector {
    fn connect(&self) -> BoxFuture<'_, Result<EventFrames, StreamError>> {
        async move {
            let (ws, _) = connect_async(self.url.clone())
                .await
                .map_err(|err| StreamError::Connect(err.to_string()))?;
            let frames = ws
                .filter_map(|msg| async move {
                    match msg {
                        Ok(Message::Text(text)) => Some(Ok(text)),
                        Ok(Message::Close(_)) => Some(Err(StreamError::Closed)),
                        Ok(_) => None,
                        Err(err) => Some(Err(StreamError::Transport(err.to_string()))),
                    }
                })
                .boxed();
            Ok(frames)
        }
        .boxed()
    }
}

/// Keeps one event stream alive. Any loss schedules exactly one reconnect
/// after a fixed delay; teardown cancels both the stream and the timer.
pub struct ConnectionManager<C> {
    connector: C,
    reconnect_delay: Duration,
    max_frame_bytes: usize,
    state: watch::Sender<ConnectionState>,
}

impl<C: StreamConnector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            connector,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            state,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(event = "connection_state", from = ?previous, to = ?next);
        }
    }

    fn arm(&self, timer: &mut Option<Pin<Box<Sleep>>>) {
        *timer = Some(Box::pin(tokio::time::sleep(self.reconnect_delay)));
    }

    /// A connect attempt may take at most one reconnect delay.
    async fn attempt(&self) -> Result<EventFrames, StreamError> {
        match tokio::time::timeout(self.reconnect_delay, self.connector.connect()).await {
            Ok(attempt) => attempt,
            Err(_) => Err(StreamError::ConnectTimeout(self.reconnect_delay)),
        }
    }

    /// False when the consumer is gone or teardown was requested while the
    /// channel was full.
    async fn deliver(
        events: &mpsc::Sender<DashboardEvent>,
        shutdown: &mut watch::Receiver<bool>,
        event: DashboardEvent,
    ) -> bool {
        tokio::select! {
            sent = events.send(event) => sent.is_ok(),
            _ = shutdown.wait_for(|stop| *stop) => false,
        }
    }

    /// Runs until `shutdown` flips to true (or its sender is dropped) or the
    /// event receiver goes away. Returns the terminal state.
    pub async fn run(
        self,
        events: mpsc::Sender<DashboardEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ConnectionState {
        let mut reconnect: Option<Pin<Box<Sleep>>> = None;
        let mut live: Option<EventFrames> = None;
        self.set_state(ConnectionState::Connecting);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let current = *self.state.borrow();
            match current {
                ConnectionState::Connecting => {
                    let attempt = tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                            continue;
                        }
                        attempt = self.attempt() => attempt,
                    };
                    match attempt {
                        Ok(frames) => {
                            live = Some(frames);
                            self.set_state(ConnectionState::Open);
                            info!(event = "stream_connected");
                            if !Self::deliver(&events, &mut shutdown, DashboardEvent::Connected).await {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(event = "stream_connect_error", error = %err);
                            self.arm(&mut reconnect);
                            self.set_state(ConnectionState::ClosedRetrying);
                            let event = DashboardEvent::ConnectError {
                                message: err.to_string(),
                            };
                            if !Self::deliver(&events, &mut shutdown, event).await {
                                break;
                            }
                        }
                    }
                }
                ConnectionState::Open => {
                    let Some(frames) = live.as_mut() else {
                        self.set_state(ConnectionState::Connecting);
                        continue;
                    };
                    let next = tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                            continue;
                        }
                        next = frames.next() => next,
                    };
                    let lost = match next {
                        Some(Ok(text)) => {
                            match decode_event(&text, self.max_frame_bytes) {
                                Ok(event) => {
                                    let event = DashboardEvent::Stream(event);
                                    if !Self::deliver(&events, &mut shutdown, event).await {
                                        break;
                                    }
                                }
                                Err(err) => warn!(event = "frame_decode_error", error = %err),
                            }
                            None
                        }
                        Some(Err(err)) => Some(err.to_string()),
                        None => Some(StreamError::Closed.to_string()),
                    };
                    if let Some(reason) = lost {
                        live = None;
                        warn!(event = "stream_lost", reason = %reason);
                        self.arm(&mut reconnect);
                        self.set_state(ConnectionState::ClosedRetrying);
                        let event = DashboardEvent::Disconnected { reason };
                        if !Self::deliver(&events, &mut shutdown, event).await {
                            break;
                        }
                    }
                }
                ConnectionState::ClosedRetrying => {
                    let Some(timer) = reconnect.as_mut() else {
                        self.set_state(ConnectionState::Connecting);
                        continue;
                    };
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        _ = timer.as_mut() => {
                            reconnect = None;
                            self.set_state(ConnectionState::Connecting);
                        }
                    }
                }
                ConnectionState::Closed => break,
            }
        }

        reconnect.take();
        if live.take().is_some() {
            info!(event = "stream_teardown");
        }
        self.set_state(ConnectionState::Closed);
        ConnectionState::Closed
    }
}
