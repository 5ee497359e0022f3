pub mod connection;
pub mod log_buffer;
pub mod reconciler;

pub use connection::{
    ConnectionManager, ConnectionState, StreamConnector, StreamError, WsConnector,
    DEFAULT_RECONNECT_DELAY,
};
pub use log_buffer::{LogBuffer, LogEntry, DEFAULT_LOG_CAPACITY};
pub use reconciler::{AgentStatus, DashboardEvent, Reconciler};
