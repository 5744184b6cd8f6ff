// xrisk-stream: Reconnecting event-stream client for xrisk workflow tasks

pub mod config;
pub mod connector;
pub mod error;
pub mod event;
pub mod listener;
pub mod status;
pub mod transport;

pub use config::{ConnectorConfig, ReconnectPolicy};
pub use connector::StreamConnector;
pub use error::Error;
pub use event::{Frame, WorkflowEvent};
pub use listener::Subscription;
pub use status::{ConnectionStatus, WorkflowStatus};
pub use transport::{SseTransport, TlsMode, Transport, TransportConfig, TransportEvent};
