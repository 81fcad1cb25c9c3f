// intellipool-api: Async wire client for Pentair IntelliCenter controllers (hub stream + raw websocket)

pub mod error;
pub mod hub;
pub mod protocol;
pub mod throttle;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use protocol::{CommandKind, Dispatch, InboundEnvelope, ObjectEntry, OutboundEnvelope};
pub use transport::{Inbound, Transport, TransportConfig, TransportKind, TransportState};
