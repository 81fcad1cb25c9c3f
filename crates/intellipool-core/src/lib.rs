// intellipool-core: Connection supervision between intellipool-api and consumers (CLI, embedders).

pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod registry;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::ControllerConfig;
pub use controller::{ConnectionState, Controller};
pub use error::CoreError;
pub use model::{DataEvent, EquipmentKind};
pub use registry::SubscriptionRegistry;
pub use stream::{DataStream, StateStream};

pub use intellipool_api::TransportKind;
