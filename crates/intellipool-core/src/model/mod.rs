// ── Domain model ──
//
// Equipment kinds and their protocol key sets, plus the data events the
// controller pushes to consumers.

pub mod event;
pub mod kind;

pub use event::DataEvent;
pub use kind::{EquipmentKind, SCHEDULE_KEYS, SCHEDULE_OBJTYP_CONDITION, schedule_key_list};
