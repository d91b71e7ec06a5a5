pub mod alert;
pub mod offset;

pub use alert::{AlertEntry, AlertState};
pub use offset::OffsetLabel;
