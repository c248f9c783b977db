//! Player-created rooms with a ready check

pub mod code;
pub mod registry;

pub use registry::{Room, RoomLeave, RoomRegistry, RoomStatus};
