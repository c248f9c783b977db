//! Connection routing and live match ownership

pub mod hub;
pub mod live;

pub use hub::{HubConfig, SessionHub, OUTBOUND_BUFFER};
pub use live::ConnectionId;
