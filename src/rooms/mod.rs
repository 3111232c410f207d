//! Room lifecycle management

pub mod registry;

pub use registry::{RoomId, RoomRegistry, RoomSummary, Visibility};
