//! Data models for events, rooms, and users.

pub mod event;
pub mod room;
pub mod user;

pub use event::*;
pub use room::*;
pub use user::*;
