//! Actors and event handling: sessions, rooms, the hub and the dispatch table.

pub mod dispatch;
pub mod events;
pub mod hub;
pub mod room;
pub mod session;

pub use dispatch::{Dispatcher, DispatcherBuilder, EventHandler};
pub use events::EventContext;
pub use hub::{Hub, HubHandle, HubSettings, HubStats};
pub use room::{Room, RoomCommand, RoomHandle};
pub use session::{DeliveryError, PumpSettings, SessionHandle, SessionId};
