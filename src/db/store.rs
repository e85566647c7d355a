//! Persistence gateway consumed by the hub, the event handlers and the auth routes.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{ChatMessage, RoomId, RoomKind, RoomRecord, UserRecord};

/// Durable users, rooms, memberships and messages.
///
/// Lookups return `Ok(None)` when nothing matches; `Err` is reserved for
/// failures. Every call is a single logical transaction and implementations
/// must tolerate concurrent use.
#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    /// Insert a user; `AppError::Conflict` if the username is taken.
    async fn create_user(&self, username: &str, password_hash: &str) -> AppResult<()>;

    async fn find_user(&self, username: &str) -> AppResult<Option<UserRecord>>;

    /// Insert a room with no members and return its id.
    async fn create_room(
        &self,
        kind: RoomKind,
        capacity: usize,
        name: Option<&str>,
    ) -> AppResult<RoomId>;

    /// Return the direct room for the pair, creating it and both memberships
    /// if it does not exist. Concurrent calls for one pair yield one room.
    async fn create_direct_room(&self, a: &str, b: &str) -> AppResult<RoomId>;

    /// Idempotent.
    async fn add_member(&self, room_id: RoomId, username: &str) -> AppResult<()>;

    async fn rename_room(&self, room_id: RoomId, name: &str) -> AppResult<()>;

    async fn find_room(&self, room_id: RoomId) -> AppResult<Option<RoomRecord>>;

    async fn find_direct_room(&self, a: &str, b: &str) -> AppResult<Option<RoomId>>;

    /// Every room with members and last message, ordered by id.
    async fn load_rooms(&self) -> AppResult<Vec<RoomRecord>>;

    async fn append_message(&self, message: &ChatMessage) -> AppResult<()>;

    /// History of a room, oldest first.
    async fn messages(&self, room_id: RoomId) -> AppResult<Vec<ChatMessage>>;

    async fn last_message(&self, room_id: RoomId) -> AppResult<Option<ChatMessage>>;
}
