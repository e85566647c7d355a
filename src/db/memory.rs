//! In-process [`ChatStore`] for running without PostgreSQL and for tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::db::store::ChatStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    ChatMessage, PairKey, RoomId, RoomKind, RoomRecord, UserRecord, DIRECT_CAPACITY,
};

#[derive(Debug)]
struct StoredRoom {
    kind: RoomKind,
    capacity: usize,
    name: Option<String>,
    members: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<String, String>,
    rooms: BTreeMap<RoomId, StoredRoom>,
    direct: HashMap<PairKey, RoomId>,
    messages: BTreeMap<RoomId, Vec<ChatMessage>>,
    next_room_id: RoomId,
}

impl Tables {
    fn insert_room(&mut self, kind: RoomKind, capacity: usize, name: Option<&str>) -> RoomId {
        self.next_room_id += 1;
        let id = self.next_room_id;
        self.rooms.insert(
            id,
            StoredRoom {
                kind,
                capacity,
                name: name.map(str::to_string),
                members: BTreeSet::new(),
            },
        );
        id
    }

    fn record(&self, id: RoomId, room: &StoredRoom) -> RoomRecord {
        RoomRecord {
            id,
            kind: room.kind,
            capacity: room.capacity,
            name: room.name.clone(),
            members: room.members.clone(),
            last_message: self.messages.get(&id).and_then(|m| m.last().cloned()),
        }
    }
}

/// Tables kept in memory behind a single async lock; each call is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms ever created.
    pub async fn room_count(&self) -> usize {
        self.tables.read().await.rooms.len()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_user(&self, username: &str, password_hash: &str) -> AppResult<()> {
        let mut t = self.tables.write().await;
        if t.users.contains_key(username) {
            return Err(AppError::Conflict("Username already taken".to_string()));
        }
        t.users.insert(username.to_string(), password_hash.to_string());
        Ok(())
    }

    async fn find_user(&self, username: &str) -> AppResult<Option<UserRecord>> {
        let t = self.tables.read().await;
        Ok(t.users.get(username).map(|hash| UserRecord {
            username: username.to_string(),
            password_hash: hash.clone(),
        }))
    }

    async fn create_room(
        &self,
        kind: RoomKind,
        capacity: usize,
        name: Option<&str>,
    ) -> AppResult<RoomId> {
        Ok(self.tables.write().await.insert_room(kind, capacity, name))
    }

    async fn create_direct_room(&self, a: &str, b: &str) -> AppResult<RoomId> {
        let pair = PairKey::new(a, b);
        let mut t = self.tables.write().await;
        if let Some(id) = t.direct.get(&pair) {
            return Ok(*id);
        }
        let id = t.insert_room(RoomKind::Direct, DIRECT_CAPACITY, None);
        if let Some(room) = t.rooms.get_mut(&id) {
            room.members.insert(pair.first().to_string());
            room.members.insert(pair.second().to_string());
        }
        t.direct.insert(pair, id);
        Ok(id)
    }

    async fn add_member(&self, room_id: RoomId, username: &str) -> AppResult<()> {
        let mut t = self.tables.write().await;
        let room = t
            .rooms
            .get_mut(&room_id)
            .ok_or(AppError::RoomNotFound(room_id))?;
        room.members.insert(username.to_string());
        Ok(())
    }

    async fn rename_room(&self, room_id: RoomId, name: &str) -> AppResult<()> {
        let mut t = self.tables.write().await;
        let room = t
            .rooms
            .get_mut(&room_id)
            .ok_or(AppError::RoomNotFound(room_id))?;
        room.name = Some(name.to_string());
        Ok(())
    }

    async fn find_room(&self, room_id: RoomId) -> AppResult<Option<RoomRecord>> {
        let t = self.tables.read().await;
        Ok(t.rooms.get(&room_id).map(|room| t.record(room_id, room)))
    }

    async fn find_direct_room(&self, a: &str, b: &str) -> AppResult<Option<RoomId>> {
        let t = self.tables.read().await;
        Ok(t.rooms
            .iter()
            .find(|(_, room)| {
                room.kind == RoomKind::Direct
                    && room.members.contains(a)
                    && room.members.contains(b)
            })
            .map(|(id, _)| *id))
    }

    async fn load_rooms(&self) -> AppResult<Vec<RoomRecord>> {
        let t = self.tables.read().await;
        Ok(t.rooms.iter().map(|(id, room)| t.record(*id, room)).collect())
    }

    async fn append_message(&self, message: &ChatMessage) -> AppResult<()> {
        let mut t = self.tables.write().await;
        if !t.rooms.contains_key(&message.room_id) {
            return Err(AppError::RoomNotFound(message.room_id));
        }
        t.messages
            .entry(message.room_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn messages(&self, room_id: RoomId) -> AppResult<Vec<ChatMessage>> {
        let t = self.tables.read().await;
        Ok(t.messages.get(&room_id).cloned().unwrap_or_default())
    }

    async fn last_message(&self, room_id: RoomId) -> AppResult<Option<ChatMessage>> {
        let t = self.tables.read().await;
        Ok(t.messages.get(&room_id).and_then(|m| m.last().cloned()))
    }
}
