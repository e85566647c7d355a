//! Repositories: users, rooms, memberships and messages in PostgreSQL.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::db::store::ChatStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    ChatMessage, PairKey, RoomId, RoomKind, RoomRecord, UserRecord, DIRECT_CAPACITY,
};

use super::DbPool;

// ---- User ----

#[derive(Debug, FromRow)]
pub struct UserRow {
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

pub async fn user_create(pool: &DbPool, username: &str, password_hash: &str) -> AppResult<()> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        INSERT INTO users (username, password_hash)
        VALUES ($1, $2)
        ON CONFLICT (username) DO NOTHING
        RETURNING username
        "#,
    )
    .bind(username)
    .bind(password_hash)
    .fetch_optional(pool)
    .await?;
    row.map(|_| ())
        .ok_or_else(|| AppError::Conflict("Username already taken".to_string()))
}

pub async fn user_find(pool: &DbPool, username: &str) -> AppResult<Option<UserRow>> {
    let row = sqlx::query_as::<_, UserRow>(
        "SELECT username, password_hash, created_at FROM users WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

// ---- Rooms ----

#[derive(Debug, FromRow)]
pub struct RoomRow {
    pub id: i64,
    pub kind: String,
    pub capacity: i32,
    pub name: Option<String>,
}

#[derive(Debug, FromRow)]
pub struct MemberRow {
    pub room_id: i64,
    pub username: String,
}

fn capacity_to_db(capacity: usize) -> AppResult<i32> {
    i32::try_from(capacity).map_err(|_| AppError::Validation("Room capacity too large".to_string()))
}

pub async fn room_create(
    pool: &DbPool,
    kind: RoomKind,
    capacity: usize,
    name: Option<&str>,
) -> AppResult<RoomId> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO rooms (kind, capacity, name) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(kind.as_str())
    .bind(capacity_to_db(capacity)?)
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn room_create_direct(pool: &DbPool, pair: &PairKey) -> AppResult<RoomId> {
    let key = pair.storage_key();
    let mut tx = pool.begin().await?;

    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO rooms (kind, capacity, direct_key)
        VALUES ($1, $2, $3)
        ON CONFLICT (direct_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(RoomKind::Direct.as_str())
    .bind(capacity_to_db(DIRECT_CAPACITY)?)
    .bind(&key)
    .fetch_optional(&mut *tx)
    .await?;

    let id = match inserted {
        Some((id,)) => id,
        None => {
            let row: (i64,) = sqlx::query_as("SELECT id FROM rooms WHERE direct_key = $1")
                .bind(&key)
                .fetch_one(&mut *tx)
                .await?;
            row.0
        }
    };

    for username in [pair.first(), pair.second()] {
        sqlx::query(
            "INSERT INTO room_users (room_id, username) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(username)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(id)
}

pub async fn room_add_member(pool: &DbPool, room_id: RoomId, username: &str) -> AppResult<()> {
    sqlx::query("INSERT INTO room_users (room_id, username) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(room_id)
        .bind(username)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn room_rename(pool: &DbPool, room_id: RoomId, name: &str) -> AppResult<()> {
    let r = sqlx::query("UPDATE rooms SET name = $1 WHERE id = $2")
        .bind(name)
        .bind(room_id)
        .execute(pool)
        .await?;
    if r.rows_affected() == 0 {
        return Err(AppError::RoomNotFound(room_id));
    }
    Ok(())
}

pub async fn room_find_direct(pool: &DbPool, a: &str, b: &str) -> AppResult<Option<RoomId>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT r.id
        FROM rooms r
        JOIN room_users u1 ON u1.room_id = r.id
        JOIN room_users u2 ON u2.room_id = r.id
        WHERE r.kind = 'direct' AND u1.username = $1 AND u2.username = $2
        ORDER BY r.id
        LIMIT 1
        "#,
    )
    .bind(a)
    .bind(b)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.0))
}

async fn rooms_select(pool: &DbPool, room_id: Option<RoomId>) -> AppResult<Vec<RoomRecord>> {
    let rooms = sqlx::query_as::<_, RoomRow>(
        "SELECT id, kind, capacity, name FROM rooms WHERE ($1::BIGINT IS NULL OR id = $1) ORDER BY id",
    )
    .bind(room_id)
    .fetch_all(pool)
    .await?;

    let members = sqlx::query_as::<_, MemberRow>(
        "SELECT room_id, username FROM room_users WHERE ($1::BIGINT IS NULL OR room_id = $1)",
    )
    .bind(room_id)
    .fetch_all(pool)
    .await?;

    let last = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT DISTINCT ON (room_id) room_id, author, message, sent_at
        FROM messages
        WHERE ($1::BIGINT IS NULL OR room_id = $1)
        ORDER BY room_id, sent_at DESC, id DESC
        "#,
    )
    .bind(room_id)
    .fetch_all(pool)
    .await?;

    let mut members_by_room: HashMap<i64, BTreeSet<String>> = HashMap::new();
    for m in members {
        members_by_room.entry(m.room_id).or_default().insert(m.username);
    }
    let mut last_by_room: HashMap<i64, ChatMessage> = last
        .into_iter()
        .map(|row| (row.room_id, row.into_message()))
        .collect();

    Ok(rooms
        .into_iter()
        .map(|row| RoomRecord {
            id: row.id,
            kind: RoomKind::from_db(&row.kind),
            capacity: usize::try_from(row.capacity).unwrap_or(0),
            name: row.name,
            members: members_by_room.remove(&row.id).unwrap_or_default(),
            last_message: last_by_room.remove(&row.id),
        })
        .collect())
}

// ---- Messages ----

#[derive(Debug, FromRow)]
pub struct MessageRow {
    pub room_id: i64,
    pub author: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> ChatMessage {
        ChatMessage {
            message: self.message,
            from: self.author,
            room_id: self.room_id,
            sent_at: self.sent_at,
        }
    }
}

pub async fn message_append(pool: &DbPool, message: &ChatMessage) -> AppResult<()> {
    sqlx::query("INSERT INTO messages (room_id, author, message, sent_at) VALUES ($1, $2, $3, $4)")
        .bind(message.room_id)
        .bind(&message.from)
        .bind(&message.message)
        .bind(message.sent_at)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn messages_by_room(pool: &DbPool, room_id: RoomId) -> AppResult<Vec<ChatMessage>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        "SELECT room_id, author, message, sent_at FROM messages WHERE room_id = $1 ORDER BY sent_at, id",
    )
    .bind(room_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(MessageRow::into_message).collect())
}

pub async fn message_last(pool: &DbPool, room_id: RoomId) -> AppResult<Option<ChatMessage>> {
    let row = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT room_id, author, message, sent_at
        FROM messages
        WHERE room_id = $1
        ORDER BY sent_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(room_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(MessageRow::into_message))
}

// ---- Gateway ----

/// [`ChatStore`] backed by the PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn create_user(&self, username: &str, password_hash: &str) -> AppResult<()> {
        user_create(&self.pool, username, password_hash).await
    }

    async fn find_user(&self, username: &str) -> AppResult<Option<UserRecord>> {
        Ok(user_find(&self.pool, username).await?.map(|row| UserRecord {
            username: row.username,
            password_hash: row.password_hash,
        }))
    }

    async fn create_room(
        &self,
        kind: RoomKind,
        capacity: usize,
        name: Option<&str>,
    ) -> AppResult<RoomId> {
        room_create(&self.pool, kind, capacity, name).await
    }

    async fn create_direct_room(&self, a: &str, b: &str) -> AppResult<RoomId> {
        room_create_direct(&self.pool, &PairKey::new(a, b)).await
    }

    async fn add_member(&self, room_id: RoomId, username: &str) -> AppResult<()> {
        room_add_member(&self.pool, room_id, username).await
    }

    async fn rename_room(&self, room_id: RoomId, name: &str) -> AppResult<()> {
        room_rename(&self.pool, room_id, name).await
    }

    async fn find_room(&self, room_id: RoomId) -> AppResult<Option<RoomRecord>> {
        Ok(rooms_select(&self.pool, Some(room_id)).await?.into_iter().next())
    }

    async fn find_direct_room(&self, a: &str, b: &str) -> AppResult<Option<RoomId>> {
        room_find_direct(&self.pool, a, b).await
    }

    async fn load_rooms(&self) -> AppResult<Vec<RoomRecord>> {
        rooms_select(&self.pool, None).await
    }

    async fn append_message(&self, message: &ChatMessage) -> AppResult<()> {
        message_append(&self.pool, message).await
    }

    async fn messages(&self, room_id: RoomId) -> AppResult<Vec<ChatMessage>> {
        messages_by_room(&self.pool, room_id).await
    }

    async fn last_message(&self, room_id: RoomId) -> AppResult<Option<ChatMessage>> {
        message_last(&self.pool, room_id).await
    }
}
