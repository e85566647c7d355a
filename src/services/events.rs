//! Client-to-server event handlers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::db::ChatStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    ChatMessage, CreateRoom, Event, EventBody, GetMessages, RenameRoom, SendMessage,
};
use crate::services::dispatch::EventHandler;
use crate::services::hub::HubHandle;
use crate::services::session::{DeliveryError, SessionHandle};

const MAX_ROOM_NAME_CHARS: usize = 64;

/// What a handler may touch: the sending session and the shared services.
pub struct EventContext {
    pub session: SessionHandle,
    pub hub: HubHandle,
    pub store: Arc<dyn ChatStore>,
    /// How long a reply may wait for space in the session's own queue.
    pub reply_wait: Duration,
}

impl EventContext {
    pub fn new(
        session: SessionHandle,
        hub: HubHandle,
        store: Arc<dyn ChatStore>,
        reply_wait: Duration,
    ) -> Self {
        Self {
            session,
            hub,
            store,
            reply_wait,
        }
    }

    pub fn username(&self) -> &str {
        self.session.username()
    }

    /// Queue an event for the requesting session. A queue that stays full
    /// for `reply_wait` gets the session evicted.
    pub async fn reply(&self, body: EventBody) -> AppResult<()> {
        let event = body.into_event()?;
        match self.session.deliver(event, self.reply_wait).await {
            Ok(()) => Ok(()),
            Err(DeliveryError::Full) => {
                warn!(session_id = %self.session.id(), "reply queue stayed full, evicting");
                self.hub.unregister(self.session.id());
                Err(AppError::SessionClosed)
            }
            Err(DeliveryError::Closed) => Err(AppError::SessionClosed),
        }
    }
}

pub struct SendMessageHandler;
pub struct GetMessagesHandler;
pub struct GetRoomsHandler;
pub struct CreateRoomHandler;
pub struct RenameRoomHandler;
pub struct DisconnectHandler;
pub struct ClientConnectedHandler;
pub struct ClientDisconnectedHandler;

#[async_trait]
impl EventHandler for SendMessageHandler {
    async fn handle(&self, event: &Event, ctx: &EventContext) -> AppResult<()> {
        send_message(ctx, event.payload_as()?).await
    }
}

#[async_trait]
impl EventHandler for GetMessagesHandler {
    async fn handle(&self, event: &Event, ctx: &EventContext) -> AppResult<()> {
        get_messages(ctx, event.payload_as()?).await
    }
}

#[async_trait]
impl EventHandler for GetRoomsHandler {
    async fn handle(&self, _event: &Event, ctx: &EventContext) -> AppResult<()> {
        ctx.hub.describe_rooms(ctx.session.clone())
    }
}

#[async_trait]
impl EventHandler for CreateRoomHandler {
    async fn handle(&self, event: &Event, ctx: &EventContext) -> AppResult<()> {
        create_room(ctx, event.payload_as()?).await
    }
}

#[async_trait]
impl EventHandler for RenameRoomHandler {
    async fn handle(&self, event: &Event, ctx: &EventContext) -> AppResult<()> {
        rename_room(ctx, event.payload_as()?).await
    }
}

#[async_trait]
impl EventHandler for DisconnectHandler {
    async fn handle(&self, _event: &Event, ctx: &EventContext) -> AppResult<()> {
        debug!(username = %ctx.username(), session_id = %ctx.session.id(), "client requested disconnect");
        ctx.hub.unregister(ctx.session.id());
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ClientConnectedHandler {
    async fn handle(&self, _event: &Event, ctx: &EventContext) -> AppResult<()> {
        ctx.hub.presence(ctx.username(), true)
    }
}

#[async_trait]
impl EventHandler for ClientDisconnectedHandler {
    async fn handle(&self, _event: &Event, ctx: &EventContext) -> AppResult<()> {
        ctx.hub.presence(ctx.username(), false)
    }
}

/// Persist first, then hand the message to the room for fan-out.
#[instrument(skip_all, fields(username = %ctx.username(), room_id = payload.room_id))]
async fn send_message(ctx: &EventContext, payload: SendMessage) -> AppResult<()> {
    if payload.message.trim().is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }
    ctx.hub.authorize(ctx.username(), payload.room_id).await?;

    let message = ChatMessage {
        message: payload.message,
        from: ctx.username().to_string(),
        room_id: payload.room_id,
        sent_at: Utc::now(),
    };
    ctx.store.append_message(&message).await?;
    ctx.hub.deliver(message.room_id, message)
}

#[instrument(skip_all, fields(username = %ctx.username(), room_id = payload.room_id))]
async fn get_messages(ctx: &EventContext, payload: GetMessages) -> AppResult<()> {
    ctx.hub.authorize(ctx.username(), payload.room_id).await?;
    let history = ctx.store.messages(payload.room_id).await?;
    debug!(count = history.len(), "replaying history");
    for message in history {
        ctx.reply(EventBody::NewMessage(message)).await?;
    }
    Ok(())
}

#[instrument(skip_all, fields(username = %ctx.username(), target = %payload.username))]
async fn create_room(ctx: &EventContext, payload: CreateRoom) -> AppResult<()> {
    let target = payload.username.trim();
    if target == ctx.username() {
        return Err(AppError::Validation(
            "cannot open a direct room with yourself".to_string(),
        ));
    }
    if ctx.store.find_user(target).await?.is_none() {
        return Err(AppError::UserNotFound(target.to_string()));
    }

    let room_id = ctx.hub.open_direct_room(ctx.username(), target).await?;
    info!(room_id, "direct room ready");
    ctx.hub.announce(room_id)
}

#[instrument(skip_all, fields(username = %ctx.username(), room_id = payload.room_id))]
async fn rename_room(ctx: &EventContext, payload: RenameRoom) -> AppResult<()> {
    let name = payload.name.trim();
    let chars = name.chars().count();
    if chars == 0 || chars > MAX_ROOM_NAME_CHARS {
        return Err(AppError::Validation(format!(
            "room name must be 1-{} characters",
            MAX_ROOM_NAME_CHARS
        )));
    }
    ctx.hub.authorize(ctx.username(), payload.room_id).await?;
    ctx.store.rename_room(payload.room_id, name).await?;
    info!(name = %name, "room renamed");
    ctx.hub.rename(payload.room_id, name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::Presence;
    use crate::services::hub::HubCommand;

    #[tokio::test]
    async fn stalled_reply_evicts_the_requester() {
        let (hub, mut hub_rx) = HubHandle::detached();
        let (session, _queue) = SessionHandle::new("alice", 1);
        let ctx = EventContext::new(
            session.clone(),
            hub,
            Arc::new(MemoryStore::new()),
            Duration::from_millis(20),
        );
        let presence = || EventBody::UserConnected(Presence { username: "bob".into() });

        ctx.reply(presence()).await.unwrap();
        assert!(matches!(ctx.reply(presence()).await, Err(AppError::SessionClosed)));
        assert!(matches!(hub_rx.recv().await, Some(HubCommand::Unregister(id)) if id == session.id()));
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_authorization() {
        let (hub, mut hub_rx) = HubHandle::detached();
        let (session, _queue) = SessionHandle::new("alice", 4);
        let ctx = EventContext::new(session, hub, Arc::new(MemoryStore::new()), Duration::from_millis(20));
        let payload = SendMessage { message: "   ".into(), from: String::new(), room_id: 1 };
        assert!(matches!(send_message(&ctx, payload).await, Err(AppError::Validation(_))));
        assert!(hub_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rename_validates_length() {
        let (hub, _hub_rx) = HubHandle::detached();
        let (session, _queue) = SessionHandle::new("alice", 4);
        let ctx = EventContext::new(session, hub, Arc::new(MemoryStore::new()), Duration::from_millis(20));
        for name in ["  ".to_string(), "x".repeat(65)] {
            let payload = RenameRoom { room_id: 1, name };
            assert!(matches!(rename_room(&ctx, payload).await, Err(AppError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn self_pairing_is_rejected() {
        let (hub, _hub_rx) = HubHandle::detached();
        let (session, _queue) = SessionHandle::new("alice", 4);
        let ctx = EventContext::new(session, hub, Arc::new(MemoryStore::new()), Duration::from_millis(20));
        let payload = CreateRoom { username: " alice ".into() };
        assert!(matches!(create_room(&ctx, payload).await, Err(AppError::Validation(_))));
    }
}
