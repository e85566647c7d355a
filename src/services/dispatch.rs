//! Dispatch table mapping event kinds to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::models::{Event, EventKind};
use crate::services::events::{self, EventContext};

/// Handles one client-to-server event kind. Runs on the sender's read pump.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event, ctx: &EventContext) -> AppResult<()>;
}

/// Mutable only while the server starts.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations for the same kind replace earlier ones.
    pub fn register(mut self, kind: EventKind, handler: impl EventHandler + 'static) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

/// Immutable routing table, shared by every connection.
pub struct Dispatcher {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Every client-to-server handler.
    pub fn standard() -> Self {
        Self::builder()
            .register(EventKind::SendMessage, events::SendMessageHandler)
            .register(EventKind::GetMessages, events::GetMessagesHandler)
            .register(EventKind::GetRooms, events::GetRoomsHandler)
            .register(EventKind::CreateRoom, events::CreateRoomHandler)
            .register(EventKind::RenameRoom, events::RenameRoomHandler)
            .register(EventKind::Disconnect, events::DisconnectHandler)
            .register(EventKind::ClientConnected, events::ClientConnectedHandler)
            .register(EventKind::ClientDisconnected, events::ClientDisconnectedHandler)
            .build()
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Resolve the event's tag and run its handler to completion.
    pub async fn route(&self, event: &Event, ctx: &EventContext) -> AppResult<()> {
        let kind = event.kind()?;
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| AppError::UnsupportedEventType(kind.to_string()))?;
        handler.handle(event, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::db::MemoryStore;
    use crate::models::EventBody;
    use crate::services::hub::HubHandle;
    use crate::services::session::SessionHandle;

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _event: &Event, _ctx: &EventContext) -> AppResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn context() -> EventContext {
        let (hub, _rx) = HubHandle::detached();
        let (session, _queue) = SessionHandle::new("alice", 4);
        EventContext::new(
            session,
            hub,
            Arc::new(MemoryStore::new()),
            std::time::Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn routes_registered_kind() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::builder()
            .register(EventKind::GetRooms, Counting(calls.clone()))
            .build();
        let event = EventBody::GetRooms.into_event().unwrap();
        dispatcher.route(&event, &context()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_kind_is_unsupported() {
        let dispatcher = Dispatcher::builder().build();
        let event = EventBody::GetRooms.into_event().unwrap();
        assert!(matches!(
            dispatcher.route(&event, &context()).await,
            Err(AppError::UnsupportedEventType(t)) if t == "get_rooms"
        ));
    }

    #[tokio::test]
    async fn unknown_tag_is_unsupported() {
        let event = Event::decode(br#"{"type":"typing","payload":{}}"#).unwrap();
        assert!(matches!(
            Dispatcher::standard().route(&event, &context()).await,
            Err(AppError::UnsupportedEventType(t)) if t == "typing"
        ));
    }

    #[test]
    fn standard_table_covers_client_events_only() {
        let dispatcher = Dispatcher::standard();
        for kind in [
            EventKind::SendMessage,
            EventKind::GetMessages,
            EventKind::GetRooms,
            EventKind::CreateRoom,
            EventKind::RenameRoom,
            EventKind::Disconnect,
            EventKind::ClientConnected,
            EventKind::ClientDisconnected,
        ] {
            assert!(dispatcher.handles(kind), "{kind} missing");
        }
        for kind in [EventKind::NewMessage, EventKind::NewRoom, EventKind::UserConnected] {
            assert!(!dispatcher.handles(kind), "{kind} should not be routed");
        }
    }
}
