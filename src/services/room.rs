//! Room actor: one task per active room owning its members, connected
//! sessions and cached last message. All mutation happens on that task.

use std::collections::{BTreeSet, HashMap};
use std::ops::ControlFlow;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::{
    display_name, ChatMessage, Event, EventBody, NewRoom, RoomId, RoomKind, RoomMember, RoomRecord,
};
use crate::services::hub::HubHandle;
use crate::services::session::{DeliveryError, SessionHandle, SessionId};

/// Requests processed by a room, in arrival order.
#[derive(Debug)]
pub enum RoomCommand {
    /// Connect a live session of a member.
    Join(SessionHandle),
    Leave(SessionId),
    /// Authorize a username; persistence has already recorded it.
    AddMember(String),
    /// Cache as last message, then broadcast `new_message`.
    Deliver(ChatMessage),
    Broadcast(Event),
    /// Send every connected session its own `new_room` view.
    Announce,
    /// Send one session its `new_room` view.
    Describe(SessionHandle),
    Rename(String),
    /// Exit if still idle; sent by the hub after `RoomIdle`.
    Retire,
}

#[derive(Clone, Debug)]
pub struct RoomHandle {
    id: RoomId,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Hands the command back if the actor has exited.
    pub fn send(&self, command: RoomCommand) -> Result<(), RoomCommand> {
        self.tx.send(command).map_err(|e| e.0)
    }
}

pub struct Room {
    id: RoomId,
    kind: RoomKind,
    capacity: usize,
    name: Option<String>,
    members: BTreeSet<String>,
    last_message: Option<ChatMessage>,
    sessions: HashMap<SessionId, SessionHandle>,
    hub: HubHandle,
    receiver: mpsc::UnboundedReceiver<RoomCommand>,
}

impl Room {
    /// Start the actor for a stored room.
    pub fn spawn(record: RoomRecord, hub: HubHandle) -> RoomHandle {
        let (tx, receiver) = mpsc::unbounded_channel();
        let room = Room {
            id: record.id,
            kind: record.kind,
            capacity: record.capacity,
            name: record.name,
            members: record.members,
            last_message: record.last_message,
            sessions: HashMap::new(),
            hub,
            receiver,
        };
        let handle = RoomHandle { id: room.id, tx };
        tokio::spawn(room.run());
        handle
    }

    async fn run(mut self) {
        debug!(room_id = self.id, kind = self.kind.as_str(), "room started");
        while let Some(command) = self.receiver.recv().await {
            if self.handle(command).is_break() {
                break;
            }
        }
        debug!(room_id = self.id, "room stopped");
    }

    fn handle(&mut self, command: RoomCommand) -> ControlFlow<()> {
        match command {
            RoomCommand::Join(session) => self.join(session),
            RoomCommand::Leave(session_id) => self.leave(session_id),
            RoomCommand::AddMember(username) => self.add_member(username),
            RoomCommand::Deliver(message) => {
                self.last_message = Some(message.clone());
                match EventBody::NewMessage(message).into_event() {
                    Ok(event) => self.broadcast(&event),
                    Err(e) => warn!(room_id = self.id, error = %e, "encode new_message failed"),
                }
            }
            RoomCommand::Broadcast(event) => self.broadcast(&event),
            RoomCommand::Announce => self.announce(),
            RoomCommand::Describe(session) => self.describe(&session),
            RoomCommand::Rename(name) => {
                self.name = Some(name);
                self.announce();
            }
            RoomCommand::Retire => {
                if self.sessions.is_empty() {
                    self.hub.room_retired(self.id);
                    return ControlFlow::Break(());
                }
                self.hub.retire_declined(self.id);
            }
        }
        ControlFlow::Continue(())
    }

    fn join(&mut self, session: SessionHandle) {
        if !self.members.contains(session.username()) {
            warn!(room_id = self.id, username = %session.username(), "join refused: not a member");
            return;
        }
        if session.is_closing() {
            return;
        }
        self.sessions.insert(session.id(), session);
    }

    fn leave(&mut self, session_id: SessionId) {
        if self.sessions.remove(&session_id).is_some() && self.sessions.is_empty() {
            self.hub.room_idle(self.id);
        }
    }

    fn add_member(&mut self, username: String) {
        if self.members.contains(&username) {
            return;
        }
        if self.members.len() >= self.capacity {
            warn!(room_id = self.id, username = %username, capacity = self.capacity, "room full, member refused");
            return;
        }
        info!(room_id = self.id, username = %username, "member added");
        self.members.insert(username);
    }

    fn broadcast(&mut self, event: &Event) {
        let failed: Vec<(SessionId, DeliveryError)> = self
            .sessions
            .values()
            .filter_map(|s| s.try_deliver(event.clone()).err().map(|e| (s.id(), e)))
            .collect();
        self.drop_sessions(failed);
    }

    fn announce(&mut self) {
        let mut failed = Vec::new();
        for session in self.sessions.values() {
            let view = self.view_for(session);
            match EventBody::NewRoom(view).into_event() {
                Ok(event) => {
                    if let Err(e) = session.try_deliver(event) {
                        failed.push((session.id(), e));
                    }
                }
                Err(e) => warn!(room_id = self.id, error = %e, "encode new_room failed"),
            }
        }
        self.drop_sessions(failed);
    }

    fn describe(&mut self, session: &SessionHandle) {
        if !self.members.contains(session.username()) {
            return;
        }
        let event = match EventBody::NewRoom(self.view_for(session)).into_event() {
            Ok(event) => event,
            Err(e) => {
                warn!(room_id = self.id, error = %e, "encode new_room failed");
                return;
            }
        };
        if let Err(e) = session.try_deliver(event) {
            self.drop_sessions(vec![(session.id(), e)]);
        }
    }

    /// The room as `viewer` sees it. The viewer's own session does not count
    /// towards its own online flag.
    fn view_for(&self, viewer: &SessionHandle) -> NewRoom {
        let members = self
            .members
            .iter()
            .map(|username| RoomMember {
                username: username.clone(),
                online: self
                    .sessions
                    .values()
                    .any(|s| s.username() == username && s.id() != viewer.id()),
                typing: false,
            })
            .collect();
        NewRoom {
            id: self.id,
            name: display_name(self.name.as_deref(), &self.members, viewer.username()),
            members,
            last_message: self.last_message.clone(),
        }
    }

    /// Forget sessions whose queue rejected an event. Full queues belong to
    /// unresponsive peers and are evicted through the hub.
    fn drop_sessions(&mut self, failed: Vec<(SessionId, DeliveryError)>) {
        if failed.is_empty() {
            return;
        }
        for (session_id, error) in failed {
            if let Some(session) = self.sessions.remove(&session_id) {
                if error == DeliveryError::Full {
                    warn!(room_id = self.id, session_id = %session_id, username = %session.username(), "outbound queue full, evicting");
                    self.hub.unregister(session_id);
                }
            }
        }
        if self.sessions.is_empty() {
            self.hub.room_idle(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::hub::HubCommand;
    use std::time::Duration;

    fn record(capacity: usize, members: &[&str]) -> RoomRecord {
        RoomRecord {
            id: 7,
            kind: RoomKind::Group,
            capacity,
            name: None,
            members: members.iter().map(|m| m.to_string()).collect(),
            last_message: None,
        }
    }

    async fn next(rx: &mut mpsc::Receiver<Event>) -> EventBody {
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("queue closed");
        EventBody::from_event(&event).unwrap()
    }

    #[tokio::test]
    async fn broadcast_reaches_connected_members_in_order() {
        let (hub, _hub_rx) = HubHandle::detached();
        let room = Room::spawn(record(2, &["alice", "bob"]), hub);
        let (alice, mut alice_rx) = SessionHandle::new("alice", 8);
        let (bob, mut bob_rx) = SessionHandle::new("bob", 8);
        room.send(RoomCommand::Join(alice)).unwrap();
        room.send(RoomCommand::Join(bob)).unwrap();

        for text in ["one", "two"] {
            room.send(RoomCommand::Deliver(ChatMessage {
                message: text.into(),
                from: "alice".into(),
                room_id: 7,
                sent_at: chrono::Utc::now(),
            }))
            .unwrap();
        }

        for rx in [&mut alice_rx, &mut bob_rx] {
            for expected in ["one", "two"] {
                match next(rx).await {
                    EventBody::NewMessage(m) => assert_eq!(m.message, expected),
                    other => panic!("unexpected {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn non_members_cannot_join() {
        let (hub, _hub_rx) = HubHandle::detached();
        let room = Room::spawn(record(2, &["alice", "bob"]), hub);
        let (mallory, mut mallory_rx) = SessionHandle::new("mallory", 8);
        room.send(RoomCommand::Join(mallory)).unwrap();
        room.send(RoomCommand::Broadcast(
            EventBody::GetRooms.into_event().unwrap(),
        ))
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mallory_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn add_member_respects_capacity() {
        let (hub, _hub_rx) = HubHandle::detached();
        let room = Room::spawn(record(2, &["alice"]), hub);
        room.send(RoomCommand::AddMember("bob".into())).unwrap();
        room.send(RoomCommand::AddMember("carol".into())).unwrap();

        let (carol, mut carol_rx) = SessionHandle::new("carol", 8);
        let (alice, mut alice_rx) = SessionHandle::new("alice", 8);
        room.send(RoomCommand::Join(carol.clone())).unwrap();
        room.send(RoomCommand::Join(alice.clone())).unwrap();
        room.send(RoomCommand::Describe(alice)).unwrap();
        room.send(RoomCommand::Describe(carol)).unwrap();

        match next(&mut alice_rx).await {
            EventBody::NewRoom(view) => {
                let names: Vec<_> = view.members.iter().map(|m| m.username.as_str()).collect();
                assert_eq!(names, ["alice", "bob"]);
                assert_eq!(view.name, "bob");
            }
            other => panic!("unexpected {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted_without_blocking_others() {
        let (hub, mut hub_rx) = HubHandle::detached();
        let room = Room::spawn(record(2, &["alice", "bob"]), hub);
        let (alice, mut alice_rx) = SessionHandle::new("alice", 8);
        let (bob, mut bob_rx) = SessionHandle::new("bob", 1);
        let bob_id = bob.id();
        room.send(RoomCommand::Join(alice)).unwrap();
        room.send(RoomCommand::Join(bob)).unwrap();

        for _ in 0..3 {
            room.send(RoomCommand::Broadcast(EventBody::GetRooms.into_event().unwrap()))
                .unwrap();
        }

        for _ in 0..3 {
            assert_eq!(next(&mut alice_rx).await, EventBody::GetRooms);
        }
        // Bob got the first event only, then was dropped from the room.
        assert_eq!(next(&mut bob_rx).await, EventBody::GetRooms);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bob_rx.try_recv().is_err());

        let evicted = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match hub_rx.recv().await {
                    Some(HubCommand::Unregister(id)) => break id,
                    Some(_) => continue,
                    None => panic!("hub channel closed"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(evicted, bob_id);
    }

    #[tokio::test]
    async fn online_flag_excludes_the_viewers_own_session() {
        let (hub, _hub_rx) = HubHandle::detached();
        let room = Room::spawn(record(2, &["alice", "bob"]), hub);
        let (alice, mut alice_rx) = SessionHandle::new("alice", 8);
        let (alice_phone, _phone_rx) = SessionHandle::new("alice", 8);
        room.send(RoomCommand::Join(alice.clone())).unwrap();
        room.send(RoomCommand::Describe(alice.clone())).unwrap();
        room.send(RoomCommand::Join(alice_phone)).unwrap();
        room.send(RoomCommand::Describe(alice)).unwrap();

        let online = |body: EventBody| match body {
            EventBody::NewRoom(view) => view
                .members
                .into_iter()
                .map(|m| (m.username, m.online))
                .collect::<Vec<_>>(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(
            online(next(&mut alice_rx).await),
            [("alice".to_string(), false), ("bob".to_string(), false)]
        );
        assert_eq!(
            online(next(&mut alice_rx).await),
            [("alice".to_string(), true), ("bob".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn retire_only_when_idle() {
        let (hub, mut hub_rx) = HubHandle::detached();
        let room = Room::spawn(record(2, &["alice", "bob"]), hub);
        let (alice, _alice_rx) = SessionHandle::new("alice", 8);
        let alice_id = alice.id();
        room.send(RoomCommand::Join(alice)).unwrap();
        room.send(RoomCommand::Retire).unwrap();
        room.send(RoomCommand::Leave(alice_id)).unwrap();
        room.send(RoomCommand::Retire).unwrap();

        let mut seen = Vec::new();
        while seen.len() < 3 {
            match tokio::time::timeout(Duration::from_secs(1), hub_rx.recv()).await {
                Ok(Some(HubCommand::RetireDeclined(7))) => seen.push("declined"),
                Ok(Some(HubCommand::RoomIdle(7))) => seen.push("idle"),
                Ok(Some(HubCommand::RoomRetired(7))) => seen.push("retired"),
                Ok(Some(_)) => {}
                _ => panic!("missing room notifications: {seen:?}"),
            }
        }
        assert_eq!(seen, ["declined", "idle", "retired"]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(room.send(RoomCommand::Announce).is_err());
    }
}
