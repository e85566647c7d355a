//! Hub actor: the process-wide registry of sessions and rooms.
//!
//! A single task owns every registry and processes commands one at a time,
//! which is what makes registration, room assignment and teardown race-free.
//! The hub never awaits persistence itself: store calls run in spawned jobs
//! that report back with a command, and room commands addressed to a room
//! whose actor is not running are buffered until it is.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::db::ChatStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    ChatMessage, Event, EventBody, PairKey, Presence, RoomId, RoomKind, RoomRecord,
};
use crate::services::room::{Room, RoomCommand, RoomHandle};
use crate::services::session::{SessionHandle, SessionId};

#[derive(Debug, Clone, Default)]
pub struct HubSettings {
    /// Seats per lobby room. `None` disables lobby pairing.
    pub lobby_capacity: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct HubStats {
    pub sessions: usize,
    pub users: usize,
    pub rooms: usize,
}

/// Everything the hub task reacts to.
#[derive(Debug)]
pub enum HubCommand {
    Register(SessionHandle),
    Unregister(SessionId),
    Authorize {
        username: String,
        room_id: RoomId,
        reply: oneshot::Sender<AppResult<()>>,
    },
    OpenDirectRoom {
        pair: PairKey,
        reply: oneshot::Sender<AppResult<RoomId>>,
    },
    ToRoom {
        room_id: RoomId,
        command: RoomCommand,
    },
    DescribeRooms(SessionHandle),
    Presence {
        username: String,
        online: bool,
    },
    Stats(oneshot::Sender<HubStats>),
    Shutdown,

    // Reports from room actors.
    RoomIdle(RoomId),
    RoomRetired(RoomId),
    RetireDeclined(RoomId),

    // Results of persistence jobs.
    DirectRoomResolved {
        pair: PairKey,
        result: AppResult<RoomRecord>,
    },
    RoomLoaded {
        room_id: RoomId,
        result: AppResult<Option<RoomRecord>>,
    },
    LobbyRoomCreated(AppResult<RoomId>),
    LobbySeated {
        room_id: RoomId,
        username: String,
        result: AppResult<()>,
    },
}

/// Cloneable sender side of the hub.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    fn send(&self, command: HubCommand) -> AppResult<()> {
        self.tx.send(command).map_err(|_| AppError::HubUnavailable)
    }

    /// Fire-and-forget variant for teardown paths, where a stopped hub has
    /// nothing left to clean up.
    fn notify(&self, command: HubCommand) {
        if self.tx.send(command).is_err() {
            debug!("hub stopped, notification dropped");
        }
    }

    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> AppResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| AppError::HubUnavailable)
    }

    pub fn register(&self, session: SessionHandle) -> AppResult<()> {
        self.send(HubCommand::Register(session))
    }

    /// Idempotent.
    pub fn unregister(&self, session_id: SessionId) {
        self.notify(HubCommand::Unregister(session_id));
    }

    /// `RoomNotFound` for unknown rooms, `Forbidden` when the user is not a member.
    pub async fn authorize(&self, username: &str, room_id: RoomId) -> AppResult<()> {
        self.ask(|reply| HubCommand::Authorize {
            username: username.to_string(),
            room_id,
            reply,
        })
        .await?
    }

    /// Look up or create the direct room between two users.
    pub async fn open_direct_room(&self, a: &str, b: &str) -> AppResult<RoomId> {
        let pair = PairKey::new(a, b);
        self.ask(|reply| HubCommand::OpenDirectRoom { pair, reply }).await?
    }

    pub fn deliver(&self, room_id: RoomId, message: ChatMessage) -> AppResult<()> {
        self.to_room(room_id, RoomCommand::Deliver(message))
    }

    pub fn broadcast(&self, room_id: RoomId, event: Event) -> AppResult<()> {
        self.to_room(room_id, RoomCommand::Broadcast(event))
    }

    pub fn announce(&self, room_id: RoomId) -> AppResult<()> {
        self.to_room(room_id, RoomCommand::Announce)
    }

    pub fn rename(&self, room_id: RoomId, name: String) -> AppResult<()> {
        self.to_room(room_id, RoomCommand::Rename(name))
    }

    fn to_room(&self, room_id: RoomId, command: RoomCommand) -> AppResult<()> {
        self.send(HubCommand::ToRoom { room_id, command })
    }

    /// Every room of the session's user sends it a `new_room`.
    pub fn describe_rooms(&self, session: SessionHandle) -> AppResult<()> {
        self.send(HubCommand::DescribeRooms(session))
    }

    /// Broadcast `user_connected` / `user_disconnected` to the user's rooms.
    pub fn presence(&self, username: &str, online: bool) -> AppResult<()> {
        self.send(HubCommand::Presence {
            username: username.to_string(),
            online,
        })
    }

    pub async fn stats(&self) -> AppResult<HubStats> {
        self.ask(HubCommand::Stats).await
    }

    pub fn shutdown(&self) {
        self.notify(HubCommand::Shutdown);
    }

    pub(crate) fn room_idle(&self, room_id: RoomId) {
        self.notify(HubCommand::RoomIdle(room_id));
    }

    pub(crate) fn room_retired(&self, room_id: RoomId) {
        self.notify(HubCommand::RoomRetired(room_id));
    }

    pub(crate) fn retire_declined(&self, room_id: RoomId) {
        self.notify(HubCommand::RetireDeclined(room_id));
    }

    /// A handle wired to a bare channel instead of a running hub.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<HubCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Where a room's actor is in its life cycle.
enum RoomSlot {
    Running(RoomHandle),
    /// `Retire` sent; commands wait until the room answers.
    Retiring {
        handle: RoomHandle,
        backlog: Vec<RoomCommand>,
    },
    /// Reload from the store in flight.
    Loading { backlog: Vec<RoomCommand> },
    /// No actor; started again on the next command.
    Dormant,
}

struct WaitingRoom {
    id: RoomId,
    seats_taken: usize,
}

/// Group-room pairing state.
struct Lobby {
    capacity: usize,
    /// Rooms below capacity, oldest first.
    waiting: VecDeque<WaitingRoom>,
    /// Users seated in the room currently being created.
    forming: Option<Vec<String>>,
    /// Users who arrived while the forming room was already full.
    deferred: Vec<String>,
    /// Users with a seat request in flight.
    seating: HashSet<String>,
}

enum Seat {
    Existing(RoomId),
    Queued,
    CreateRoom,
}

impl Lobby {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            waiting: VecDeque::new(),
            forming: None,
            deferred: Vec::new(),
            seating: HashSet::new(),
        }
    }

    fn take_seat(&mut self, username: String) -> Seat {
        if let Some(front) = self.waiting.front_mut() {
            front.seats_taken += 1;
            let id = front.id;
            if front.seats_taken >= self.capacity {
                self.waiting.pop_front();
            }
            return Seat::Existing(id);
        }
        match self.forming.as_mut() {
            Some(forming) if forming.len() < self.capacity => {
                forming.push(username);
                Seat::Queued
            }
            Some(_) => {
                self.deferred.push(username);
                Seat::Queued
            }
            None => {
                self.forming = Some(vec![username]);
                Seat::CreateRoom
            }
        }
    }

    /// Give back a seat whose membership could not be stored.
    fn release_seat(&mut self, room_id: RoomId) {
        if let Some(room) = self.waiting.iter_mut().find(|room| room.id == room_id) {
            room.seats_taken = room.seats_taken.saturating_sub(1);
        } else {
            self.waiting.push_back(WaitingRoom {
                id: room_id,
                seats_taken: self.capacity.saturating_sub(1),
            });
        }
    }
}

pub struct Hub {
    store: Arc<dyn ChatStore>,
    handle: HubHandle,
    receiver: mpsc::UnboundedReceiver<HubCommand>,
    /// username -> live sessions.
    sessions: HashMap<String, HashMap<SessionId, SessionHandle>>,
    session_users: HashMap<SessionId, String>,
    rooms: HashMap<RoomId, RoomSlot>,
    /// username -> rooms the user is authorized in.
    memberships: HashMap<String, BTreeSet<RoomId>>,
    direct_rooms: HashMap<PairKey, RoomId>,
    pending_direct: HashMap<PairKey, Vec<oneshot::Sender<AppResult<RoomId>>>>,
    lobby: Option<Lobby>,
}

impl Hub {
    /// Load every stored room, start its actor, and spawn the hub task.
    /// Returns once state is warm, before any connection is accepted.
    pub async fn start(store: Arc<dyn ChatStore>, settings: HubSettings) -> AppResult<HubHandle> {
        let records = store.load_rooms().await?;
        let (tx, receiver) = mpsc::unbounded_channel();
        let handle = HubHandle { tx };

        let mut hub = Hub {
            store,
            handle: handle.clone(),
            receiver,
            sessions: HashMap::new(),
            session_users: HashMap::new(),
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            direct_rooms: HashMap::new(),
            pending_direct: HashMap::new(),
            lobby: settings.lobby_capacity.map(Lobby::new),
        };
        for record in records {
            hub.adopt(record);
        }
        info!(rooms = hub.rooms.len(), lobby = hub.lobby.is_some(), "hub started");

        tokio::spawn(hub.run());
        Ok(handle)
    }

    fn adopt(&mut self, record: RoomRecord) {
        for username in &record.members {
            self.memberships
                .entry(username.clone())
                .or_default()
                .insert(record.id);
        }
        if record.kind == RoomKind::Direct {
            if let Some(pair) = PairKey::from_members(&record.members) {
                self.direct_rooms.insert(pair, record.id);
            }
        }
        if let Some(lobby) = self.lobby.as_mut() {
            if record.kind == RoomKind::Group && record.members.len() < record.capacity.min(lobby.capacity) {
                lobby.waiting.push_back(WaitingRoom {
                    id: record.id,
                    seats_taken: record.members.len(),
                });
            }
        }
        self.start_room(record, Vec::new());
    }

    /// Spawn the actor and connect every live session of its members.
    /// Joins and leaves in `backlog` are superseded by the registry.
    fn start_room(&mut self, record: RoomRecord, backlog: Vec<RoomCommand>) {
        let id = record.id;
        let handle = Room::spawn(record, self.handle.clone());
        let live: Vec<SessionHandle> = self
            .sessions
            .iter()
            .filter(|(username, _)| {
                self.memberships
                    .get(username.as_str())
                    .is_some_and(|rooms| rooms.contains(&id))
            })
            .flat_map(|(_, sessions)| sessions.values().cloned())
            .collect();
        // Members added while loading must be known before their sessions join.
        let (added, pending): (Vec<_>, Vec<_>) = backlog
            .into_iter()
            .filter(|command| !matches!(command, RoomCommand::Join(_) | RoomCommand::Leave(_)))
            .partition(|command| matches!(command, RoomCommand::AddMember(_)));
        let handle = self.flush(
            handle,
            added
                .into_iter()
                .chain(live.into_iter().map(RoomCommand::Join))
                .chain(pending),
        );
        self.rooms.insert(id, RoomSlot::Running(handle));
    }

    async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            if self.handle_command(command).is_break() {
                break;
            }
        }
        info!("hub stopped");
    }

    fn handle_command(&mut self, command: HubCommand) -> ControlFlow<()> {
        match command {
            HubCommand::Register(session) => self.register(session),
            HubCommand::Unregister(session_id) => self.unregister(session_id),
            HubCommand::Authorize {
                username,
                room_id,
                reply,
            } => {
                let _ = reply.send(self.authorize(&username, room_id));
            }
            HubCommand::OpenDirectRoom { pair, reply } => self.open_direct_room(pair, reply),
            HubCommand::ToRoom { room_id, command } => self.dispatch(room_id, command),
            HubCommand::DescribeRooms(session) => {
                for room_id in self.rooms_of(session.username()) {
                    self.dispatch(room_id, RoomCommand::Describe(session.clone()));
                }
            }
            HubCommand::Presence { username, online } => self.broadcast_presence(&username, online),
            HubCommand::Stats(reply) => {
                let _ = reply.send(HubStats {
                    sessions: self.session_users.len(),
                    users: self.sessions.len(),
                    rooms: self.rooms.len(),
                });
            }
            HubCommand::Shutdown => {
                for session in self.sessions.values().flat_map(HashMap::values) {
                    session.close();
                }
                self.sessions.clear();
                self.session_users.clear();
                self.rooms.clear();
                return ControlFlow::Break(());
            }
            HubCommand::RoomIdle(room_id) => self.room_idle(room_id),
            HubCommand::RoomRetired(room_id) => self.room_retired(room_id),
            HubCommand::RetireDeclined(room_id) => {
                if let Some(RoomSlot::Retiring { handle, backlog }) = self.rooms.remove(&room_id) {
                    let handle = self.flush(handle, backlog);
                    self.rooms.insert(room_id, RoomSlot::Running(handle));
                }
            }
            HubCommand::DirectRoomResolved { pair, result } => self.direct_room_resolved(pair, result),
            HubCommand::RoomLoaded { room_id, result } => self.room_loaded(room_id, result),
            HubCommand::LobbyRoomCreated(result) => self.lobby_room_created(result),
            HubCommand::LobbySeated {
                room_id,
                username,
                result,
            } => self.lobby_seated(room_id, username, result),
        }
        ControlFlow::Continue(())
    }

    fn rooms_of(&self, username: &str) -> Vec<RoomId> {
        self.memberships
            .get(username)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    fn sessions_of(&self, username: &str) -> Vec<SessionHandle> {
        self.sessions
            .get(username)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    fn register(&mut self, session: SessionHandle) {
        if session.is_closing() || self.session_users.contains_key(&session.id()) {
            return;
        }
        let username = session.username().to_string();
        self.session_users.insert(session.id(), username.clone());
        let live = self.sessions.entry(username.clone()).or_default();
        let first = live.is_empty();
        live.insert(session.id(), session.clone());

        let rooms = self.rooms_of(&username);
        for room_id in &rooms {
            self.dispatch(*room_id, RoomCommand::Join(session.clone()));
        }
        if first {
            self.broadcast_presence(&username, true);
        }
        if rooms.is_empty() {
            self.seat_in_lobby(username.clone());
        }
        info!(
            username = %username,
            session_id = %session.id(),
            rooms = rooms.len(),
            sessions = self.session_users.len(),
            "session registered"
        );
    }

    fn unregister(&mut self, session_id: SessionId) {
        let Some(username) = self.session_users.remove(&session_id) else {
            return;
        };
        let session = self
            .sessions
            .get_mut(&username)
            .and_then(|live| live.remove(&session_id));
        let last = self.sessions.get(&username).map_or(true, HashMap::is_empty);
        if last {
            self.sessions.remove(&username);
        }
        for room_id in self.rooms_of(&username) {
            self.dispatch(room_id, RoomCommand::Leave(session_id));
        }
        if let Some(session) = session {
            session.close();
        }
        if last {
            self.broadcast_presence(&username, false);
        }
        info!(
            username = %username,
            session_id = %session_id,
            sessions = self.session_users.len(),
            "session unregistered"
        );
    }

    fn authorize(&self, username: &str, room_id: RoomId) -> AppResult<()> {
        if !self.rooms.contains_key(&room_id) {
            return Err(AppError::RoomNotFound(room_id));
        }
        let member = self
            .memberships
            .get(username)
            .is_some_and(|rooms| rooms.contains(&room_id));
        if !member {
            return Err(AppError::Forbidden(format!(
                "{} is not a member of room {}",
                username, room_id
            )));
        }
        Ok(())
    }

    fn broadcast_presence(&mut self, username: &str, online: bool) {
        let presence = Presence {
            username: username.to_string(),
        };
        let body = if online {
            EventBody::UserConnected(presence)
        } else {
            EventBody::UserDisconnected(presence)
        };
        let event = match body.into_event() {
            Ok(event) => event,
            Err(e) => {
                warn!(username = %username, error = %e, "encode presence failed");
                return;
            }
        };
        for room_id in self.rooms_of(username) {
            self.dispatch(room_id, RoomCommand::Broadcast(event.clone()));
        }
    }

    // ---- Room slots ----

    fn dispatch(&mut self, room_id: RoomId, command: RoomCommand) {
        let Some(slot) = self.rooms.get_mut(&room_id) else {
            debug!(room_id, "command for unknown room dropped");
            return;
        };
        let needs_load = match slot {
            RoomSlot::Running(handle) => match handle.send(command) {
                Ok(()) => false,
                Err(command) => {
                    warn!(room_id, "room actor gone, reloading");
                    *slot = RoomSlot::Loading {
                        backlog: vec![command],
                    };
                    true
                }
            },
            RoomSlot::Retiring { backlog, .. } | RoomSlot::Loading { backlog } => {
                backlog.push(command);
                false
            }
            RoomSlot::Dormant => {
                *slot = RoomSlot::Loading {
                    backlog: vec![command],
                };
                true
            }
        };
        if needs_load {
            self.spawn_load(room_id);
        }
    }

    fn flush(&self, handle: RoomHandle, backlog: impl IntoIterator<Item = RoomCommand>) -> RoomHandle {
        for command in backlog {
            if handle.send(command).is_err() {
                warn!(room_id = handle.id(), "room exited while flushing backlog");
                break;
            }
        }
        handle
    }

    fn room_idle(&mut self, room_id: RoomId) {
        let Some(slot) = self.rooms.get_mut(&room_id) else {
            return;
        };
        if let RoomSlot::Running(handle) = slot {
            if handle.send(RoomCommand::Retire).is_ok() {
                *slot = RoomSlot::Retiring {
                    handle: handle.clone(),
                    backlog: Vec::new(),
                };
            }
        }
    }

    fn room_retired(&mut self, room_id: RoomId) {
        let Some(RoomSlot::Retiring { backlog, .. }) = self.rooms.remove(&room_id) else {
            return;
        };
        if backlog.is_empty() {
            debug!(room_id, "room retired");
            self.rooms.insert(room_id, RoomSlot::Dormant);
        } else {
            self.rooms.insert(room_id, RoomSlot::Loading { backlog });
            self.spawn_load(room_id);
        }
    }

    fn room_loaded(&mut self, room_id: RoomId, result: AppResult<Option<RoomRecord>>) {
        let backlog = match self.rooms.remove(&room_id) {
            Some(RoomSlot::Loading { backlog }) => backlog,
            Some(other) => {
                self.rooms.insert(room_id, other);
                return;
            }
            None => return,
        };
        match result {
            Ok(Some(record)) => {
                debug!(room_id, "room reloaded");
                self.start_room(record, backlog);
            }
            Ok(None) => {
                warn!(room_id, dropped = backlog.len(), "room missing from store");
            }
            Err(e) => {
                warn!(room_id, dropped = backlog.len(), error = %e, "room reload failed");
                self.rooms.insert(room_id, RoomSlot::Dormant);
            }
        }
    }

    // ---- Persistence jobs ----

    fn spawn_job<F>(&self, job: F)
    where
        F: Future<Output = HubCommand> + Send + 'static,
    {
        let hub = self.handle.clone();
        tokio::spawn(async move {
            hub.notify(job.await);
        });
    }

    fn spawn_load(&self, room_id: RoomId) {
        let store = self.store.clone();
        self.spawn_job(async move {
            HubCommand::RoomLoaded {
                room_id,
                result: store.find_room(room_id).await,
            }
        });
    }

    // ---- Direct rooms ----

    fn open_direct_room(&mut self, pair: PairKey, reply: oneshot::Sender<AppResult<RoomId>>) {
        if let Some(room_id) = self.direct_rooms.get(&pair) {
            let _ = reply.send(Ok(*room_id));
            return;
        }
        match self.pending_direct.entry(pair.clone()) {
            Entry::Occupied(mut waiting) => waiting.get_mut().push(reply),
            Entry::Vacant(slot) => {
                slot.insert(vec![reply]);
                let store = self.store.clone();
                self.spawn_job(async move {
                    let result = resolve_direct_room(store.as_ref(), &pair).await;
                    HubCommand::DirectRoomResolved { pair, result }
                });
            }
        }
    }

    fn direct_room_resolved(&mut self, pair: PairKey, result: AppResult<RoomRecord>) {
        let waiters = self.pending_direct.remove(&pair).unwrap_or_default();
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(a = %pair.first(), b = %pair.second(), error = %e, "direct room lookup failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(e.duplicate()));
                }
                return;
            }
        };

        let room_id = record.id;
        self.direct_rooms.insert(pair.clone(), room_id);
        if self.rooms.contains_key(&room_id) {
            for username in [pair.first(), pair.second()] {
                self.dispatch(room_id, RoomCommand::AddMember(username.to_string()));
            }
        } else {
            info!(room_id, a = %pair.first(), b = %pair.second(), "direct room opened");
            self.start_room(record, Vec::new());
        }
        for username in [pair.first(), pair.second()] {
            self.grant_membership(room_id, username);
        }
        for waiter in waiters {
            let _ = waiter.send(Ok(room_id));
        }
    }

    /// Record membership and connect the user's live sessions.
    fn grant_membership(&mut self, room_id: RoomId, username: &str) {
        let added = self
            .memberships
            .entry(username.to_string())
            .or_default()
            .insert(room_id);
        if added {
            for session in self.sessions_of(username) {
                self.dispatch(room_id, RoomCommand::Join(session));
            }
        }
    }

    // ---- Lobby ----

    fn seat_in_lobby(&mut self, username: String) {
        let Some(lobby) = self.lobby.as_mut() else {
            return;
        };
        if !lobby.seating.insert(username.clone()) {
            return;
        }
        match lobby.take_seat(username.clone()) {
            Seat::Existing(room_id) => self.spawn_add_member(room_id, username),
            Seat::Queued => {}
            Seat::CreateRoom => {
                let capacity = lobby.capacity;
                let store = self.store.clone();
                self.spawn_job(async move {
                    HubCommand::LobbyRoomCreated(
                        store.create_room(RoomKind::Group, capacity, None).await,
                    )
                });
            }
        }
    }

    fn spawn_add_member(&self, room_id: RoomId, username: String) {
        let store = self.store.clone();
        self.spawn_job(async move {
            let result = store.add_member(room_id, &username).await;
            HubCommand::LobbySeated {
                room_id,
                username,
                result,
            }
        });
    }

    fn lobby_room_created(&mut self, result: AppResult<RoomId>) {
        let Some(lobby) = self.lobby.as_mut() else {
            return;
        };
        let seated = lobby.forming.take().unwrap_or_default();
        let deferred = std::mem::take(&mut lobby.deferred);
        let capacity = lobby.capacity;

        match result {
            Ok(room_id) => {
                if capacity > 1 && seated.len() < capacity {
                    lobby.waiting.push_back(WaitingRoom {
                        id: room_id,
                        seats_taken: seated.len(),
                    });
                }
                info!(room_id, seated = seated.len(), "lobby room created");
                self.start_room(
                    RoomRecord {
                        id: room_id,
                        kind: RoomKind::Group,
                        capacity,
                        name: None,
                        members: BTreeSet::new(),
                        last_message: None,
                    },
                    Vec::new(),
                );
                for username in seated {
                    self.spawn_add_member(room_id, username);
                }
            }
            Err(e) => {
                warn!(error = %e, "lobby room creation failed");
                for username in &seated {
                    lobby.seating.remove(username);
                }
            }
        }

        for username in deferred {
            if let Some(lobby) = self.lobby.as_mut() {
                lobby.seating.remove(&username);
            }
            self.seat_in_lobby(username);
        }
    }

    fn lobby_seated(&mut self, room_id: RoomId, username: String, result: AppResult<()>) {
        if let Some(lobby) = self.lobby.as_mut() {
            lobby.seating.remove(&username);
        }
        match result {
            Ok(()) => {
                info!(room_id, username = %username, "seated in lobby room");
                self.dispatch(room_id, RoomCommand::AddMember(username.clone()));
                self.grant_membership(room_id, &username);
                self.dispatch(room_id, RoomCommand::Announce);
            }
            Err(e) => {
                warn!(room_id, username = %username, error = %e, "lobby seat failed");
                if let Some(lobby) = self.lobby.as_mut() {
                    lobby.release_seat(room_id);
                }
            }
        }
    }
}

async fn resolve_direct_room(store: &dyn ChatStore, pair: &PairKey) -> AppResult<RoomRecord> {
    let room_id = match store.find_direct_room(pair.first(), pair.second()).await? {
        Some(room_id) => room_id,
        None => store.create_direct_room(pair.first(), pair.second()).await?,
    };
    store
        .find_room(room_id)
        .await?
        .ok_or(AppError::RoomNotFound(room_id))
}
