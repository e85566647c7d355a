//! Wire events: the `{type, payload}` envelope and the typed payloads behind each tag.
//!
//! Decoding is two-phase. The envelope is parsed first with an opaque payload,
//! the tag is resolved to an [`EventKind`], and only then is the payload decoded
//! into the schema that kind names.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::room::RoomId;

/// Every event tag the protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SendMessage,
    NewMessage,
    Disconnect,
    GetMessages,
    GetRooms,
    CreateRoom,
    NewRoom,
    RenameRoom,
    ClientConnected,
    ClientDisconnected,
    UserConnected,
    UserDisconnected,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::SendMessage,
        EventKind::NewMessage,
        EventKind::Disconnect,
        EventKind::GetMessages,
        EventKind::GetRooms,
        EventKind::CreateRoom,
        EventKind::NewRoom,
        EventKind::RenameRoom,
        EventKind::ClientConnected,
        EventKind::ClientDisconnected,
        EventKind::UserConnected,
        EventKind::UserDisconnected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SendMessage => "send_message",
            EventKind::NewMessage => "new_message",
            EventKind::Disconnect => "disconnect",
            EventKind::GetMessages => "get_messages",
            EventKind::GetRooms => "get_rooms",
            EventKind::CreateRoom => "create_room",
            EventKind::NewRoom => "new_room",
            EventKind::RenameRoom => "rename_room",
            EventKind::ClientConnected => "client_connected",
            EventKind::ClientDisconnected => "client_disconnected",
            EventKind::UserConnected => "user_connected",
            EventKind::UserDisconnected => "user_disconnected",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::UnsupportedEventType(s.to_string()))
    }
}

/// The envelope exchanged over the socket. The payload stays opaque until the
/// tag has been resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Event {
    /// Parse an envelope from raw frame bytes. Failure here is fatal to the connection.
    pub fn decode(bytes: &[u8]) -> AppResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> AppResult<EventKind> {
        self.kind.parse()
    }

    /// Second decode phase: interpret the payload as `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> AppResult<T> {
        let payload = if self.payload.is_null() {
            empty_payload()
        } else {
            self.payload.clone()
        };
        serde_json::from_value(payload).map_err(|source| AppError::MalformedPayload {
            kind: self.kind().map(|k| k.as_str()).unwrap_or("unknown"),
            source,
        })
    }
}

/// `send_message`: a chat line from a client. `from` is informational only;
/// the server stamps the session's username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub message: String,
    #[serde(default)]
    pub from: String,
    #[serde(alias = "room_id")]
    pub room_id: RoomId,
}

/// `new_message`: a persisted chat line, live or from history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message: String,
    pub from: String,
    #[serde(alias = "room_id")]
    pub room_id: RoomId,
    #[serde(alias = "sent")]
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessages {
    #[serde(alias = "room_id")]
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoom {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRoom {
    #[serde(alias = "room_id")]
    pub room_id: RoomId,
    pub name: String,
}

/// One member line inside `new_room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    pub username: String,
    pub online: bool,
    pub typing: bool,
}

/// `new_room`: a room as seen by one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    pub id: RoomId,
    pub name: String,
    #[serde(alias = "users")]
    pub members: Vec<RoomMember>,
    #[serde(alias = "last_message")]
    pub last_message: Option<ChatMessage>,
}

/// `user_connected` / `user_disconnected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub username: String,
}

/// Payload of events that carry no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Typed view of an [`Event`], one variant per tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    SendMessage(SendMessage),
    NewMessage(ChatMessage),
    Disconnect,
    GetMessages(GetMessages),
    GetRooms,
    CreateRoom(CreateRoom),
    NewRoom(NewRoom),
    RenameRoom(RenameRoom),
    ClientConnected,
    ClientDisconnected,
    UserConnected(Presence),
    UserDisconnected(Presence),
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::SendMessage(_) => EventKind::SendMessage,
            EventBody::NewMessage(_) => EventKind::NewMessage,
            EventBody::Disconnect => EventKind::Disconnect,
            EventBody::GetMessages(_) => EventKind::GetMessages,
            EventBody::GetRooms => EventKind::GetRooms,
            EventBody::CreateRoom(_) => EventKind::CreateRoom,
            EventBody::NewRoom(_) => EventKind::NewRoom,
            EventBody::RenameRoom(_) => EventKind::RenameRoom,
            EventBody::ClientConnected => EventKind::ClientConnected,
            EventBody::ClientDisconnected => EventKind::ClientDisconnected,
            EventBody::UserConnected(_) => EventKind::UserConnected,
            EventBody::UserDisconnected(_) => EventKind::UserDisconnected,
        }
    }

    /// Resolve the tag, then decode the payload it names.
    pub fn from_event(event: &Event) -> AppResult<Self> {
        Ok(match event.kind()? {
            EventKind::SendMessage => EventBody::SendMessage(event.payload_as()?),
            EventKind::NewMessage => EventBody::NewMessage(event.payload_as()?),
            EventKind::Disconnect => {
                event.payload_as::<Empty>()?;
                EventBody::Disconnect
            }
            EventKind::GetMessages => EventBody::GetMessages(event.payload_as()?),
            EventKind::GetRooms => {
                event.payload_as::<Empty>()?;
                EventBody::GetRooms
            }
            EventKind::CreateRoom => EventBody::CreateRoom(event.payload_as()?),
            EventKind::NewRoom => EventBody::NewRoom(event.payload_as()?),
            EventKind::RenameRoom => EventBody::RenameRoom(event.payload_as()?),
            EventKind::ClientConnected => {
                event.payload_as::<Empty>()?;
                EventBody::ClientConnected
            }
            EventKind::ClientDisconnected => {
                event.payload_as::<Empty>()?;
                EventBody::ClientDisconnected
            }
            EventKind::UserConnected => EventBody::UserConnected(event.payload_as()?),
            EventKind::UserDisconnected => EventBody::UserDisconnected(event.payload_as()?),
        })
    }

    pub fn into_event(self) -> AppResult<Event> {
        let kind = self.kind().as_str().to_string();
        let payload = match self {
            EventBody::SendMessage(p) => serde_json::to_value(p)?,
            EventBody::NewMessage(p) => serde_json::to_value(p)?,
            EventBody::GetMessages(p) => serde_json::to_value(p)?,
            EventBody::CreateRoom(p) => serde_json::to_value(p)?,
            EventBody::NewRoom(p) => serde_json::to_value(p)?,
            EventBody::RenameRoom(p) => serde_json::to_value(p)?,
            EventBody::UserConnected(p) | EventBody::UserDisconnected(p) => {
                serde_json::to_value(p)?
            }
            EventBody::Disconnect
            | EventBody::GetRooms
            | EventBody::ClientConnected
            | EventBody::ClientDisconnected => empty_payload(),
        };
        Ok(Event { kind, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_message() -> ChatMessage {
        ChatMessage {
            message: "hi".into(),
            from: "alice".into(),
            room_id: 5,
            sent_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()
                + chrono::Duration::nanoseconds(123_456_789),
        }
    }

    fn round_trip(body: EventBody) -> EventBody {
        let wire = body.into_event().unwrap().encode().unwrap();
        EventBody::from_event(&Event::decode(wire.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn new_message_round_trips_with_subsecond_timestamp() {
        let body = EventBody::NewMessage(sample_message());
        assert_eq!(round_trip(body.clone()), body);
    }

    #[test]
    fn new_room_round_trips_with_and_without_preview() {
        let room = NewRoom {
            id: 9,
            name: "bob, carol".into(),
            members: vec![
                RoomMember { username: "bob".into(), online: true, typing: false },
                RoomMember { username: "carol".into(), online: false, typing: false },
            ],
            last_message: Some(sample_message()),
        };
        let body = EventBody::NewRoom(room.clone());
        assert_eq!(round_trip(body.clone()), body);

        let empty = EventBody::NewRoom(NewRoom { last_message: None, ..room });
        assert_eq!(round_trip(empty.clone()), empty);
    }

    #[test]
    fn fieldless_and_presence_events_round_trip() {
        for body in [
            EventBody::Disconnect,
            EventBody::GetRooms,
            EventBody::ClientConnected,
            EventBody::ClientDisconnected,
            EventBody::UserConnected(Presence { username: "alice".into() }),
            EventBody::UserDisconnected(Presence { username: "alice".into() }),
        ] {
            assert_eq!(round_trip(body.clone()), body);
        }
    }

    #[test]
    fn every_kind_round_trips() {
        let bodies = vec![
            EventBody::SendMessage(SendMessage { message: "yo".into(), from: "alice".into(), room_id: 3 }),
            EventBody::NewMessage(sample_message()),
            EventBody::Disconnect,
            EventBody::GetMessages(GetMessages { room_id: 3 }),
            EventBody::GetRooms,
            EventBody::CreateRoom(CreateRoom { username: "bob".into() }),
            EventBody::NewRoom(NewRoom {
                id: 3,
                name: "bob".into(),
                members: vec![RoomMember { username: "bob".into(), online: true, typing: false }],
                last_message: None,
            }),
            EventBody::RenameRoom(RenameRoom { room_id: 3, name: "ops".into() }),
            EventBody::ClientConnected,
            EventBody::ClientDisconnected,
            EventBody::UserConnected(Presence { username: "bob".into() }),
            EventBody::UserDisconnected(Presence { username: "bob".into() }),
        ];
        let kinds: Vec<EventKind> = bodies.iter().map(EventBody::kind).collect();
        assert_eq!(kinds, EventKind::ALL);
        for body in bodies {
            assert_eq!(round_trip(body.clone()), body);
        }
    }

    #[test]
    fn wire_shape_uses_camel_case_fields() {
        let event = EventBody::NewMessage(sample_message()).into_event().unwrap();
        assert_eq!(event.kind, "new_message");
        assert_eq!(event.payload["roomId"], 5);
        assert!(event.payload.get("sentAt").is_some());
    }

    #[test]
    fn snake_case_aliases_are_accepted() {
        let event = Event::decode(br#"{"type":"send_message","payload":{"message":"yo","room_id":3}}"#)
            .unwrap();
        let body = EventBody::from_event(&event).unwrap();
        assert_eq!(
            body,
            EventBody::SendMessage(SendMessage { message: "yo".into(), from: String::new(), room_id: 3 })
        );
    }

    #[test]
    fn missing_payload_is_an_empty_object() {
        let event = Event::decode(br#"{"type":"get_rooms"}"#).unwrap();
        assert_eq!(EventBody::from_event(&event).unwrap(), EventBody::GetRooms);
    }

    #[test]
    fn unknown_tag_is_rejected_before_payload() {
        let event = Event::decode(br#"{"type":"launch_rockets","payload":42}"#).unwrap();
        assert!(matches!(
            EventBody::from_event(&event),
            Err(AppError::UnsupportedEventType(t)) if t == "launch_rockets"
        ));
    }

    #[test]
    fn mismatched_payload_is_malformed_not_panic() {
        let event = Event::decode(br#"{"type":"get_messages","payload":{"roomId":"five"}}"#).unwrap();
        assert!(matches!(
            EventBody::from_event(&event),
            Err(AppError::MalformedPayload { kind: "get_messages", .. })
        ));
    }

    #[test]
    fn broken_envelope_fails_to_decode() {
        assert!(Event::decode(b"{not json").is_err());
        assert!(Event::decode(br#"{"payload":{}}"#).is_err());
    }
}
