//! Rooms as stored: identity, kind, capacity, members and the cached preview.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::event::ChatMessage;

pub type RoomId = i64;

/// Seats in a direct-message room.
pub const DIRECT_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Two users, looked up by unordered pair.
    Direct,
    /// Lobby room seated from the waiting list.
    Group,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Direct => "direct",
            RoomKind::Group => "group",
        }
    }

    pub fn from_db(value: &str) -> Self {
        if value == "direct" {
            RoomKind::Direct
        } else {
            RoomKind::Group
        }
    }
}

/// Everything needed to (re)start a room actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    pub id: RoomId,
    pub kind: RoomKind,
    pub capacity: usize,
    pub name: Option<String>,
    pub members: BTreeSet<String>,
    pub last_message: Option<ChatMessage>,
}

/// Key of a direct-message room: the two usernames in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey(String, String);

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            PairKey(a.to_string(), b.to_string())
        } else {
            PairKey(b.to_string(), a.to_string())
        }
    }

    pub fn first(&self) -> &str {
        &self.0
    }

    pub fn second(&self) -> &str {
        &self.1
    }

    /// Stable string form stored in the `direct_key` column.
    pub fn storage_key(&self) -> String {
        format!("{}\u{1f}{}", self.0, self.1)
    }

    pub fn from_members(members: &BTreeSet<String>) -> Option<Self> {
        let mut iter = members.iter();
        match (iter.next(), iter.next(), iter.next()) {
            (Some(a), Some(b), None) => Some(PairKey::new(a, b)),
            _ => None,
        }
    }
}

/// Display name of a room for `viewer`: the stored name, else the other members
/// joined with ", ".
pub fn display_name(name: Option<&str>, members: &BTreeSet<String>, viewer: &str) -> String {
    if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }
    let others: Vec<&str> = members
        .iter()
        .map(String::as_str)
        .filter(|m| *m != viewer)
        .collect();
    if others.is_empty() {
        viewer.to_string()
    } else {
        others.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn pair_key_is_unordered() {
        assert_eq!(PairKey::new("bob", "alice"), PairKey::new("alice", "bob"));
        assert_eq!(PairKey::new("bob", "alice").first(), "alice");
    }

    #[test]
    fn pair_key_from_members_needs_exactly_two() {
        assert_eq!(
            PairKey::from_members(&members(&["bob", "alice"])),
            Some(PairKey::new("alice", "bob"))
        );
        assert_eq!(PairKey::from_members(&members(&["alice"])), None);
        assert_eq!(PairKey::from_members(&members(&["a", "b", "c"])), None);
    }

    #[test]
    fn display_name_prefers_stored_name() {
        assert_eq!(display_name(Some("Book club"), &members(&["a", "b"]), "a"), "Book club");
    }

    #[test]
    fn display_name_lists_other_members_without_trailing_separator() {
        let m = members(&["alice", "bob", "carol"]);
        assert_eq!(display_name(None, &m, "bob"), "alice, carol");
        assert_eq!(display_name(Some("  "), &m, "alice"), "bob, carol");
    }

    #[test]
    fn display_name_of_solo_room_is_viewer() {
        assert_eq!(display_name(None, &members(&["alice"]), "alice"), "alice");
    }

    #[test]
    fn room_kind_db_mapping() {
        assert_eq!(RoomKind::from_db(RoomKind::Direct.as_str()), RoomKind::Direct);
        assert_eq!(RoomKind::from_db("group"), RoomKind::Group);
    }
}
