//! Room authority and derived sync state

use std::cmp::Ordering;

use super::protocol::{Membership, ParticipantId, Room};

/// Who may currently write the room's playback record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authority {
    /// A present member holding `isHost`
    Host(ParticipantId),
    /// `hostId` names nobody in `members`; no one may write playback
    Orphaned,
}

impl Authority {
    pub fn host_id(&self) -> Option<&str> {
        match self {
            Authority::Host(id) => Some(id),
            Authority::Orphaned => None,
        }
    }

    pub fn is(&self, participant_id: &str) -> bool {
        self.host_id() == Some(participant_id)
    }
}

/// Local, never-shared sync status of one participant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncStatus {
    /// No player report or no playback snapshot yet
    #[default]
    Waiting,
    /// Within drift tolerance
    Synced,
    /// Correction issued, waiting for the player to confirm
    Drifted,
    /// Player made no progress while it should have
    Buffering,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Waiting => "waiting",
            SyncStatus::Synced => "synced",
            SyncStatus::Drifted => "drifted",
            SyncStatus::Buffering => "buffering",
        }
    }
}

impl Room {
    /// Resolve the room's current authority from this snapshot alone.
    ///
    /// `hostId` only counts when the named member is present; the `isHost`
    /// flag can briefly lag behind during a handoff, so it is not required.
    pub fn authority(&self) -> Authority {
        if self.members.contains_key(&self.host_id) {
            Authority::Host(self.host_id.clone())
        } else {
            Authority::Orphaned
        }
    }

    pub fn is_host(&self, participant_id: &str) -> bool {
        self.authority().is(participant_id)
    }

    /// Deterministic successor: earliest `joinedAt`, ties broken by id
    pub fn successor(&self) -> Option<&ParticipantId> {
        self.members
            .iter()
            .min_by(|(a_id, a), (b_id, b)| {
                a.joined_at.cmp(&b.joined_at).then_with(|| a_id.cmp(b_id))
            })
            .map(|(id, _)| id)
    }

    /// Members for display (host first, then others sorted by name)
    pub fn member_list(&self) -> Vec<(&ParticipantId, &Membership)> {
        let mut list: Vec<_> = self.members.iter().collect();
        list.sort_by(|(a_id, a), (b_id, b)| {
            match (*a_id == &self.host_id, *b_id == &self.host_id) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            }
        });
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{MovieRef, PlaybackState, RoomStatus};
    use std::collections::HashMap;

    fn member(name: &str, joined_at: u64, is_host: bool) -> Membership {
        Membership {
            name: name.to_string(),
            joined_at,
            is_host,
        }
    }

    fn room(host_id: &str, members: Vec<(&str, Membership)>) -> Room {
        Room {
            id: "r".to_string(),
            movie: MovieRef::default(),
            host_id: host_id.to_string(),
            host_name: String::new(),
            status: RoomStatus::Waiting,
            created_at: 0,
            playback: PlaybackState::initial(0),
            members: members
                .into_iter()
                .map(|(id, m)| (id.to_string(), m))
                .collect::<HashMap<_, _>>(),
            viewer_count: 0,
        }
    }

    #[test]
    fn test_authority_present_host() {
        let r = room("a", vec![("a", member("Ann", 1, true)), ("b", member("Bob", 2, false))]);
        assert_eq!(r.authority(), Authority::Host("a".to_string()));
        assert!(r.is_host("a"));
        assert!(!r.is_host("b"));
    }

    #[test]
    fn test_authority_orphaned_when_host_left() {
        let r = room("a", vec![("b", member("Bob", 2, false))]);
        assert_eq!(r.authority(), Authority::Orphaned);
        assert!(!r.is_host("a"));
        assert!(!r.is_host("b"));
    }

    #[test]
    fn test_successor_is_earliest_joined() {
        let r = room(
            "gone",
            vec![
                ("c", member("Cat", 30, false)),
                ("b", member("Bob", 20, false)),
                ("d", member("Dan", 40, false)),
            ],
        );
        assert_eq!(r.successor().map(String::as_str), Some("b"));
    }

    #[test]
    fn test_successor_tie_broken_by_id() {
        let r = room("gone", vec![("z", member("Zed", 5, false)), ("m", member("Mo", 5, false))]);
        assert_eq!(r.successor().map(String::as_str), Some("m"));
    }

    #[test]
    fn test_successor_of_empty_room() {
        let r = room("gone", vec![]);
        assert!(r.successor().is_none());
    }

    #[test]
    fn test_member_list_host_first() {
        let r = room(
            "h",
            vec![
                ("x", member("bob", 1, false)),
                ("h", member("Zed", 2, true)),
                ("y", member("Alice", 3, false)),
            ],
        );
        let names: Vec<_> = r.member_list().iter().map(|(_, m)| m.name.clone()).collect();
        assert_eq!(names, vec!["Zed", "Alice", "bob"]);
    }
}
