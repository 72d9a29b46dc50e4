//! Session data model (spec §3 "Session", §9 "Group ⇔ session exclusivity").
//!
//! This is the persisted routing *decision*, distinct from the in-memory
//! sink map owned by [`crate::session::StreamingSession`] at runtime.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::player::{Group, Player};

/// What a [`Session`] is currently attached to. A session is either
/// group-bound or an ad-hoc player list, never both (spec §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attachment {
    None,
    Group(Uuid),
    Players(Vec<Uuid>),
}

/// A single live routing decision (spec §3 "Session").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub uuid: Uuid,
    pub attachment: Attachment,
    pub provider: String,
    pub volume: u8,
}

impl Session {
    #[must_use]
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
            attachment: Attachment::None,
            provider: "audera".to_string(),
            volume: 50,
        }
    }

    /// Attaches a group, detaching any prior group and replacing the player
    /// set from the group's membership (spec §3). Single mutator call wipes
    /// the other side of the exclusivity (spec §9).
    pub fn attach_group(&mut self, group: &Group) {
        self.attachment = Attachment::Group(group.uuid);
    }

    /// Attaches a loose, ordered set of players, clearing any group (spec §3, §9).
    pub fn attach_players(&mut self, players: Vec<Uuid>) {
        self.attachment = Attachment::Players(players);
    }

    /// Clears the attachment entirely.
    pub fn detach_all(&mut self) {
        self.attachment = Attachment::None;
    }

    /// Returns the resolved player UUIDs currently routed to by this
    /// session. For a group attachment the caller must supply the group's
    /// current membership (groups are looked up by UUID, not embedded).
    #[must_use]
    pub fn resolved_players<'a>(&'a self, group_lookup: impl Fn(Uuid) -> Option<&'a Group>) -> Vec<Uuid> {
        match &self.attachment {
            Attachment::None => Vec::new(),
            Attachment::Players(players) => players.clone(),
            Attachment::Group(uuid) => group_lookup(*uuid)
                .map(|g| g.players.clone())
                .unwrap_or_default(),
        }
    }

    /// Derives the session name from attached players when no group is set:
    /// the first player's name, suffixed by `" + N"` if more than one
    /// (spec §3).
    #[must_use]
    pub fn derive_name(players: &[Player]) -> String {
        match players {
            [] => String::new(),
            [first] => first.name.clone(),
            [first, rest @ ..] => format!("{} + {}", first.name, rest.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str) -> Player {
        let identity = crate::identity::Identity::new(name, "AA:BB:CC:DD:EE:FF", "10.0.0.1");
        Player::from_identity(&identity)
    }

    #[test]
    fn attaching_group_clears_players() {
        let mut session = Session::new("living room", Uuid::new_v4());
        session.attach_players(vec![Uuid::new_v4()]);
        assert!(matches!(session.attachment, Attachment::Players(_)));

        let group = Group::new("Downstairs", Uuid::new_v4());
        session.attach_group(&group);
        assert!(matches!(session.attachment, Attachment::Group(uuid) if uuid == group.uuid));
    }

    #[test]
    fn attaching_players_clears_group() {
        let mut session = Session::new("living room", Uuid::new_v4());
        let group = Group::new("Downstairs", Uuid::new_v4());
        session.attach_group(&group);

        let players = vec![Uuid::new_v4(), Uuid::new_v4()];
        session.attach_players(players.clone());
        assert_eq!(session.attachment, Attachment::Players(players));
    }

    #[test]
    fn derive_name_single_player() {
        let players = vec![player("kitchen")];
        assert_eq!(Session::derive_name(&players), "kitchen");
    }

    #[test]
    fn derive_name_multiple_players() {
        let players = vec![player("kitchen"), player("bedroom"), player("office")];
        assert_eq!(Session::derive_name(&players), "kitchen + 2");
    }

    #[test]
    fn resolved_players_follows_group_membership() {
        let mut session = Session::new("s", Uuid::new_v4());
        let mut group = Group::new("g", Uuid::new_v4());
        let member = Uuid::new_v4();
        group.players.push(member);
        session.attach_group(&group);

        let groups = vec![group];
        let resolved = session.resolved_players(|uuid| groups.iter().find(|g| g.uuid == uuid));
        assert_eq!(resolved, vec![member]);
    }
}
