//! The set of members present on a channel, keyed by id.

use std::collections::BTreeMap;

use crate::protocol::Member;

/// Members present on a channel.
///
/// Ids are unique. Joining an id that is already present keeps the stored
/// member as is; leaving an absent id does nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSet {
    members: BTreeMap<i64, Member>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set with a roster snapshot. When the roster lists
    /// an id more than once the first entry wins. Returns whether the set
    /// changed.
    pub fn replace(&mut self, roster: Vec<Member>) -> bool {
        let mut next = BTreeMap::new();
        for member in roster {
            next.entry(member.id).or_insert(member);
        }
        if next == self.members {
            return false;
        }
        self.members = next;
        true
    }

    /// Insert a member unless its id is already present.
    pub fn insert(&mut self, member: Member) -> bool {
        if self.members.contains_key(&member.id) {
            return false;
        }
        self.members.insert(member.id, member);
        true
    }

    /// Remove a member by id.
    pub fn remove(&mut self, id: i64) -> bool {
        self.members.remove(&id).is_some()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.members.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&Member> {
        self.members.get(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Present ids, ascending.
    pub fn ids(&self) -> Vec<i64> {
        self.members.keys().copied().collect()
    }

    /// Members ordered by id, for display.
    pub fn members(&self) -> Vec<Member> {
        self.members.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }
}
