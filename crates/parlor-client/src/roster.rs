//! Presence aggregation: live peers, our own presence and durable server
//! members merged into one roster keyed by address.

use std::cmp::Ordering;
use std::collections::HashMap;

use parlor_types::{Address, PresencePayload, User};

use crate::identity::AccountLookup;

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub address: Address,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub is_online: bool,
    pub is_self: bool,
}

impl RosterEntry {
    fn from_presence(payload: &PresencePayload, is_self: bool) -> Self {
        Self {
            address: payload.address.clone(),
            name: payload.name.clone().filter(|n| !n.trim().is_empty()),
            avatar: payload.avatar.clone(),
            is_online: true,
            is_self,
        }
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(self.address.as_str())
    }
}

/// Online first, then self, then alphabetical (case-insensitive) by name or
/// address.
fn roster_order(a: &RosterEntry, b: &RosterEntry) -> Ordering {
    b.is_online
        .cmp(&a.is_online)
        .then_with(|| b.is_self.cmp(&a.is_self))
        .then_with(|| a.label().to_lowercase().cmp(&b.label().to_lowercase()))
        .then_with(|| a.address.cmp(&b.address))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    pub online: Vec<RosterEntry>,
    pub offline: Vec<RosterEntry>,
}

impl Roster {
    /// Online entries followed by offline ones, in display order.
    pub fn entries(&self) -> impl Iterator<Item = &RosterEntry> {
        self.online.iter().chain(self.offline.iter())
    }

    pub fn len(&self) -> usize {
        self.online.len() + self.offline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Roster name, then resolved username, then address.
    pub fn display_name<'a, L: AccountLookup>(entry: &'a RosterEntry, accounts: &'a L) -> &'a str {
        entry
            .name
            .as_deref()
            .or_else(|| accounts.account(&entry.address).and_then(|a| a.username()))
            .unwrap_or(entry.address.as_str())
    }

    /// Resolved profile picture, then the one carried in presence.
    pub fn avatar<'a, L: AccountLookup>(entry: &'a RosterEntry, accounts: &'a L) -> Option<&'a str> {
        accounts
            .account(&entry.address)
            .and_then(|a| a.picture.as_deref())
            .or(entry.avatar.as_deref())
    }
}

/// Merge presence sources into a de-duplicated, sorted roster.
///
/// Live entries win over durable ones for name and avatar; a durable username
/// only fills a name the live payload didn't carry.
pub fn build_roster<'a>(
    peers: impl IntoIterator<Item = &'a PresencePayload>,
    me: Option<&PresencePayload>,
    members: &[User],
    self_address: Option<&Address>,
) -> Roster {
    let mut by_address: HashMap<Address, RosterEntry> = HashMap::new();

    for peer in peers {
        let is_self = self_address == Some(&peer.address);
        by_address.insert(peer.address.clone(), RosterEntry::from_presence(peer, is_self));
    }

    if let Some(me) = me {
        by_address.insert(me.address.clone(), RosterEntry::from_presence(me, true));
    }

    for user in members {
        let durable_name = Some(user.username.clone()).filter(|n| !n.trim().is_empty());
        let entry = by_address
            .entry(user.address.clone())
            .or_insert_with(|| RosterEntry {
                address: user.address.clone(),
                name: None,
                avatar: None,
                is_online: false,
                is_self: false,
            });
        if entry.name.is_none() {
            entry.name = durable_name;
        }
        entry.is_self |= self_address == Some(&user.address);
    }

    let mut entries: Vec<RosterEntry> = by_address.into_values().collect();
    entries.sort_by(roster_order);

    let (online, offline): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.is_online);
    Roster { online, offline }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::identity::{Account, accounts_by_address};

    fn addr(raw: &str) -> Address {
        Address::parse(raw).unwrap()
    }

    fn peer(address: &str, name: Option<&str>) -> PresencePayload {
        PresencePayload {
            address: addr(address),
            name: name.map(str::to_string),
            avatar: None,
        }
    }

    fn user(address: &str, username: &str) -> User {
        User {
            id: Uuid::new_v4(),
            address: addr(address),
            owner: addr(address),
            username: username.into(),
        }
    }

    fn addresses(entries: &[RosterEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.address.as_str()).collect()
    }

    #[test]
    fn test_durable_members_fall_back_to_offline() {
        let members = vec![user("0xA", ""), user("0xB", "")];
        let peers = vec![peer("0xA", None)];

        let roster = build_roster(&peers, None, &members, None);
        assert_eq!(addresses(&roster.online), vec!["0xa"]);
        assert_eq!(addresses(&roster.offline), vec!["0xb"]);
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_self_is_first_among_online() {
        let members = vec![user("0xaaa", "aaron"), user("0xzzz", "zed")];
        let peers = vec![peer("0xaaa", Some("aaron"))];
        let me = peer("0xzzz", Some("zed"));

        let roster = build_roster(&peers, Some(&me), &members, Some(&addr("0xzzz")));
        assert_eq!(addresses(&roster.online), vec!["0xzzz", "0xaaa"]);
        assert!(roster.online[0].is_self);
        assert!(roster.offline.is_empty());
    }

    #[test]
    fn test_offline_self_sorts_first_among_offline() {
        let members = vec![user("0xb", "bea"), user("0xme", "zoe"), user("0xa", "abe")];
        let roster = build_roster(std::iter::empty(), None, &members, Some(&addr("0xME")));

        assert_eq!(addresses(&roster.offline), vec!["0xme", "0xa", "0xb"]);
        assert!(roster.offline[0].is_self);
    }

    #[test]
    fn test_one_entry_per_address_with_mixed_case() {
        let members = vec![user("0xAbC", "carol")];
        let peers = vec![peer("0xabc", Some("carol-live")), peer("0XABC", Some("carol-live"))];
        let me = peer("0xABC", Some("carol-me"));

        let roster = build_roster(&peers, Some(&me), &members, Some(&addr("0xabc")));
        assert_eq!(roster.len(), 1);
        let entry = &roster.online[0];
        assert!(entry.is_online && entry.is_self);
        assert_eq!(entry.name.as_deref(), Some("carol-me"));
    }

    #[test]
    fn test_live_fields_win_and_durable_name_fills_gaps() {
        let members = vec![user("0xa", "durable-a"), user("0xb", "durable-b")];
        let peers = vec![
            PresencePayload {
                address: addr("0xa"),
                name: Some("live-a".into()),
                avatar: Some("a.png".into()),
            },
            peer("0xb", None),
        ];

        let roster = build_roster(&peers, None, &members, None);
        let a = roster.entries().find(|e| e.address == addr("0xa")).unwrap();
        let b = roster.entries().find(|e| e.address == addr("0xb")).unwrap();
        assert_eq!(a.name.as_deref(), Some("live-a"));
        assert_eq!(a.avatar.as_deref(), Some("a.png"));
        assert_eq!(b.name.as_deref(), Some("durable-b"));
    }

    #[test]
    fn test_republished_presence_is_not_duplicated() {
        let same = peer("0xa", Some("alice"));
        let peers = vec![same.clone(), same];
        let roster = build_roster(&peers, None, &[], None);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_alphabetical_ignores_case() {
        let members = vec![user("0x1", "bob"), user("0x2", "Alice"), user("0x3", "carl")];
        let roster = build_roster(std::iter::empty(), None, &members, None);
        let names: Vec<_> = roster.offline.iter().map(|e| e.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["Alice", "bob", "carl"]);
    }

    #[test]
    fn test_display_name_and_avatar_resolution() {
        let accounts = accounts_by_address([Account {
            address: addr("0xa"),
            owner: addr("0xa"),
            username: Some("alice".into()),
            picture: Some("lens.png".into()),
        }]);
        let roster = build_roster(&[peer("0xa", None), peer("0xb", None)], None, &[], None);

        let a = roster.entries().find(|e| e.address == addr("0xa")).unwrap();
        let b = roster.entries().find(|e| e.address == addr("0xb")).unwrap();
        assert_eq!(Roster::display_name(a, &accounts), "alice");
        assert_eq!(Roster::avatar(a, &accounts), Some("lens.png"));
        assert_eq!(Roster::display_name(b, &accounts), "0xb");
        assert_eq!(Roster::avatar(b, &accounts), None);
    }
}
