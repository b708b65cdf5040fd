//! Message grouping: consecutive runs of one sender collapse into a group so
//! the author header renders once per run.

use parlor_types::{Address, Message};

use crate::identity::{Account, AccountLookup};

const UNKNOWN_SENDER: &str = "Unknown User";
const SELF_AVATAR: &str = "Me";

/// Stable sort by creation time, oldest first. Grouping assumes this order.
pub fn sort_for_display(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.created_at);
}

#[derive(Debug, Clone)]
pub struct MessageGroup<'a> {
    pub sender_id: &'a Address,
    pub messages: Vec<&'a Message>,
    pub identity: Option<&'a Account>,
    pub is_self: bool,
}

impl<'a> MessageGroup<'a> {
    /// Resolved username, then the first message's sender snapshot.
    pub fn display_name(&self) -> &'a str {
        if let Some(name) = self.identity.and_then(Account::username) {
            return name;
        }
        self.messages
            .first()
            .copied()
            .map(|m| m.sender.as_str())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(UNKNOWN_SENDER)
    }

    pub fn avatar(&self) -> Option<&'a str> {
        self.identity.and_then(|a| a.picture.as_deref())
    }

    /// Avatar placeholder: "Me" on your own runs, else a single letter.
    pub fn avatar_fallback(&self) -> String {
        if self.is_self {
            return SELF_AVATAR.to_string();
        }
        self.identity
            .and_then(Account::username)
            .and_then(|name| name.chars().next())
            .or_else(|| self.sender_id.as_str().chars().nth(2))
            .map(|c| c.to_uppercase().collect())
            .unwrap_or_else(|| "?".to_string())
    }

    /// Only the first message of a run carries the author header.
    pub fn shows_header(&self, index: usize) -> bool {
        index == 0
    }
}

/// Lazy grouping pass over sorted messages. Cloning restarts from the
/// clone's position.
pub struct MessageGroups<'a, L> {
    messages: &'a [Message],
    pos: usize,
    lookup: &'a L,
    self_address: Option<&'a Address>,
}

impl<L> Clone for MessageGroups<'_, L> {
    fn clone(&self) -> Self {
        Self {
            messages: self.messages,
            pos: self.pos,
            lookup: self.lookup,
            self_address: self.self_address,
        }
    }
}

/// Group `messages` (already sorted with [`sort_for_display`]) into runs of
/// equal `sender_id`. Messages without a sender are skipped and do not break
/// a run.
pub fn group_messages<'a, L: AccountLookup>(
    messages: &'a [Message],
    lookup: &'a L,
    self_address: Option<&'a Address>,
) -> MessageGroups<'a, L> {
    MessageGroups {
        messages,
        pos: 0,
        lookup,
        self_address,
    }
}

impl<'a, L: AccountLookup> Iterator for MessageGroups<'a, L> {
    type Item = MessageGroup<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let messages = self.messages;

        let (first, sender_id) = loop {
            let msg = messages.get(self.pos)?;
            self.pos += 1;
            if let Some(sender) = &msg.sender_id {
                break (msg, sender);
            }
        };

        let mut run = vec![first];
        while let Some(msg) = messages.get(self.pos) {
            match &msg.sender_id {
                Some(sender) if sender == sender_id => run.push(msg),
                Some(_) => break,
                None => {}
            }
            self.pos += 1;
        }

        Some(MessageGroup {
            sender_id,
            messages: run,
            identity: self.lookup.account(sender_id),
            is_self: self.self_address == Some(sender_id),
        })
    }
}
