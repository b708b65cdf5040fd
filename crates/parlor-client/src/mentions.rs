use uuid::Uuid;

use parlor_types::Message;

use crate::identity::Account;

/// Pending `@mention` notifications, oldest first.
#[derive(Debug, Clone, Default)]
pub struct Mentions {
    pending: Vec<Uuid>,
}

impl Mentions {
    pub fn add(&mut self, message_id: Uuid) {
        if !self.pending.contains(&message_id) {
            self.pending.push(message_id);
        }
    }

    pub fn mark_seen(&mut self, message_id: Uuid) {
        self.pending.retain(|id| *id != message_id);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn has_mentions(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending(&self) -> &[Uuid] {
        &self.pending
    }

    /// Window title with an unread marker while mentions are pending.
    pub fn title(&self, original: &str) -> String {
        if self.has_mentions() {
            format!("• {}", original)
        } else {
            original.to_string()
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

/// Whether `message` mentions `account` as `@username`. Own messages never do.
pub fn mentions_account(message: &Message, account: &Account) -> bool {
    if message.sender_id.as_ref() == Some(&account.address) {
        return false;
    }
    let Some(username) = account.username() else {
        return false;
    };

    let text = message.text.to_lowercase();
    let needle = format!("@{}", username.to_lowercase());

    text.match_indices(&needle).any(|(start, _)| {
        let before_ok = text[..start].chars().next_back().is_none_or(|c| !is_word_char(c));
        let after_ok = text[start + needle.len()..]
            .chars()
            .next()
            .is_none_or(|c| !is_word_char(c));
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parlor_types::{Address, MessageScope};

    fn account() -> Account {
        Account {
            address: Address::parse("0xalice").unwrap(),
            owner: Address::parse("0xw").unwrap(),
            username: Some("Alice".into()),
            picture: None,
        }
    }

    fn message(from: &str, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            scope: MessageScope::Channel(Uuid::nil()),
            text: text.into(),
            sender: from.into(),
            sender_id: Address::parse(from),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_detects_word_bounded_mentions() {
        let me = account();
        assert!(mentions_account(&message("0xbob", "hey @alice, look"), &me));
        assert!(mentions_account(&message("0xbob", "@ALICE"), &me));
        assert!(!mentions_account(&message("0xbob", "hey @alicemania"), &me));
        assert!(!mentions_account(&message("0xbob", "mail bob@alice"), &me));
        assert!(!mentions_account(&message("0xalice", "note to self @alice"), &me));
    }

    #[test]
    fn test_pending_set_and_title() {
        let mut mentions = Mentions::default();
        let id = Uuid::new_v4();
        assert_eq!(mentions.title("parlor"), "parlor");

        mentions.add(id);
        mentions.add(id);
        assert_eq!(mentions.pending().len(), 1);
        assert_eq!(mentions.title("parlor"), "• parlor");

        mentions.mark_seen(id);
        assert!(!mentions.has_mentions());

        mentions.add(Uuid::new_v4());
        mentions.clear();
        assert!(!mentions.has_mentions());
    }
}
