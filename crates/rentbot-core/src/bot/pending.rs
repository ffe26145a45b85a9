//! Pending-command disambiguation.
//!
//! When a command needs an account id and the buyer has several rentals, the
//! bot replies with a choice list and remembers the command. The next plain
//! message from the same sender in the same chat (usually just the id)
//! completes it. Entries expire after five minutes. Scoped per bot — there
//! is no cross-workspace sharing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::text::Command;

const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct PendingEntry {
    command: Command,
    args_prefix: String,
    expires_at: Instant,
}

/// Per-bot map of (chat, sender) → awaited command.
#[derive(Debug, Default)]
pub struct PendingCommands {
    entries: HashMap<(i64, String), PendingEntry>,
}

fn key(chat_id: i64, sender: &str) -> (i64, String) {
    (chat_id, sender.trim().to_lowercase())
}

impl PendingCommands {
    pub fn set(&mut self, chat_id: i64, sender: &str, command: Command, args_prefix: &str) {
        self.set_at(chat_id, sender, command, args_prefix, Instant::now());
    }

    pub fn set_at(
        &mut self,
        chat_id: i64,
        sender: &str,
        command: Command,
        args_prefix: &str,
        now: Instant,
    ) {
        self.entries.insert(
            key(chat_id, sender),
            PendingEntry {
                command,
                args_prefix: args_prefix.trim().to_string(),
                expires_at: now + DEFAULT_TTL,
            },
        );
    }

    /// Take the pending command if one is still alive; expired entries are
    /// dropped on access.
    pub fn pop(&mut self, chat_id: i64, sender: &str) -> Option<(Command, String)> {
        self.pop_at(chat_id, sender, Instant::now())
    }

    pub fn pop_at(
        &mut self,
        chat_id: i64,
        sender: &str,
        now: Instant,
    ) -> Option<(Command, String)> {
        let k = key(chat_id, sender);
        let entry = self.entries.remove(&k)?;
        if entry.expires_at <= now {
            return None;
        }
        Some((entry.command, entry.args_prefix))
    }

    pub fn clear(&mut self, chat_id: i64, sender: &str) {
        self.entries.remove(&key(chat_id, sender));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_returns_and_consumes() {
        let mut pending = PendingCommands::default();
        let now = Instant::now();
        pending.set_at(515, "Alice", Command::Pause, "", now);
        assert_eq!(
            pending.pop_at(515, "alice", now + Duration::from_secs(1)),
            Some((Command::Pause, String::new()))
        );
        // Consumed.
        assert_eq!(pending.pop_at(515, "alice", now + Duration::from_secs(2)), None);
    }

    #[test]
    fn entries_expire() {
        let mut pending = PendingCommands::default();
        let now = Instant::now();
        pending.set_at(515, "alice", Command::Bonus, "", now);
        assert_eq!(
            pending.pop_at(515, "alice", now + Duration::from_secs(301)),
            None
        );
    }

    #[test]
    fn sender_and_chat_scope() {
        let mut pending = PendingCommands::default();
        let now = Instant::now();
        pending.set_at(515, "alice", Command::Account, "", now);
        assert_eq!(pending.pop_at(515, "bob", now), None);
        assert_eq!(pending.pop_at(516, "alice", now), None);
        assert!(pending.pop_at(515, "ALICE", now).is_some());
    }
}
