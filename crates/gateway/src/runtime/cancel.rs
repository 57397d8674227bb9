//! Per-assistant cancellation tokens.
//!
//! Each running turn registers a [`CancellationToken`] under its assistant
//! id so `POST /history/:assistant_id/stop` can abort it. A newer turn for
//! the same assistant replaces the older entry; removal is keyed on the
//! turn id so a finishing turn never evicts its successor.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

struct Entry {
    turn_id: String,
    token: CancellationToken,
}

#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, Entry>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a token for a new turn.
    pub fn register(&self, assistant_id: &str, turn_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(
            assistant_id.to_owned(),
            Entry {
                turn_id: turn_id.to_owned(),
                token: token.clone(),
            },
        );
        token
    }

    /// Cancel the running turn of an assistant. Returns true if one was found.
    pub fn cancel(&self, assistant_id: &str) -> bool {
        match self.tokens.lock().get(assistant_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the entry if it still belongs to `turn_id`.
    pub fn remove(&self, assistant_id: &str, turn_id: &str) {
        let mut tokens = self.tokens.lock();
        if tokens
            .get(assistant_id)
            .is_some_and(|e| e.turn_id == turn_id)
        {
            tokens.remove(assistant_id);
        }
    }

    pub fn is_running(&self, assistant_id: &str) -> bool {
        self.tokens.lock().contains_key(assistant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("a1", "t1");
        assert!(map.is_running("a1"));
        assert!(!token.is_cancelled());

        assert!(map.cancel("a1"));
        assert!(token.is_cancelled());

        map.remove("a1", "t1");
        assert!(!map.is_running("a1"));
        assert!(!map.cancel("a1"));
    }

    #[test]
    fn cancel_unknown_returns_false() {
        assert!(!CancelMap::new().cancel("ghost"));
    }

    #[test]
    fn stale_turn_does_not_evict_successor() {
        let map = CancelMap::new();
        let old = map.register("a1", "t1");
        let new = map.register("a1", "t2");

        map.remove("a1", "t1");
        assert!(map.is_running("a1"));

        map.cancel("a1");
        assert!(new.is_cancelled());
        assert!(!old.is_cancelled());
    }
}
