//! Persistence of a finished turn.
//!
//! The write runs on its own task under its own deadline, so the
//! cancellation that aborted a turn cannot also cancel the record of it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use va_domain::error::{Error, Result};
use va_domain::history::StoredTurn;
use va_sessions::{AssistantStore, HistoryStore};

/// Append `turn` to the assistant's history and touch its last-activity
/// timestamp. Resolves to whether the turn was persisted; failures are
/// logged, never returned.
pub fn spawn_finalizer(
    history: HistoryStore,
    assistants: Arc<AssistantStore>,
    assistant_id: String,
    turn: StoredTurn,
    deadline: Duration,
) -> JoinHandle<bool> {
    tokio::spawn(async move {
        let write = persist(&history, &assistants, &assistant_id, turn);
        match tokio::time::timeout(deadline, write).await {
            Ok(Ok(())) => {
                tracing::debug!(assistant_id = %assistant_id, "turn persisted");
                true
            }
            Ok(Err(e)) => {
                tracing::error!(assistant_id = %assistant_id, error = %e, "failed to persist turn");
                false
            }
            Err(_) => {
                tracing::error!(
                    assistant_id = %assistant_id,
                    deadline_secs = deadline.as_secs(),
                    "persisting turn timed out"
                );
                false
            }
        }
    })
}

async fn persist(
    history: &HistoryStore,
    assistants: &Arc<AssistantStore>,
    assistant_id: &str,
    turn: StoredTurn,
) -> Result<()> {
    let timestamp = turn.created_at.clone();
    // The assistant may have been deleted while the turn was streaming.
    // Checked under the history write lock, which deletion also takes.
    let owner = Arc::clone(assistants);
    let id = assistant_id.to_owned();
    let written = history
        .append_if(assistant_id, turn, move || owner.exists(&id))
        .await?;
    if !written {
        return Err(Error::AssistantNotFound(assistant_id.to_owned()));
    }
    assistants.touch(assistant_id, &timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use va_domain::assistant::AssistantDraft;

    fn setup() -> (tempfile::TempDir, HistoryStore, Arc<AssistantStore>, String) {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryStore::new(dir.path()).unwrap();
        let assistants = Arc::new(AssistantStore::new(dir.path()).unwrap());
        let id = assistants
            .create(AssistantDraft {
                name: "n".into(),
                description: String::new(),
                prompt: "p".into(),
            })
            .unwrap()
            .id;
        (dir, history, assistants, id)
    }

    #[tokio::test]
    async fn appends_and_touches() {
        let (_dir, history, assistants, id) = setup();
        let mut turn = StoredTurn::greeting("p", "hi");
        turn.created_at = "2031-01-01 08:00:00".into();

        let ok = spawn_finalizer(
            history.clone(),
            assistants.clone(),
            id.clone(),
            turn,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(ok);
        assert_eq!(history.get(&id).await.unwrap().len(), 1);
        assert_eq!(assistants.get(&id).unwrap().time_stamp, "2031-01-01 08:00:00");
    }

    #[tokio::test]
    async fn deleted_assistant_is_not_written() {
        let (_dir, history, assistants, id) = setup();
        assistants.delete(&id).unwrap();

        let ok = spawn_finalizer(
            history.clone(),
            assistants,
            id.clone(),
            StoredTurn::greeting("p", "hi"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(!ok);
        assert!(history.get(&id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_delete_leaves_no_history_file() {
        for _ in 0..50 {
            let (dir, history, assistants, id) = setup();

            let finalizer = spawn_finalizer(
                history.clone(),
                assistants.clone(),
                id.clone(),
                StoredTurn::greeting("p", "hi"),
                Duration::from_secs(5),
            );
            let deleter = {
                let history = history.clone();
                let assistants = assistants.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    assistants.delete(&id).unwrap();
                    history.delete_all(&id).await.unwrap();
                })
            };
            finalizer.await.unwrap();
            deleter.await.unwrap();

            assert!(!dir.path().join("history").join(format!("{id}.jsonl")).exists());
            assert!(history.get(&id).await.unwrap().is_empty());
        }
    }
}
