use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for `assistants.json` and the `history/` directory.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
