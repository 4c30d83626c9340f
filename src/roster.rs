use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifies one specific lineup (not a franchise): two rosters are the same
/// identity exactly when they field the same set of players.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RosterId(pub String);

impl RosterId {
    /// Order and duplicates in `player_ids` do not matter.
    pub fn from_players(player_ids: &[u64]) -> Self {
        let mut ids = player_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join("-");
        let digest = Sha256::digest(joined.as_bytes());
        let hex = digest
            .iter()
            .take(12)
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        RosterId(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RosterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RosterId {
    fn from(value: &str) -> Self {
        RosterId(value.to_string())
    }
}
