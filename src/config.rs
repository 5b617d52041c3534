//! Runtime configuration for group operations.

use serde::{Deserialize, Serialize};

use crate::limits::{DEFAULT_AUTH_WINDOW_DAYS, DEFAULT_MAX_GROUP_SIZE, HIGHEST_KNOWN_EPOCH};

/// Tunables shared by the operations, the authorization cache and the
/// directory client. Every field has a default, so a partial JSON document
/// (or `{}`) is a valid configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct GroupsConfig {
    /// Maximum members, also the cap on the banned list.
    pub max_group_size: usize,
    /// Changes with a newer epoch decrypt to "no result".
    pub highest_known_epoch: u32,
    /// Number of days of auth credentials requested per fetch.
    pub auth_credential_window_days: i64,
    /// Verify the server notary signature on fetched changes.
    pub verify_change_signatures: bool,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            highest_known_epoch: HIGHEST_KNOWN_EPOCH,
            auth_credential_window_days: DEFAULT_AUTH_WINDOW_DAYS,
            verify_change_signatures: true,
        }
    }
}

impl GroupsConfig {
    /// Parse from JSON. Unknown keys are ignored.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
