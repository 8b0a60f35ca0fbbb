use serde::{Deserialize, Serialize};

/// What happens to a file's blocks when it is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    #[default]
    Reclaim,
    /// Only clear the directory slot. The chain stays allocated with no
    /// owner, which is how images written by older tools behave.
    Orphan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde(default)]
    pub delete_policy: DeletePolicy,
}

impl VolumeConfig {
    pub fn with_delete_policy(delete_policy: DeletePolicy) -> Self {
        Self { delete_policy }
    }
}
