/// Admin moderation actions shared by users and tasks

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Block,
    Unblock,
}

impl ModerationAction {
    /// Value of the `blocked` flag after the action
    pub fn blocked(&self) -> bool {
        matches!(self, ModerationAction::Block)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::Block => "block",
            ModerationAction::Unblock => "unblock",
        }
    }
}

impl fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModerationAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(ModerationAction::Block),
            "unblock" => Ok(ModerationAction::Unblock),
            other => Err(CoreError::InvalidAction(other.to_string())),
        }
    }
}
