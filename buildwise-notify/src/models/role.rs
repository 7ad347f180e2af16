//! Conversation participant roles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// One of the two fixed parties of a trade conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The project owner (developer) who publishes the trade.
    #[serde(rename = "bautraeger")]
    ProjectOwner,
    /// The contractor (service provider) working on the trade.
    #[serde(rename = "dienstleister")]
    Contractor,
}

impl Role {
    /// The opposite party.
    pub fn other(self) -> Role {
        match self {
            Role::ProjectOwner => Role::Contractor,
            Role::Contractor => Role::ProjectOwner,
        }
    }

    /// Wire name as it appears in persisted notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ProjectOwner => "bautraeger",
            Role::Contractor => "dienstleister",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bautraeger" | "owner" | "project-owner" | "developer" => Ok(Role::ProjectOwner),
            "dienstleister" | "contractor" | "provider" | "service-provider" => {
                Ok(Role::Contractor)
            }
            other => Err(Error::invalid(format!("unknown role '{}'", other))),
        }
    }
}
