use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Account role of a user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
}

impl Role {
    /// The wire/storage form of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
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

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            other => Err(Error::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// Lifecycle state of a requirement ticket.
///
/// Stored and compared as the exact lowercase strings below; unknown or
/// differently-cased input is rejected at parse time, never coerced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created with a future trigger time and not yet promoted.
    NotDispatched,
    /// Dispatched and awaiting the assignee's completion note.
    Pending,
    /// Submitted by the assignee, awaiting the assigner's verdict.
    Reviewing,
    /// Approved by the assigner. Terminal for the approve path.
    Completed,
    /// Voided by the assigner. Terminal.
    Invalid,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NotDispatched => "not_dispatched",
            Status::Pending => "pending",
            Status::Reviewing => "reviewing",
            Status::Completed => "completed",
            Status::Invalid => "invalid",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "not_dispatched" => Ok(Status::NotDispatched),
            "pending" => Ok(Status::Pending),
            "reviewing" => Ok(Status::Reviewing),
            "completed" => Ok(Status::Completed),
            "invalid" => Ok(Status::Invalid),
            other => Err(Error::Validation(format!("unknown status '{}'", other))),
        }
    }
}

/// Priority of a requirement ticket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "normal" => Ok(Priority::Normal),
            "urgent" => Ok(Priority::Urgent),
            other => Err(Error::Validation(format!("unknown priority '{}'", other))),
        }
    }
}

/// A user account row, credential included. Only the store and the
/// authentication layer handle this type; everything past login works
/// with [`Identity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Stored credential in whatever form the active password scheme uses.
    #[serde(skip_serializing, default)]
    pub credential: String,
    pub display_name: String,
    pub email: String,
    pub role: Role,
}

/// The canonical identity of an authenticated caller.
///
/// Every lifecycle operation takes one of these; there is no other
/// "current user" representation in the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<User> for Identity {
    fn from(user: User) -> Self {
        Identity {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            email: user.email,
            role: user.role,
        }
    }
}

/// A requirement ticket as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub assigner_id: i64,
    pub assignee_id: i64,
    pub status: Status,
    pub priority: Priority,

    /// Set at the moment of actual dispatch. `None` while the ticket is
    /// still scheduled; scheduled tickets take the dispatch time, not the
    /// time `create` was called.
    pub created_at: Option<DateTime<Utc>>,

    /// Trigger time of a scheduled ticket. Non-null only while
    /// `is_dispatched` is false.
    pub scheduled_time: Option<DateTime<Utc>>,

    pub is_dispatched: bool,

    /// When the assignee submitted for review. Cleared on rejection.
    pub completed_at: Option<DateTime<Utc>>,

    /// The assignee's completion note. Cleared on rejection.
    pub comment: Option<String>,

    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A requirement joined with the display names of both parties, as
/// returned by the list and detail queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    #[serde(flatten)]
    pub requirement: Requirement,
    pub assigner_name: String,
    pub assignee_name: String,
}

/// Input for creating a new requirement ticket.
#[derive(Debug, Clone)]
pub struct NewRequirement {
    pub title: String,
    pub description: String,
    pub assignee_id: i64,
    pub priority: Priority,
    /// `Some` schedules the ticket for later dispatch; must be strictly in
    /// the future. `None` dispatches immediately.
    pub scheduled_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            Status::NotDispatched,
            Status::Pending,
            Status::Reviewing,
            Status::Completed,
            Status::Invalid,
        ] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
    }

    #[test]
    fn test_status_parse_is_strict() {
        assert!("Pending".parse::<Status>().is_err());
        assert!("PENDING".parse::<Status>().is_err());
        assert!(" pending".parse::<Status>().is_err());
        assert!("done".parse::<Status>().is_err());
    }

    #[test]
    fn test_priority_and_role_parse() {
        assert_eq!("urgent".parse::<Priority>().unwrap(), Priority::Urgent);
        assert!("Urgent".parse::<Priority>().is_err());
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_identity_from_user_drops_credential() {
        let user = User {
            id: 7,
            username: "staff1".to_string(),
            credential: "secret".to_string(),
            display_name: "Staff One".to_string(),
            email: "staff1@example.com".to_string(),
            role: Role::Staff,
        };
        let identity = Identity::from(user);
        assert_eq!(identity.id, 7);
        assert!(!identity.is_admin());
    }
}
