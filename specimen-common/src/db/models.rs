//! Database models
//!
//! Every record embeds the same [`Identity`]: the internal row id, which
//! never leaves the process, and the obfuscated external id clients see.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Internal and external identity shared by every resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identity {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub external_id: String,
}

impl Identity {
    pub fn new(id: i64, external_id: impl Into<String>) -> Self {
        Self {
            id,
            external_id: external_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    #[serde(flatten)]
    pub identity: Identity,
    pub name: String,
    pub sample_mask: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(skip)]
    pub project_id: i64,
    #[serde(rename = "project")]
    pub project_external_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Method {
    #[serde(flatten)]
    pub identity: Identity,
    pub name: String,
    pub description: String,
}

/// One processing step in a sample's append-only stage log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(skip)]
    pub sample_id: i64,
    #[serde(skip)]
    pub method_id: i64,
    #[serde(rename = "sample")]
    pub sample_external_id: String,
    #[serde(rename = "method")]
    pub method_external_id: String,
    /// 1-based place in the sample's log, derived from insertion order
    pub position: i64,
    pub annotation: String,
    pub alt_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of an uploaded file
///
/// `prepared → staged → archived → cleaned`; statuses only ever move
/// forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Record exists, upload area allocated, bytes not confirmed
    Prepared,
    /// Upload reassembled and checksum-validated; bytes in the upload area
    Staged,
    /// Copied to permanent storage; upload copy still present
    Archived,
    /// Upload area removed; nothing left to do
    Cleaned,
}

impl FileStatus {
    pub const ALL: [FileStatus; 4] = [
        FileStatus::Prepared,
        FileStatus::Staged,
        FileStatus::Archived,
        FileStatus::Cleaned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Prepared => "prepared",
            FileStatus::Staged => "staged",
            FileStatus::Archived => "archived",
            FileStatus::Cleaned => "cleaned",
        }
    }

    /// The only status this one may advance to
    pub fn next(self) -> Option<FileStatus> {
        match self {
            FileStatus::Prepared => Some(FileStatus::Staged),
            FileStatus::Staged => Some(FileStatus::Archived),
            FileStatus::Archived => Some(FileStatus::Cleaned),
            FileStatus::Cleaned => None,
        }
    }

    pub fn can_advance_to(self, target: FileStatus) -> bool {
        self.next() == Some(target)
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepared" => Ok(FileStatus::Prepared),
            "staged" => Ok(FileStatus::Staged),
            "archived" => Ok(FileStatus::Archived),
            // legacy two-state schema
            "cleaned" | "complete" => Ok(FileStatus::Cleaned),
            other => Err(Error::InvalidInput(format!("unknown file status: {}", other))),
        }
    }
}

/// An uploaded file attached to a stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFile {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(skip)]
    pub stage_id: i64,
    #[serde(rename = "stage")]
    pub stage_external_id: String,
    /// Where the client uploaded it, relative to the upload area
    pub relative_source_path: String,
    /// Where it lives permanently, relative to the store
    pub relative_target_path: String,
    pub status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Authorization record of a user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserAuthorization {
    #[serde(flatten)]
    pub identity: Identity,
    pub status: String,
    pub authorized: bool,
    pub created_at: DateTime<Utc>,
}

/// One identity of a user at one authentication provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserAuthentication {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(skip)]
    pub user_id: i64,
    pub authenticator: String,
    pub external_uid: String,
}
