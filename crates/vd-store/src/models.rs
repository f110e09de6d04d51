use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

// ── OsKind ──────────────────────────────────────────────────────────

/// Guest distribution a VPS is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsKind {
    Ubuntu,
    Debian,
}

impl OsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
        }
    }

    /// Pinned base image for this distribution.
    pub fn base_image(&self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu:22.04",
            Self::Debian => "debian:12",
        }
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "ubuntu" => Ok(Self::Ubuntu),
            "debian" => Ok(Self::Debian),
            _ => Err(Error::UnknownOs(s.to_string())),
        }
    }
}

// ── VpsRecord ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpsRecord {
    pub id: String,
    pub owner: String,
    pub container_name: String,
    pub container_id: String,
    pub volume_name: String,
    pub ram_mb: u32,
    pub cpu_cores: u32,
    /// Recorded for display only; docker does not enforce it.
    pub disk_gb: u32,
    pub os: OsKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub suspended: bool,
    pub access_secret: String,
}

impl VpsRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Fresh 8-hex-character VPS id.
pub fn new_vps_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub fn container_name(vps_id: &str) -> String {
    format!("vps_{vps_id}")
}

pub fn volume_name(vps_id: &str) -> String {
    format!("vol_{vps_id}")
}

/// Drop sub-second precision so timestamps survive the JSON mirror unchanged.
pub fn whole_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(0)
}
