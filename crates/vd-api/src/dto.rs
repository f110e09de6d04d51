use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vd_infra::{ProvisionReport, StepOutcome};
use vd_store::models::{OsKind, VpsRecord};

use crate::lifecycle::{CreateVps, Created};

// ── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateVpsRequest {
    pub owner: String,
    pub ram_mb: u32,
    pub cpu_cores: u32,
    pub disk_gb: u32,
    pub os: String,
    pub days: u32,
}

impl From<CreateVpsRequest> for CreateVps {
    fn from(req: CreateVpsRequest) -> Self {
        Self {
            owner: req.owner,
            ram_mb: req.ram_mb,
            cpu_cores: req.cpu_cores,
            disk_gb: req.disk_gb,
            os: req.os,
            days: req.days,
        }
    }
}

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct VpsResponse {
    pub id: String,
    pub owner: String,
    pub container_name: String,
    pub container_id: String,
    pub volume_name: String,
    pub ram_mb: u32,
    pub cpu_cores: u32,
    pub disk_gb: u32,
    pub os: OsKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub suspended: bool,
    pub ssh: String,
}

impl From<VpsRecord> for VpsResponse {
    fn from(r: VpsRecord) -> Self {
        Self {
            id: r.id,
            owner: r.owner,
            container_name: r.container_name,
            container_id: r.container_id,
            volume_name: r.volume_name,
            ram_mb: r.ram_mb,
            cpu_cores: r.cpu_cores,
            disk_gb: r.disk_gb,
            os: r.os,
            created_at: r.created_at,
            expires_at: r.expires_at,
            suspended: r.suspended,
            ssh: r.access_secret,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BootstrapFailure {
    pub step: &'static str,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedVpsResponse {
    #[serde(flatten)]
    pub vps: VpsResponse,
    pub bootstrap_failures: Vec<BootstrapFailure>,
}

impl From<Created> for CreatedVpsResponse {
    fn from(c: Created) -> Self {
        Self {
            vps: c.record.into(),
            bootstrap_failures: failures(&c.report),
        }
    }
}

fn failures(report: &ProvisionReport) -> Vec<BootstrapFailure> {
    report
        .soft_failures()
        .filter_map(|s| match &s.outcome {
            StepOutcome::SoftFailed(reason) => Some(BootstrapFailure {
                step: s.step,
                reason: reason.clone(),
            }),
            StepOutcome::Ok => None,
        })
        .collect()
}
