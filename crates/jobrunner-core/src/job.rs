//! The `Job` record and its lifecycle.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{ContainerId, ImageId, JobId};

/// A single command: a non-empty ordered sequence of argument tokens.
pub type Cmd = Vec<String>;

/// Status of a job. Transitions form the DAG described in the design doc:
/// `queued -> running -> {successful, failed, error, stopped}`, plus
/// `queued -> error` when setup fails before any container starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Successful,
    Failed,
    Error,
    Stopped,
}

impl JobStatus {
    /// Terminal statuses absorb all further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Successful | JobStatus::Failed | JobStatus::Error | JobStatus::Stopped
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Successful => "successful",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

use std::fmt;

/// The persistent job record, mutated only through the Job Updater.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub image: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cmds: Vec<Cmd>,
    pub status: JobStatus,
    #[serde(default)]
    pub results: Vec<i64>,
    #[serde(default)]
    pub containers: Vec<ContainerId>,
    #[serde(default)]
    pub images: Vec<ImageId>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Environment serialized to the driver as `NAME=VALUE` tokens.
    /// Iteration order is unspecified.
    pub fn env_tokens(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect()
    }

    /// The image a newly created container for `cmd_index` should run against:
    /// the initial image for the first command, the most recently committed
    /// image for any later one.
    pub fn base_image_for(&self, cmd_index: usize) -> &str {
        if cmd_index == 0 {
            &self.image
        } else {
            self.images
                .get(cmd_index - 1)
                .map(|i| i.0.as_str())
                .unwrap_or(&self.image)
        }
    }
}

/// Request body for `POST /jobs`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub image: String,
    pub cmds: Vec<Cmd>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl JobSpec {
    /// Structural validation independent of the store: non-empty image,
    /// no empty command token list. An empty `cmds` list is accepted and
    /// completes immediately as *successful* with zero containers, matching
    /// the reference implementation's `cmdIndex >= len(cmds)` check.
    pub fn validate(&self) -> Result<(), String> {
        if self.image.trim().is_empty() {
            return Err("image must not be empty".to_string());
        }
        if self.cmds.iter().any(|c| c.is_empty()) {
            return Err("each command must have at least one token".to_string());
        }
        Ok(())
    }

    /// Build the initial, *queued* job record. `id` is set by the store on
    /// insert; any value here is a placeholder.
    pub fn into_job(self) -> Job {
        Job {
            id: JobId(0),
            image: self.image,
            env: self.env,
            cmds: self.cmds,
            status: JobStatus::Queued,
            results: Vec::new(),
            containers: Vec::new(),
            images: Vec::new(),
            start_time: None,
            end_time: None,
            webhook_url: self.webhook_url,
            message: None,
            created_at: Utc::now(),
        }
    }
}
