//! The outbound webhook emitter: fired once per job on terminal transition.

use std::time::Duration;

use jobrunner_core::Job;
use tracing::{debug, error, info};

const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Build the client used for outbound webhook POSTs. Timeout is read from
/// `JOBRUNNER_WEBHOOK_TIMEOUT_SECONDS`, defaulting to 10 seconds.
pub fn client() -> reqwest::Client {
    let timeout_secs = std::env::var("JOBRUNNER_WEBHOOK_TIMEOUT_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECS);

    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .expect("webhook client configuration is static and always valid")
}

/// Spawn a task that POSTs the job's final snapshot to its webhook URL, if
/// one was given. At-most-once delivery, no retry: a failed send or a
/// non-2xx response is logged and discarded.
pub fn send(client: reqwest::Client, job: Job) {
    let Some(url) = job.webhook_url.clone() else {
        debug!(job_id = %job.id, "no webhook url for this job");
        return;
    };

    tokio::spawn(async move {
        let job_id = job.id;
        let response = match client.post(&url).json(&job).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(%job_id, %url, error = %e, "failed to send webhook");
                return;
            }
        };

        if !response.status().is_success() {
            error!(%job_id, %url, status = %response.status(), "webhook responded with an error status");
            return;
        }

        info!(%job_id, %url, "webhook sent successfully");
    });
}
