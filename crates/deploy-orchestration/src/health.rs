//! Liveness verification of the deployed service.
//!
//! The service answers `GET /health` with
//! `{"status": "healthy", "activeMeetings": 0, "timestamp": "..."}`. The
//! verifier polls it until one well-formed healthy answer arrives or the
//! deadline passes.

use crate::{Error, RemoteHost, Result};
use async_io::Timer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use command_executor::Command;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One successful liveness observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Reported status, always `healthy` for an accepted snapshot
    pub status: String,
    /// Work items the service is handling
    pub active_meetings: u64,
    /// Service-side timestamp
    pub timestamp: DateTime<Utc>,
    /// When the deployer received the response
    pub observed_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    active_meetings: u64,
    timestamp: DateTime<Utc>,
}

/// Interpret a response body; anything but a healthy, well-formed body is an error
pub fn parse_health_response(body: &str) -> std::result::Result<HealthSnapshot, String> {
    let response: HealthResponse = serde_json::from_str(body.trim())
        .map_err(|e| format!("malformed health response: {}", e))?;
    if response.status != "healthy" {
        return Err(format!("service reports status '{}'", response.status));
    }
    Ok(HealthSnapshot {
        status: response.status,
        active_meetings: response.active_meetings,
        timestamp: response.timestamp,
        observed_at: Utc::now(),
    })
}

/// A single liveness request
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Fetch the endpoint once; `Err` carries the raw failure text
    async fn probe(&self) -> std::result::Result<String, String>;

    /// What is being probed, for messages
    fn endpoint(&self) -> String;
}

/// Probes the endpoint with curl on the target itself
///
/// The service binds to loopback on the target, so the request is issued
/// there over the remote channel rather than from the deployer.
pub struct RemoteHttpProbe {
    host: Arc<dyn RemoteHost>,
    port: u16,
    path: String,
}

impl RemoteHttpProbe {
    /// Probe `http://127.0.0.1:<port><path>` on `host`
    pub fn new(host: Arc<dyn RemoteHost>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host,
            port,
            path: path.into(),
        }
    }

    fn url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, self.path)
    }
}

#[async_trait]
impl HealthProbe for RemoteHttpProbe {
    async fn probe(&self) -> std::result::Result<String, String> {
        let command = Command::builder("curl")
            .arg("-fsS")
            .arg("--max-time")
            .arg("5")
            .arg(self.url())
            .build();
        let result = self.host.run(command).await.map_err(|e| e.to_string())?;
        if result.success() {
            Ok(result.stdout)
        } else if result.stderr.trim().is_empty() {
            Err(format!("curl exited with {:?}", result.status.code))
        } else {
            Err(result.stderr.trim().to_string())
        }
    }

    fn endpoint(&self) -> String {
        format!("{} on {}", self.url(), self.host.address())
    }
}

/// Polling parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSettings {
    /// Overall deadline
    pub timeout: Duration,
    /// Spacing between attempts
    pub poll_interval: Duration,
    /// Endpoint path
    pub path: String,
    /// Port used when the runtime config has no `PORT`
    pub default_port: u16,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
            path: "/health".into(),
            default_port: 3001,
        }
    }
}

/// Bounded retry loop over a [`HealthProbe`]
#[derive(Debug, Clone, Copy)]
pub struct HealthVerifier {
    timeout: Duration,
    poll_interval: Duration,
}

impl HealthVerifier {
    /// Verifier giving up after `timeout`, probing every `poll_interval`
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Verifier using the timing of `settings`
    pub fn from_settings(settings: &HealthSettings) -> Self {
        Self::new(settings.timeout, settings.poll_interval)
    }

    /// Poll until the first healthy response or the deadline
    pub async fn verify(&self, probe: &dyn HealthProbe) -> Result<HealthSnapshot> {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0u32;
        let mut last_error = String::from("no attempt made");

        loop {
            attempts += 1;
            let outcome = probe.probe().await.and_then(|body| parse_health_response(&body));
            match outcome {
                Ok(snapshot) => {
                    info!(
                        "{} healthy after {} attempt(s), {} active meetings",
                        probe.endpoint(),
                        attempts,
                        snapshot.active_meetings
                    );
                    return Ok(snapshot);
                }
                Err(e) => {
                    debug!("Health attempt {} failed: {}", attempts, e);
                    last_error = e;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            Timer::after(self.poll_interval.min(deadline - now)).await;
        }

        Err(Error::HealthCheck {
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_healthy_response() {
        let snapshot = parse_health_response(
            r#"{"status":"healthy","activeMeetings":2,"timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(snapshot.status, "healthy");
        assert_eq!(snapshot.active_meetings, 2);
        assert_eq!(snapshot.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_reject_wrong_shape_and_status() {
        assert!(parse_health_response(r#"{"status":"healthy"}"#).is_err());
        assert!(parse_health_response("OK").is_err());
        let err = parse_health_response(
            r#"{"status":"degraded","activeMeetings":0,"timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap_err();
        assert!(err.contains("degraded"));
    }
}
