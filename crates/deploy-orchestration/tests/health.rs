//! Liveness polling semantics

mod common;

use async_trait::async_trait;
use common::{ScriptedHost, fail, ok};
use deploy_orchestration::{Error, HealthProbe, HealthVerifier, RemoteHttpProbe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

const HEALTHY: &str =
    r#"{"status":"healthy","activeMeetings":0,"timestamp":"2024-01-01T00:00:00Z"}"#;

/// Refuses connections for the first `failures` attempts, then answers healthy
struct WarmingUpProbe {
    failures: u32,
    attempts: AtomicU32,
}

impl WarmingUpProbe {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl HealthProbe for WarmingUpProbe {
    async fn probe(&self) -> Result<String, String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            Err("connect ECONNREFUSED 127.0.0.1:3001".into())
        } else {
            Ok(HEALTHY.into())
        }
    }

    fn endpoint(&self) -> String {
        "http://127.0.0.1:3001/health".into()
    }
}

#[smol_potat::test]
async fn test_success_on_third_attempt_returns_snapshot() {
    let probe = WarmingUpProbe::new(2);
    let verifier = HealthVerifier::new(Duration::from_secs(5), Duration::from_secs(1));
    let start = Instant::now();

    let snapshot = verifier.verify(&probe).await.unwrap();

    assert_eq!(snapshot.status, "healthy");
    assert_eq!(snapshot.active_meetings, 0);
    assert_eq!(probe.attempts.load(Ordering::SeqCst), 3);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "{elapsed:?}");
}

#[smol_potat::test]
async fn test_refused_for_whole_window_fails_after_timeout() {
    let probe = WarmingUpProbe::new(u32::MAX);
    let verifier = HealthVerifier::new(Duration::from_secs(5), Duration::from_secs(1));
    let start = Instant::now();

    let err = verifier.verify(&probe).await.unwrap_err();

    assert!(start.elapsed() >= Duration::from_millis(4900));
    match err {
        Error::HealthCheck {
            attempts,
            last_error,
        } => {
            assert!(attempts >= 5, "only {attempts} attempts");
            assert!(last_error.contains("ECONNREFUSED"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[smol_potat::test]
async fn test_unhealthy_status_keeps_polling() {
    let host = Arc::new(ScriptedHost::new().respond(
        "curl",
        vec![
            ok(r#"{"status":"starting","activeMeetings":0,"timestamp":"2024-01-01T00:00:00Z"}"#),
            ok(HEALTHY),
        ],
    ));
    let probe = RemoteHttpProbe::new(host.clone(), 3001, "/health");
    let verifier = HealthVerifier::new(Duration::from_secs(2), Duration::from_millis(10));

    let snapshot = verifier.verify(&probe).await.unwrap();

    assert_eq!(snapshot.status, "healthy");
    let probes: Vec<String> = host
        .commands()
        .into_iter()
        .filter(|c| c.contains("curl"))
        .collect();
    assert_eq!(probes.len(), 2);
    assert!(probes[0].contains("http://127.0.0.1:3001/health"));
}

#[smol_potat::test]
async fn test_remote_probe_reports_curl_error() {
    let host = Arc::new(ScriptedHost::new().respond(
        "curl",
        vec![fail(
            7,
            "curl: (7) Failed to connect to 127.0.0.1 port 3001: Connection refused",
        )],
    ));
    let probe = RemoteHttpProbe::new(host, 3001, "/health");
    let verifier = HealthVerifier::new(Duration::from_millis(100), Duration::from_millis(20));

    let err = verifier.verify(&probe).await.unwrap_err();

    assert!(err.to_string().contains("Connection refused"));
}
