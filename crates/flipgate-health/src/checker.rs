//! Health check probe logic.
//!
//! Performs HTTP health checks against replica endpoints and tracks
//! consecutive results against the pool's thresholds.

use std::time::Duration;

use tracing::{debug, warn};

use flipgate_core::HealthCheckPolicy;

/// Health of one replica as seen by its target pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    /// Not enough probes yet.
    Unknown,
    Healthy,
    Unhealthy,
}

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health endpoint returned the policy's success code.
    Healthy,
    /// The health endpoint returned any other status.
    Unhealthy,
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

/// Tracks consecutive probe results for a single replica.
#[derive(Debug)]
pub struct HealthTracker {
    status: HealthStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    unhealthy_threshold: u32,
    healthy_threshold: u32,
    interval: Duration,
}

impl HealthTracker {
    /// Create a tracker from a target pool's policy.
    pub fn new(policy: &HealthCheckPolicy) -> Self {
        Self::with_thresholds(
            policy.unhealthy_threshold,
            policy.healthy_threshold,
            policy.interval,
        )
    }

    /// Create a tracker with custom thresholds (for testing).
    pub fn with_thresholds(
        unhealthy_threshold: u32,
        healthy_threshold: u32,
        interval: Duration,
    ) -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
            healthy_threshold: healthy_threshold.max(1),
            interval,
        }
    }

    /// Record a probe result and return the new health status.
    pub fn record(&mut self, result: ProbeResult) -> HealthStatus {
        match result {
            ProbeResult::Healthy => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;

                if self.consecutive_successes >= self.healthy_threshold {
                    if self.status != HealthStatus::Healthy {
                        debug!(successes = self.consecutive_successes, "replica healthy");
                    }
                    self.status = HealthStatus::Healthy;
                }
            }
            ProbeResult::Unhealthy | ProbeResult::Failed => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;

                if self.consecutive_failures >= self.unhealthy_threshold {
                    if self.status != HealthStatus::Unhealthy {
                        warn!(
                            failures = self.consecutive_failures,
                            threshold = self.unhealthy_threshold,
                            "replica marked unhealthy"
                        );
                    }
                    self.status = HealthStatus::Unhealthy;
                }
            }
        }

        self.status
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// Probe interval. Fixed by the policy; failures do not back off.
    pub fn next_interval(&self) -> Duration {
        self.interval
    }
}

/// Perform an HTTP health probe against an endpoint.
///
/// Returns `Healthy` only for the policy's success code, `Unhealthy` for
/// any other status, and `Failed` if the connection fails or times out.
pub async fn http_probe(address: &str, policy: &HealthCheckPolicy) -> ProbeResult {
    let uri = format!("http://{address}{}", policy.path);

    let result = tokio::time::timeout(policy.timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "flipgate-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "health probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status().as_u16() == policy.success_code => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), expected = policy.success_code, %uri, "health probe unexpected status");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            ProbeResult::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn tracker_starts_unknown() {
        let tracker = HealthTracker::new(&HealthCheckPolicy::default());
        assert_eq!(tracker.status(), HealthStatus::Unknown);
        assert_eq!(tracker.consecutive_failures(), 0);
    }

    #[test]
    fn three_successes_to_become_healthy() {
        let mut tracker = HealthTracker::new(&HealthCheckPolicy::default());
        assert_eq!(tracker.record(ProbeResult::Healthy), HealthStatus::Unknown);
        assert_eq!(tracker.record(ProbeResult::Healthy), HealthStatus::Unknown);
        assert_eq!(tracker.record(ProbeResult::Healthy), HealthStatus::Healthy);
    }

    #[test]
    fn two_failures_to_become_unhealthy() {
        let mut tracker = HealthTracker::new(&HealthCheckPolicy::default());
        for _ in 0..3 {
            tracker.record(ProbeResult::Healthy);
        }
        assert_eq!(tracker.record(ProbeResult::Unhealthy), HealthStatus::Healthy);
        assert_eq!(tracker.record(ProbeResult::Failed), HealthStatus::Unhealthy);
    }

    #[test]
    fn failure_resets_success_streak() {
        let mut tracker = HealthTracker::new(&HealthCheckPolicy::default());
        tracker.record(ProbeResult::Healthy);
        tracker.record(ProbeResult::Healthy);
        tracker.record(ProbeResult::Failed);
        assert_eq!(tracker.consecutive_successes(), 0);
        tracker.record(ProbeResult::Healthy);
        tracker.record(ProbeResult::Healthy);
        assert_eq!(tracker.status(), HealthStatus::Unknown);
        tracker.record(ProbeResult::Healthy);
        assert_eq!(tracker.status(), HealthStatus::Healthy);
    }

    #[test]
    fn interval_is_constant() {
        let mut tracker = HealthTracker::new(&HealthCheckPolicy::default());
        for _ in 0..5 {
            tracker.record(ProbeResult::Failed);
        }
        assert_eq!(tracker.next_interval(), Duration::from_secs(15));
    }

    async fn serve_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
            let resp = format!("{status_line}\r\ncontent-length: 0\r\n\r\n");
            let _ = sock.write_all(resp.as_bytes()).await;
        });
        addr
    }

    #[tokio::test]
    async fn probe_accepts_only_the_success_code() {
        let policy = HealthCheckPolicy::default();
        let ok = serve_once("HTTP/1.1 200 OK").await;
        assert_eq!(http_probe(&ok, &policy).await, ProbeResult::Healthy);

        let no_content = serve_once("HTTP/1.1 204 No Content").await;
        assert_eq!(http_probe(&no_content, &policy).await, ProbeResult::Unhealthy);
    }

    #[tokio::test]
    async fn probe_connection_refused_is_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert_eq!(
            http_probe(&addr, &HealthCheckPolicy::default()).await,
            ProbeResult::Failed
        );
    }
}
