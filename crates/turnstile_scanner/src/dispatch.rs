#![forbid(unsafe_code)]

use std::time::Duration;

use turnstile_contracts::admission::{ScanRequest, ScanResponse};
use turnstile_contracts::scanner::{DispatchClass, ScannedCode};

use crate::config::ScannerConfig;

/// Raw server reply before retry classification.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    pub body: Option<ScanResponse>,
}

/// Blocking HTTP seam between the consumer and the gate server. `Err` means
/// the request never produced an HTTP status (connect/timeout) and is
/// always retryable.
pub trait ScanTransport {
    fn post_scan(&self, scan: &ScannedCode) -> Result<TransportReply, String>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
    server_url: String,
    device_key: String,
}

impl UreqTransport {
    pub fn new(config: &ScannerConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.request_timeout)
            .timeout_read(config.request_timeout)
            .timeout_write(config.request_timeout)
            .build();
        Self {
            agent,
            server_url: config.server_url.trim_end_matches('/').to_string(),
            device_key: config.device_key.clone(),
        }
    }
}

impl ScanTransport for UreqTransport {
    fn post_scan(&self, scan: &ScannedCode) -> Result<TransportReply, String> {
        let url = format!("{}/scan/{}", self.server_url, scan.direction.as_str());
        let body = ScanRequest {
            token: scan.code.clone(),
            timestamp: scan.scanned_at,
            device_id: scan.device_id.clone(),
        };
        let request = self
            .agent
            .post(&url)
            .set("content-type", "application/json")
            .set("x-turnstile-device-key", &self.device_key);
        match request.send_json(&body) {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.into_json::<ScanResponse>().ok();
                Ok(TransportReply { status, body })
            }
            Err(ureq::Error::Status(status, resp)) => Ok(TransportReply {
                status,
                body: resp.into_json::<ScanResponse>().ok(),
            }),
            Err(ureq::Error::Transport(err)) => Err(format!("transport error: {err}")),
        }
    }
}

/// Bounded retry schedule: half a second before the first retry, then a
/// tripled delay capped at the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(1_500),
        }
    }
}

impl RetryPolicy {
    /// Delay after `completed_attempts` failed tries (1-based).
    pub fn backoff_delay(&self, completed_attempts: u32) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..completed_attempts {
            delay = delay.saturating_mul(3);
            if delay >= self.max_backoff {
                return self.max_backoff;
            }
        }
        delay.min(self.max_backoff)
    }
}

/// Sleep seam so the retry loop stays deterministic under test. The real
/// implementation blocks the dispatch thread, which the consumer runs on a
/// blocking task anyway.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The server answered with a status that retrying cannot fix.
    Fatal { status: u16, detail: String },
    /// The attempt budget ran out on retryable failures.
    Exhausted { attempts: u32, detail: String },
}

/// Post one scan with bounded retry. Fatal statuses (auth, unknown route,
/// malformed payload) stop immediately; rate limiting, server errors, and
/// transport failures burn through the attempt budget with backoff.
pub fn dispatch_scan<T: ScanTransport + ?Sized, S: Sleeper + ?Sized>(
    transport: &T,
    policy: &RetryPolicy,
    sleeper: &S,
    scan: &ScannedCode,
) -> Result<ScanResponse, DispatchError> {
    let mut last_detail = String::new();
    for attempt in 1..=policy.max_attempts {
        match transport.post_scan(scan) {
            Ok(reply) => match DispatchClass::of_status(reply.status) {
                DispatchClass::Success => {
                    return reply.body.ok_or_else(|| DispatchError::Fatal {
                        status: reply.status,
                        detail: "success without a decodable body".to_string(),
                    });
                }
                DispatchClass::Fatal => {
                    return Err(DispatchError::Fatal {
                        status: reply.status,
                        detail: format!("server rejected scan with status {}", reply.status),
                    });
                }
                DispatchClass::Retryable => {
                    last_detail = format!("retryable status {}", reply.status);
                }
            },
            Err(detail) => {
                last_detail = detail;
            }
        }
        if attempt < policy.max_attempts {
            sleeper.sleep(policy.backoff_delay(attempt));
        }
    }
    Err(DispatchError::Exhausted {
        attempts: policy.max_attempts,
        detail: last_detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use turnstile_contracts::admission::{AdmissionReason, DeclaredDirection};

    struct FakeTransport {
        replies: RefCell<VecDeque<Result<TransportReply, String>>>,
        calls: RefCell<u32>,
    }

    impl FakeTransport {
        fn new(replies: Vec<Result<TransportReply, String>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                calls: RefCell::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.borrow()
        }
    }

    impl ScanTransport for FakeTransport {
        fn post_scan(&self, _scan: &ScannedCode) -> Result<TransportReply, String> {
            *self.calls.borrow_mut() += 1;
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err("no reply scripted".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: RefCell<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.borrow_mut().push(duration);
        }
    }

    fn scan() -> ScannedCode {
        ScannedCode {
            direction: DeclaredDirection::In,
            device_id: "turnstile-entry-1".to_string(),
            code: "AB12CD".to_string(),
            scanned_at: Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap(),
        }
    }

    fn allowed_body() -> ScanResponse {
        ScanResponse {
            allowed: true,
            reason: AdmissionReason::Ok,
            credits_left: 2,
            cooldown_seconds_left: None,
            open_door: true,
            door_open_duration: Some(5),
            user: None,
        }
    }

    fn reply(status: u16, body: Option<ScanResponse>) -> Result<TransportReply, String> {
        Ok(TransportReply { status, body })
    }

    #[test]
    fn backoff_schedule_is_half_second_then_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1_500));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(1_500));
    }

    #[test]
    fn retryable_then_success_takes_exactly_two_calls() {
        let transport = FakeTransport::new(vec![
            reply(503, None),
            reply(200, Some(allowed_body())),
        ]);
        let sleeper = RecordingSleeper::default();

        let response =
            dispatch_scan(&transport, &RetryPolicy::default(), &sleeper, &scan()).unwrap();
        assert!(response.allowed);
        assert_eq!(transport.calls(), 2);
        assert_eq!(*sleeper.slept.borrow(), vec![Duration::from_millis(500)]);
    }

    #[test]
    fn auth_failure_never_retries() {
        let transport = FakeTransport::new(vec![reply(401, None)]);
        let sleeper = RecordingSleeper::default();

        let err =
            dispatch_scan(&transport, &RetryPolicy::default(), &sleeper, &scan()).unwrap_err();
        assert!(matches!(err, DispatchError::Fatal { status: 401, .. }));
        assert_eq!(transport.calls(), 1);
        assert!(sleeper.slept.borrow().is_empty());
    }

    #[test]
    fn transport_errors_burn_the_attempt_budget() {
        let transport = FakeTransport::new(vec![
            Err("connection refused".to_string()),
            Err("connection refused".to_string()),
            Err("connection refused".to_string()),
        ]);
        let sleeper = RecordingSleeper::default();

        let err =
            dispatch_scan(&transport, &RetryPolicy::default(), &sleeper, &scan()).unwrap_err();
        assert_eq!(
            err,
            DispatchError::Exhausted {
                attempts: 3,
                detail: "connection refused".to_string(),
            }
        );
        assert_eq!(transport.calls(), 3);
        assert_eq!(
            *sleeper.slept.borrow(),
            vec![Duration::from_millis(500), Duration::from_millis(1_500)]
        );
    }

    #[test]
    fn denial_bodies_still_count_as_success() {
        // A 200 with allowed=false is a decision, not a dispatch failure.
        let mut body = allowed_body();
        body.allowed = false;
        body.reason = AdmissionReason::NoCredits;
        body.open_door = false;
        let transport = FakeTransport::new(vec![reply(200, Some(body))]);
        let sleeper = RecordingSleeper::default();

        let response =
            dispatch_scan(&transport, &RetryPolicy::default(), &sleeper, &scan()).unwrap();
        assert!(!response.allowed);
        assert_eq!(transport.calls(), 1);
    }
}
