use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Handed to a worker by the scheduler; carries enough context for the
/// worker to label the resulting sample without reaching back into the
/// scheduler's state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttackToken {
    pub target_rps: u32,
    pub step: u64,
    pub tick: u64,
}

/// What an `Attacker::do_call` reports back about a single call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoResult {
    pub request_label: String,
    pub error: Option<String>,
    pub status_code: Option<u16>,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl DoResult {
    pub fn ok(request_label: impl Into<String>, status_code: u16, bytes_in: u64, bytes_out: u64) -> Self {
        DoResult {
            request_label: request_label.into(),
            error: None,
            status_code: Some(status_code),
            bytes_in,
            bytes_out,
        }
    }

    pub fn failed(request_label: impl Into<String>, error: impl Into<String>) -> Self {
        DoResult {
            request_label: request_label.into(),
            error: Some(error.into()),
            status_code: None,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    pub fn timed_out(request_label: impl Into<String>) -> Self {
        DoResult::failed(request_label, "attack do() timed out")
    }

    pub fn is_success(&self) -> bool {
        match (&self.error, self.status_code) {
            (Some(_), _) => false,
            (None, Some(code)) => (200..400).contains(&code),
            (None, None) => true,
        }
    }
}

/// One completed attack, timestamped on both ends so the aggregator can
/// bucket by wall-clock tick even if workers finish out of order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackResult {
    pub token: AttackToken,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub elapsed: Duration,
    pub result: DoResult,
}

impl AttackResult {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn do_result_success_with_2xx_status() {
        let r = DoResult::ok("GET /", 200, 128, 64);
        assert!(r.is_success());
    }

    #[test]
    fn do_result_success_with_3xx_status() {
        let r = DoResult::ok("GET /", 301, 0, 64);
        assert!(r.is_success());
    }

    #[test]
    fn do_result_failure_with_5xx_status() {
        let r = DoResult::ok("GET /", 500, 0, 64);
        assert!(!r.is_success());
    }

    #[test]
    fn do_result_failure_with_error() {
        let r = DoResult::failed("GET /", "connection refused");
        assert!(!r.is_success());
    }

    #[test]
    fn do_result_success_with_zero_status_and_no_error() {
        let r = DoResult {
            request_label: "custom".to_string(),
            error: None,
            status_code: None,
            bytes_in: 0,
            bytes_out: 0,
        };
        assert!(r.is_success());
    }

    #[test]
    fn timed_out_is_never_success() {
        let r = DoResult::timed_out("GET /slow");
        assert!(!r.is_success());
        assert!(r.error.unwrap().contains("timed out"));
    }

    #[test]
    fn attack_result_roundtrips_through_json() {
        let result = AttackResult {
            token: AttackToken { target_rps: 10, step: 0, tick: 1 },
            begin: Utc::now(),
            end: Utc::now(),
            elapsed: Duration::from_millis(42),
            result: DoResult::ok("GET /", 200, 10, 20),
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: AttackResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.token.tick, 1);
        assert_eq!(back.elapsed, Duration::from_millis(42));
    }
}
