//! Error classification and bounded retry for plan execution.
//!
//! The classifier maps a raw portal failure plus its phase and upload
//! context onto a stable error code with a transience verdict and a
//! suggested delay. The policy layer enforces per-phase retry caps and a
//! jittered backoff; codes in `SINGLE_RETRY_ERROR_CODES` get exactly one
//! retry no matter what the phase default says.
//!
//! The one rule that matters most: an upload failure after
//! `upload_attempted` is never transient. Bytes may already have reached
//! the portal; retrying risks a double submission.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use docket_portal::PortalError;
use docket_types::{ExecPhase, codes};

/// A raw failure, classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub error_code: String,
    pub transient: bool,
    pub retry_after_ms: u64,
    pub details: String,
}

impl ClassifiedError {
    fn permanent(error_code: &str, details: String) -> Self {
        Self {
            error_code: error_code.to_string(),
            transient: false,
            retry_after_ms: 0,
            details,
        }
    }

    fn transient(error_code: &str, retry_after_ms: u64, details: String) -> Self {
        Self {
            error_code: error_code.to_string(),
            transient: true,
            retry_after_ms,
            details,
        }
    }
}

/// Residual code for portal failures no specific rule covers.
pub const PORTAL_ERROR: &str = "portal_error";

/// Classify a portal failure observed in `phase`.
///
/// `upload_attempted` must reflect whether the network interaction of the
/// upload was started before the failure surfaced.
pub fn classify(
    phase: ExecPhase,
    error: &PortalError,
    upload_attempted: bool,
) -> ClassifiedError {
    let details = error.to_string();

    // Phase-independent rules first.
    match error {
        PortalError::GridParseMismatch { .. } => {
            return ClassifiedError::permanent(codes::GRID_PARSE_MISMATCH, details);
        }
        PortalError::SessionLost => {
            return ClassifiedError::permanent(codes::SESSION_LOST, details);
        }
        PortalError::BlockerNotDismissed { .. } => {
            return ClassifiedError::permanent(codes::DHX_BLOCKER_NOT_DISMISSED, details);
        }
        PortalError::NoRowsAfterSearch { .. } => {
            return ClassifiedError::permanent(codes::NO_ROWS_AFTER_SEARCH, details);
        }
        _ => {}
    }

    let timeout_like = matches!(
        error,
        PortalError::Timeout { .. } | PortalError::Network(_)
    );

    match phase {
        ExecPhase::Relocate => match error {
            PortalError::ItemNotOnPage { .. } => ClassifiedError::transient(
                codes::ITEM_NOT_FOUND_BEFORE_UPLOAD,
                500,
                details,
            ),
            _ if timeout_like => ClassifiedError::transient(
                codes::ITEM_NOT_FOUND_BEFORE_UPLOAD,
                500,
                details,
            ),
            _ => ClassifiedError::permanent(PORTAL_ERROR, details),
        },
        ExecPhase::Open if timeout_like => {
            ClassifiedError::transient(codes::TIMEOUT_OPEN_DETAIL, 1000, details)
        }
        ExecPhase::Upload if timeout_like => {
            if upload_attempted {
                // Never retry once bytes may have been sent.
                ClassifiedError::permanent(codes::TIMEOUT_UPLOAD, details)
            } else {
                ClassifiedError::transient(codes::TIMEOUT_UPLOAD, 1500, details)
            }
        }
        ExecPhase::Verify if timeout_like => {
            ClassifiedError::transient(codes::VERIFY_LIST_REFRESH_FAILED, 1000, details)
        }
        _ => ClassifiedError::permanent(PORTAL_ERROR, details),
    }
}

/// Maximum retries allowed for an error code within a phase.
pub fn max_retries(phase: ExecPhase, error_code: &str) -> u32 {
    if codes::SINGLE_RETRY_ERROR_CODES.contains(&error_code) {
        return 1;
    }
    match (phase, error_code) {
        (ExecPhase::Open, codes::TIMEOUT_OPEN_DETAIL) => 2,
        (ExecPhase::Upload, codes::TIMEOUT_UPLOAD) => 1,
        (ExecPhase::Verify, codes::VERIFY_LIST_REFRESH_FAILED) => 2,
        _ => 0,
    }
}

/// Backoff shape for transient retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// 0.0 = no jitter, 0.5 = delay * (0.5..1.5).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

/// Exponential delay for `attempt` (1-indexed), capped, then jittered.
pub fn calculate_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let pow = attempt.saturating_sub(1).min(16);
    let delay = config
        .base_delay
        .saturating_mul(2_u32.saturating_pow(pow))
        .min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(delay, config.jitter)
    } else {
        delay
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::RngExt;

    let jitter_range = 2.0 * jitter;
    let mut rng = rand::rng();
    let random_value: f64 = rng.random();
    let random_factor = 1.0 - jitter + (random_value * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// Whether to retry, and after how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    pub const GIVE_UP: RetryDecision = RetryDecision {
        retry: false,
        delay: Duration::ZERO,
    };
}

/// Per-run retry policy: phase caps plus backoff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl RetryPolicy {
    /// Decide whether `attempt` (1-indexed, the attempt that just failed)
    /// should be followed by another.
    pub fn evaluate(
        &self,
        phase: ExecPhase,
        error: &ClassifiedError,
        attempt: u32,
    ) -> RetryDecision {
        if !error.transient {
            return RetryDecision::GIVE_UP;
        }
        let cap = max_retries(phase, &error.error_code);
        if attempt > cap {
            return RetryDecision::GIVE_UP;
        }

        let backoff = calculate_delay(&self.backoff, attempt);
        let floor = Duration::from_millis(error.retry_after_ms);
        RetryDecision {
            retry: true,
            delay: backoff.max(floor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_parse_mismatch_is_permanent_in_any_phase() {
        let err = PortalError::GridParseMismatch { expected: 5 };
        for phase in [
            ExecPhase::Relocate,
            ExecPhase::Open,
            ExecPhase::Upload,
            ExecPhase::Verify,
        ] {
            let classified = classify(phase, &err, false);
            assert_eq!(classified.error_code, codes::GRID_PARSE_MISMATCH);
            assert!(!classified.transient);
        }
    }

    #[test]
    fn session_lost_is_permanent() {
        let classified = classify(ExecPhase::Upload, &PortalError::SessionLost, false);
        assert_eq!(classified.error_code, codes::SESSION_LOST);
        assert!(!classified.transient);
    }

    #[test]
    fn relocation_miss_gets_exactly_one_retry() {
        let err = PortalError::ItemNotOnPage {
            key: "K".to_string(),
        };
        let classified = classify(ExecPhase::Relocate, &err, false);
        assert_eq!(classified.error_code, codes::ITEM_NOT_FOUND_BEFORE_UPLOAD);
        assert!(classified.transient);

        let policy = RetryPolicy::default();
        assert!(policy.evaluate(ExecPhase::Relocate, &classified, 1).retry);
        assert!(!policy.evaluate(ExecPhase::Relocate, &classified, 2).retry);
    }

    #[test]
    fn open_timeout_gets_two_retries() {
        let err = PortalError::Timeout {
            what: "detail form".to_string(),
        };
        let classified = classify(ExecPhase::Open, &err, false);
        assert_eq!(classified.error_code, codes::TIMEOUT_OPEN_DETAIL);

        let policy = RetryPolicy::default();
        assert!(policy.evaluate(ExecPhase::Open, &classified, 1).retry);
        assert!(policy.evaluate(ExecPhase::Open, &classified, 2).retry);
        assert!(!policy.evaluate(ExecPhase::Open, &classified, 3).retry);
    }

    #[test]
    fn upload_timeout_before_attempt_retries_once() {
        let err = PortalError::Timeout {
            what: "file input".to_string(),
        };
        let classified = classify(ExecPhase::Upload, &err, false);
        assert_eq!(classified.error_code, codes::TIMEOUT_UPLOAD);
        assert!(classified.transient);

        let policy = RetryPolicy::default();
        assert!(policy.evaluate(ExecPhase::Upload, &classified, 1).retry);
        assert!(!policy.evaluate(ExecPhase::Upload, &classified, 2).retry);
    }

    #[test]
    fn upload_timeout_after_attempt_never_retries() {
        let err = PortalError::Timeout {
            what: "upload POST".to_string(),
        };
        let classified = classify(ExecPhase::Upload, &err, true);
        assert_eq!(classified.error_code, codes::TIMEOUT_UPLOAD);
        assert!(!classified.transient);

        let policy = RetryPolicy::default();
        assert_eq!(
            policy.evaluate(ExecPhase::Upload, &classified, 1),
            RetryDecision::GIVE_UP
        );
    }

    #[test]
    fn network_failure_counts_as_timeout_like() {
        let err = PortalError::Network("connection reset".to_string());
        let classified = classify(ExecPhase::Upload, &err, true);
        assert_eq!(classified.error_code, codes::TIMEOUT_UPLOAD);
        assert!(!classified.transient);
    }

    #[test]
    fn verify_refresh_failure_gets_two_retries() {
        let err = PortalError::Timeout {
            what: "list refresh".to_string(),
        };
        let classified = classify(ExecPhase::Verify, &err, true);
        assert_eq!(classified.error_code, codes::VERIFY_LIST_REFRESH_FAILED);
        assert!(classified.transient);
        assert_eq!(max_retries(ExecPhase::Verify, &classified.error_code), 2);
    }

    #[test]
    fn residual_errors_are_permanent_portal_errors() {
        let err = PortalError::Other("something odd".to_string());
        let classified = classify(ExecPhase::Open, &err, false);
        assert_eq!(classified.error_code, PORTAL_ERROR);
        assert!(!classified.transient);
    }

    #[test]
    fn delay_honors_retry_after_floor() {
        let policy = RetryPolicy {
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_secs(30),
                jitter: 0.0,
            },
        };
        let classified = ClassifiedError::transient(codes::TIMEOUT_OPEN_DETAIL, 1000, String::new());
        let decision = policy.evaluate(ExecPhase::Open, &classified, 1);
        assert!(decision.retry);
        assert_eq!(decision.delay, Duration::from_millis(1000));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = BackoffConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            jitter: 0.0,
        };
        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(calculate_delay(&config, 10), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_in_band() {
        let config = BackoffConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
        };
        for _ in 0..100 {
            let delay = calculate_delay(&config, 1);
            assert!(delay >= Duration::from_millis(5000));
            assert!(delay <= Duration::from_millis(15000));
        }
    }
}
