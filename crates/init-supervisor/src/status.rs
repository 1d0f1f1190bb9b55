//! Per-spec init status (§4.4).

use chrono::{DateTime, Utc};

use muxd_domain::SpecKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Pending,
    Starting,
    Ready,
    Degraded,
    Failed,
    Suspended,
}

/// Classification table (§4.4): the worker recomputes this every iteration
/// from the pool status it just observed.
pub fn classify(ready: u32, target: u32, failed: u32, had_error: bool) -> InitState {
    if ready >= target {
        InitState::Ready
    } else if ready > 0 {
        InitState::Degraded
    } else if had_error || failed > 0 {
        InitState::Failed
    } else {
        InitState::Starting
    }
}

#[derive(Debug, Clone)]
pub struct InitStatus {
    pub spec_key: SpecKey,
    pub state: InitState,
    pub target: u32,
    pub ready: u32,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl InitStatus {
    pub fn pending(spec_key: SpecKey) -> Self {
        Self {
            spec_key,
            state: InitState::Pending,
            target: 0,
            ready: 0,
            retry_count: 0,
            last_error: None,
            next_retry_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_ready_when_met() {
        assert_eq!(classify(2, 2, 0, false), InitState::Ready);
        assert_eq!(classify(3, 2, 0, false), InitState::Ready);
    }

    #[test]
    fn classify_degraded_when_partial() {
        assert_eq!(classify(1, 2, 0, false), InitState::Degraded);
    }

    #[test]
    fn classify_failed_when_zero_and_erroring() {
        assert_eq!(classify(0, 2, 0, true), InitState::Failed);
        assert_eq!(classify(0, 2, 1, false), InitState::Failed);
    }

    #[test]
    fn classify_starting_when_zero_and_clean() {
        assert_eq!(classify(0, 2, 0, false), InitState::Starting);
    }
}
