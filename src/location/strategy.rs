use std::time::Duration;

use crate::location::provider::{Accuracy, Backend, FixRequest};

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(120);
pub const DEFAULT_FAST_TIMEOUT: Duration = Duration::from_secs(12);
pub const MIN_FALLBACK_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireOptions {
    pub max_age: Duration,
    pub fast_timeout: Duration,
    pub fallback_timeout: Duration,
    pub prefer_alternate_backend: bool,
    pub disable_fallback: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            fast_timeout: DEFAULT_FAST_TIMEOUT,
            fallback_timeout: MIN_FALLBACK_TIMEOUT,
            prefer_alternate_backend: true,
            disable_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Cached or network-derived fix, short timeout.
    Fast,
    /// Fresh high-accuracy reading, longer timeout.
    HighAccuracy,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::HighAccuracy => "high_accuracy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixStrategy {
    pub tier: Tier,
    pub request: FixRequest,
    /// Reject fixes captured more than the request's `max_age` before the
    /// attempt started. A zero `max_age` only accepts fixes taken during it.
    pub reject_stale: bool,
}

/// The ordered fix strategies; evaluation stops at the first success.
pub fn plan(options: &AcquireOptions, alternate_backend_available: bool) -> Vec<FixStrategy> {
    let mut strategies = vec![FixStrategy {
        tier: Tier::Fast,
        request: FixRequest {
            accuracy: Accuracy::Low,
            timeout: options.fast_timeout,
            max_age: options.max_age,
            backend: Backend::Default,
        },
        reject_stale: true,
    }];

    if options.disable_fallback {
        return strategies;
    }

    let backend = if options.prefer_alternate_backend && alternate_backend_available {
        Backend::Alternate
    } else {
        Backend::Default
    };

    strategies.push(FixStrategy {
        tier: Tier::HighAccuracy,
        request: FixRequest {
            accuracy: Accuracy::High,
            timeout: options.fallback_timeout.max(MIN_FALLBACK_TIMEOUT),
            max_age: Duration::ZERO,
            backend,
        },
        reject_stale: false,
    });

    strategies
}
