//! Rate limiting primitives for auth flows.
//!
//! Counters are process-local and best-effort: they reset on restart and are
//! not shared between replicas. They deter abuse; they are not a quota.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_ATTEMPTS: u32 = 5;
const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Counter count above which expired windows are swept on the next check.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RateLimitAction {
    Authenticate,
    Register,
    VerifyEmail,
    ResendVerification,
    PasswordRequest,
    PasswordReset,
    Invite,
    InviteComplete,
    Refresh,
    Logout,
    Bootstrap,
}

impl RateLimitAction {
    pub const ALL: [Self; 11] = [
        Self::Authenticate,
        Self::Register,
        Self::VerifyEmail,
        Self::ResendVerification,
        Self::PasswordRequest,
        Self::PasswordReset,
        Self::Invite,
        Self::InviteComplete,
        Self::Refresh,
        Self::Logout,
        Self::Bootstrap,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::Register => "register",
            Self::VerifyEmail => "verify_email",
            Self::ResendVerification => "resend_verification",
            Self::PasswordRequest => "password_request",
            Self::PasswordReset => "password_reset",
            Self::Invite => "invite",
            Self::InviteComplete => "invite_complete",
            Self::Refresh => "refresh",
            Self::Logout => "logout",
            Self::Bootstrap => "bootstrap",
        }
    }
}

impl FromStr for RateLimitAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == value)
            .ok_or_else(|| format!("unknown rate limit action: {value}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Blocked { retry_after_secs: u64 },
}

/// Threshold for one action: `attempts` per `window`. Zero attempts disables
/// limiting for that action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub attempts: u32,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            window: DEFAULT_WINDOW,
        }
    }
}

impl FromStr for RateLimit {
    type Err = String;

    /// Parses `<attempts>/<seconds>`, e.g. `5/900`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (attempts, seconds) = value
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("expected <attempts>/<seconds>, got {value}"))?;
        let attempts = attempts
            .trim()
            .parse::<u32>()
            .map_err(|err| format!("invalid attempts: {err}"))?;
        let seconds = seconds
            .trim()
            .parse::<u64>()
            .map_err(|err| format!("invalid window seconds: {err}"))?;
        if seconds == 0 {
            return Err("window must be at least one second".to_string());
        }
        Ok(Self {
            attempts,
            window: Duration::from_secs(seconds),
        })
    }
}

pub trait RateLimiter: Send + Sync {
    /// Count one attempt for `(action, fingerprint)` and decide whether it may
    /// proceed. Blocked attempts are not executed by the caller.
    fn check_and_consume(&self, action: RateLimitAction, fingerprint: &str) -> RateLimitDecision;

    /// Forget the counter, e.g. after a successful login.
    fn reset(&self, action: RateLimitAction, fingerprint: &str);
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_and_consume(&self, _action: RateLimitAction, _fingerprint: &str) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn reset(&self, _action: RateLimitAction, _fingerprint: &str) {}
}

#[derive(Clone, Copy, Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window counters keyed by `(action, fingerprint)`.
#[derive(Debug)]
pub struct FixedWindowRateLimiter {
    default: RateLimit,
    overrides: HashMap<RateLimitAction, RateLimit>,
    windows: Mutex<HashMap<(RateLimitAction, String), Window>>,
}

impl Default for FixedWindowRateLimiter {
    fn default() -> Self {
        Self::new(RateLimit::default())
    }
}

impl FixedWindowRateLimiter {
    #[must_use]
    pub fn new(default: RateLimit) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_limit(mut self, action: RateLimitAction, limit: RateLimit) -> Self {
        self.overrides.insert(action, limit);
        self
    }

    #[must_use]
    pub fn limit_for(&self, action: RateLimitAction) -> RateLimit {
        self.overrides.get(&action).copied().unwrap_or(self.default)
    }

    /// [`RateLimiter::check_and_consume`] with an explicit clock.
    pub fn check_and_consume_at(
        &self,
        action: RateLimitAction,
        fingerprint: &str,
        now: Instant,
    ) -> RateLimitDecision {
        let limit = self.limit_for(action);
        if limit.attempts == 0 {
            return RateLimitDecision::Allowed;
        }

        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|(action, _), window| {
                let window_len = self.limit_for(*action).window;
                now.saturating_duration_since(window.started) < window_len
            });
        }

        let window = windows
            .entry((action, fingerprint.to_string()))
            .or_insert(Window {
                started: now,
                count: 0,
            });
        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= limit.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        if window.count >= limit.attempts {
            let remaining = limit
                .window
                .saturating_sub(now.saturating_duration_since(window.started));
            let mut retry_after_secs = remaining.as_secs();
            if remaining.subsec_nanos() > 0 || retry_after_secs == 0 {
                retry_after_secs += 1;
            }
            return RateLimitDecision::Blocked { retry_after_secs };
        }

        window.count += 1;
        RateLimitDecision::Allowed
    }

    pub fn reset_key(&self, action: RateLimitAction, fingerprint: &str) {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.remove(&(action, fingerprint.to_string()));
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn check_and_consume(&self, action: RateLimitAction, fingerprint: &str) -> RateLimitDecision {
        self.check_and_consume_at(action, fingerprint, Instant::now())
    }

    fn reset(&self, action: RateLimitAction, fingerprint: &str) {
        self.reset_key(action, fingerprint);
    }
}
