#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};

use turnstile_contracts::admission::COOLDOWN_WINDOW_SECONDS;

/// Identity-scoped cooldown verdict. The guard looks at the most recent
/// successful scan across *all* of the identity's active tokens, so the
/// window cannot be sidestepped by presenting a different badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownVerdict {
    Clear,
    Active { seconds_left: i64 },
}

impl CooldownVerdict {
    pub fn is_active(&self) -> bool {
        matches!(self, CooldownVerdict::Active { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownGuard {
    window_seconds: i64,
}

impl Default for CooldownGuard {
    fn default() -> Self {
        Self {
            window_seconds: COOLDOWN_WINDOW_SECONDS,
        }
    }
}

impl CooldownGuard {
    pub fn with_window_seconds(window_seconds: i64) -> Self {
        Self { window_seconds }
    }

    /// Evaluate the guard against the max `last_scan_at` over the
    /// identity's active tokens. `None` entries (never-scanned tokens) do
    /// not contribute.
    pub fn check<I>(&self, last_scans: I, now: DateTime<Utc>) -> CooldownVerdict
    where
        I: IntoIterator<Item = Option<DateTime<Utc>>>,
    {
        let latest = last_scans.into_iter().flatten().max();
        let Some(latest) = latest else {
            return CooldownVerdict::Clear;
        };
        let elapsed = (now - latest).num_seconds();
        if elapsed < 0 {
            // Clock skew between device timestamps; treat a future stamp
            // as a full remaining window.
            return CooldownVerdict::Active {
                seconds_left: self.window_seconds,
            };
        }
        if elapsed < self.window_seconds {
            CooldownVerdict::Active {
                seconds_left: self.window_seconds - elapsed,
            }
        } else {
            CooldownVerdict::Clear
        }
    }
}
