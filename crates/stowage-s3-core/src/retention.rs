//! Retention and legal-hold guard.
//!
//! Pure decision functions consulted before any destructive mutation of a
//! stored version. They never touch storage; callers read the
//! [`LockState`] from the index and act on the verdict.
//!
//! Evaluation order for deletes and overwrites:
//!
//! 1. Legal hold denies every caller.
//! 2. A future retain-until in COMPLIANCE mode denies every caller.
//! 3. A future retain-until in GOVERNANCE mode denies unless the caller
//!    presents the governance bypass.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::error::{StorageError, StorageResult};
use crate::state::{LockMode, LockState, Retention};

/// Longest retention, trash or expiration period a bucket may configure.
pub const MAX_PERIOD_DAYS: u32 = 36_500;

/// 9999-12-31T23:59:59Z, the latest instant the index stores.
const LATEST_INSTANT_SECS: i64 = 253_402_300_799;

/// Reject a day count above [`MAX_PERIOD_DAYS`], or zero unless `allow_zero`.
pub fn validate_period_days(what: &str, days: u32, allow_zero: bool) -> StorageResult<()> {
    let min = u32::from(!allow_zero);
    if (min..=MAX_PERIOD_DAYS).contains(&days) {
        Ok(())
    } else {
        Err(StorageError::InvalidArgument {
            message: format!(
                "{what} must be between {min} and {MAX_PERIOD_DAYS} days, got {days}"
            ),
        })
    }
}

/// `from` plus `days`, saturating at the end of year 9999.
#[must_use]
pub fn days_after(from: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let latest =
        DateTime::from_timestamp(LATEST_INSTANT_SECS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC);
    from.checked_add_signed(Duration::days(i64::from(days)))
        .map_or(latest, |t| t.min(latest))
}

/// `from` minus `days`, `None` when that lies before the representable range.
#[must_use]
pub fn days_before(from: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    from.checked_sub_signed(Duration::days(i64::from(days)))
}

/// Why a mutation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDenial {
    /// A legal hold is in effect.
    LegalHold,
    /// A retention period has not yet expired.
    Retention {
        /// The retention mode in force.
        mode: LockMode,
        /// When the retention expires.
        retain_until: DateTime<Utc>,
    },
}

impl fmt::Display for LockDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LegalHold => f.write_str("legal hold is in effect"),
            Self::Retention { mode, retain_until } => write!(
                f,
                "{mode} retention in effect until {}",
                retain_until.to_rfc3339()
            ),
        }
    }
}

/// Decide whether a version with `state` may be deleted or overwritten.
pub fn may_mutate(
    state: &LockState,
    bypass_governance: bool,
    now: DateTime<Utc>,
) -> Result<(), LockDenial> {
    if state.legal_hold {
        return Err(LockDenial::LegalHold);
    }
    match state.retention {
        Some(Retention { mode, retain_until }) if retain_until > now => match mode {
            LockMode::Compliance => Err(LockDenial::Retention { mode, retain_until }),
            LockMode::Governance if bypass_governance => Ok(()),
            LockMode::Governance => Err(LockDenial::Retention { mode, retain_until }),
        },
        _ => Ok(()),
    }
}

/// Decide whether the retention on a version may be replaced by `requested`.
///
/// Expired retention may always be replaced. COMPLIANCE retention may only
/// be extended and never downgraded. Shortening or removing GOVERNANCE
/// retention requires the bypass.
pub fn may_change_retention(
    current: Option<Retention>,
    requested: Option<Retention>,
    bypass_governance: bool,
    now: DateTime<Utc>,
) -> Result<(), LockDenial> {
    let Some(current) = current.filter(|r| r.retain_until > now) else {
        return Ok(());
    };
    let denial = LockDenial::Retention {
        mode: current.mode,
        retain_until: current.retain_until,
    };
    match current.mode {
        LockMode::Compliance => match requested {
            Some(r) if r.mode == LockMode::Compliance && r.retain_until >= current.retain_until => {
                Ok(())
            }
            _ => Err(denial),
        },
        LockMode::Governance => {
            if bypass_governance {
                return Ok(());
            }
            match requested {
                Some(r) if r.retain_until >= current.retain_until => Ok(()),
                _ => Err(denial),
            }
        }
    }
}

/// Whether the state blocks deletion for every caller, bypass or not.
#[must_use]
pub fn is_hard_locked(state: &LockState, now: DateTime<Utc>) -> bool {
    may_mutate(state, true, now).is_err()
}

/// Whether the state blocks deletion for callers without the bypass.
#[must_use]
pub fn is_locked(state: &LockState, now: DateTime<Utc>) -> bool {
    may_mutate(state, false, now).is_err()
}
