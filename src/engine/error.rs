use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingStatus, Ms};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    /// Requested interval overlaps a live booking.
    Conflict(Ulid),
    /// Malformed or past interval.
    InvalidInterval(&'static str),
    /// Interval falls outside the resolved open hours on this date.
    NotAvailable(NaiveDate),
    TooLateToCancel {
        deadline: Ms,
    },
    InvalidStateTransition {
        from: BookingStatus,
        op: &'static str,
    },
    /// Exclusivity acquisition exceeded its bounded wait, retries included.
    ConcurrencyTimeout,
    /// Malformed rule configuration. Aborts the whole evaluation —
    /// price correctness is not best-effort.
    RuleEvaluation(&'static str),
    HasLiveBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with booking: {id}"),
            EngineError::InvalidInterval(msg) => write!(f, "invalid interval: {msg}"),
            EngineError::NotAvailable(date) => {
                write!(f, "outside open hours on {date}")
            }
            EngineError::TooLateToCancel { deadline } => {
                write!(f, "too late to cancel: deadline was {deadline}")
            }
            EngineError::InvalidStateTransition { from, op } => {
                write!(f, "cannot {op}: booking is {}", from.as_str())
            }
            EngineError::ConcurrencyTimeout => {
                write!(f, "timed out acquiring the space's exclusivity section")
            }
            EngineError::RuleEvaluation(msg) => write!(f, "rule evaluation failed: {msg}"),
            EngineError::HasLiveBookings(id) => {
                write!(f, "cannot remove space {id}: live bookings exist")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
