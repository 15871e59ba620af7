use chrono::Datelike;

use crate::calendar;
use crate::model::{AppliedRule, Cents, PriceRule, RuleKind, Span};

use super::EngineError;

// ── Ordered Pricing Rule Evaluation ───────────────────────────────

/// A computed price with its frozen, replayable breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub total: Cents,
    pub breakdown: Vec<AppliedRule>,
}

/// Evaluate the rule chain strictly in slice order against a booking
/// interval. Pure and deterministic: identical inputs always yield an
/// identical total and breakdown, so the same function backs both the
/// persisted snapshot and the side-effect-free preview quote.
///
/// Inactive and inapplicable rules are skipped, not recorded. A malformed
/// rule aborts the whole evaluation. The running price never goes below
/// zero; a clamped discount records its clamped delta.
pub fn quote(base_price: Cents, rules: &[PriceRule], span: &Span) -> Result<Quote, EngineError> {
    let mut total = base_price;
    let mut breakdown = Vec::new();

    for rule in rules {
        if !rule.active {
            continue;
        }
        validate_rule(rule)?;
        if !applies(&rule.kind, span) {
            continue;
        }
        let after = match rule.kind {
            RuleKind::Discount => {
                let off = round_cents(total as f64 * rule.factor / 100.0);
                (total - off).max(0)
            }
            _ => round_cents(total as f64 * rule.factor),
        };
        breakdown.push(AppliedRule {
            rule_id: rule.id,
            rule_type: rule.kind.label().to_string(),
            factor: rule.factor,
            effect_on_price: after - total,
        });
        total = after;
    }

    Ok(Quote { total, breakdown })
}

/// Reject malformed configuration before it can corrupt a price.
pub fn validate_rule(rule: &PriceRule) -> Result<(), EngineError> {
    if !rule.factor.is_finite() || rule.factor <= 0.0 {
        return Err(EngineError::RuleEvaluation("factor must be positive"));
    }
    match &rule.kind {
        RuleKind::Discount => {
            if rule.factor > 100.0 {
                return Err(EngineError::RuleEvaluation("discount exceeds 100 percent"));
            }
        }
        RuleKind::TimeOfDay { window } => {
            if window.start_min >= window.end_min || window.end_min > calendar::MINUTES_PER_DAY {
                return Err(EngineError::RuleEvaluation("malformed hour window"));
            }
        }
        RuleKind::DateWindow { from, to } => {
            if from > to {
                return Err(EngineError::RuleEvaluation("date window ends before it starts"));
            }
        }
        RuleKind::MinDuration { min_ms } => {
            if *min_ms <= 0 {
                return Err(EngineError::RuleEvaluation("duration threshold must be positive"));
            }
        }
        RuleKind::DayOfWeek { .. } => {}
    }
    Ok(())
}

/// Applicability is judged against the interval's start instant, except
/// the duration predicate which uses its length.
fn applies(kind: &RuleKind, span: &Span) -> bool {
    match kind {
        RuleKind::TimeOfDay { window } => window.contains_minute(calendar::minute_of_day(span.start)),
        RuleKind::DayOfWeek { days } => {
            let date = calendar::date_of(span.start);
            days[date.weekday().num_days_from_monday() as usize]
        }
        RuleKind::DateWindow { from, to } => {
            let date = calendar::date_of(span.start);
            *from <= date && date <= *to
        }
        RuleKind::MinDuration { min_ms } => span.duration_ms() >= *min_ms,
        RuleKind::Discount => true,
    }
}

/// Half-away-from-zero rounding to whole cents.
fn round_cents(x: f64) -> Cents {
    x.round() as Cents
}
