use std::collections::HashMap;
use std::fmt;

/// Tolerance used when checking that criteria weights total 100%.
pub const WEIGHT_TOTAL_TOLERANCE: f64 = 0.001;

/// Guideline keys are matched case- and whitespace-insensitively.
pub fn normalize_criterion_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidelineRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CriterionInput {
    pub name: String,
    pub weight: f64,
}

/// Whether the 100%-total rule applies to this submission. The create path
/// defers the total check to class creation; the update path enforces it
/// immediately. Both behaviors are kept as the portal exhibits them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightTotalRule {
    Enforced,
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeightViolation {
    OutOfGuidelineRange {
        name: String,
        weight: f64,
        min: f64,
        max: f64,
    },
    WeightTotalMismatch {
        total: f64,
    },
}

impl fmt::Display for WeightViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightViolation::OutOfGuidelineRange {
                name, min, max, ..
            } => write!(
                f,
                "Weight for \"{}\" must be between {}% and {}%.",
                name, min, max
            ),
            WeightViolation::WeightTotalMismatch { total } => write!(
                f,
                "Total weights must equal 100%. Current total: {:.2}%",
                total
            ),
        }
    }
}

/// Runs both weight checks and collects every violation so a single
/// submission can report all of its weight problems at once.
pub fn validate_criteria_weights(
    criteria: &[CriterionInput],
    guidelines: &HashMap<String, GuidelineRange>,
    total_rule: WeightTotalRule,
) -> Result<(), Vec<WeightViolation>> {
    let mut violations = Vec::new();
    let mut total = 0.0;

    for c in criteria {
        total += c.weight;
        let key = normalize_criterion_name(&c.name);
        if let Some(range) = guidelines.get(&key) {
            if c.weight < range.min || c.weight > range.max {
                violations.push(WeightViolation::OutOfGuidelineRange {
                    name: c.name.clone(),
                    weight: c.weight,
                    min: range.min,
                    max: range.max,
                });
            }
        }
    }

    if total_rule == WeightTotalRule::Enforced && (total - 100.0).abs() > WEIGHT_TOTAL_TOLERANCE {
        violations.push(WeightViolation::WeightTotalMismatch { total });
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentRange {
    pub min: f64,
    pub max: f64,
}

/// A transmutation row already persisted, identified so the edit path can
/// exclude the row being replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRange {
    pub id: String,
    pub range: PercentRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeViolation {
    InvertedRange { min: f64, max: f64 },
    OverlapsExisting { candidate: PercentRange, existing: PercentRange },
    OverlapsWithinBatch,
}

impl fmt::Display for RangeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeViolation::InvertedRange { min, max } => write!(
                f,
                "Transmutation range min ({}) cannot be greater than max ({}).",
                min, max
            ),
            RangeViolation::OverlapsExisting { .. } => {
                write!(f, "The specified range overlaps with an existing range")
            }
            RangeViolation::OverlapsWithinBatch => {
                write!(f, "Provided transmutation ranges overlap among themselves.")
            }
        }
    }
}

/// Closed-interval overlap, inclusive on both boundaries: [60,75] and
/// [75,90] overlap.
pub fn ranges_overlap(a: PercentRange, b: PercentRange) -> bool {
    !(a.max < b.min || a.min > b.max)
}

pub fn validate_transmutation_row(
    candidate: PercentRange,
    existing: &[StoredRange],
    exclude_id: Option<&str>,
) -> Result<(), RangeViolation> {
    if candidate.min > candidate.max {
        return Err(RangeViolation::InvertedRange {
            min: candidate.min,
            max: candidate.max,
        });
    }
    for row in existing {
        if exclude_id == Some(row.id.as_str()) {
            continue;
        }
        if ranges_overlap(candidate, row.range) {
            return Err(RangeViolation::OverlapsExisting {
                candidate,
                existing: row.range,
            });
        }
    }
    Ok(())
}

/// A bulk submission must be internally non-overlapping before it is checked
/// against the persisted table: sort by min, then adjacent rows may not touch.
pub fn validate_transmutation_batch(rows: &[PercentRange]) -> Result<(), RangeViolation> {
    for r in rows {
        if r.min > r.max {
            return Err(RangeViolation::InvertedRange { min: r.min, max: r.max });
        }
    }
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| a.min.partial_cmp(&b.min).unwrap_or(std::cmp::Ordering::Equal));
    for pair in sorted.windows(2) {
        if pair[1].min <= pair[0].max {
            return Err(RangeViolation::OverlapsWithinBatch);
        }
    }
    Ok(())
}
