//! Equality oracle for snapshots.
//!
//! Equality is exact, field by field, over every declared state field.
//! Doubles compare by bit pattern (`f64::to_bits`), so `0.0` and `-0.0`
//! differ and identical NaNs are equal. The target property is bitwise
//! reproducibility, so no tolerance is applied unless one is selected.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::snapshot::{FieldData, Snapshot};
use crate::time::SimTime;

/// How many differences a mismatch report carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    /// Stop at the first difference.
    #[default]
    FirstDifference,
    /// Report every difference, up to the oracle's reporting cap.
    AllDifferences,
}

/// Numeric comparison policy for double fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "epsilon", rename_all = "snake_case")]
pub enum Tolerance {
    /// Bitwise equality.
    #[default]
    Exact,
    /// `|a - b| <= epsilon`, for legacy baselines that were never bit-stable.
    Absolute(f64),
}

/// Which snapshot a one-sided difference belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// First argument to [`EqualityOracle::compare`].
    Left,
    /// Second argument.
    Right,
}

/// A single localized difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldMismatch {
    /// Snapshots were captured at different instants.
    #[allow(missing_docs)]
    Time { left: SimTime, right: SimTime },
    /// A field exists on one side only.
    #[allow(missing_docs)]
    MissingField { field: String, present_in: Side },
    /// Same field name, different payload kinds.
    #[allow(missing_docs)]
    KindMismatch { field: String, left: String, right: String },
    /// Same field, different number of entries.
    #[allow(missing_docs)]
    LengthMismatch { field: String, left: usize, right: usize },
    /// Entry `index` differs.
    #[allow(missing_docs)]
    Value { field: String, index: usize, left: String, right: String },
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time { left, right } => write!(f, "unequal times: {left} vs. {right}"),
            Self::MissingField { field, present_in } => {
                let side = match present_in {
                    Side::Left => "left",
                    Side::Right => "right",
                };
                write!(f, "field '{field}' present only in {side} snapshot")
            }
            Self::KindMismatch { field, left, right } => {
                write!(f, "field '{field}' has kind {left} vs. {right}")
            }
            Self::LengthMismatch { field, left, right } => {
                write!(f, "unequal '{field}' sizes: {left} vs. {right}")
            }
            Self::Value { field, index, left, right } => {
                write!(f, "unequal '{field}' at i={index}: {left} vs. {right}")
            }
        }
    }
}

/// Diagnostic produced when two snapshots differ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMismatch {
    mismatches: Vec<FieldMismatch>,
    omitted: usize,
}

impl StateMismatch {
    /// Reported differences, first divergence first.
    #[must_use]
    pub fn mismatches(&self) -> &[FieldMismatch] {
        &self.mismatches
    }

    /// The first difference found.
    #[must_use]
    pub fn first(&self) -> Option<&FieldMismatch> {
        self.mismatches.first()
    }

    /// Differences found beyond the reporting cap.
    #[must_use]
    pub const fn omitted(&self) -> usize {
        self.omitted
    }
}

impl fmt::Display for StateMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.mismatches.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{m}")?;
        }
        if self.omitted > 0 {
            write!(f, "; ... and {} more", self.omitted)?;
        }
        Ok(())
    }
}

/// Result of comparing two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// Every field matched.
    Equal,
    /// At least one difference.
    Unequal(StateMismatch),
}

impl Comparison {
    /// Returns true for [`Comparison::Equal`].
    #[must_use]
    pub const fn is_equal(&self) -> bool {
        matches!(self, Self::Equal)
    }

    /// Returns the mismatch, if any.
    #[must_use]
    pub const fn mismatch(&self) -> Option<&StateMismatch> {
        match self {
            Self::Equal => None,
            Self::Unequal(m) => Some(m),
        }
    }
}

/// Deep-compares snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqualityOracle {
    verbosity: Verbosity,
    tolerance: Tolerance,
    max_reported: usize,
}

impl Default for EqualityOracle {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::FirstDifference,
            tolerance: Tolerance::Exact,
            max_reported: 64,
        }
    }
}

struct Collector {
    found: Vec<FieldMismatch>,
    omitted: usize,
    limit: usize,
}

impl Collector {
    fn push(&mut self, m: FieldMismatch) {
        if self.found.len() < self.limit {
            self.found.push(m);
        } else {
            self.omitted += 1;
        }
    }

    fn done(&self, verbosity: Verbosity) -> bool {
        verbosity == Verbosity::FirstDifference && !self.found.is_empty()
    }
}

impl EqualityOracle {
    /// Exact oracle with the given verbosity.
    #[must_use]
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            ..Self::default()
        }
    }

    /// Select a numeric tolerance.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Cap the number of differences kept in `AllDifferences` mode.
    #[must_use]
    pub fn with_max_reported(mut self, max_reported: usize) -> Self {
        self.max_reported = max_reported.max(1);
        self
    }

    /// Returns the verbosity mode.
    #[must_use]
    pub const fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Compare `left` against `right`.
    #[must_use]
    pub fn compare(&self, left: &Snapshot, right: &Snapshot) -> Comparison {
        let limit = match self.verbosity {
            Verbosity::FirstDifference => 1,
            Verbosity::AllDifferences => self.max_reported,
        };
        let mut out = Collector {
            found: Vec::new(),
            omitted: 0,
            limit,
        };

        if left.time() != right.time() {
            out.push(FieldMismatch::Time {
                left: left.time(),
                right: right.time(),
            });
        }

        for lf in left.fields() {
            if out.done(self.verbosity) {
                break;
            }
            let Some(rf) = right.field(lf.name()) else {
                out.push(FieldMismatch::MissingField {
                    field: lf.name().to_string(),
                    present_in: Side::Left,
                });
                continue;
            };
            self.compare_data(lf.name(), lf.data(), rf.data(), &mut out);
        }

        if !out.done(self.verbosity) {
            for rf in right.fields() {
                if left.field(rf.name()).is_none() {
                    out.push(FieldMismatch::MissingField {
                        field: rf.name().to_string(),
                        present_in: Side::Right,
                    });
                    if out.done(self.verbosity) {
                        break;
                    }
                }
            }
        }

        if out.found.is_empty() {
            Comparison::Equal
        } else {
            Comparison::Unequal(StateMismatch {
                mismatches: out.found,
                omitted: out.omitted,
            })
        }
    }

    fn compare_data(&self, name: &str, left: &FieldData, right: &FieldData, out: &mut Collector) {
        if left.kind() != right.kind() {
            out.push(FieldMismatch::KindMismatch {
                field: name.to_string(),
                left: left.kind().to_string(),
                right: right.kind().to_string(),
            });
            return;
        }
        if left.len() != right.len() {
            out.push(FieldMismatch::LengthMismatch {
                field: name.to_string(),
                left: left.len(),
                right: right.len(),
            });
            return;
        }
        match (left, right) {
            (FieldData::Doubles(a), FieldData::Doubles(b)) => {
                for (i, (x, y)) in a.iter().zip(b).enumerate() {
                    if !self.doubles_equal(*x, *y) {
                        out.push(value_mismatch(name, i, describe_double(*x, *y), describe_double(*y, *x)));
                        if out.done(self.verbosity) {
                            return;
                        }
                    }
                }
            }
            (FieldData::Ints(a), FieldData::Ints(b)) => {
                for (i, (x, y)) in a.iter().zip(b).enumerate() {
                    if x != y {
                        out.push(value_mismatch(name, i, x.to_string(), y.to_string()));
                        if out.done(self.verbosity) {
                            return;
                        }
                    }
                }
            }
            (FieldData::Labels(a), FieldData::Labels(b)) => {
                for (i, (x, y)) in a.iter().zip(b).enumerate() {
                    if x != y {
                        out.push(value_mismatch(name, i, format!("{x:?}"), format!("{y:?}")));
                        if out.done(self.verbosity) {
                            return;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn doubles_equal(&self, a: f64, b: f64) -> bool {
        if a.to_bits() == b.to_bits() {
            return true;
        }
        match self.tolerance {
            Tolerance::Exact => false,
            Tolerance::Absolute(eps) => (a - b).abs() <= eps,
        }
    }
}

fn value_mismatch(field: &str, index: usize, left: String, right: String) -> FieldMismatch {
    FieldMismatch::Value {
        field: field.to_string(),
        index,
        left,
        right,
    }
}

// Shortest round-trip text is usually enough; fall back to the bit pattern
// when two distinct values print the same (NaN payloads).
fn describe_double(value: f64, other: f64) -> String {
    let text = format!("{value:?}");
    if text == format!("{other:?}") {
        format!("{text} (0x{:016x})", value.to_bits())
    } else {
        text
    }
}
