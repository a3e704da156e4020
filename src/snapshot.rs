//! Immutable captures of a scenario's dynamic state.
//!
//! A snapshot holds named state fields (positions, velocities, multipliers,
//! integrator auxiliary state, component history) captured at one instant.
//! Fields carry double, integer, or label data, mirroring how engines pack
//! component state into typed buffers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::SimTime;

/// Typed payload of one state field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum FieldData {
    /// Floating-point state, compared bitwise.
    Doubles(Vec<f64>),
    /// Integer state such as step counters.
    Ints(Vec<i64>),
    /// Symbolic state such as contact or component labels.
    Labels(Vec<String>),
}

impl FieldData {
    /// Returns a short name for the payload kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Doubles(_) => "doubles",
            Self::Ints(_) => "ints",
            Self::Labels(_) => "labels",
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Doubles(v) => v.len(),
            Self::Ints(v) => v.len(),
            Self::Labels(v) => v.len(),
        }
    }

    /// Returns true if the payload has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the doubles, if this is a double payload.
    #[must_use]
    pub fn as_doubles(&self) -> Option<&[f64]> {
        match self {
            Self::Doubles(v) => Some(v),
            _ => None,
        }
    }

    const fn tag(&self) -> u8 {
        match self {
            Self::Doubles(_) => 0,
            Self::Ints(_) => 1,
            Self::Labels(_) => 2,
        }
    }
}

/// One named state field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateField {
    name: String,
    data: FieldData,
}

impl StateField {
    /// Field name, e.g. `positions`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field payload.
    #[must_use]
    pub const fn data(&self) -> &FieldData {
        &self.data
    }
}

/// Stable content hash of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotDigest(blake3::Hash);

impl SnapshotDigest {
    /// Full lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

impl fmt::Display for SnapshotDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.to_hex().as_str())
    }
}

/// Full dynamic state of a scenario at one instant.
///
/// Snapshots are immutable once built. Equality is decided by the
/// [`EqualityOracle`](crate::oracle::EqualityOracle), not by `PartialEq`,
/// so that exact bitwise semantics for floating point values are explicit.
///
/// # Examples
///
/// ```
/// use simverify::{SimTime, Snapshot};
///
/// let snap = Snapshot::builder(SimTime::from_millis(200))
///     .doubles("positions", vec![0.0, 0.25, 0.5])
///     .doubles("velocities", vec![0.0, 0.0, 0.0])
///     .build();
///
/// assert_eq!(snap.time(), SimTime::from_millis(200));
/// assert_eq!(snap.fields().len(), 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    time: SimTime,
    deep: bool,
    fields: Vec<StateField>,
}

impl Snapshot {
    /// Start building a snapshot tagged with `time`.
    #[must_use]
    pub fn builder(time: SimTime) -> SnapshotBuilder {
        SnapshotBuilder {
            time,
            deep: true,
            fields: Vec::new(),
        }
    }

    /// Simulation time the snapshot was captured at.
    #[must_use]
    pub const fn time(&self) -> SimTime {
        self.time
    }

    /// Whether auxiliary (non position/velocity) state was included.
    #[must_use]
    pub const fn is_deep(&self) -> bool {
        self.deep
    }

    /// Fields in capture order.
    #[must_use]
    pub fn fields(&self) -> &[StateField] {
        &self.fields
    }

    /// Look up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&StateField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Total number of entries across all fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.iter().map(|f| f.data.len()).sum()
    }

    /// Returns true if no field has entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content hash over the time tag and every field, bit-exact.
    #[must_use]
    pub fn digest(&self) -> SnapshotDigest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.time.as_nanos().to_le_bytes());
        hasher.update(&[u8::from(self.deep)]);
        for field in &self.fields {
            hasher.update(&(field.name.len() as u64).to_le_bytes());
            hasher.update(field.name.as_bytes());
            hasher.update(&[field.data.tag()]);
            hasher.update(&(field.data.len() as u64).to_le_bytes());
            match &field.data {
                FieldData::Doubles(values) => {
                    for v in values {
                        hasher.update(&v.to_bits().to_le_bytes());
                    }
                }
                FieldData::Ints(values) => {
                    for v in values {
                        hasher.update(&v.to_le_bytes());
                    }
                }
                FieldData::Labels(values) => {
                    for v in values {
                        hasher.update(&(v.len() as u64).to_le_bytes());
                        hasher.update(v.as_bytes());
                    }
                }
            }
        }
        SnapshotDigest(hasher.finalize())
    }

    /// Returns a copy with one bit of one numeric entry flipped.
    ///
    /// Returns `None` if the field is missing, holds labels, or `index` or
    /// `bit` is out of range.
    #[must_use]
    pub fn with_flipped_bit(&self, field: &str, index: usize, bit: u32) -> Option<Self> {
        if bit >= 64 {
            return None;
        }
        let mut copy = self.clone();
        let target = copy.fields.iter_mut().find(|f| f.name == field)?;
        match &mut target.data {
            FieldData::Doubles(values) => {
                let v = values.get_mut(index)?;
                *v = f64::from_bits(v.to_bits() ^ (1u64 << bit));
            }
            FieldData::Ints(values) => {
                let v = values.get_mut(index)?;
                *v ^= 1i64 << bit;
            }
            FieldData::Labels(_) => return None,
        }
        Some(copy)
    }
}

/// Builder for [`Snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    time: SimTime,
    deep: bool,
    fields: Vec<StateField>,
}

impl SnapshotBuilder {
    /// Mark the snapshot as shallow (positions and velocities only).
    #[must_use]
    pub const fn deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    /// Add a double-valued field. A field with the same name is replaced.
    #[must_use]
    pub fn doubles(self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.field(name.into(), FieldData::Doubles(values))
    }

    /// Add an integer-valued field. A field with the same name is replaced.
    #[must_use]
    pub fn ints(self, name: impl Into<String>, values: Vec<i64>) -> Self {
        self.field(name.into(), FieldData::Ints(values))
    }

    /// Add a label-valued field. A field with the same name is replaced.
    #[must_use]
    pub fn labels(self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.field(name.into(), FieldData::Labels(values))
    }

    fn field(mut self, name: String, data: FieldData) -> Self {
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == name) {
            existing.data = data;
        } else {
            self.fields.push(StateField { name, data });
        }
        self
    }

    /// Finish the snapshot.
    #[must_use]
    pub fn build(self) -> Snapshot {
        Snapshot {
            time: self.time,
            deep: self.deep,
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot::builder(SimTime::from_millis(100))
            .doubles("positions", vec![0.0, 0.25, -1.5])
            .ints("contacts", vec![0, 2])
            .labels("modes", vec!["stick".to_string()])
            .build()
    }

    #[test]
    fn builder_preserves_field_order_and_replaces_duplicates() {
        let snap = Snapshot::builder(SimTime::ZERO)
            .doubles("a", vec![1.0])
            .doubles("b", vec![2.0])
            .doubles("a", vec![3.0])
            .build();
        let names: Vec<&str> = snap.fields().iter().map(StateField::name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(snap.field("a").unwrap().data().as_doubles(), Some(&[3.0][..]));
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let a = sample();
        let b = sample();
        assert_eq!(a.digest(), b.digest());

        let flipped = a.with_flipped_bit("positions", 1, 0).unwrap();
        assert_ne!(a.digest(), flipped.digest());
        assert_eq!(a.digest().to_hex().len(), 64);
    }

    #[test]
    fn digest_distinguishes_signed_zero() {
        let a = Snapshot::builder(SimTime::ZERO).doubles("x", vec![0.0]).build();
        let b = Snapshot::builder(SimTime::ZERO).doubles("x", vec![-0.0]).build();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn flipped_bit_rejects_invalid_targets() {
        let snap = sample();
        assert!(snap.with_flipped_bit("missing", 0, 0).is_none());
        assert!(snap.with_flipped_bit("positions", 9, 0).is_none());
        assert!(snap.with_flipped_bit("modes", 0, 0).is_none());
        assert!(snap.with_flipped_bit("positions", 0, 64).is_none());
        let ints = snap.with_flipped_bit("contacts", 1, 0).unwrap();
        assert_eq!(ints.field("contacts").unwrap().data(), &FieldData::Ints(vec![0, 3]));
    }

    #[test]
    fn len_counts_all_entries() {
        assert_eq!(sample().len(), 6);
        assert!(Snapshot::builder(SimTime::ZERO).build().is_empty());
    }
}
