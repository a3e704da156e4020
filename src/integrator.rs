//! Numerical integrators and per-scenario integrator selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A numerical time-stepping method selectable per scenario run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Integrator {
    /// Explicit forward Euler.
    ForwardEuler,
    /// Semi-implicit (symplectic) Euler.
    SymplecticEuler,
    /// Explicit fourth-order Runge-Kutta.
    RungeKutta4,
    /// Implicit backward Euler.
    BackwardEuler,
    /// Backward Euler with bilateral/unilateral constraints solved in the step.
    #[default]
    ConstrainedBackwardEuler,
    /// Implicit trapezoidal rule.
    Trapezoidal,
}

impl Integrator {
    /// Every supported integrator, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::ForwardEuler,
        Self::SymplecticEuler,
        Self::RungeKutta4,
        Self::BackwardEuler,
        Self::ConstrainedBackwardEuler,
        Self::Trapezoidal,
    ];

    /// The implicit integrators used for stiff scenarios.
    pub const STIFF: [Self; 3] = [Self::BackwardEuler, Self::ConstrainedBackwardEuler, Self::Trapezoidal];

    /// Returns the canonical name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ForwardEuler => "ForwardEuler",
            Self::SymplecticEuler => "SymplecticEuler",
            Self::RungeKutta4 => "RungeKutta4",
            Self::BackwardEuler => "BackwardEuler",
            Self::ConstrainedBackwardEuler => "ConstrainedBackwardEuler",
            Self::Trapezoidal => "Trapezoidal",
        }
    }

    /// Returns true for methods that solve a linear system each step.
    #[must_use]
    pub const fn is_implicit(self) -> bool {
        matches!(self, Self::BackwardEuler | Self::ConstrainedBackwardEuler | Self::Trapezoidal)
    }

    /// Returns true if constraint multipliers are solved as part of the step.
    #[must_use]
    pub const fn is_constrained(self) -> bool {
        matches!(self, Self::ConstrainedBackwardEuler)
    }
}

impl fmt::Display for Integrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Integrator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "RungeKutta" is the name used by older regression baselines.
        match s {
            "ForwardEuler" => Ok(Self::ForwardEuler),
            "SymplecticEuler" => Ok(Self::SymplecticEuler),
            "RungeKutta4" | "RungeKutta" => Ok(Self::RungeKutta4),
            "BackwardEuler" => Ok(Self::BackwardEuler),
            "ConstrainedBackwardEuler" => Ok(Self::ConstrainedBackwardEuler),
            "Trapezoidal" => Ok(Self::Trapezoidal),
            other => Err(ValidationError::UnknownIntegrator {
                name: other.to_string(),
            }),
        }
    }
}

/// Which integrators a scenario is verified under.
///
/// This is catalog policy: the verifier only resolves and iterates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "integrators", rename_all = "snake_case")]
pub enum IntegratorSelection {
    /// One integrator.
    Single(Integrator),
    /// The implicit subset ([`Integrator::STIFF`]).
    Stiff,
    /// The full enumeration ([`Integrator::ALL`]).
    All,
    /// An explicit, ordered list.
    Custom(Vec<Integrator>),
}

impl Default for IntegratorSelection {
    fn default() -> Self {
        Self::Single(Integrator::default())
    }
}

impl IntegratorSelection {
    /// Resolves the selection to an ordered list without duplicates.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyIntegratorSet` for an empty custom list.
    pub fn resolve(&self) -> Result<Vec<Integrator>, ValidationError> {
        let list = match self {
            Self::Single(i) => vec![*i],
            Self::Stiff => Integrator::STIFF.to_vec(),
            Self::All => Integrator::ALL.to_vec(),
            Self::Custom(list) => {
                let mut out: Vec<Integrator> = Vec::with_capacity(list.len());
                for i in list {
                    if !out.contains(i) {
                        out.push(*i);
                    }
                }
                out
            }
        };
        if list.is_empty() {
            return Err(ValidationError::EmptyIntegratorSet);
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_canonical_and_legacy_names() {
        for i in Integrator::ALL {
            assert_eq!(i.name().parse::<Integrator>().unwrap(), i);
        }
        assert_eq!("RungeKutta".parse::<Integrator>().unwrap(), Integrator::RungeKutta4);
        assert!("Verlet".parse::<Integrator>().is_err());
    }

    #[test]
    fn stiff_subset_is_implicit() {
        assert!(Integrator::STIFF.iter().all(|i| i.is_implicit()));
        assert!(!Integrator::RungeKutta4.is_implicit());
        assert!(Integrator::ConstrainedBackwardEuler.is_constrained());
    }

    #[test]
    fn selection_resolves_in_order_without_duplicates() {
        let sel = IntegratorSelection::Custom(vec![
            Integrator::RungeKutta4,
            Integrator::ForwardEuler,
            Integrator::RungeKutta4,
        ]);
        assert_eq!(sel.resolve().unwrap(), vec![Integrator::RungeKutta4, Integrator::ForwardEuler]);
        assert_eq!(IntegratorSelection::All.resolve().unwrap().len(), 6);
        assert_eq!(IntegratorSelection::Stiff.resolve().unwrap().len(), 3);
    }

    #[test]
    fn empty_custom_selection_is_rejected() {
        let err = IntegratorSelection::Custom(Vec::new()).resolve().unwrap_err();
        assert_eq!(err, ValidationError::EmptyIntegratorSet);
    }
}
