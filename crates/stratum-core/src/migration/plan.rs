//! Migration plans.
//!
//! A plan is an ordered chain of single-hop steps from the store's version
//! to the destination version. It is built once per attempt by the
//! [`MigrationPlanner`](super::MigrationPlanner) and discarded afterwards.

use std::fmt;

use chrono::{DateTime, Utc};

use super::error::MigrationError;
use crate::store::StoreLocation;
use crate::version::VersionIdentifier;

/// A single-hop migration between adjacent registered versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MigrationStep {
    /// Zero-based position in the plan.
    pub index: usize,
    /// Version the step reads.
    pub source: VersionIdentifier,
    /// Version the step writes.
    pub destination: VersionIdentifier,
}

impl MigrationStep {
    /// Create a new step.
    pub fn new(index: usize, source: VersionIdentifier, destination: VersionIdentifier) -> Self {
        Self {
            index,
            source,
            destination,
        }
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({} -> {})", self.index + 1, self.source, self.destination)
    }
}

/// A complete migration plan.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Version currently stamped on the store.
    pub source: VersionIdentifier,
    /// Version the store ends at.
    pub destination: VersionIdentifier,
    /// Ordered single-hop steps. Empty iff `source == destination`.
    pub steps: Vec<MigrationStep>,
    /// Store being migrated.
    pub store: StoreLocation,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
}

impl MigrationPlan {
    /// Build a plan from consecutive `(source, destination)` hops.
    pub fn from_hops(
        store: StoreLocation,
        source: VersionIdentifier,
        destination: VersionIdentifier,
        hops: impl IntoIterator<Item = (VersionIdentifier, VersionIdentifier)>,
    ) -> Self {
        let steps = hops
            .into_iter()
            .enumerate()
            .map(|(index, (from, to))| MigrationStep::new(index, from, to))
            .collect();

        Self {
            source,
            destination,
            steps,
            store,
            created_at: Utc::now(),
        }
    }

    /// A plan with nothing to do.
    pub fn empty(store: StoreLocation, version: VersionIdentifier) -> Self {
        Self::from_hops(store, version, version, std::iter::empty())
    }

    /// Get the number of steps in the plan.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Check if this plan is empty (no steps).
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the chaining invariants.
    pub fn validate(&self) -> Result<(), MigrationError> {
        let invalid = |reason: String| Err(MigrationError::PlanningFailed { reason });

        let (first, last) = match (self.steps.first(), self.steps.last()) {
            (None, _) | (_, None) => {
                if self.source != self.destination {
                    return invalid(format!(
                        "plan from {} to {} has no steps",
                        self.source, self.destination
                    ));
                }
                return Ok(());
            }
            (Some(first), Some(last)) => (first, last),
        };

        if self.source == self.destination {
            return invalid(format!("plan for {} is a no-op but has steps", self.source));
        }
        if first.source != self.source {
            return invalid(format!(
                "first step starts at {}, expected {}",
                first.source, self.source
            ));
        }
        if last.destination != self.destination {
            return invalid(format!(
                "last step ends at {}, expected {}",
                last.destination, self.destination
            ));
        }

        for (i, step) in self.steps.iter().enumerate() {
            if step.index != i {
                return invalid(format!("step {} has index {}", i, step.index));
            }
            if step.source >= step.destination {
                return invalid(format!("step {step} does not move forward"));
            }
        }
        for pair in self.steps.windows(2) {
            if pair[0].destination != pair[1].source {
                return invalid(format!("steps {} and {} do not chain", pair[0], pair[1]));
            }
        }

        Ok(())
    }
}
