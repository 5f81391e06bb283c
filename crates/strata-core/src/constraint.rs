//! Constraint state machine for partition pruning.
//!
//! Each partition carries at most one CHECK constraint on its height column
//! whose tightness follows the partition's insertion status:
//!
//! ```text
//!   empty ──► inserting ──► done
//!   (none)    height >= min  height BETWEEN min AND max
//! ```
//!
//! The status is recomputed from the partition's rows on every check; the
//! constraint's name suffix records the last state the reconciler applied.
//! `done` is terminal.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ddl::quote_ident;

/// Insertion status of a partition, derived from its last row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertionStatus {
    /// No rows yet.
    Empty,
    /// Rows exist but the final id of the range has not been written.
    Inserting,
    /// The row with id `to_id - 1` exists; no further inserts are expected.
    Done,
}

impl InsertionStatus {
    /// Derives the status from the partition's highest id and its range end.
    #[must_use]
    pub fn classify(last_id: Option<i64>, range_to_id: i64) -> Self {
        match last_id {
            None => Self::Empty,
            Some(id) if id == range_to_id - 1 => Self::Done,
            Some(_) => Self::Inserting,
        }
    }
}

impl fmt::Display for InsertionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Inserting => write!(f, "inserting"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// State encoded in a managed constraint's name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintState {
    /// Open-ended `column >= min`.
    Inserting,
    /// Closed `column BETWEEN min AND max`.
    Done,
}

impl ConstraintState {
    /// Name suffix for this state.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Inserting => "inserting",
            Self::Done => "done",
        }
    }

    /// Recognises a managed constraint of `partition` on `column` by name.
    ///
    /// Returns `None` for constraints the state machine does not own.
    #[must_use]
    pub fn from_name(partition: &str, column: &str, name: &str) -> Option<Self> {
        [Self::Inserting, Self::Done]
            .into_iter()
            .find(|state| constraint_name(partition, column, *state) == name)
    }
}

/// Name of the managed constraint for `partition`, `column`, and `state`.
///
/// Constraint names are unqualified, so any schema prefix on the partition
/// is dropped.
#[must_use]
pub fn constraint_name(partition: &str, column: &str, state: ConstraintState) -> String {
    let table = partition.rsplit('.').next().unwrap_or(partition);
    format!("{table}_{column}_{}", state.suffix())
}

/// Minimum and maximum of a partition's height column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightBounds {
    /// Smallest height in the partition.
    pub min: i64,
    /// Largest height in the partition.
    pub max: i64,
}

/// A managed CHECK constraint ready to be added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConstraint {
    /// Constraint name (encodes partition, column and state).
    pub name: String,
    /// Constrained column.
    pub column: String,
    /// Lower bound (inclusive).
    pub min: i64,
    /// Upper bound (inclusive); `None` for the open `inserting` form.
    pub max: Option<i64>,
}

impl CheckConstraint {
    /// Open-ended constraint for a partition still receiving rows.
    #[must_use]
    pub fn inserting(partition: &str, column: &str, min: i64) -> Self {
        Self {
            name: constraint_name(partition, column, ConstraintState::Inserting),
            column: column.to_string(),
            min,
            max: None,
        }
    }

    /// Tight constraint for a closed partition.
    #[must_use]
    pub fn done(partition: &str, column: &str, bounds: HeightBounds) -> Self {
        Self {
            name: constraint_name(partition, column, ConstraintState::Done),
            column: column.to_string(),
            min: bounds.min,
            max: Some(bounds.max),
        }
    }

    /// State this constraint represents.
    #[must_use]
    pub fn state(&self) -> ConstraintState {
        if self.max.is_some() {
            ConstraintState::Done
        } else {
            ConstraintState::Inserting
        }
    }

    /// Returns `true` if `height` satisfies the constraint.
    #[must_use]
    pub fn admits(&self, height: i64) -> bool {
        height >= self.min && self.max.map_or(true, |max| height <= max)
    }

    /// SQL boolean expression for the CHECK clause.
    #[must_use]
    pub fn expression(&self) -> String {
        let col = quote_ident(&self.column);
        match self.max {
            Some(max) => format!("{col} BETWEEN {} AND {max}", self.min),
            None => format!("{col} >= {}", self.min),
        }
    }
}

/// A managed constraint found on a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingConstraint {
    /// Constraint name as stored in the catalog.
    pub name: String,
    /// State decoded from the suffix.
    pub state: ConstraintState,
}

impl ExistingConstraint {
    /// Keeps only the constraints owned by the state machine.
    #[must_use]
    pub fn recognise(partition: &str, column: &str, names: &[String]) -> Vec<Self> {
        names
            .iter()
            .filter_map(|name| {
                ConstraintState::from_name(partition, column, name).map(|state| Self {
                    name: name.clone(),
                    state,
                })
            })
            .collect()
    }
}

/// Action the reconciler must take for a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintTransition {
    /// The current constraint (or its absence) is already right.
    Keep,
    /// Add the open `inserting` constraint (`NOT VALID`).
    OpenInserting,
    /// Drop the listed constraints and add the validated `done` constraint,
    /// in one transaction.
    CloseDone {
        /// Existing managed constraints to drop first.
        drop: Vec<String>,
    },
    /// `done` is already in place; drop leftover `inserting` constraints.
    DropStale {
        /// Constraints to drop.
        drop: Vec<String>,
    },
}

/// Decides the transition for a partition given its status and the managed
/// constraints currently attached to it.
#[must_use]
pub fn plan_transition(
    status: InsertionStatus,
    existing: &[ExistingConstraint],
) -> ConstraintTransition {
    let has = |state| existing.iter().any(|c| c.state == state);
    match status {
        InsertionStatus::Empty => ConstraintTransition::Keep,
        _ if has(ConstraintState::Done) => {
            let stale: Vec<String> = existing
                .iter()
                .filter(|c| c.state == ConstraintState::Inserting)
                .map(|c| c.name.clone())
                .collect();
            if stale.is_empty() {
                ConstraintTransition::Keep
            } else {
                ConstraintTransition::DropStale { drop: stale }
            }
        }
        InsertionStatus::Inserting => {
            // `done` never regresses; an `inserting` constraint is already optimal.
            if existing.is_empty() {
                ConstraintTransition::OpenInserting
            } else {
                ConstraintTransition::Keep
            }
        }
        InsertionStatus::Done => ConstraintTransition::CloseDone {
            drop: existing.iter().map(|c| c.name.clone()).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing(state: ConstraintState) -> Vec<ExistingConstraint> {
        vec![ExistingConstraint {
            name: constraint_name("event_0_1000", "height", state),
            state,
        }]
    }

    #[test]
    fn test_classify() {
        assert_eq!(InsertionStatus::classify(None, 1_000), InsertionStatus::Empty);
        assert_eq!(InsertionStatus::classify(Some(500), 1_000), InsertionStatus::Inserting);
        assert_eq!(InsertionStatus::classify(Some(999), 1_000), InsertionStatus::Done);
    }

    #[test]
    fn test_names_round_trip_through_recognition() {
        let names = vec![
            "event_0_1000_height_inserting".to_string(),
            "event_0_1000_pkey".to_string(),
            "event_1000_2000_height_done".to_string(),
        ];
        let found = ExistingConstraint::recognise("event_0_1000", "height", &names);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].state, ConstraintState::Inserting);
    }

    #[test]
    fn test_schema_prefix_dropped_from_name() {
        assert_eq!(
            constraint_name("chain.event_0_1000", "height", ConstraintState::Done),
            "event_0_1000_height_done"
        );
    }

    #[test]
    fn test_empty_keeps() {
        assert_eq!(plan_transition(InsertionStatus::Empty, &[]), ConstraintTransition::Keep);
    }

    #[test]
    fn test_inserting_transitions() {
        assert_eq!(
            plan_transition(InsertionStatus::Inserting, &[]),
            ConstraintTransition::OpenInserting
        );
        assert_eq!(
            plan_transition(InsertionStatus::Inserting, &existing(ConstraintState::Inserting)),
            ConstraintTransition::Keep
        );
        assert_eq!(
            plan_transition(InsertionStatus::Inserting, &existing(ConstraintState::Done)),
            ConstraintTransition::Keep
        );
    }

    #[test]
    fn test_done_transitions() {
        assert_eq!(
            plan_transition(InsertionStatus::Done, &[]),
            ConstraintTransition::CloseDone { drop: vec![] }
        );
        assert_eq!(
            plan_transition(InsertionStatus::Done, &existing(ConstraintState::Inserting)),
            ConstraintTransition::CloseDone {
                drop: vec!["event_0_1000_height_inserting".into()]
            }
        );
        assert_eq!(
            plan_transition(InsertionStatus::Done, &existing(ConstraintState::Done)),
            ConstraintTransition::Keep
        );
    }

    #[test]
    fn test_leftover_inserting_dropped_next_to_done() {
        let mut both = existing(ConstraintState::Done);
        both.extend(existing(ConstraintState::Inserting));
        let expected = ConstraintTransition::DropStale {
            drop: vec!["event_0_1000_height_inserting".into()],
        };
        assert_eq!(plan_transition(InsertionStatus::Done, &both), expected);
        assert_eq!(plan_transition(InsertionStatus::Inserting, &both), expected);
    }

    #[test]
    fn test_expressions() {
        let open = CheckConstraint::inserting("event_0_1000", "height", 42);
        assert_eq!(open.expression(), "\"height\" >= 42");
        assert_eq!(open.state(), ConstraintState::Inserting);
        assert!(open.admits(42));
        assert!(!open.admits(41));

        let closed = CheckConstraint::done(
            "event_0_1000",
            "height",
            HeightBounds { min: 42, max: 77 },
        );
        assert_eq!(closed.expression(), "\"height\" BETWEEN 42 AND 77");
        assert_eq!(closed.state(), ConstraintState::Done);
        assert!(closed.admits(77));
        assert!(!closed.admits(78));
    }
}
