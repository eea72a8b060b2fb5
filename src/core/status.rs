// src/core/status.rs

//! Shared status vocabularies for groups and groupsets, and the small
//! `(code, text)` result type every cascade predicate returns (spec §4.D,
//! design note in §9: "represent it as an ordered list of `(predicate,
//! (code,text))` closures... do not encode it as deep conditional
//! nesting").

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupStatus {
    Init,
    Coupled,
    Bad,
    Broken,
    Ro,
    Migrating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupsetStatus {
    Init,
    Ok,
    Bad,
    Broken,
    Frozen,
    Full,
    Ro,
    Migrating,
    Stalled,
    Archived,
    /// A non-terminal failure mode (RO/BAD/MIGRATING/STALLED) escalated
    /// because an active reconfiguration job owns the affected group.
    ServiceActive,
    /// As `ServiceActive`, but the job itself appears stalled.
    ServiceStalled,
    BadDataUnavailable,
    BadIndicesUnavailable,
}

/// A cascade predicate's outcome: the status code plus a human-readable
/// explanation, mirroring the original's `(status, status_text)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeResult<S> {
    pub code: S,
    pub text: String,
}

impl<S> CascadeResult<S> {
    pub fn new(code: S, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

pub type GroupCascadeResult = CascadeResult<GroupStatus>;
pub type GroupsetCascadeResult = CascadeResult<GroupsetStatus>;

/// Runs an ordered list of predicates, returning the first non-`None`
/// result; falls back to `default` if every predicate abstains. This is
/// the one evaluator every cascade (group, couple, LRC) goes through, so
/// the precedence is expressed purely as data (the predicate order) and
/// never as nested `if`/`else`.
pub fn run_cascade<S: Clone>(
    predicates: &[&dyn Fn() -> Option<CascadeResult<S>>],
    default: CascadeResult<S>,
) -> CascadeResult<S> {
    for predicate in predicates {
        if let Some(result) = predicate() {
            return result;
        }
    }
    default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_predicate_wins() {
        let always_bad = || Some(CascadeResult::new(GroupStatus::Bad, "bad"));
        let always_broken = || Some(CascadeResult::new(GroupStatus::Broken, "broken"));
        let predicates: Vec<&dyn Fn() -> Option<CascadeResult<GroupStatus>>> =
            vec![&always_broken, &always_bad];
        let result = run_cascade(&predicates, CascadeResult::new(GroupStatus::Coupled, "ok"));
        assert_eq!(result.code, GroupStatus::Broken);
    }

    #[test]
    fn falls_back_to_default_when_nothing_matches() {
        let abstains = || None;
        let predicates: Vec<&dyn Fn() -> Option<CascadeResult<GroupStatus>>> = vec![&abstains];
        let result = run_cascade(&predicates, CascadeResult::new(GroupStatus::Coupled, "ok"));
        assert_eq!(result.code, GroupStatus::Coupled);
    }
}
