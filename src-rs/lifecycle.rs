//! Outcomes of a single check and how they are reported.
//!
//! Reporting goes through an [`Assertions`] implementation so the harness can
//! sit inside any test framework: the default panics, the recording variant
//! collects results for callers (like the CLI) that decide for themselves.

use crate::store::{SnapshotPaths, SnapshotState};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    /// The capture should match its baseline.
    Stable,
    /// The capture should differ from its baseline (negative test).
    Unstable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// No baseline existed; the capture was parked for review.
    NewScreenshot { paths: SnapshotPaths },
    Matched,
    Diverged {
        paths: SnapshotPaths,
        mismatched_pixels: u64,
    },
}

impl Outcome {
    /// "Diff detected": the only outcome polling retries on.
    pub fn is_diff(&self) -> bool {
        matches!(self, Outcome::Diverged { .. })
    }

    pub fn state(&self) -> SnapshotState {
        match self {
            Outcome::NewScreenshot { .. } => SnapshotState::New,
            Outcome::Matched => SnapshotState::Stable,
            Outcome::Diverged { .. } => SnapshotState::Unstable,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub name: String,
    pub expectation: Expectation,
    pub state: SnapshotState,
    pub passed: bool,
    pub attempts: u32,
    pub outcome: Outcome,
}

pub fn success_message(name: &str) -> String {
    format!("screenshot success: {name}")
}

/// What the check actually observed, phrased so that a match reads exactly
/// like [`success_message`].
pub fn observed_message(name: &str, outcome: &Outcome) -> String {
    match outcome {
        Outcome::NewScreenshot { .. } => format!("new screenshot: {name}"),
        Outcome::Matched => success_message(name),
        Outcome::Diverged { paths, .. } => {
            let detail = serde_json::to_string(paths).unwrap_or_else(|_| format!("{paths:?}"));
            format!("screenshot fail: {name} {detail}")
        }
    }
}

/// Test-framework hooks.
pub trait Assertions: Send + Sync {
    fn expect_to_be(&self, actual: &str, expected: &str);
    fn expect_not_to_be(&self, actual: &str, expected: &str);
}

/// Route a check result through `assertions` with the polarity of
/// `expectation`. Returns whether the expectation held.
pub fn report(assertions: &dyn Assertions, name: &str, expectation: Expectation, outcome: &Outcome) -> bool {
    let actual = observed_message(name, outcome);
    let expected = success_message(name);
    match expectation {
        Expectation::Stable => {
            assertions.expect_to_be(&actual, &expected);
            actual == expected
        }
        Expectation::Unstable => {
            assertions.expect_not_to_be(&actual, &expected);
            actual != expected
        }
    }
}

/// Plain `assert_eq!`/`assert_ne!`, for use under `cargo test`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicAssertions;

impl Assertions for PanicAssertions {
    fn expect_to_be(&self, actual: &str, expected: &str) {
        assert_eq!(actual, expected);
    }

    fn expect_not_to_be(&self, actual: &str, expected: &str) {
        assert_ne!(actual, expected);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionRecord {
    pub actual: String,
    pub expected: String,
    pub negated: bool,
}

impl AssertionRecord {
    pub fn passed(&self) -> bool {
        (self.actual == self.expected) != self.negated
    }
}

#[derive(Debug, Default)]
pub struct RecordingAssertions {
    records: Mutex<Vec<AssertionRecord>>,
}

impl RecordingAssertions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AssertionRecord> {
        self.lock().clone()
    }

    pub fn failures(&self) -> Vec<AssertionRecord> {
        self.lock().iter().filter(|r| !r.passed()).cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AssertionRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, actual: &str, expected: &str, negated: bool) {
        self.lock().push(AssertionRecord {
            actual: actual.to_string(),
            expected: expected.to_string(),
            negated,
        });
    }
}

impl Assertions for RecordingAssertions {
    fn expect_to_be(&self, actual: &str, expected: &str) {
        self.push(actual, expected, false);
    }

    fn expect_not_to_be(&self, actual: &str, expected: &str) {
        self.push(actual, expected, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn paths() -> SnapshotPaths {
        SnapshotPaths {
            good_path: PathBuf::from("s/p.good.png"),
            new_path: PathBuf::from("s/p.new.png"),
            diff_path: PathBuf::from("s/p.diff.png"),
        }
    }

    #[test]
    fn messages_follow_outcome() {
        assert_eq!(
            observed_message("p", &Outcome::NewScreenshot { paths: paths() }),
            "new screenshot: p"
        );
        assert_eq!(observed_message("p", &Outcome::Matched), "screenshot success: p");
        let fail = observed_message(
            "p",
            &Outcome::Diverged {
                paths: paths(),
                mismatched_pixels: 3,
            },
        );
        assert_eq!(
            fail,
            r#"screenshot fail: p {"goodPath":"s/p.good.png","newPath":"s/p.new.png","diffPath":"s/p.diff.png"}"#
        );
    }

    #[test]
    fn polarity_flips_for_unstable_expectations() {
        let rec = RecordingAssertions::new();
        let diverged = Outcome::Diverged {
            paths: paths(),
            mismatched_pixels: 1,
        };

        assert!(report(&rec, "p", Expectation::Stable, &Outcome::Matched));
        assert!(!report(&rec, "p", Expectation::Stable, &diverged));
        assert!(report(&rec, "p", Expectation::Unstable, &diverged));
        assert!(!report(&rec, "p", Expectation::Unstable, &Outcome::Matched));
        assert!(report(&rec, "p", Expectation::Unstable, &Outcome::NewScreenshot { paths: paths() }));

        let records = rec.records();
        assert_eq!(records.len(), 5);
        assert!(records[2].negated);
        assert_eq!(rec.failures().len(), 2);
    }

    #[test]
    #[should_panic]
    fn panic_assertions_fail_loudly() {
        report(
            &PanicAssertions,
            "p",
            Expectation::Stable,
            &Outcome::NewScreenshot { paths: paths() },
        );
    }
}
