//! Capture, compare and report: the entry point test suites talk to.

use crate::compare::{run_comparison, Comparator, ComparisonRequest, PixelComparator};
use crate::config::HarnessOptions;
use crate::driver::Driver;
use crate::lifecycle::{report, Assertions, Expectation, Outcome, PanicAssertions, Verdict};
use crate::poll::{poll, PollOptions};
use crate::region::{Rectangle, Regions, ResolvedRegions, SelectorResolver};
use crate::store::{safe_unlink, DiffRecord, SnapshotPaths, SnapshotState, SnapshotStore};
use crate::{Error, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Harness {
    store: SnapshotStore,
    comparator: Box<dyn Comparator>,
    assertions: Arc<dyn Assertions>,
}

impl Harness {
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            store,
            comparator: Box::new(PixelComparator),
            assertions: Arc::new(PanicAssertions),
        }
    }

    pub fn from_options(options: &HarnessOptions) -> Result<Self> {
        Ok(Self::new(SnapshotStore::from_options(options)?).with_comparator(options.build_comparator()))
    }

    pub fn with_comparator(mut self, comparator: Box<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_assertions(mut self, assertions: Arc<dyn Assertions>) -> Self {
        self.assertions = assertions;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn group(&mut self, segment: &str) -> Result<()> {
        self.store.group(segment)
    }

    pub fn ungroup(&mut self) -> Result<String> {
        self.store.ungroup()
    }

    pub fn current_path(&self) -> PathBuf {
        self.store.current_path()
    }

    pub fn paths(&self, name: &str) -> Result<SnapshotPaths> {
        self.store.paths(name)
    }

    pub fn state(&self, name: &str) -> Result<SnapshotState> {
        self.store.state(name)
    }

    /// Start a fluent screenshot expectation for `target` (the whole document
    /// when `None`).
    pub fn expect<'h, 'd>(&'h self, driver: Driver<'d>, target: Option<&str>) -> ScreenshotExpectation<'h, 'd> {
        ScreenshotExpectation {
            harness: self,
            driver,
            target: target.map(str::to_string),
            regions: Regions::new(),
        }
    }

    /// Compare the candidate already sitting at `name`'s new path against its
    /// baseline and update the artifacts. Does not report.
    pub fn test_single(&self, name: &str, regions: &ResolvedRegions) -> Result<Outcome> {
        let paths = self.store.paths(name)?;
        if !paths.new_path.exists() {
            return Err(Error::NotFound(format!(
                "no candidate screenshot for {name} at {}",
                paths.new_path.display()
            )));
        }

        if !paths.good_path.exists() {
            fs::copy(&paths.new_path, &paths.diff_path)?;
            info!(name, "new screenshot");
            return Ok(Outcome::NewScreenshot { paths });
        }

        let request = ComparisonRequest::new(&paths.new_path, &paths.good_path)
            .with_diff_output(&paths.diff_path)
            .with_regions(regions.clone());
        let result = run_comparison(&request, self.comparator.as_ref())?;

        if result.differs {
            warn!(name, mismatched = result.mismatched_pixels, diff = %paths.diff_path.display(), "screenshot differs");
            Ok(Outcome::Diverged {
                paths,
                mismatched_pixels: result.mismatched_pixels,
            })
        } else {
            safe_unlink(&paths.new_path)?;
            safe_unlink(&paths.diff_path)?;
            info!(name, "screenshot matches");
            Ok(Outcome::Matched)
        }
    }

    /// Capture with `driver`, compare, retry per `options` while a diff is
    /// detected, then report the final outcome once.
    pub fn check(
        &self,
        driver: Driver<'_>,
        target: Option<&str>,
        regions: &Regions,
        name: &str,
        expectation: Expectation,
        options: PollOptions,
    ) -> Result<Verdict> {
        let paths = self.store.paths(name)?;
        let resolver: &dyn SelectorResolver = &driver;
        let polled = poll(
            options,
            |_| {
                let origin = driver.render(target, &paths.new_path)?;
                let resolved = regions.resolve(Some(resolver), &origin)?;
                self.test_single(name, &resolved)
            },
            Outcome::is_diff,
        )?;

        let passed = report(self.assertions.as_ref(), name, expectation, &polled.value);
        Ok(Verdict {
            name: name.to_string(),
            expectation,
            state: polled.value.state(),
            passed,
            attempts: polled.attempts,
            outcome: polled.value,
        })
    }

    /// Assert that two accepted baselines are pixel-identical.
    pub fn expect_same(&self, first: &str, second: &str) -> Result<bool> {
        self.compare_baselines(first, second, Expectation::Stable)
    }

    /// Assert that two accepted baselines differ.
    pub fn expect_diff(&self, first: &str, second: &str) -> Result<bool> {
        self.compare_baselines(first, second, Expectation::Unstable)
    }

    fn compare_baselines(&self, first: &str, second: &str, expectation: Expectation) -> Result<bool> {
        let a = self.store.paths(first)?.good_path;
        let b = self.store.paths(second)?.good_path;
        let result = run_comparison(&ComparisonRequest::new(&a, &b), self.comparator.as_ref())?;

        let expected = format!("{first} matches {second}");
        let actual = if result.differs {
            format!("{first} does not match {second}")
        } else {
            expected.clone()
        };
        Ok(match expectation {
            Expectation::Stable => {
                self.assertions.expect_to_be(&actual, &expected);
                actual == expected
            }
            Expectation::Unstable => {
                self.assertions.expect_not_to_be(&actual, &expected);
                actual != expected
            }
        })
    }

    pub fn accept_diff(&self, name: &str) -> Result<()> {
        self.store.accept_diff(name)
    }

    pub fn accept_diffs<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        self.store.accept_diffs(names)
    }

    pub fn clear_diffs(&self) -> Result<Vec<String>> {
        self.store.clear_diffs()
    }

    pub fn list_of_diffs(&self) -> Result<Vec<DiffRecord>> {
        self.store.list_of_diffs()
    }

    pub fn destructive_clear_all_snapshots(&self) -> Result<()> {
        self.store.destructive_clear_all_snapshots()
    }
}

/// Builder returned by [`Harness::expect`]. Include-only regions must all be
/// declared before the first censored region.
pub struct ScreenshotExpectation<'h, 'd> {
    harness: &'h Harness,
    driver: Driver<'d>,
    target: Option<String>,
    regions: Regions,
}

impl ScreenshotExpectation<'_, '_> {
    pub fn include_only_rect(mut self, rect: Rectangle) -> Result<Self> {
        self.regions.add_include_only_rect(rect.x, rect.y, rect.w, rect.h)?;
        Ok(self)
    }

    pub fn include_only_matching(mut self, selector: &str) -> Result<Self> {
        self.regions.add_include_only_selector(selector)?;
        Ok(self)
    }

    pub fn censor_rect(mut self, rect: Rectangle) -> Self {
        self.regions.add_skip_rect(rect.x, rect.y, rect.w, rect.h);
        self
    }

    pub fn censor_matching(mut self, selector: &str) -> Self {
        self.regions.add_skip_selector(selector);
        self
    }

    pub fn to_match_screenshot(self, name: &str, options: PollOptions) -> Result<Verdict> {
        self.finish(name, Expectation::Stable, options)
    }

    pub fn to_not_match_screenshot(self, name: &str, options: PollOptions) -> Result<Verdict> {
        self.finish(name, Expectation::Unstable, options)
    }

    fn finish(self, name: &str, expectation: Expectation, options: PollOptions) -> Result<Verdict> {
        self.harness.check(
            self.driver,
            self.target.as_deref(),
            &self.regions,
            name,
            expectation,
            options,
        )
    }
}
