//! Screenshot regression checks.
//!
//! A [`Harness`] captures a page region through a [`Driver`], compares it
//! against an accepted baseline in a [`SnapshotStore`], and reports through
//! pluggable [`Assertions`]. Differences are parked on disk for review, either
//! through [`SnapshotStore::accept_diff`] or the HTTP [`ReviewServer`].
//!
//! ```no_run
//! use visual_snapshot::{Driver, Harness, ImageFileDriver, PollOptions, SnapshotStore};
//!
//! # fn main() -> visual_snapshot::Result<()> {
//! let harness = Harness::new(SnapshotStore::new("tests/visual/screenshots"));
//! let page = ImageFileDriver::new("target/page.png");
//! harness
//!     .expect(Driver::SeleniumLike(&page), None)
//!     .censor_matching(".clock")
//!     .to_match_screenshot("home", PollOptions::new(3, 500)?)?;
//! # Ok(())
//! # }
//! ```

use image::Rgba;

pub mod compare;
pub mod config;
pub mod driver;
pub mod error;
pub mod harness;
pub mod lifecycle;
pub mod mask;
pub mod normalize;
pub mod poll;
pub mod region;
pub mod server;
pub mod store;

pub use compare::{Comparator, Comparison, ComparisonRequest, MagickComparator, PixelComparator};
pub use config::{ComparatorKind, HarnessOptions, ServerOptions};
pub use driver::{ClipRenderer, CommandDriver, Driver, ImageFileDriver, ScreenshotSource};
pub use error::{Error, Result};
pub use harness::{Harness, ScreenshotExpectation};
pub use lifecycle::{Assertions, Expectation, Outcome, PanicAssertions, RecordingAssertions, Verdict};
pub use poll::PollOptions;
pub use region::{Rectangle, Regions, ResolvedRegions, SelectorResolver};
pub use server::ReviewServer;
pub use store::{DiffRecord, SnapshotPaths, SnapshotState, SnapshotStore};

/// Fill color for padding and masked regions. Masks paint it on both sides of
/// a comparison, so masked pixels always compare equal.
pub const SENTINEL: Rgba<u8> = Rgba([0, 255, 255, 255]);
