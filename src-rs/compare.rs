//! Exact pixel comparison of prepared (normalized and masked) image pairs.
//!
//! Any mismatched pixel means the images differ; there is no similarity
//! threshold. Two backends share the [`Comparator`] seam: an in-process pixel
//! walk and ImageMagick's `compare -metric AE`.

use crate::mask::apply_regions;
use crate::normalize::{normalize_files, Canvas, NormalizedPair};
use crate::region::ResolvedRegions;
use crate::store::ensure_parent_dir;
use crate::{Error, Result};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

/// Mismatched pixels in generated diff images.
pub const HIGHLIGHT: Rgba<u8> = Rgba([255, 0, 255, 255]);

/// ImageMagick spelling of [`HIGHLIGHT`].
const HIGHLIGHT_ARG: &str = "rgba(255,0,255,255)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub differs: bool,
    pub mismatched_pixels: u64,
    pub width: u32,
    pub height: u32,
}

impl Comparison {
    fn new(mismatched_pixels: u64, canvas: Canvas) -> Self {
        Self {
            differs: mismatched_pixels > 0,
            mismatched_pixels,
            width: canvas.width,
            height: canvas.height,
        }
    }
}

/// Everything one comparison needs. `first` in the prepared pair is always the
/// candidate, so diff images are drawn over the candidate.
#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    pub candidate: PathBuf,
    pub baseline: PathBuf,
    pub diff_output: Option<PathBuf>,
    pub regions: ResolvedRegions,
}

impl ComparisonRequest {
    pub fn new(candidate: impl Into<PathBuf>, baseline: impl Into<PathBuf>) -> Self {
        Self {
            candidate: candidate.into(),
            baseline: baseline.into(),
            diff_output: None,
            regions: ResolvedRegions::default(),
        }
    }

    pub fn with_diff_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.diff_output = Some(path.into());
        self
    }

    pub fn with_regions(mut self, regions: ResolvedRegions) -> Self {
        self.regions = regions;
        self
    }
}

pub trait Comparator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compare `pair.first` against `pair.second`, writing a highlighted copy
    /// of `pair.first` to `diff_out` when given.
    fn compare(&self, pair: &NormalizedPair, diff_out: Option<&Path>) -> Result<Comparison>;
}

/// Normalize, mask and compare the two files named by `request`.
pub fn run_comparison(request: &ComparisonRequest, comparator: &dyn Comparator) -> Result<Comparison> {
    let mut pair = normalize_files(&request.candidate, &request.baseline)?;
    apply_regions(&mut pair, &request.regions);
    if let Some(path) = request.diff_output.as_deref() {
        ensure_parent_dir(path)?;
    }
    let result = comparator.compare(&pair, request.diff_output.as_deref())?;
    debug!(
        comparator = comparator.name(),
        candidate = %request.candidate.display(),
        baseline = %request.baseline.display(),
        mismatched = result.mismatched_pixels,
        padded = pair.padded,
        "compared"
    );
    Ok(result)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PixelComparator;

impl Comparator for PixelComparator {
    fn name(&self) -> &'static str {
        "pixel"
    }

    fn compare(&self, pair: &NormalizedPair, diff_out: Option<&Path>) -> Result<Comparison> {
        if pair.first.dimensions() != pair.second.dimensions() {
            return Err(Error::Comparison(format!(
                "pair is not normalized: {:?} vs {:?}",
                pair.first.dimensions(),
                pair.second.dimensions()
            )));
        }

        let mismatched = pair
            .first
            .pixels()
            .zip(pair.second.pixels())
            .filter(|(a, b)| a != b)
            .count() as u64;

        if let Some(path) = diff_out {
            let overlay = highlight_overlay(&pair.first, &pair.second);
            DynamicImage::ImageRgba8(overlay)
                .save(path)
                .map_err(|err| Error::Comparison(format!("failed to save diff image {}: {err}", path.display())))?;
        }

        Ok(Comparison::new(mismatched, pair.canvas))
    }
}

/// Copy of `current` with mismatched pixels in [`HIGHLIGHT`] and the rest
/// washed toward white so the highlight stands out.
pub fn highlight_overlay(current: &RgbaImage, reference: &RgbaImage) -> RgbaImage {
    let mut out = current.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if *reference.get_pixel(x, y) != *pixel {
            *pixel = HIGHLIGHT;
        } else {
            *pixel = lowlight(*pixel);
        }
    }
    out
}

fn lowlight(base: Rgba<u8>) -> Rgba<u8> {
    let alpha = 0.6f32;
    let wash = |c: u8| ((1.0 - alpha) * c as f32 + alpha * 255.0).round() as u8;
    Rgba([wash(base[0]), wash(base[1]), wash(base[2]), 255])
}

/// ImageMagick `compare` driven with an argument vector.
///
/// Exit status 0 means identical, 1 means "ran and found differences", any
/// other status (or a signal, or a timeout) means the comparison never ran.
#[derive(Debug, Clone)]
pub struct MagickComparator {
    pub program: PathBuf,
    pub timeout: Duration,
    /// Where padded inputs are staged; the system temp dir when `None`.
    pub staging_dir: Option<PathBuf>,
}

impl Default for MagickComparator {
    fn default() -> Self {
        Self {
            program: PathBuf::from("compare"),
            timeout: Duration::from_secs(60),
            staging_dir: None,
        }
    }
}

impl MagickComparator {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            staging_dir: None,
        }
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    fn stage(&self, prefix: &str, image: &RgbaImage) -> Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(".png");
        let file = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        image
            .save_with_format(file.path(), ImageFormat::Png)
            .map_err(|err| Error::Comparison(format!("failed to stage {}: {err}", file.path().display())))?;
        Ok(file)
    }
}

impl Comparator for MagickComparator {
    fn name(&self) -> &'static str {
        "magick"
    }

    fn compare(&self, pair: &NormalizedPair, diff_out: Option<&Path>) -> Result<Comparison> {
        // Deleted on drop, on every return path below.
        let first = self.stage("padded+candidate-", &pair.first)?;
        let second = self.stage("padded+baseline-", &pair.second)?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-metric")
            .arg("AE")
            .arg("-highlight-color")
            .arg(HIGHLIGHT_ARG)
            .arg(first.path())
            .arg(second.path());
        match diff_out {
            Some(path) => cmd.arg(path),
            None => cmd.arg("null:"),
        };
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|err| {
            Error::Comparison(format!("cannot run {}: {err}", self.program.display()))
        })?;

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Comparison(format!(
                    "{} timed out after {}s",
                    self.program.display(),
                    self.timeout.as_secs()
                )));
            }
        };

        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            pipe.read_to_string(&mut stderr)?;
        }

        match status.code() {
            Some(0) => Ok(Comparison::new(0, pair.canvas)),
            Some(1) => {
                // AE prints the count on stderr; clamp so a garbled count
                // still reads as "differs".
                let count = parse_ae_metric(&stderr).unwrap_or(1).max(1);
                Ok(Comparison::new(count, pair.canvas))
            }
            code => Err(Error::Comparison(format!(
                "{} exited with {}: {}",
                self.program.display(),
                code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}")),
                stderr.trim()
            ))),
        }
    }
}

/// First whitespace-separated token of `compare` stderr, e.g. `1234` or `1.5e+06`.
fn parse_ae_metric(stderr: &str) -> Option<u64> {
    let token = stderr.split_whitespace().next()?;
    let value: f64 = token.parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value.round() as u64)
    } else {
        None
    }
}
