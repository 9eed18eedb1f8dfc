//! Capture collaborators.
//!
//! Browser automation lives outside this crate. A caller hands the harness a
//! [`Driver`], choosing the variant explicitly:
//!
//! - [`Driver::PhantomLike`]: the backend clips and renders the target itself
//!   and reports the bounds it rendered.
//! - [`Driver::SeleniumLike`]: the backend only knows how to screenshot the
//!   whole document and report element bounds; cropping happens here.

use crate::region::{Rectangle, SelectorResolver};
use crate::store::ensure_parent_dir;
use crate::{Error, Result};
use image::{imageops, RgbaImage};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

/// Backend that renders a target straight to a file.
pub trait ClipRenderer: SelectorResolver {
    /// Render `target` (first match of a selector, or the whole scrollable
    /// document for `None`) to `out`, returning the rendered bounds in page
    /// coordinates.
    fn render_target(&self, target: Option<&str>, out: &Path) -> Result<Rectangle>;
}

/// Backend that produces whole-document screenshots.
pub trait ScreenshotSource: SelectorResolver {
    /// Bounds of the first element matching `selector`, if any.
    fn element_bounds(&self, selector: &str) -> Result<Option<Rectangle>>;

    /// PNG bytes of the full document.
    fn screenshot_png(&self) -> Result<Vec<u8>>;
}

#[derive(Clone, Copy)]
pub enum Driver<'a> {
    PhantomLike(&'a dyn ClipRenderer),
    SeleniumLike(&'a dyn ScreenshotSource),
}

impl Driver<'_> {
    /// Capture `target` to `out` and return the capture origin.
    pub fn render(&self, target: Option<&str>, out: &Path) -> Result<Rectangle> {
        ensure_parent_dir(out)?;
        let bounds = match self {
            Driver::PhantomLike(backend) => backend.render_target(target, out)?,
            Driver::SeleniumLike(backend) => render_from_screenshot(*backend, target, out)?,
        };
        debug!(
            driver = self.kind(),
            selector = target.unwrap_or("<document>"),
            out = %out.display(),
            ?bounds,
            "captured"
        );
        Ok(bounds)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Driver::PhantomLike(_) => "phantom-like",
            Driver::SeleniumLike(_) => "selenium-like",
        }
    }
}

impl SelectorResolver for Driver<'_> {
    fn resolve_selector(&self, selector: &str) -> Result<Vec<Rectangle>> {
        match self {
            Driver::PhantomLike(backend) => backend.resolve_selector(selector),
            Driver::SeleniumLike(backend) => backend.resolve_selector(selector),
        }
    }
}

fn render_from_screenshot(
    backend: &dyn ScreenshotSource,
    target: Option<&str>,
    out: &Path,
) -> Result<Rectangle> {
    let bytes = backend.screenshot_png()?;
    let full = image::load_from_memory(&bytes)
        .map_err(|err| Error::Capture(format!("screenshot is not a decodable image: {err}")))?
        .to_rgba8();
    let (width, height) = full.dimensions();

    let (image, origin) = match target {
        None => (full, Rectangle::new(0, 0, width, height)),
        Some(selector) => {
            let bounds = backend
                .element_bounds(selector)?
                .ok_or_else(|| Error::Capture(format!("no element matches target {selector:?}")))?;
            let (x, y, w, h) = bounds.clip(width, height).ok_or_else(|| {
                Error::Capture(format!(
                    "target {selector:?} at {bounds} lies outside the {width}x{height} screenshot"
                ))
            })?;
            // The origin is what was cropped, not the element's own box.
            let origin = Rectangle::new(x as i32, y as i32, w, h);
            (imageops::crop_imm(&full, x, y, w, h).to_image(), origin)
        }
    };

    save_png(&image, out)?;
    Ok(origin)
}

fn save_png(image: &RgbaImage, out: &Path) -> Result<()> {
    image
        .save_with_format(out, image::ImageFormat::Png)
        .map_err(|err| Error::Capture(format!("failed to save {}: {err}", out.display())))
}

/// Serves a full-document screenshot from a file on disk, re-read on every
/// capture, with element bounds registered up front.
#[derive(Debug, Clone, Default)]
pub struct ImageFileDriver {
    screenshot: PathBuf,
    elements: BTreeMap<String, Vec<Rectangle>>,
}

impl ImageFileDriver {
    pub fn new(screenshot: impl Into<PathBuf>) -> Self {
        Self {
            screenshot: screenshot.into(),
            elements: BTreeMap::new(),
        }
    }

    pub fn with_element(mut self, selector: impl Into<String>, bounds: Rectangle) -> Self {
        self.elements.entry(selector.into()).or_default().push(bounds);
        self
    }
}

impl SelectorResolver for ImageFileDriver {
    fn resolve_selector(&self, selector: &str) -> Result<Vec<Rectangle>> {
        Ok(self.elements.get(selector).cloned().unwrap_or_default())
    }
}

impl ScreenshotSource for ImageFileDriver {
    fn element_bounds(&self, selector: &str) -> Result<Option<Rectangle>> {
        Ok(self.elements.get(selector).and_then(|all| all.first().copied()))
    }

    fn screenshot_png(&self) -> Result<Vec<u8>> {
        fs::read(&self.screenshot).map_err(|err| {
            Error::Capture(format!("cannot read screenshot {}: {err}", self.screenshot.display()))
        })
    }
}

#[derive(Debug, Deserialize)]
struct ReportedBounds {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Runs an external capture command once per capture.
///
/// Each argument is passed through as its own argv entry after substituting
/// `{out}` (output path) and `{target}` (selector, empty for the document).
/// No shell is involved. When the command prints `{"x":..,"y":..,"width":..,
/// "height":..}` on stdout that becomes the capture origin; otherwise the
/// origin is `(0, 0)` at the rendered image's size.
#[derive(Debug, Clone)]
pub struct CommandDriver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandDriver {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(60),
        }
    }

    /// Split `argv[0]` from the rest.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Configuration("capture command is empty".to_string()))?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn expand(&self, target: Option<&str>, out: &Path) -> Vec<String> {
        let out = out.display().to_string();
        let target = target.unwrap_or("");
        self.args
            .iter()
            .map(|arg| arg.replace("{out}", &out).replace("{target}", target))
            .collect()
    }
}

impl SelectorResolver for CommandDriver {
    fn resolve_selector(&self, selector: &str) -> Result<Vec<Rectangle>> {
        Err(Error::Configuration(format!(
            "capture command {} cannot resolve selector {selector:?}; use rectangles",
            self.program
        )))
    }
}

impl ClipRenderer for CommandDriver {
    fn render_target(&self, target: Option<&str>, out: &Path) -> Result<Rectangle> {
        let mut child = Command::new(&self.program)
            .args(self.expand(target, out))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Error::Capture(format!("cannot run {}: {err}", self.program)))?;

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Capture(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                )));
            }
        };

        let mut stdout = String::new();
        if let Some(mut pipe) = child.stdout.take() {
            pipe.read_to_string(&mut stdout)?;
        }
        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            pipe.read_to_string(&mut stderr)?;
        }

        if !status.success() {
            return Err(Error::Capture(format!(
                "{} exited with {}: {}",
                self.program,
                status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        if !out.exists() {
            return Err(Error::Capture(format!(
                "{} did not write {}",
                self.program,
                out.display()
            )));
        }

        if let Ok(bounds) = serde_json::from_str::<ReportedBounds>(stdout.trim()) {
            return Ok(Rectangle::from_f64(bounds.x, bounds.y, bounds.width, bounds.height));
        }
        let (width, height) = image::image_dimensions(out)
            .map_err(|err| Error::image_read(out, err.to_string()))?;
        Ok(Rectangle::new(0, 0, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::tempdir;

    #[test]
    fn selenium_like_crops_target_and_reports_bounds() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("page.png");
        let mut full = RgbaImage::from_pixel(40, 30, Rgba([255, 255, 255, 255]));
        for y in 10..20 {
            for x in 5..15 {
                full.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        full.save(&page).unwrap();

        let backend = ImageFileDriver::new(&page).with_element("#box", Rectangle::new(5, 10, 10, 10));
        let driver = Driver::SeleniumLike(&backend);

        let out = dir.path().join("shots").join("box.png");
        let bounds = driver.render(Some("#box"), &out).unwrap();
        assert_eq!(bounds, Rectangle::new(5, 10, 10, 10));
        let shot = image::open(&out).unwrap().to_rgba8();
        assert_eq!(shot.dimensions(), (10, 10));
        assert!(shot.pixels().all(|p| *p == Rgba([0, 0, 0, 255])));

        let doc = dir.path().join("doc.png");
        assert_eq!(driver.render(None, &doc).unwrap(), Rectangle::new(0, 0, 40, 30));

        let err = driver.render(Some("#missing"), &out).unwrap_err();
        assert!(matches!(err, Error::Capture(_)));
    }

    #[test]
    fn element_hanging_off_the_page_reports_the_cropped_origin() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("page.png");
        RgbaImage::from_pixel(50, 50, Rgba([255, 255, 255, 255])).save(&page).unwrap();

        let backend = ImageFileDriver::new(&page).with_element("#panel", Rectangle::new(-10, -10, 30, 30));
        let out = dir.path().join("panel.png");
        let origin = Driver::SeleniumLike(&backend).render(Some("#panel"), &out).unwrap();
        assert_eq!(origin, Rectangle::new(0, 0, 20, 20));
        assert_eq!(image::open(&out).unwrap().to_rgba8().dimensions(), (20, 20));
    }

    #[test]
    fn command_driver_substitutes_arguments_without_a_shell() {
        let driver = CommandDriver::new(
            "capture",
            vec!["--out={out}".to_string(), "{target}".to_string(), "a b; rm -rf /".to_string()],
        );
        let args = driver.expand(Some("#main"), Path::new("/tmp/x.png"));
        assert_eq!(args, vec!["--out=/tmp/x.png", "#main", "a b; rm -rf /"]);
        assert_eq!(driver.expand(None, Path::new("o.png"))[1], "");
    }

    #[cfg(unix)]
    #[test]
    fn command_driver_copies_rendered_file_and_reports_origin() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.png");
        RgbaImage::from_pixel(7, 3, Rgba([9, 9, 9, 255])).save(&source).unwrap();

        let backend = CommandDriver::new("cp", vec![source.display().to_string(), "{out}".to_string()]);
        let driver = Driver::PhantomLike(&backend);
        let out = dir.path().join("out.png");
        assert_eq!(driver.render(None, &out).unwrap(), Rectangle::new(0, 0, 7, 3));

        let failing = CommandDriver::new("false", vec![]);
        let err = Driver::PhantomLike(&failing).render(None, &out).unwrap_err();
        assert!(matches!(err, Error::Capture(_)));
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(matches!(CommandDriver::from_argv(&[]), Err(Error::Configuration(_))));
    }
}
