//! Bring two screenshots onto a common canvas.

use crate::{Error, Result, SENTINEL};
use image::{imageops, RgbaImage};
use std::path::Path;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn of(image: &RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    fn covering(a: Canvas, b: Canvas) -> Self {
        Self {
            width: a.width.max(b.width),
            height: a.height.max(b.height),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedPair {
    pub first: RgbaImage,
    pub second: RgbaImage,
    pub canvas: Canvas,
    /// False when both inputs already shared dimensions.
    pub padded: bool,
}

/// Decode an image file, rejecting missing, corrupt and zero-sized inputs.
pub fn load_image(path: &Path) -> Result<RgbaImage> {
    if !path.exists() {
        return Err(Error::image_read(path, "file does not exist"));
    }
    let decoded = image::open(path).map_err(|err| Error::image_read(path, err.to_string()))?;
    let rgba = decoded.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(Error::image_read(path, "image has zero width or height"));
    }
    Ok(rgba)
}

pub fn normalize_files(first: &Path, second: &Path) -> Result<NormalizedPair> {
    let a = load_image(first)?;
    let b = load_image(second)?;
    Ok(normalize_pair(a, b))
}

/// Center both images on a `max(w) x max(h)` canvas padded with [`SENTINEL`].
///
/// Images that already agree in size are returned untouched.
pub fn normalize_pair(first: RgbaImage, second: RgbaImage) -> NormalizedPair {
    let canvas = Canvas::covering(Canvas::of(&first), Canvas::of(&second));
    if first.dimensions() == second.dimensions() {
        return NormalizedPair {
            first,
            second,
            canvas,
            padded: false,
        };
    }

    let (first, second) = thread::scope(|scope| {
        let worker = scope.spawn(|| pad_to(&second, canvas));
        let padded_first = pad_to(&first, canvas);
        let padded_second = match worker.join() {
            Ok(img) => img,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        (padded_first, padded_second)
    });

    NormalizedPair {
        first,
        second,
        canvas,
        padded: true,
    }
}

fn pad_to(image: &RgbaImage, canvas: Canvas) -> RgbaImage {
    if Canvas::of(image) == canvas {
        return image.clone();
    }
    let mut out = RgbaImage::from_pixel(canvas.width, canvas.height, SENTINEL);
    let x = (canvas.width - image.width()) / 2;
    let y = (canvas.height - image.height()) / 2;
    imageops::replace(&mut out, image, i64::from(x), i64::from(y));
    out
}
