//! Apply include-only and skip regions to a normalized pair.
//!
//! Include-only runs first: a fresh [`SENTINEL`] canvas receives a copy of each
//! include-only rectangle from the source, in declaration order. Skip regions
//! are then painted solid over whatever the working image is. Both images of a
//! pair always receive the same rectangles.

use crate::normalize::NormalizedPair;
use crate::region::{Rectangle, ResolvedRegions};
use crate::SENTINEL;
use image::{imageops, GenericImageView, RgbaImage};

/// Mask both images of `pair` in place. The pair holds decoded copies, so the
/// files on disk are never touched.
pub fn apply_regions(pair: &mut NormalizedPair, regions: &ResolvedRegions) {
    if regions.is_empty() {
        return;
    }
    for image in [&mut pair.first, &mut pair.second] {
        mask_image(image, regions);
    }
}

pub fn mask_image(image: &mut RgbaImage, regions: &ResolvedRegions) {
    if !regions.include_only.is_empty() {
        *image = include_only(image, &regions.include_only);
    }
    if !regions.skip.is_empty() {
        paint_over(image, &regions.skip);
    }
}

fn include_only(source: &RgbaImage, boxes: &[Rectangle]) -> RgbaImage {
    let (width, height) = source.dimensions();
    let mut canvas = RgbaImage::from_pixel(width, height, SENTINEL);
    for rect in boxes {
        let Some((x, y, w, h)) = rect.clip(width, height) else {
            continue;
        };
        let piece = source.view(x, y, w, h).to_image();
        imageops::replace(&mut canvas, &piece, i64::from(x), i64::from(y));
    }
    canvas
}

fn paint_over(image: &mut RgbaImage, boxes: &[Rectangle]) {
    let (width, height) = image.dimensions();
    for rect in boxes {
        let Some((x0, y0, w, h)) = rect.clip(width, height) else {
            continue;
        };
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                image.put_pixel(x, y, SENTINEL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_pair;
    use image::Rgba;

    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 200, 0, 255]);

    fn regions(include_only: Vec<Rectangle>, skip: Vec<Rectangle>) -> ResolvedRegions {
        ResolvedRegions { include_only, skip }
    }

    #[test]
    fn include_only_keeps_only_declared_boxes() {
        let mut img = RgbaImage::from_pixel(10, 10, BLUE);
        mask_image(
            &mut img,
            &regions(
                vec![Rectangle::new(0, 0, 2, 2), Rectangle::new(1, 1, 3, 3)],
                vec![],
            ),
        );
        assert_eq!(*img.get_pixel(0, 0), BLUE);
        assert_eq!(*img.get_pixel(3, 3), BLUE);
        assert_eq!(*img.get_pixel(4, 4), SENTINEL);
        assert_eq!(*img.get_pixel(9, 0), SENTINEL);
    }

    #[test]
    fn skip_paints_after_include_only() {
        let mut img = RgbaImage::from_pixel(8, 8, GREEN);
        mask_image(
            &mut img,
            &regions(vec![Rectangle::new(0, 0, 4, 4)], vec![Rectangle::new(1, 1, 1, 1)]),
        );
        assert_eq!(*img.get_pixel(0, 0), GREEN);
        assert_eq!(*img.get_pixel(1, 1), SENTINEL);
        assert_eq!(*img.get_pixel(5, 5), SENTINEL);
    }

    #[test]
    fn rectangles_outside_the_image_change_nothing() {
        let original = RgbaImage::from_pixel(5, 5, GREEN);
        let mut img = original.clone();
        mask_image(
            &mut img,
            &regions(vec![], vec![Rectangle::new(5, 0, 3, 3), Rectangle::new(-4, -4, 4, 4)]),
        );
        assert_eq!(img, original);
    }

    #[test]
    fn both_sides_receive_the_same_mask() {
        let a = RgbaImage::from_pixel(4, 4, BLUE);
        let b = RgbaImage::from_pixel(4, 4, GREEN);
        let mut pair = normalize_pair(a, b);
        apply_regions(&mut pair, &regions(vec![], vec![Rectangle::new(0, 0, 4, 4)]));
        assert_eq!(pair.first, pair.second);
    }
}
