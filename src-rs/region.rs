//! Skip and include-only regions.
//!
//! Regions are declared as literal rectangles (capture coordinates) or as
//! selectors that the capture driver resolves against the live page (page
//! coordinates). Include-only regions narrow the comparison domain first and
//! skip regions then punch holes in what remains, so every include-only
//! declaration has to come before the first skip declaration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Axis-aligned pixel rectangle. Origin may be negative after translating
/// page coordinates into capture coordinates; extents never are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rectangle {
    pub const fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Build from fractional browser geometry, growing outward to whole pixels.
    pub fn from_f64(x: f64, y: f64, w: f64, h: f64) -> Self {
        let x0 = x.floor();
        let y0 = y.floor();
        let x1 = (x + w.max(0.0)).ceil();
        let y1 = (y + h.max(0.0)).ceil();
        Self {
            x: x0 as i32,
            y: y0 as i32,
            w: (x1 - x0).max(0.0) as u32,
            h: (y1 - y0).max(0.0) as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Shift by the negated origin of another rectangle.
    pub fn relative_to(&self, origin: &Rectangle) -> Self {
        Self {
            x: self.x.saturating_sub(origin.x),
            y: self.y.saturating_sub(origin.y),
            w: self.w,
            h: self.h,
        }
    }

    /// Intersection with a `width` x `height` canvas anchored at the origin,
    /// as `(x, y, w, h)` in unsigned pixels. `None` when nothing overlaps.
    pub fn clip(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if self.is_empty() {
            return None;
        }
        let x0 = i64::from(self.x).max(0);
        let y0 = i64::from(self.y).max(0);
        let x1 = (i64::from(self.x) + i64::from(self.w)).min(i64::from(width));
        let y1 = (i64::from(self.y) + i64::from(self.h)).min(i64::from(height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.w, self.h)
    }
}

impl FromStr for Rectangle {
    type Err = Error;

    /// Parses `x,y,w,h`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(Error::Configuration(format!(
                "rectangle must be x,y,w,h: {s:?}"
            )));
        }
        let bad = |field: &str| Error::Configuration(format!("invalid {field} in rectangle {s:?}"));
        Ok(Rectangle {
            x: parts[0].parse().map_err(|_| bad("x"))?,
            y: parts[1].parse().map_err(|_| bad("y"))?,
            w: parts[2].parse().map_err(|_| bad("w"))?,
            h: parts[3].parse().map_err(|_| bad("h"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionSpec {
    Rect(Rectangle),
    Selector(String),
}

/// Resolves selectors to element bounds in page coordinates.
pub trait SelectorResolver {
    fn resolve_selector(&self, selector: &str) -> Result<Vec<Rectangle>>;
}

/// Ordered region declarations for one comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Regions {
    include_only: Vec<RegionSpec>,
    skip: Vec<RegionSpec>,
}

impl Regions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_include_only_rect(&mut self, x: i32, y: i32, w: u32, h: u32) -> Result<&mut Self> {
        self.push_include_only(RegionSpec::Rect(Rectangle::new(x, y, w, h)))
    }

    pub fn add_include_only_selector(&mut self, selector: impl Into<String>) -> Result<&mut Self> {
        self.push_include_only(RegionSpec::Selector(selector.into()))
    }

    pub fn add_skip_rect(&mut self, x: i32, y: i32, w: u32, h: u32) -> &mut Self {
        self.skip.push(RegionSpec::Rect(Rectangle::new(x, y, w, h)));
        self
    }

    pub fn add_skip_selector(&mut self, selector: impl Into<String>) -> &mut Self {
        self.skip.push(RegionSpec::Selector(selector.into()));
        self
    }

    fn push_include_only(&mut self, spec: RegionSpec) -> Result<&mut Self> {
        if !self.skip.is_empty() {
            return Err(Error::Configuration(
                "include-only must precede censoring".to_string(),
            ));
        }
        self.include_only.push(spec);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.include_only.is_empty() && self.skip.is_empty()
    }

    pub fn has_selectors(&self) -> bool {
        self.include_only
            .iter()
            .chain(self.skip.iter())
            .any(|spec| matches!(spec, RegionSpec::Selector(_)))
    }

    /// Flatten declarations into rectangles in capture coordinates.
    ///
    /// Literal rectangles are taken as-is. Selector matches come back in page
    /// coordinates and are shifted by `capture_origin`.
    pub fn resolve(
        &self,
        resolver: Option<&dyn SelectorResolver>,
        capture_origin: &Rectangle,
    ) -> Result<ResolvedRegions> {
        Ok(ResolvedRegions {
            include_only: resolve_specs(&self.include_only, resolver, capture_origin)?,
            skip: resolve_specs(&self.skip, resolver, capture_origin)?,
        })
    }
}

fn resolve_specs(
    specs: &[RegionSpec],
    resolver: Option<&dyn SelectorResolver>,
    capture_origin: &Rectangle,
) -> Result<Vec<Rectangle>> {
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec {
            RegionSpec::Rect(rect) => out.push(*rect),
            RegionSpec::Selector(selector) => {
                let resolver = resolver.ok_or_else(|| {
                    Error::Configuration(format!(
                        "selector {selector:?} needs a driver that can resolve selectors"
                    ))
                })?;
                out.extend(
                    resolver
                        .resolve_selector(selector)?
                        .iter()
                        .map(|rect| rect.relative_to(capture_origin)),
                );
            }
        }
    }
    Ok(out)
}

/// Concrete rectangles ready for the masking engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRegions {
    pub include_only: Vec<Rectangle>,
    pub skip: Vec<Rectangle>,
}

impl ResolvedRegions {
    pub fn is_empty(&self) -> bool {
        self.include_only.is_empty() && self.skip.is_empty()
    }
}
