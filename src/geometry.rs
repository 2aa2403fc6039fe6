//! 5-axis coordinate and dimension model.
//!
//! Pixels are laid out row-major with X fastest, then Y, Z, Channel, Time.
//! Region selectors map deterministically onto a contiguous
//! (offset, pixel count) span, except [`Region::Box`], whose byte extraction
//! is the storage engine's contract; this module only validates its bounds.

use crate::error::{PixError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Extents of a pixel set along the five axes. Fixed at creation,
/// immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelShape {
    pub dx: u32,
    pub dy: u32,
    pub dz: u32,
    pub dc: u32,
    pub dt: u32,
}

impl PixelShape {
    pub fn new(dx: u32, dy: u32, dz: u32, dc: u32, dt: u32) -> Self {
        Self { dx, dy, dz, dc, dt }
    }

    /// Pixel count of the whole set.
    pub fn total_pixels(&self) -> u64 {
        self.dx as u64 * self.dy as u64 * self.dz as u64 * self.dc as u64 * self.dt as u64
    }

    /// Pixel count of one stack (full Z extent at fixed channel/time).
    pub fn stack_pixels(&self) -> u64 {
        self.dx as u64 * self.dy as u64 * self.dz as u64
    }

    /// Pixel count of one plane.
    pub fn plane_pixels(&self) -> u64 {
        self.dx as u64 * self.dy as u64
    }

    /// Number of planes in the set.
    pub fn plane_count(&self) -> u64 {
        self.dz as u64 * self.dc as u64 * self.dt as u64
    }

    /// Number of stacks in the set.
    pub fn stack_count(&self) -> u64 {
        self.dc as u64 * self.dt as u64
    }

    /// Pixel-unit offset of a coordinate, X fastest.
    pub fn offset(&self, x: u32, y: u32, z: u32, c: u32, t: u32) -> u64 {
        x as u64
            + self.dx as u64
                * (y as u64
                    + self.dy as u64
                        * (z as u64 + self.dz as u64 * (c as u64 + self.dc as u64 * t as u64)))
    }

    fn ranges(&self) -> String {
        format!(
            "(0..{},0..{},0..{},0..{},0..{})",
            self.dx - 1,
            self.dy - 1,
            self.dz - 1,
            self.dc - 1,
            self.dt - 1
        )
    }

    /// Check every constrained axis of `coord` against this shape.
    ///
    /// A violation reports the offending tuple and the valid ranges; values
    /// are never clamped. Unconstrained (-1) axes are skipped.
    pub fn check_coord(&self, coord: &Coord) -> Result<()> {
        let axes = [
            (coord.x, self.dx),
            (coord.y, self.dy),
            (coord.z, self.dz),
            (coord.c, self.dc),
            (coord.t, self.dt),
        ];
        for (value, extent) in axes {
            if value == Coord::UNSET {
                continue;
            }
            if value < 0 || value >= extent as i64 {
                return Err(PixError::OutOfRange(format!(
                    "coordinates (x,y,z,c,t)={} must be in range {}",
                    coord,
                    self.ranges()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for PixelShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.dx, self.dy, self.dz, self.dc, self.dt
        )
    }
}

/// A 5-axis coordinate. -1 means "unconstrained by this operation";
/// any other value must satisfy `0 <= v < extent` for its axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coord {
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub c: i64,
    pub t: i64,
}

impl Coord {
    /// Sentinel for an unconstrained axis.
    pub const UNSET: i64 = -1;

    pub fn new(x: i64, y: i64, z: i64, c: i64, t: i64) -> Self {
        Self { x, y, z, c, t }
    }

    /// A fully unconstrained coordinate.
    pub fn unset() -> Self {
        Self::new(
            Self::UNSET,
            Self::UNSET,
            Self::UNSET,
            Self::UNSET,
            Self::UNSET,
        )
    }

    /// True when every axis is constrained.
    pub fn is_complete(&self) -> bool {
        self.x >= 0 && self.y >= 0 && self.z >= 0 && self.c >= 0 && self.t >= 0
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{},{},{})",
            self.x, self.y, self.z, self.c, self.t
        )
    }
}

/// A contiguous run of pixels: start offset and count, both in pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSpan {
    pub offset: u64,
    pub count: u64,
}

/// Sub-region selector for pixel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// The entire pixel set.
    WholeSet,
    /// Full Z extent at fixed channel/time.
    Stack { c: i64, t: i64 },
    /// A single 2-D slice.
    Plane { z: i64, c: i64, t: i64 },
    /// `rows` consecutive rows starting at Y within one plane.
    RowRange {
        y: i64,
        z: i64,
        c: i64,
        t: i64,
        rows: i64,
    },
    /// Axis-aligned box bounded by two coordinate tuples; byte extraction is
    /// delegated to the storage engine.
    Box { lo: Coord, hi: Coord },
}

impl Region {
    /// Resolve the selector to a contiguous (offset, count) span.
    ///
    /// Fails when required coordinates are unconstrained, out of range, or
    /// (for row ranges) when the range runs past the Y extent. `Box` has no
    /// contiguous span; it is bounds-checked only and yields `None`.
    pub fn span(&self, shape: &PixelShape) -> Result<Option<PixelSpan>> {
        match *self {
            Region::WholeSet => Ok(Some(PixelSpan {
                offset: 0,
                count: shape.total_pixels(),
            })),
            Region::Stack { c, t } => {
                if c < 0 || t < 0 {
                    return Err(PixError::Malformed(
                        "Parameters theC and theT must be specified to do operations on stacks"
                            .to_string(),
                    ));
                }
                let coord = Coord::new(Coord::UNSET, Coord::UNSET, Coord::UNSET, c, t);
                shape.check_coord(&coord)?;
                Ok(Some(PixelSpan {
                    offset: shape.offset(0, 0, 0, c as u32, t as u32),
                    count: shape.stack_pixels(),
                }))
            }
            Region::Plane { z, c, t } => {
                if z < 0 || c < 0 || t < 0 {
                    return Err(PixError::Malformed(
                        "Parameters theZ, theC and theT must be specified to do operations on planes"
                            .to_string(),
                    ));
                }
                let coord = Coord::new(Coord::UNSET, Coord::UNSET, z, c, t);
                shape.check_coord(&coord)?;
                Ok(Some(PixelSpan {
                    offset: shape.offset(0, 0, z as u32, c as u32, t as u32),
                    count: shape.plane_pixels(),
                }))
            }
            Region::RowRange { y, z, c, t, rows } => {
                if y < 0 || z < 0 || c < 0 || t < 0 {
                    return Err(PixError::Malformed(
                        "Parameters theY, theZ, theC and theT must be specified to do operations on rows"
                            .to_string(),
                    ));
                }
                if rows < 1 {
                    return Err(PixError::Malformed(format!(
                        "nRows must be positive, not {}",
                        rows
                    )));
                }
                let coord = Coord::new(Coord::UNSET, y, z, c, t);
                shape.check_coord(&coord)?;
                if y + rows - 1 >= shape.dy as i64 {
                    return Err(PixError::OutOfRange(format!(
                        "theY + nRows ({} + {} = {}) must not exceed dY ({})",
                        y,
                        rows,
                        y + rows,
                        shape.dy
                    )));
                }
                Ok(Some(PixelSpan {
                    offset: shape.offset(0, y as u32, z as u32, c as u32, t as u32),
                    count: shape.dx as u64 * rows as u64,
                }))
            }
            Region::Box { lo, hi } => {
                for corner in [&lo, &hi] {
                    if !corner.is_complete() {
                        return Err(PixError::Malformed(
                            "ROI corners must constrain all five axes".to_string(),
                        ));
                    }
                    shape.check_coord(corner)?;
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn shape() -> PixelShape {
        PixelShape::new(10, 20, 3, 2, 4)
    }

    #[test]
    fn test_offset_row_major() {
        let s = shape();
        assert_eq!(s.offset(0, 0, 0, 0, 0), 0);
        assert_eq!(s.offset(1, 0, 0, 0, 0), 1);
        assert_eq!(s.offset(0, 1, 0, 0, 0), 10);
        assert_eq!(s.offset(0, 0, 1, 0, 0), 200);
        assert_eq!(s.offset(0, 0, 0, 1, 0), 600);
        assert_eq!(s.offset(0, 0, 0, 0, 1), 1200);
        assert_eq!(s.offset(9, 19, 2, 1, 3), s.total_pixels() - 1);
    }

    #[test]
    fn test_offset_injective() {
        // exhaustive over a small shape
        let s = PixelShape::new(3, 4, 2, 2, 3);
        let mut seen = HashSet::new();
        for t in 0..s.dt {
            for c in 0..s.dc {
                for z in 0..s.dz {
                    for y in 0..s.dy {
                        for x in 0..s.dx {
                            assert!(seen.insert(s.offset(x, y, z, c, t)));
                        }
                    }
                }
            }
        }
        assert_eq!(seen.len() as u64, s.total_pixels());
    }

    #[test]
    fn test_selector_counts() {
        let s = shape();
        let whole = Region::WholeSet.span(&s).unwrap().unwrap();
        assert_eq!(whole.count, 10 * 20 * 3 * 2 * 4);
        let stack = Region::Stack { c: 1, t: 2 }.span(&s).unwrap().unwrap();
        assert_eq!(stack.count, 10 * 20 * 3);
        assert_eq!(stack.offset, s.offset(0, 0, 0, 1, 2));
        let plane = Region::Plane { z: 2, c: 0, t: 3 }.span(&s).unwrap().unwrap();
        assert_eq!(plane.count, 10 * 20);
        let rows = Region::RowRange {
            y: 4,
            z: 0,
            c: 0,
            t: 0,
            rows: 5,
        }
        .span(&s)
        .unwrap()
        .unwrap();
        assert_eq!(rows.count, 10 * 5);
        assert_eq!(rows.offset, s.offset(0, 4, 0, 0, 0));
    }

    #[test]
    fn test_bounds_reported_never_clamped() {
        let s = shape();
        let err = s
            .check_coord(&Coord::new(10, 0, 0, 0, 0))
            .unwrap_err()
            .to_string();
        assert!(err.contains("0..9"), "range missing from: {err}");
        assert!(err.contains("(10,0,0,0,0)"));
        assert!(s.check_coord(&Coord::new(9, 0, 0, 0, 0)).is_ok());
        // -1 skips the check entirely
        assert!(s.check_coord(&Coord::new(-1, -1, -1, -1, -1)).is_ok());
    }

    #[test]
    fn test_row_range_past_extent() {
        let s = shape();
        let region = Region::RowRange {
            y: 18,
            z: 0,
            c: 0,
            t: 0,
            rows: 3,
        };
        assert!(region.span(&s).is_err());
        let region = Region::RowRange {
            y: 18,
            z: 0,
            c: 0,
            t: 0,
            rows: 2,
        };
        assert!(region.span(&s).is_ok());
    }

    #[test]
    fn test_stack_requires_coordinates() {
        let s = shape();
        assert!(Region::Stack { c: -1, t: 0 }.span(&s).is_err());
        assert!(Region::Plane { z: 0, c: 0, t: -1 }.span(&s).is_err());
    }

    #[test]
    fn test_box_bounds_only() {
        let s = shape();
        let ok = Region::Box {
            lo: Coord::new(0, 0, 0, 0, 0),
            hi: Coord::new(9, 19, 2, 1, 3),
        };
        assert_eq!(ok.span(&s).unwrap(), None);
        let bad = Region::Box {
            lo: Coord::new(0, 0, 0, 0, 0),
            hi: Coord::new(10, 19, 2, 1, 3),
        };
        assert!(bad.span(&s).is_err());
        let incomplete = Region::Box {
            lo: Coord::new(0, 0, 0, 0, -1),
            hi: Coord::new(9, 19, 2, 1, 3),
        };
        assert!(incomplete.span(&s).is_err());
    }
}
