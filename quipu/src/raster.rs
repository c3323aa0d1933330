//! Dense row-major sample grids with a no-data sentinel.
//!
//! A sample equal to the sentinel (`+inf`) marks "no data". Every operation
//! in this module propagates it: resampling never blends through a hole,
//! cropping and padding carry it along, and only the `fill_missing*`
//! methods replace it.

use std::fmt;

use bytemuck::Pod;
use rayon::prelude::*;

use crate::error::{QuipuError, Result};

/// Width and height of a raster, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Resolution {
    pub width: usize,
    pub height: usize,
}

impl Resolution {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Same width and height.
    pub const fn square(size: usize) -> Self {
        Self::new(size, size)
    }

    pub const fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// `width × height`, or `None` when the product overflows `usize`.
    pub const fn checked_pixel_count(&self) -> Option<usize> {
        self.width.checked_mul(self.height)
    }

    /// True when either dimension is zero.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// `floor(W·s) × floor(H·s)`.
    pub fn scaled(&self, scale: f64) -> Self {
        Self::new(
            (self.width as f64 * scale).floor().max(0.0) as usize,
            (self.height as f64 * scale).floor().max(0.0) as usize,
        )
    }

    /// Both dimensions halved, rounding down.
    pub const fn halved(&self) -> Self {
        Self::new(self.width / 2, self.height / 2)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A rectangular region of interest: top-left corner and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Roi {
    pub const fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// True when the region lies entirely inside `resolution`.
    pub fn fits(&self, resolution: Resolution) -> bool {
        self.x
            .checked_add(self.width)
            .is_some_and(|right| right <= resolution.width)
            && self
                .y
                .checked_add(self.height)
                .is_some_and(|bottom| bottom <= resolution.height)
    }
}

/// Floating-point sample types that can live in a [`Raster`].
pub trait Sample: Pod + PartialOrd + fmt::Debug + Send + Sync + 'static {
    /// The no-data sentinel.
    const INVALID: Self;

    fn is_valid(self) -> bool;

    fn to_f64(self) -> f64;

    fn from_f64(value: f64) -> Self;
}

impl Sample for f32 {
    const INVALID: Self = f32::INFINITY;

    #[inline]
    fn is_valid(self) -> bool {
        self.is_finite()
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Sample for f64 {
    const INVALID: Self = f64::INFINITY;

    #[inline]
    fn is_valid(self) -> bool {
        self.is_finite()
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }
}

/// A dense row-major grid of samples with an optional per-pixel alpha.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster<T: Sample> {
    resolution: Resolution,
    data: Vec<T>,
    alpha: Option<Vec<f32>>,
}

impl<T: Sample> Default for Raster<T> {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            data: Vec::new(),
            alpha: None,
        }
    }
}

impl<T: Sample> Raster<T> {
    /// Wrap row-major samples.
    ///
    /// # Errors
    ///
    /// Returns [`QuipuError::DimensionMismatch`] if `data.len()` is not
    /// `width × height`.
    pub fn new(resolution: Resolution, data: Vec<T>) -> Result<Self> {
        if data.len() != resolution.pixel_count() {
            return Err(QuipuError::DimensionMismatch {
                expected: resolution.pixel_count(),
                found: data.len(),
            });
        }
        Ok(Self {
            resolution,
            data,
            alpha: None,
        })
    }

    /// A raster with every sample set to `value`.
    pub fn filled(resolution: Resolution, value: T) -> Self {
        Self {
            resolution,
            data: vec![value; resolution.pixel_count()],
            alpha: None,
        }
    }

    /// A raster with every sample invalid.
    pub fn new_blank(resolution: Resolution) -> Self {
        Self::filled(resolution, T::INVALID)
    }

    /// Build a raster by evaluating `f(x, y)` at every pixel.
    pub fn from_fn<F>(resolution: Resolution, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> T,
    {
        let mut data = Vec::with_capacity(resolution.pixel_count());
        for y in 0..resolution.height {
            for x in 0..resolution.width {
                data.push(f(x, y));
            }
        }
        Self {
            resolution,
            data,
            alpha: None,
        }
    }

    /// Attach a per-pixel alpha channel.
    pub fn with_alpha(mut self, alpha: Vec<f32>) -> Result<Self> {
        self.set_alpha(Some(alpha))?;
        Ok(self)
    }

    pub fn set_alpha(&mut self, alpha: Option<Vec<f32>>) -> Result<()> {
        if let Some(a) = &alpha {
            if a.len() != self.data.len() {
                return Err(QuipuError::DimensionMismatch {
                    expected: self.data.len(),
                    found: a.len(),
                });
            }
        }
        self.alpha = alpha;
        Ok(())
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn width(&self) -> usize {
        self.resolution.width
    }

    pub fn height(&self) -> usize {
        self.resolution.height
    }

    pub fn is_empty(&self) -> bool {
        self.resolution.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    pub fn alpha(&self) -> Option<&[f32]> {
        self.alpha.as_deref()
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        y * self.resolution.width + x
    }

    /// Sample at `(x, y)`, or `None` outside the grid.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<T> {
        if x < self.resolution.width && y < self.resolution.height {
            Some(self.data[self.index(x, y)])
        } else {
            None
        }
    }

    /// Sample at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside the grid.
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> T {
        self.data[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let i = self.index(x, y);
        self.data[i] = value;
    }

    /// Mark `(x, y)` as no data.
    #[inline]
    pub fn invalidate(&mut self, x: usize, y: usize) {
        self.set(x, y, T::INVALID);
    }

    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        self.get(x, y).is_some_and(Sample::is_valid)
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_valid()).count()
    }

    pub fn has_invalid(&self) -> bool {
        self.data.iter().any(|v| !v.is_valid())
    }

    /// True when no sample is valid (including the empty raster).
    pub fn is_fully_invalid(&self) -> bool {
        !self.data.iter().any(|v| v.is_valid())
    }

    /// Smallest and largest valid sample.
    pub fn minmax(&self) -> Option<(T, T)> {
        let mut valid = self.data.iter().copied().filter(|v| v.is_valid());
        let first = valid.next()?;
        Some(valid.fold((first, first), |(lo, hi), v| {
            (
                if v < lo { v } else { lo },
                if v > hi { v } else { hi },
            )
        }))
    }

    /// Multiply every valid sample by `factor`.
    pub fn scale_values(&mut self, factor: f64) {
        for v in self.data.iter_mut().filter(|v| v.is_valid()) {
            *v = T::from_f64(v.to_f64() * factor);
        }
    }

    /// Bilinear resample to `resolution`.
    ///
    /// New pixel `i` reads source coordinate `i · (W / W')`. A sample whose
    /// positively weighted neighbours include an invalid one is invalid.
    /// Alpha is resampled with the same weights.
    pub fn resize(&self, resolution: Resolution) -> Self {
        if resolution == self.resolution {
            return self.clone();
        }
        if self.resolution.is_empty() {
            return Self::new_blank(resolution);
        }

        let sx = self.resolution.width as f64 / resolution.width.max(1) as f64;
        let sy = self.resolution.height as f64 / resolution.height.max(1) as f64;
        let width = resolution.width;

        let mut data = vec![T::INVALID; resolution.pixel_count()];
        let mut alpha = self
            .alpha
            .as_ref()
            .map(|_| vec![0.0f32; resolution.pixel_count()]);

        let rows = data.par_chunks_mut(width.max(1));
        match alpha.as_mut() {
            Some(out_alpha) => rows
                .zip(out_alpha.par_chunks_mut(width.max(1)))
                .enumerate()
                .for_each(|(j, (row, alpha_row))| {
                    for (i, (v, a)) in row.iter_mut().zip(alpha_row.iter_mut()).enumerate() {
                        let taps = self.taps(i as f64 * sx, j as f64 * sy);
                        *v = self.blend(&taps);
                        *a = self.blend_alpha(&taps);
                    }
                }),
            None => rows.enumerate().for_each(|(j, row)| {
                for (i, v) in row.iter_mut().enumerate() {
                    let taps = self.taps(i as f64 * sx, j as f64 * sy);
                    *v = self.blend(&taps);
                }
            }),
        }

        Self {
            resolution,
            data,
            alpha,
        }
    }

    /// `resize(floor(W·s) × floor(H·s))`.
    pub fn resize_by(&self, scale: f64) -> Self {
        self.resize(self.resolution.scaled(scale))
    }

    /// The four bilinear taps at source coordinate `(x, y)`, as
    /// `(index, weight)` pairs.
    fn taps(&self, x: f64, y: f64) -> [(usize, f64); 4] {
        let max_x = self.resolution.width - 1;
        let max_y = self.resolution.height - 1;
        let x = x.clamp(0.0, max_x as f64);
        let y = y.clamp(0.0, max_y as f64);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(max_x);
        let y1 = (y0 + 1).min(max_y);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;
        [
            (self.index(x0, y0), (1.0 - fx) * (1.0 - fy)),
            (self.index(x1, y0), fx * (1.0 - fy)),
            (self.index(x0, y1), (1.0 - fx) * fy),
            (self.index(x1, y1), fx * fy),
        ]
    }

    fn blend(&self, taps: &[(usize, f64); 4]) -> T {
        let mut acc = 0.0;
        for &(i, w) in taps {
            if w <= 0.0 {
                continue;
            }
            let v = self.data[i];
            if !v.is_valid() {
                return T::INVALID;
            }
            acc += v.to_f64() * w;
        }
        T::from_f64(acc)
    }

    fn blend_alpha(&self, taps: &[(usize, f64); 4]) -> f32 {
        match &self.alpha {
            Some(alpha) => taps
                .iter()
                .filter(|(_, w)| *w > 0.0)
                .map(|&(i, w)| alpha[i] as f64 * w)
                .sum::<f64>() as f32,
            None => 1.0,
        }
    }

    /// Copy out a sub-rectangle (samples and alpha).
    ///
    /// # Errors
    ///
    /// Returns [`QuipuError::InvalidRegion`] if `roi` does not fit.
    pub fn crop(&self, roi: Roi) -> Result<Self> {
        if !roi.fits(self.resolution) {
            return Err(QuipuError::InvalidRegion {
                x: roi.x,
                y: roi.y,
                width: roi.width,
                height: roi.height,
                resolution: self.resolution,
            });
        }
        let width = self.resolution.width;
        Ok(Self {
            resolution: roi.resolution(),
            data: copy_region(&self.data, width, roi),
            alpha: self.alpha.as_ref().map(|a| copy_region(a, width, roi)),
        })
    }

    /// Grow by `count` columns on the right, replicating the last column.
    pub fn pad_right(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let Resolution { width, height } = self.resolution;
        let new_width = width + count;
        self.data = replicate_columns(&self.data, width, height, new_width, T::INVALID);
        if let Some(alpha) = &self.alpha {
            self.alpha = Some(replicate_columns(alpha, width, height, new_width, 1.0));
        }
        self.resolution.width = new_width;
    }

    /// Grow by `count` rows at the bottom, replicating the last row.
    pub fn pad_below(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let Resolution { width, height } = self.resolution;
        replicate_rows(&mut self.data, width, height, count, T::INVALID);
        if let Some(alpha) = &mut self.alpha {
            replicate_rows(alpha, width, height, count, 1.0);
        }
        self.resolution.height += count;
    }

    /// Join `other` to the right of this raster.
    ///
    /// # Errors
    ///
    /// Returns [`QuipuError::IncompatibleAppend`] if the heights differ.
    pub fn append_right(&mut self, other: &Self) -> Result<()> {
        if other.height() != self.height() {
            return Err(QuipuError::IncompatibleAppend {
                side: "right",
                expected: self.height(),
                found: other.height(),
            });
        }
        let (w1, w2, height) = (self.width(), other.width(), self.height());
        let mut data = Vec::with_capacity((w1 + w2) * height);
        for y in 0..height {
            data.extend_from_slice(&self.data[y * w1..(y + 1) * w1]);
            data.extend_from_slice(&other.data[y * w2..(y + 1) * w2]);
        }
        self.alpha = match (&self.alpha, &other.alpha) {
            (None, None) => None,
            (a, b) => {
                let left = a.clone().unwrap_or_else(|| vec![1.0; w1 * height]);
                let right = b.clone().unwrap_or_else(|| vec![1.0; w2 * height]);
                let mut out = Vec::with_capacity((w1 + w2) * height);
                for y in 0..height {
                    out.extend_from_slice(&left[y * w1..(y + 1) * w1]);
                    out.extend_from_slice(&right[y * w2..(y + 1) * w2]);
                }
                Some(out)
            }
        };
        self.data = data;
        self.resolution.width = w1 + w2;
        Ok(())
    }

    /// Join `other` below this raster.
    ///
    /// # Errors
    ///
    /// Returns [`QuipuError::IncompatibleAppend`] if the widths differ.
    pub fn append_below(&mut self, other: &Self) -> Result<()> {
        if other.width() != self.width() {
            return Err(QuipuError::IncompatibleAppend {
                side: "below",
                expected: self.width(),
                found: other.width(),
            });
        }
        let (n1, n2) = (self.data.len(), other.data.len());
        self.data.extend_from_slice(&other.data);
        self.alpha = match (self.alpha.take(), &other.alpha) {
            (None, None) => None,
            (a, b) => {
                let mut out = a.unwrap_or_else(|| vec![1.0; n1]);
                out.extend(b.clone().unwrap_or_else(|| vec![1.0; n2]));
                Some(out)
            }
        };
        self.resolution.height += other.height();
        Ok(())
    }

    /// Replace every invalid sample with `value`.
    pub fn fill_missing(&mut self, value: T) {
        for v in self.data.iter_mut().filter(|v| !v.is_valid()) {
            *v = value;
        }
    }

    /// Replace invalid samples with the nearest valid one.
    ///
    /// For each hole, square rings of radius 1 up to `min(W, H) / 2` are
    /// searched in row-major order and the first valid sample wins. Rounds
    /// read from a snapshot and repeat until one fills nothing, so applying
    /// this twice is the same as applying it once. Holes with no valid
    /// sample in reach stay invalid.
    ///
    /// Returns the number of samples filled.
    pub fn fill_missing_nearest(&mut self) -> usize {
        let Resolution { width, height } = self.resolution;
        let max_radius = width.min(height) / 2;
        if max_radius == 0 {
            return 0;
        }

        let mut total = 0;
        loop {
            let snapshot = self.data.clone();
            let filled: usize = self
                .data
                .par_chunks_mut(width)
                .enumerate()
                .map(|(y, row)| {
                    let mut count = 0;
                    for (x, v) in row.iter_mut().enumerate() {
                        if v.is_valid() {
                            continue;
                        }
                        if let Some(found) = ring_search(&snapshot, width, height, x, y, max_radius)
                        {
                            *v = found;
                            count += 1;
                        }
                    }
                    count
                })
                .sum();
            if filled == 0 {
                break;
            }
            total += filled;
        }
        total
    }
}

fn ring_search<T: Sample>(
    data: &[T],
    width: usize,
    height: usize,
    x: usize,
    y: usize,
    max_radius: usize,
) -> Option<T> {
    let (x, y) = (x as isize, y as isize);
    let (w, h) = (width as isize, height as isize);
    for r in 1..=max_radius as isize {
        for yy in (y - r).max(0)..=(y + r).min(h - 1) {
            let on_edge_row = (yy - y).abs() == r;
            for xx in (x - r).max(0)..=(x + r).min(w - 1) {
                if !on_edge_row && (xx - x).abs() != r {
                    continue;
                }
                let v = data[(yy * w + xx) as usize];
                if v.is_valid() {
                    return Some(v);
                }
            }
        }
    }
    None
}

fn copy_region<V: Copy>(data: &[V], width: usize, roi: Roi) -> Vec<V> {
    let mut out = Vec::with_capacity(roi.width * roi.height);
    for y in roi.y..roi.y + roi.height {
        let start = y * width + roi.x;
        out.extend_from_slice(&data[start..start + roi.width]);
    }
    out
}

fn replicate_columns<V: Copy>(
    data: &[V],
    width: usize,
    height: usize,
    new_width: usize,
    empty: V,
) -> Vec<V> {
    let mut out = Vec::with_capacity(new_width * height);
    for y in 0..height {
        let row = &data[y * width..(y + 1) * width];
        out.extend_from_slice(row);
        let edge = row.last().copied().unwrap_or(empty);
        out.extend(std::iter::repeat(edge).take(new_width - width));
    }
    out
}

fn replicate_rows<V: Copy>(data: &mut Vec<V>, width: usize, height: usize, count: usize, empty: V) {
    if height == 0 {
        data.extend(std::iter::repeat(empty).take(width * count));
        return;
    }
    let last = data[(height - 1) * width..height * width].to_vec();
    for _ in 0..count {
        data.extend_from_slice(&last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(width: usize, height: usize) -> Raster<f32> {
        Raster::from_fn(Resolution::new(width, height), |x, y| (y * width + x) as f32)
    }

    #[test]
    fn test_resolution() {
        let r = Resolution::new(1024, 512);
        assert_eq!(r.to_string(), "1024x512");
        assert_eq!(r.pixel_count(), 524_288);
        assert_eq!(r.halved(), Resolution::new(512, 256));
        assert_eq!(r.scaled(0.3), Resolution::new(307, 153));
        assert!(Resolution::new(0, 4).is_empty());
        assert_eq!(r.checked_pixel_count(), Some(524_288));
        assert_eq!(Resolution::new(usize::MAX, 2).checked_pixel_count(), None);
    }

    #[test]
    fn test_new_checks_length() {
        let err = Raster::<f32>::new(Resolution::new(2, 2), vec![0.0; 3]).unwrap_err();
        assert!(matches!(
            err,
            QuipuError::DimensionMismatch {
                expected: 4,
                found: 3
            }
        ));
    }

    #[test]
    fn test_minmax_ignores_invalid() {
        let mut r = ramp(4, 4);
        r.invalidate(3, 3);
        r.invalidate(0, 0);
        assert_eq!(r.minmax(), Some((1.0, 14.0)));
        assert_eq!(r.valid_count(), 14);
        assert_eq!(Raster::<f32>::new_blank(Resolution::new(3, 3)).minmax(), None);
    }

    #[test]
    fn test_resize_halving_decimates() {
        let r = ramp(8, 8);
        let half = r.resize(Resolution::new(4, 4));
        assert_eq!(half.resolution(), Resolution::new(4, 4));
        // Source coordinate 2i lands on a sample centre exactly.
        assert_eq!(half.at(1, 1), r.at(2, 2));
        assert_eq!(half.at(3, 2), r.at(6, 4));
    }

    #[test]
    fn test_resize_interpolates() {
        let r = ramp(4, 1);
        let up = r.resize(Resolution::new(8, 1));
        // i = 1 reads x = 0.5, halfway between 0 and 1.
        assert_abs_diff_eq!(up.at(1, 0), 0.5);
        assert_abs_diff_eq!(up.at(2, 0), 1.0);
    }

    #[test]
    fn test_resize_propagates_invalid() {
        let mut r = ramp(4, 4);
        r.invalidate(1, 0);
        let up = r.resize(Resolution::new(8, 8));
        // x = 0.5 blends (0,0) and (1,0).
        assert!(!up.is_valid(1, 0));
        // x = 0 has zero weight on (1,0).
        assert!(up.is_valid(0, 0));
    }

    #[test]
    fn test_resize_alpha_lockstep() {
        let r = ramp(2, 1).with_alpha(vec![0.0, 1.0]).unwrap();
        let up = r.resize(Resolution::new(4, 1));
        let alpha = up.alpha().unwrap();
        assert_abs_diff_eq!(alpha[0], 0.0);
        assert_abs_diff_eq!(alpha[1], 0.5);
    }

    #[test]
    fn test_crop() {
        let r = ramp(5, 4);
        let c = r.crop(Roi::new(1, 2, 3, 2)).unwrap();
        assert_eq!(c.resolution(), Resolution::new(3, 2));
        assert_eq!(c.data(), &[11.0, 12.0, 13.0, 16.0, 17.0, 18.0]);

        assert!(matches!(
            r.crop(Roi::new(3, 0, 3, 1)),
            Err(QuipuError::InvalidRegion { .. })
        ));
    }

    #[test]
    fn test_pad_replicates_edge() {
        let mut r = ramp(2, 2);
        r.pad_right(2);
        assert_eq!(r.data(), &[0.0, 1.0, 1.0, 1.0, 2.0, 3.0, 3.0, 3.0]);
        r.pad_below(1);
        assert_eq!(r.resolution(), Resolution::new(4, 3));
        assert_eq!(&r.data()[8..], &[2.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_append() {
        let mut a = ramp(2, 2);
        let b = ramp(1, 2);
        a.append_right(&b).unwrap();
        assert_eq!(a.data(), &[0.0, 1.0, 0.0, 2.0, 3.0, 1.0]);

        let c = ramp(3, 1);
        a.append_below(&c).unwrap();
        assert_eq!(a.resolution(), Resolution::new(3, 3));

        let err = a.append_right(&ramp(1, 2)).unwrap_err();
        assert!(matches!(
            err,
            QuipuError::IncompatibleAppend {
                side: "right",
                expected: 3,
                found: 2
            }
        ));
        assert!(a.append_below(&ramp(2, 1)).is_err());
    }

    #[test]
    fn test_fill_missing_flat() {
        let mut r = ramp(3, 3);
        r.invalidate(1, 1);
        r.fill_missing(-1.0);
        assert_eq!(r.at(1, 1), -1.0);
        assert!(!r.has_invalid());
    }

    #[test]
    fn test_fill_missing_nearest_row_major() {
        let mut r = ramp(5, 5);
        r.invalidate(2, 2);
        r.invalidate(1, 1);
        // Ring of radius 1 around (2,2): (1,1) is a hole, (2,1) is the
        // first valid sample in row-major order.
        let filled = r.fill_missing_nearest();
        assert_eq!(filled, 2);
        assert_eq!(r.at(2, 2), 7.0);
        assert_eq!(r.at(1, 1), 0.0);
    }

    #[test]
    fn test_fill_missing_nearest_idempotent() {
        let mut r = Raster::<f32>::new_blank(Resolution::new(9, 7));
        r.set(8, 6, 5.0);
        r.set(0, 3, -2.0);
        r.fill_missing_nearest();
        let once = r.clone();
        assert_eq!(r.fill_missing_nearest(), 0);
        assert_eq!(r, once);
    }

    #[test]
    fn test_fill_missing_nearest_no_source() {
        let mut r = Raster::<f64>::new_blank(Resolution::new(4, 4));
        assert_eq!(r.fill_missing_nearest(), 0);
        assert!(r.is_fully_invalid());
    }
}
