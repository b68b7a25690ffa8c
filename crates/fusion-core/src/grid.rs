//! Dense row-major pixel grids.
//!
//! Depth maps, confidence maps, masks, point maps and RGB images all share
//! the same layout: `data[y * width + x]`.

use serde::{Deserialize, Serialize};

use crate::{FusionError, Pt3, Real, Result};

/// Row-major `width × height` grid of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "GridData<T>",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

/// Unchecked serialized form; shape is verified by [`Grid::from_vec`].
#[derive(Deserialize)]
struct GridData<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T> TryFrom<GridData<T>> for Grid<T> {
    type Error = FusionError;

    fn try_from(raw: GridData<T>) -> Result<Self> {
        Self::from_vec(raw.width, raw.height, raw.data)
    }
}

/// Per-pixel scalar values (depth, confidence).
pub type ScalarMap = Grid<Real>;
/// Per-pixel 3D points.
pub type PointMap = Grid<Pt3>;
/// Per-pixel boolean mask.
pub type Mask = Grid<bool>;
/// RGB image with channels in `[0, 1]`.
pub type RgbImage = Grid<[f32; 3]>;

impl<T: Clone> Grid<T> {
    /// Grid with every pixel set to `value`.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }
}

impl<T> Grid<T> {
    /// Wrap a row-major buffer; fails when the length does not match the shape.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != width * height {
            return Err(FusionError::input(format!(
                "grid buffer has {} values, expected {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build a grid by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        let i = self.idx(x, y);
        &mut self.data[i]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        let i = self.idx(x, y);
        self.data[i] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn same_shape<U>(&self, other: &Grid<U>) -> bool {
        self.shape() == other.shape()
    }

    /// Apply `f` to every pixel, keeping the shape.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Grid<U> {
        Grid {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(f).collect(),
        }
    }

    /// Fail with an input error unless `other` has the same shape.
    pub fn ensure_same_shape<U>(&self, other: &Grid<U>, what: &str) -> Result<()> {
        if !self.same_shape(other) {
            return Err(FusionError::input(format!(
                "{what}: shape {}x{} does not match {}x{}",
                other.width, other.height, self.width, self.height
            )));
        }
        Ok(())
    }
}

impl ScalarMap {
    /// Arithmetic mean; zero for an empty map.
    pub fn mean(&self) -> Real {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<Real>() / self.data.len() as Real
    }

    /// Largest finite value, if any.
    pub fn max_finite(&self) -> Option<Real> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| Some(acc.map_or(v, |m: Real| m.max(v))))
    }
}

impl Mask {
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_checks_buffer_length() {
        assert!(Grid::from_vec(2, 2, vec![0.0; 4]).is_ok());
        assert!(Grid::from_vec(2, 2, vec![0.0; 3]).is_err());
    }

    #[test]
    fn deserialization_checks_buffer_length() {
        let ok: ScalarMap =
            serde_json::from_str(r#"{"width":2,"height":1,"data":[1.0,2.0]}"#).unwrap();
        assert_eq!(ok.shape(), (2, 1));
        let bad = serde_json::from_str::<ScalarMap>(r#"{"width":2,"height":2,"data":[1.0,2.0]}"#);
        assert!(bad.unwrap_err().to_string().contains("expected 2x2"));
        let back: Mask = serde_json::from_str(&serde_json::to_string(&Grid::filled(3, 2, true)).unwrap()).unwrap();
        assert_eq!(back.count(), 6);
    }

    #[test]
    fn from_fn_is_row_major() {
        let g = Grid::from_fn(3, 2, |x, y| 10 * y + x);
        assert_eq!(g.as_slice(), &[0, 1, 2, 10, 11, 12]);
        assert_eq!(*g.get(2, 1), 12);
        assert_eq!(g.idx(1, 1), 4);
    }

    #[test]
    fn scalar_statistics() {
        let g: ScalarMap = Grid::from_vec(2, 2, vec![1.0, 2.0, Real::NAN, 5.0]).unwrap();
        assert_eq!(g.max_finite(), Some(5.0));
        let h: ScalarMap = Grid::from_vec(2, 1, vec![1.0, 3.0]).unwrap();
        assert!((h.mean() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn shape_mismatch_is_an_input_error() {
        let a: Mask = Grid::filled(4, 3, true);
        let b: ScalarMap = Grid::filled(3, 4, 1.0);
        assert!(a.ensure_same_shape(&b, "confidence").is_err());
        assert_eq!(a.count(), 12);
    }
}
