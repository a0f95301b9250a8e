//! Blob: the 4-D Tensor
//!
//! Every input, parameter, gradient and activation in the network is a
//! [`Blob`]: a batch of `N` independent 3-D samples sharing one shape.
//!
//! ## Core Concepts
//!
//! - **Logical shape**: `(N, C, H, W)` (batch, channel, height, width)
//! - **Sample**: one of the `N` blocks; the unit most layer loops iterate over
//! - **Storage**: one flat `Vec<f64>`, sample-major, channel-last inside a sample
//!
//! ## Memory Layout
//!
//! Sample `n` occupies `data[n * H*W*C .. (n + 1) * H*W*C]`. Inside a sample the
//! element `(c, h, w)` sits at:
//!
//! ```text
//! offset(c, h, w) = (h * W + w) * C + c
//! ```
//!
//! Channel varies fastest, then width, then height. Two things follow:
//!
//! - A row segment of a receptive window (`Wk` columns, all channels) is one
//!   contiguous slice, which keeps the convolution inner loop a plain dot product.
//! - "Flat index within a sample" (see [`Blob::sample_max_index`]) always means
//!   this order, and ties resolve to the first element in it.
//!
//! Checkpoints use the canonical `N, C, H, W` order instead; convert with
//! [`Blob::from_nchw`] and [`Blob::to_nchw`].
//!
//! ## Example
//!
//! ```rust
//! use blobnet::{Blob, Shape};
//!
//! let x = Blob::from_vec(Shape::new(1, 1, 2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
//! let padded = x.pad(1);
//! assert_eq!(padded.shape(), Shape::new(1, 1, 4, 4));
//! assert_eq!(padded.unpad(1).unwrap(), x);
//! ```

use crate::error::{NetError, Result};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical `(N, C, H, W)` shape of a [`Blob`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl Shape {
    pub const fn new(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self { n, c, h, w }
    }

    /// Number of elements in one sample (`C * H * W`)
    pub const fn sample_len(&self) -> usize {
        self.c * self.h * self.w
    }

    /// Total number of elements
    pub const fn len(&self) -> usize {
        self.n * self.sample_len()
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same per-sample shape with a different batch size
    pub const fn with_batch(&self, n: usize) -> Self {
        Self { n, ..*self }
    }

    /// Offset of `(c, h, w)` inside one sample
    #[inline]
    pub const fn sample_offset(&self, c: usize, h: usize, w: usize) -> usize {
        (h * self.w + w) * self.c + c
    }

    /// Offset of `(n, c, h, w)` in the whole blob
    #[inline]
    pub const fn offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        n * self.sample_len() + self.sample_offset(c, h, w)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.n, self.c, self.h, self.w)
    }
}

/// Fill policy for freshly constructed blobs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fill {
    Zeros,
    /// Independent draws from N(0, 1)
    RandomNormal,
}

/// A batch of `N` samples, each `(H, W, C)`
#[derive(Clone, Debug, PartialEq)]
pub struct Blob {
    shape: Shape,
    data: Vec<f64>,
}

impl Blob {
    /// Create a blob with the given fill policy
    ///
    /// The RNG is only consulted for [`Fill::RandomNormal`].
    pub fn new<R: Rng + ?Sized>(shape: Shape, fill: Fill, rng: &mut R) -> Self {
        match fill {
            Fill::Zeros => Self::zeros(shape),
            Fill::RandomNormal => {
                let data = (0..shape.len())
                    .map(|_| -> f64 { StandardNormal.sample(rng) })
                    .collect();
                Self { shape, data }
            }
        }
    }

    pub fn zeros(shape: Shape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.len()],
        }
    }

    /// Wrap data that is already in storage order (sample-major, channel-last)
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `data.len()` differs from the shape's element count.
    pub fn from_vec(shape: Shape, data: Vec<f64>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(NetError::InvalidConfig(format!(
                "{} values supplied for blob of shape {} ({} expected)",
                data.len(),
                shape,
                shape.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Build a blob from values listed in canonical `N, C, H, W` order
    pub fn from_nchw(shape: Shape, values: &[f64]) -> Result<Self> {
        if values.len() != shape.len() {
            return Err(NetError::InvalidConfig(format!(
                "{} values supplied for blob of shape {} ({} expected)",
                values.len(),
                shape,
                shape.len()
            )));
        }
        let mut blob = Self::zeros(shape);
        let mut idx = 0;
        for n in 0..shape.n {
            for c in 0..shape.c {
                for h in 0..shape.h {
                    for w in 0..shape.w {
                        blob.data[shape.offset(n, c, h, w)] = values[idx];
                        idx += 1;
                    }
                }
            }
        }
        Ok(blob)
    }

    /// Values in canonical `N, C, H, W` order
    pub fn to_nchw(&self) -> Vec<f64> {
        let s = self.shape;
        let mut out = Vec::with_capacity(s.len());
        for n in 0..s.n {
            for c in 0..s.c {
                for h in 0..s.h {
                    for w in 0..s.w {
                        out.push(self.data[s.offset(n, c, h, w)]);
                    }
                }
            }
        }
        out
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn n(&self) -> usize {
        self.shape.n
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// One sample as a flat slice in storage order
    pub fn sample(&self, n: usize) -> &[f64] {
        let len = self.shape.sample_len();
        &self.data[n * len..(n + 1) * len]
    }

    pub fn sample_mut(&mut self, n: usize) -> &mut [f64] {
        let len = self.shape.sample_len();
        &mut self.data[n * len..(n + 1) * len]
    }

    #[inline]
    pub fn get(&self, n: usize, c: usize, h: usize, w: usize) -> f64 {
        self.data[self.shape.offset(n, c, h, w)]
    }

    #[inline]
    pub fn set(&mut self, n: usize, c: usize, h: usize, w: usize, value: f64) {
        let idx = self.shape.offset(n, c, h, w);
        self.data[idx] = value;
    }

    fn zip_with(&self, other: &Blob, op: &'static str, f: fn(f64, f64) -> f64) -> Result<Blob> {
        if self.shape != other.shape {
            return Err(NetError::shape(op, self.shape, other.shape));
        }
        let data = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Blob {
            shape: self.shape,
            data,
        })
    }

    fn map(&self, f: impl Fn(f64) -> f64 + Sync + Send) -> Blob {
        let data = self.data.par_iter().map(|&x| f(x)).collect();
        Blob {
            shape: self.shape,
            data,
        }
    }

    /// Element-wise addition (shapes must match exactly)
    pub fn add(&self, other: &Blob) -> Result<Blob> {
        self.zip_with(other, "add", |a, b| a + b)
    }

    /// Element-wise subtraction
    pub fn sub(&self, other: &Blob) -> Result<Blob> {
        self.zip_with(other, "sub", |a, b| a - b)
    }

    /// Element-wise (Hadamard) product
    pub fn mul(&self, other: &Blob) -> Result<Blob> {
        self.zip_with(other, "mul", |a, b| a * b)
    }

    /// Element-wise division
    pub fn div(&self, other: &Blob) -> Result<Blob> {
        self.zip_with(other, "div", |a, b| a / b)
    }

    pub fn add_scalar(&self, scalar: f64) -> Blob {
        self.map(|x| x + scalar)
    }

    pub fn sub_scalar(&self, scalar: f64) -> Blob {
        self.map(|x| x - scalar)
    }

    pub fn mul_scalar(&self, scalar: f64) -> Blob {
        self.map(|x| x * scalar)
    }

    pub fn div_scalar(&self, scalar: f64) -> Blob {
        self.map(|x| x / scalar)
    }

    /// Element-wise `max(x, floor)`
    pub fn max_with(&self, floor: f64) -> Blob {
        self.map(|x| x.max(floor))
    }

    /// In-place `self += scale * other`
    pub fn add_scaled_assign(&mut self, other: &Blob, scale: f64) -> Result<()> {
        if self.shape != other.shape {
            return Err(NetError::shape("add_scaled_assign", self.shape, other.shape));
        }
        self.data
            .par_iter_mut()
            .zip(&other.data)
            .for_each(|(a, &b)| *a += scale * b);
        Ok(())
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn sum_squares(&self) -> f64 {
        self.data.iter().map(|&x| x * x).sum()
    }

    /// Zero-pad every spatial edge of every sample and channel by `pad` cells
    ///
    /// Output shape is `(N, C, H + 2*pad, W + 2*pad)`.
    pub fn pad(&self, pad: usize) -> Blob {
        if pad == 0 {
            return self.clone();
        }
        let s = self.shape;
        let out_shape = Shape::new(s.n, s.c, s.h + 2 * pad, s.w + 2 * pad);
        let mut out = Blob::zeros(out_shape);
        let row = s.w * s.c;

        out.data
            .par_chunks_mut(out_shape.sample_len().max(1))
            .enumerate()
            .for_each(|(n, dst)| {
                let src = self.sample(n);
                for h in 0..s.h {
                    let d = out_shape.sample_offset(0, h + pad, pad);
                    dst[d..d + row].copy_from_slice(&src[h * row..(h + 1) * row]);
                }
            });
        out
    }

    /// Crop `pad` cells from every spatial edge; exact inverse of [`Blob::pad`]
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `2 * pad` exceeds the height or width.
    pub fn unpad(&self, pad: usize) -> Result<Blob> {
        if pad == 0 {
            return Ok(self.clone());
        }
        let s = self.shape;
        if 2 * pad > s.h || 2 * pad > s.w {
            return Err(NetError::InvalidConfig(format!(
                "cannot crop {} cells from each edge of {}",
                pad, s
            )));
        }
        let out_shape = Shape::new(s.n, s.c, s.h - 2 * pad, s.w - 2 * pad);
        let mut out = Blob::zeros(out_shape);
        let row = out_shape.w * s.c;

        out.data
            .par_chunks_mut(out_shape.sample_len().max(1))
            .enumerate()
            .for_each(|(n, dst)| {
                let src = self.sample(n);
                for h in 0..out_shape.h {
                    let o = s.sample_offset(0, h + pad, pad);
                    dst[h * row..(h + 1) * row].copy_from_slice(&src[o..o + row]);
                }
            });
        Ok(out)
    }

    /// Copy of samples `[lo, hi)`
    ///
    /// # Errors
    ///
    /// `OutOfRange` if `lo > hi` or `hi > N`.
    pub fn sub_blob(&self, lo: usize, hi: usize) -> Result<Blob> {
        if lo > hi || hi > self.shape.n {
            return Err(NetError::OutOfRange {
                lo,
                hi,
                len: self.shape.n,
            });
        }
        let len = self.shape.sample_len();
        Ok(Blob {
            shape: self.shape.with_batch(hi - lo),
            data: self.data[lo * len..hi * len].to_vec(),
        })
    }

    /// Copy of `len` consecutive samples starting at `start`, wrapping modulo `N`
    ///
    /// This is how mini-batches are drawn: batch `i` of size `b` is
    /// `wrapping_batch(i * b, b)`.
    pub fn wrapping_batch(&self, start: usize, len: usize) -> Result<Blob> {
        let total = self.shape.n;
        if total == 0 {
            return Err(NetError::OutOfRange {
                lo: start,
                hi: start + len,
                len: 0,
            });
        }
        let sample_len = self.shape.sample_len();
        let mut data = Vec::with_capacity(len * sample_len);
        for k in 0..len {
            data.extend_from_slice(self.sample((start + k) % total));
        }
        Ok(Blob {
            shape: self.shape.with_batch(len),
            data,
        })
    }

    /// Largest element of sample `n`
    pub fn sample_max(&self, n: usize) -> f64 {
        self.sample(n)
            .iter()
            .fold(f64::NEG_INFINITY, |a, &b| a.max(b))
    }

    /// Flat storage-order index of the largest element of sample `n`
    ///
    /// Ties resolve to the first occurrence (channel fastest, then width,
    /// then height).
    pub fn sample_max_index(&self, n: usize) -> usize {
        let mut best = 0;
        let mut best_val = f64::NEG_INFINITY;
        for (i, &v) in self.sample(n).iter().enumerate() {
            if v > best_val {
                best = i;
                best_val = v;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ramp(shape: Shape) -> Blob {
        let data = (0..shape.len()).map(|i| i as f64 * 0.5 - 3.0).collect();
        Blob::from_vec(shape, data).unwrap()
    }

    #[test]
    fn test_pad_unpad_roundtrip() {
        let mut rng = StdRng::seed_from_u64(7);
        for &pad in &[0, 1, 2, 3] {
            let x = Blob::new(Shape::new(3, 2, 4, 5), Fill::RandomNormal, &mut rng);
            let padded = x.pad(pad);
            assert_eq!(padded.shape(), Shape::new(3, 2, 4 + 2 * pad, 5 + 2 * pad));
            assert_eq!(padded.unpad(pad).unwrap(), x);
        }
    }

    #[test]
    fn test_pad_border_is_zero() {
        let x = Blob::from_vec(Shape::new(1, 1, 1, 1), vec![5.0]).unwrap();
        let padded = x.pad(1);
        assert_eq!(padded.data(), &[0.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_unpad_too_large() {
        let x = Blob::zeros(Shape::new(1, 1, 3, 3));
        match x.unpad(2) {
            Err(NetError::InvalidConfig(msg)) => assert!(msg.contains("cannot crop 2 cells")),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_elementwise_shape_mismatch() {
        let a = Blob::zeros(Shape::new(1, 2, 3, 3));
        let b = Blob::zeros(Shape::new(1, 3, 3, 3));
        assert!(matches!(a.add(&b), Err(NetError::ShapeMismatch { op: "add", .. })));
        assert!(a.mul(&b).is_err());
        assert!(matches!(a.sub(&b), Err(NetError::ShapeMismatch { op: "sub", .. })));
        assert!(matches!(a.div(&b), Err(NetError::ShapeMismatch { op: "div", .. })));
    }

    #[test]
    fn test_elementwise_ops() {
        let a = ramp(Shape::new(1, 1, 1, 4));
        let b = Blob::from_vec(Shape::new(1, 1, 1, 4), vec![1.0, 2.0, 4.0, 8.0]).unwrap();
        assert_eq!(a.add(&b).unwrap().data(), &[-2.0, -0.5, 2.0, 6.5]);
        assert_eq!(a.sub(&b).unwrap().data(), &[-4.0, -4.5, -6.0, -9.5]);
        assert_eq!(a.mul(&b).unwrap().data(), &[-3.0, -5.0, -8.0, -12.0]);
        assert_eq!(a.div(&b).unwrap().data(), &[-3.0, -1.25, -0.5, -0.1875]);
        assert_eq!(a.add_scalar(3.0).data(), &[0.0, 0.5, 1.0, 1.5]);
        assert_eq!(a.sub_scalar(1.0).data(), &[-4.0, -3.5, -3.0, -2.5]);
        assert_eq!(b.div_scalar(2.0).data(), &[0.5, 1.0, 2.0, 4.0]);
        assert_eq!(a.max_with(0.0).data(), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_nchw_conversion() {
        // Two channels of a 1x2 image: channel 0 = [1, 2], channel 1 = [3, 4]
        let shape = Shape::new(1, 2, 1, 2);
        let blob = Blob::from_nchw(shape, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        // Storage is channel-last: (w0,c0) (w0,c1) (w1,c0) (w1,c1)
        assert_eq!(blob.data(), &[1.0, 3.0, 2.0, 4.0]);
        assert_eq!(blob.get(0, 1, 0, 0), 3.0);
        assert_eq!(blob.to_nchw(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_sub_blob() {
        let x = ramp(Shape::new(4, 1, 1, 2));
        let sub = x.sub_blob(1, 3).unwrap();
        assert_eq!(sub.shape(), Shape::new(2, 1, 1, 2));
        assert_eq!(sub.sample(0), x.sample(1));
        assert!(matches!(x.sub_blob(2, 5), Err(NetError::OutOfRange { .. })));
        assert!(x.sub_blob(3, 2).is_err());
        assert_eq!(x.sub_blob(2, 2).unwrap().n(), 0);
    }

    #[test]
    fn test_wrapping_batch() {
        let x = ramp(Shape::new(3, 1, 1, 1));
        let batch = x.wrapping_batch(2, 3).unwrap();
        assert_eq!(batch.data(), &[x.data()[2], x.data()[0], x.data()[1]]);
        assert!(Blob::zeros(Shape::new(0, 1, 1, 1)).wrapping_batch(0, 1).is_err());
    }

    #[test]
    fn test_sample_max_index_first_tie() {
        let x = Blob::from_vec(Shape::new(2, 1, 2, 2), vec![1.0, 9.0, 9.0, 0.0, -1.0, -2.0, -3.0, -0.5])
            .unwrap();
        assert_eq!(x.sample_max_index(0), 1);
        assert_eq!(x.sample_max(0), 9.0);
        assert_eq!(x.sample_max_index(1), 3);
    }

    #[test]
    fn test_random_fill_is_seeded() {
        let shape = Shape::new(2, 3, 4, 4);
        let a = Blob::new(shape, Fill::RandomNormal, &mut StdRng::seed_from_u64(1));
        let b = Blob::new(shape, Fill::RandomNormal, &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
        assert!(a.data().iter().any(|&v| v != 0.0));
    }
}
