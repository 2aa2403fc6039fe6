//! Plane and stack statistics.
//!
//! The engine computes these; the dispatcher only formats them. Computation
//! runs in two streaming passes over the pixel payload: the first
//! accumulates raw sums and value ranges per plane, the second fills the
//! fixed-bin histograms (plane histograms over plane ranges, stack
//! histograms over stack ranges). Stack records aggregate the sums of their
//! planes.

use crate::geometry::PixelShape;
use crate::types::SampleType;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Number of histogram bins.
pub const NUM_BINS: usize = 128;

/// Statistics of one plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneStats {
    pub z: u32,
    pub c: u32,
    pub t: u32,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sigma: f64,
    pub geomean: f64,
    pub geosigma: f64,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub sum_i: f64,
    pub sum_i2: f64,
    pub sum_log_i: f64,
    pub sum_xi: f64,
    pub sum_yi: f64,
    pub sum_zi: f64,
    pub hist: Vec<u64>,
    // carried for stack aggregation, not reported
    pub(crate) sum_log2_i: f64,
}

impl PlaneStats {
    fn zeroed(z: u32, c: u32, t: u32) -> Self {
        Self {
            z,
            c,
            t,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            sigma: 0.0,
            geomean: 0.0,
            geosigma: 0.0,
            centroid_x: 0.0,
            centroid_y: 0.0,
            sum_i: 0.0,
            sum_i2: 0.0,
            sum_log_i: 0.0,
            sum_xi: 0.0,
            sum_yi: 0.0,
            sum_zi: 0.0,
            hist: vec![0; NUM_BINS],
            sum_log2_i: 0.0,
        }
    }
}

/// Statistics of one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackStats {
    pub c: u32,
    pub t: u32,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sigma: f64,
    pub geomean: f64,
    pub geosigma: f64,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub centroid_z: f64,
    pub sum_i: f64,
    pub sum_i2: f64,
    pub sum_log_i: f64,
    pub sum_xi: f64,
    pub sum_yi: f64,
    pub sum_zi: f64,
    pub hist: Vec<u64>,
}

impl StackStats {
    fn zeroed(c: u32, t: u32) -> Self {
        Self {
            c,
            t,
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            sigma: 0.0,
            geomean: 0.0,
            geosigma: 0.0,
            centroid_x: 0.0,
            centroid_y: 0.0,
            centroid_z: 0.0,
            sum_i: 0.0,
            sum_i2: 0.0,
            sum_log_i: 0.0,
            sum_xi: 0.0,
            sum_yi: 0.0,
            sum_zi: 0.0,
            hist: vec![0; NUM_BINS],
        }
    }
}

/// Fresh zeroed plane records in storage order (z fastest, then c, then t).
pub fn zeroed_plane_stats(shape: &PixelShape) -> Vec<PlaneStats> {
    let mut out = Vec::with_capacity(shape.plane_count() as usize);
    // storage order is z + dz*(c + dc*t)
    for t in 0..shape.dt {
        for c in 0..shape.dc {
            for z in 0..shape.dz {
                out.push(PlaneStats::zeroed(z, c, t));
            }
        }
    }
    out
}

/// Fresh zeroed stack records in storage order (c fastest, then t).
pub fn zeroed_stack_stats(shape: &PixelShape) -> Vec<StackStats> {
    let mut out = Vec::with_capacity(shape.stack_count() as usize);
    for t in 0..shape.dt {
        for c in 0..shape.dc {
            out.push(StackStats::zeroed(c, t));
        }
    }
    out
}

/// Decode storage-order sample bytes into f64 values.
pub fn decode_samples(buf: &[u8], sample_type: SampleType, out: &mut Vec<f64>) {
    fn push<T: ToPrimitive>(value: T, out: &mut Vec<f64>) {
        out.push(value.to_f64().unwrap_or(0.0));
    }
    match sample_type {
        SampleType::U8 => buf.iter().for_each(|&v| push(v, out)),
        SampleType::I8 => buf.iter().for_each(|&v| push(v as i8, out)),
        SampleType::U16 => buf
            .chunks_exact(2)
            .for_each(|b| push(u16::from_ne_bytes([b[0], b[1]]), out)),
        SampleType::I16 => buf
            .chunks_exact(2)
            .for_each(|b| push(i16::from_ne_bytes([b[0], b[1]]), out)),
        SampleType::U32 => buf
            .chunks_exact(4)
            .for_each(|b| push(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]), out)),
        SampleType::I32 => buf
            .chunks_exact(4)
            .for_each(|b| push(i32::from_ne_bytes([b[0], b[1], b[2], b[3]]), out)),
        SampleType::F32 => buf
            .chunks_exact(4)
            .for_each(|b| push(f32::from_ne_bytes([b[0], b[1], b[2], b[3]]), out)),
    }
}

#[derive(Debug, Clone)]
struct PlaneAcc {
    n: u64,
    min: f64,
    max: f64,
    sum: f64,
    sum2: f64,
    sum_log: f64,
    sum_log2: f64,
    sum_xi: f64,
    sum_yi: f64,
}

impl Default for PlaneAcc {
    fn default() -> Self {
        Self {
            n: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            sum2: 0.0,
            sum_log: 0.0,
            sum_log2: 0.0,
            sum_xi: 0.0,
            sum_yi: 0.0,
        }
    }
}

/// First pass: raw sums and ranges per plane.
pub struct StatsBuilder {
    shape: PixelShape,
    planes: Vec<PlaneAcc>,
}

impl StatsBuilder {
    pub fn new(shape: PixelShape) -> Self {
        let planes = vec![PlaneAcc::default(); shape.plane_count() as usize];
        Self { shape, planes }
    }

    /// Feed decoded samples beginning at the given absolute pixel offset.
    pub fn feed(&mut self, start_pixel: u64, samples: &[f64]) {
        let plane_pixels = self.shape.plane_pixels();
        let dx = self.shape.dx as u64;
        for (i, &v) in samples.iter().enumerate() {
            let pixel = start_pixel + i as u64;
            let plane = (pixel / plane_pixels) as usize;
            let within = pixel % plane_pixels;
            let x = (within % dx) as f64;
            let y = (within / dx) as f64;
            let acc = &mut self.planes[plane];
            acc.n += 1;
            acc.min = acc.min.min(v);
            acc.max = acc.max.max(v);
            acc.sum += v;
            acc.sum2 += v * v;
            if v > 0.0 {
                let lv = v.ln();
                acc.sum_log += lv;
                acc.sum_log2 += lv * lv;
            }
            acc.sum_xi += x * v;
            acc.sum_yi += y * v;
        }
    }

    /// Finalize the sums and move to the histogram pass.
    pub fn into_histogram_pass(self) -> HistogramPass {
        let shape = self.shape;
        let dz = shape.dz as u64;
        let dc = shape.dc as u64;
        let mut planes = zeroed_plane_stats(&shape);
        let mut stacks = zeroed_stack_stats(&shape);
        let mut touched_stacks = vec![false; stacks.len()];

        for (idx, acc) in self.planes.iter().enumerate() {
            if acc.n == 0 {
                continue;
            }
            let z = (idx as u64 % dz) as u32;
            let c = ((idx as u64 / dz) % dc) as u32;
            let t = (idx as u64 / (dz * dc)) as u32;
            let n = acc.n as f64;
            let plane = &mut planes[idx];
            plane.min = acc.min;
            plane.max = acc.max;
            plane.mean = acc.sum / n;
            plane.sigma = sample_sigma(acc.sum, acc.sum2, acc.n);
            plane.geomean = (acc.sum_log / n).exp();
            plane.geosigma = sample_sigma(acc.sum_log, acc.sum_log2, acc.n).exp();
            plane.sum_i = acc.sum;
            plane.sum_i2 = acc.sum2;
            plane.sum_log_i = acc.sum_log;
            plane.sum_log2_i = acc.sum_log2;
            plane.sum_xi = acc.sum_xi;
            plane.sum_yi = acc.sum_yi;
            plane.sum_zi = z as f64 * acc.sum;
            if acc.sum != 0.0 {
                plane.centroid_x = acc.sum_xi / acc.sum;
                plane.centroid_y = acc.sum_yi / acc.sum;
            }

            let stack_idx = (c as u64 + dc * t as u64) as usize;
            let stack = &mut stacks[stack_idx];
            if !touched_stacks[stack_idx] {
                stack.min = f64::INFINITY;
                stack.max = f64::NEG_INFINITY;
                touched_stacks[stack_idx] = true;
            }
            stack.min = stack.min.min(acc.min);
            stack.max = stack.max.max(acc.max);
            stack.sum_i += acc.sum;
            stack.sum_i2 += acc.sum2;
            stack.sum_log_i += acc.sum_log;
            stack.sum_xi += acc.sum_xi;
            stack.sum_yi += acc.sum_yi;
            stack.sum_zi += z as f64 * acc.sum;
            // reuse mean/sigma slots as scratch counters until finalize
            stack.mean += n;
            stack.sigma += acc.sum_log2;
        }

        for (idx, stack) in stacks.iter_mut().enumerate() {
            if !touched_stacks[idx] {
                continue;
            }
            let n = stack.mean;
            let sum_log2 = stack.sigma;
            stack.mean = stack.sum_i / n;
            stack.sigma = sample_sigma_f(stack.sum_i, stack.sum_i2, n);
            stack.geomean = (stack.sum_log_i / n).exp();
            stack.geosigma = sample_sigma_f(stack.sum_log_i, sum_log2, n).exp();
            if stack.sum_i != 0.0 {
                stack.centroid_x = stack.sum_xi / stack.sum_i;
                stack.centroid_y = stack.sum_yi / stack.sum_i;
                stack.centroid_z = stack.sum_zi / stack.sum_i;
            }
        }

        HistogramPass {
            shape,
            planes,
            stacks,
            touched_stacks,
        }
    }
}

fn sample_sigma(sum: f64, sum2: f64, n: u64) -> f64 {
    sample_sigma_f(sum, sum2, n as f64)
}

fn sample_sigma_f(sum: f64, sum2: f64, n: f64) -> f64 {
    if n <= 1.0 {
        return 0.0;
    }
    let var = (sum2 - sum * sum / n) / (n - 1.0);
    if var > 0.0 {
        var.sqrt()
    } else {
        0.0
    }
}

/// Second pass: histograms over the ranges established by the first.
pub struct HistogramPass {
    shape: PixelShape,
    planes: Vec<PlaneStats>,
    stacks: Vec<StackStats>,
    touched_stacks: Vec<bool>,
}

impl HistogramPass {
    /// Feed the same samples again, in any chunking.
    pub fn feed(&mut self, start_pixel: u64, samples: &[f64]) {
        let plane_pixels = self.shape.plane_pixels();
        let dz = self.shape.dz as u64;
        for (i, &v) in samples.iter().enumerate() {
            let pixel = start_pixel + i as u64;
            let plane_idx = (pixel / plane_pixels) as usize;
            let stack_idx = (plane_idx as u64 / dz) as usize;
            let (pmin, pmax) = (self.planes[plane_idx].min, self.planes[plane_idx].max);
            let bin = bin_index(v, pmin, pmax);
            self.planes[plane_idx].hist[bin] += 1;
            if self.touched_stacks[stack_idx] {
                let (smin, smax) = (self.stacks[stack_idx].min, self.stacks[stack_idx].max);
                self.stacks[stack_idx].hist[bin_index(v, smin, smax)] += 1;
            }
        }
    }

    pub fn finish(self) -> (Vec<PlaneStats>, Vec<StackStats>) {
        (self.planes, self.stacks)
    }
}

fn bin_index(v: f64, min: f64, max: f64) -> usize {
    if max <= min {
        return 0;
    }
    let width = (max - min) / NUM_BINS as f64;
    let idx = ((v - min) / width) as usize;
    idx.min(NUM_BINS - 1)
}
