use ordered_float::OrderedFloat;

use crate::error::{Result, SogError};
use crate::kdtree::{distance2, KdTree};

/// Above this many centroids, N-D assignment searches a kd-tree instead of
/// scanning every centroid.
const KD_TREE_MIN_CENTROIDS: usize = 32;

/// Result of clustering `rows` points of `dims` floats each.
#[derive(Clone, Debug, Default)]
pub struct Clustering {
    pub dims: usize,
    /// Row-major, `num_centroids() * dims` floats.
    pub centroids: Vec<f32>,
    /// One centroid index per input row.
    pub labels: Vec<u32>,
}

impl Clustering {
    pub fn num_centroids(&self) -> usize {
        if self.dims == 0 { 0 } else { self.centroids.len() / self.dims }
    }

    pub fn centroid(&self, index: usize) -> &[f32] {
        &self.centroids[index * self.dims..(index + 1) * self.dims]
    }

    /// Checks the oracle contract: `min(k, rows)` centroids of the right
    /// width and one in-range label per row.
    pub fn validate(&self, rows: usize, dims: usize, k: usize) -> Result<()> {
        if self.dims != dims || self.centroids.len() % dims.max(1) != 0 {
            return Err(SogError::Cluster(format!("expected centroids of width {}, got {}", dims, self.dims)));
        }
        let expected = k.min(rows);
        if self.num_centroids() != expected {
            return Err(SogError::Cluster(format!("expected {} centroids, got {}", expected, self.num_centroids())));
        }
        if self.labels.len() != rows {
            return Err(SogError::Cluster(format!("expected {} labels, got {}", rows, self.labels.len())));
        }
        if let Some(&label) = self.labels.iter().find(|&&label| label as usize >= expected) {
            return Err(SogError::Cluster(format!("label {} out of range for {} centroids", label, expected)));
        }
        Ok(())
    }
}

/// Vector quantization oracle: partitions `data` (row-major, `dims` floats per
/// row) into at most `k` clusters.
pub trait Clusterer {
    fn cluster(&self, data: &[f32], dims: usize, k: usize, iterations: usize) -> Result<Clustering>;
}

/// Lloyd's k-means with deterministic initialization.
#[derive(Clone, Copy, Debug, Default)]
pub struct KMeans;

impl Clusterer for KMeans {
    fn cluster(&self, data: &[f32], dims: usize, k: usize, iterations: usize) -> Result<Clustering> {
        if dims == 0 || data.len() % dims != 0 {
            return Err(SogError::Cluster(format!("data length {} is not a multiple of {}", data.len(), dims)));
        }
        let rows = data.len() / dims;

        if rows <= k {
            return Ok(Clustering {
                dims,
                centroids: data.to_vec(),
                labels: (0..rows as u32).collect(),
            });
        }

        let mut centroids = if dims == 1 { init_quantiles(data, k) } else { init_strided(data, dims, k) };
        let mut labels = vec![0u32; rows];

        for _ in 0..iterations {
            let changed = assign(data, dims, &centroids, &mut labels);
            update(data, dims, &labels, &mut centroids);
            if !changed {
                break;
            }
        }
        assign(data, dims, &centroids, &mut labels);

        Ok(Clustering { dims, centroids, labels })
    }
}

fn init_quantiles(data: &[f32], k: usize) -> Vec<f32> {
    let mut sorted = data.to_vec();
    sorted.sort_by_key(|&v| OrderedFloat(v));
    (0..k).map(|i| sorted[((2 * i + 1) * sorted.len()) / (2 * k)]).collect()
}

fn init_strided(data: &[f32], dims: usize, k: usize) -> Vec<f32> {
    let rows = data.len() / dims;
    let mut centroids = Vec::with_capacity(k * dims);
    for i in 0..k {
        let row = (i * rows) / k;
        centroids.extend_from_slice(&data[row * dims..(row + 1) * dims]);
    }
    centroids
}

/// Assigns every row to its nearest centroid, returning whether any label changed.
fn assign(data: &[f32], dims: usize, centroids: &[f32], labels: &mut [u32]) -> bool {
    if dims == 1 {
        return assign_1d(data, centroids, labels);
    }

    let k = centroids.len() / dims;
    let tree = (k > KD_TREE_MIN_CENTROIDS).then(|| KdTree::new(centroids, dims));
    let mut changed = false;
    for (row, label) in data.chunks_exact(dims).zip(labels.iter_mut()) {
        let current = *label as usize;
        let current_dist = distance2(row, &centroids[current * dims..(current + 1) * dims], f32::INFINITY);
        let best = match tree.as_ref() {
            Some(tree) => tree.nearest_from(row, (current, current_dist)).0,
            None => {
                let mut best = current;
                let mut best_dist = current_dist;
                for c in 0..k {
                    if c == best {
                        continue;
                    }
                    let dist = distance2(row, &centroids[c * dims..(c + 1) * dims], best_dist);
                    if dist < best_dist {
                        best_dist = dist;
                        best = c;
                    }
                }
                best
            }
        };
        if best != current {
            *label = best as u32;
            changed = true;
        }
    }
    changed
}

fn assign_1d(data: &[f32], centroids: &[f32], labels: &mut [u32]) -> bool {
    let mut sorted: Vec<(f32, u32)> = centroids.iter().enumerate().map(|(i, &c)| (c, i as u32)).collect();
    sorted.sort_by_key(|&(c, _)| OrderedFloat(c));

    let mut changed = false;
    for (&value, label) in data.iter().zip(labels.iter_mut()) {
        let upper = sorted.partition_point(|&(c, _)| c < value);
        let nearest = if upper == 0 {
            sorted[0].1
        } else if upper == sorted.len() {
            sorted[upper - 1].1
        } else {
            let (lo, lo_index) = sorted[upper - 1];
            let (hi, hi_index) = sorted[upper];
            if value - lo <= hi - value { lo_index } else { hi_index }
        };
        if nearest != *label {
            *label = nearest;
            changed = true;
        }
    }
    changed
}

/// Moves every centroid to the mean of its rows; empty clusters stay put.
fn update(data: &[f32], dims: usize, labels: &[u32], centroids: &mut [f32]) {
    let k = centroids.len() / dims;
    let mut sums = vec![0.0f64; k * dims];
    let mut counts = vec![0usize; k];
    for (row, &label) in data.chunks_exact(dims).zip(labels) {
        let label = label as usize;
        counts[label] += 1;
        for (sum, &v) in sums[label * dims..(label + 1) * dims].iter_mut().zip(row) {
            *sum += v as f64;
        }
    }
    for c in 0..k {
        if counts[c] == 0 {
            continue;
        }
        for d in 0..dims {
            centroids[c * dims + d] = (sums[c * dims + d] / counts[c] as f64) as f32;
        }
    }
}
