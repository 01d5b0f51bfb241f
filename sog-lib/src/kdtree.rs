/// Points per leaf before a node is split.
const LEAF_SIZE: usize = 8;

#[derive(Clone, Copy, Debug)]
enum KdNode {
    Leaf { start: usize, end: usize },
    Split { dim: usize, value: f32, left: usize, right: usize },
}

/// Exact nearest-neighbour search over a fixed set of row-major points.
/// Nodes split at the median of their widest dimension.
pub struct KdTree<'a> {
    points: &'a [f32],
    dims: usize,
    nodes: Vec<KdNode>,
    indices: Vec<u32>,
}

impl<'a> KdTree<'a> {
    pub fn new(points: &'a [f32], dims: usize) -> Self {
        let count = if dims == 0 { 0 } else { points.len() / dims };
        let mut tree = Self { points, dims, nodes: Vec::new(), indices: (0..count as u32).collect() };
        if count > 0 {
            tree.build(0, count);
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    fn point(&self, index: u32) -> &'a [f32] {
        let start = index as usize * self.dims;
        &self.points[start..start + self.dims]
    }

    fn value(&self, index: u32, dim: usize) -> f32 {
        self.points[index as usize * self.dims + dim]
    }

    fn build(&mut self, start: usize, end: usize) -> usize {
        let node = self.nodes.len();
        self.nodes.push(KdNode::Leaf { start, end });
        if end - start <= LEAF_SIZE {
            return node;
        }

        let mut split_dim = 0;
        let mut split_spread = 0.0f32;
        for dim in 0..self.dims {
            let mut min = f32::INFINITY;
            let mut max = f32::NEG_INFINITY;
            for &index in &self.indices[start..end] {
                let v = self.value(index, dim);
                min = min.min(v);
                max = max.max(v);
            }
            if max - min > split_spread {
                split_spread = max - min;
                split_dim = dim;
            }
        }
        // All points coincide (or are not finite): keep them in one leaf.
        if !(split_spread > 0.0) {
            return node;
        }

        let mid = (start + end) / 2;
        let (points, dims) = (self.points, self.dims);
        self.indices[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
            points[a as usize * dims + split_dim].total_cmp(&points[b as usize * dims + split_dim])
        });
        let value = self.value(self.indices[mid], split_dim);

        let left = self.build(start, mid);
        let right = self.build(mid, end);
        self.nodes[node] = KdNode::Split { dim: split_dim, value, left, right };
        node
    }

    /// Nearest point to `query` and its squared distance.
    pub fn nearest(&self, query: &[f32]) -> Option<(usize, f32)> {
        if self.is_empty() {
            return None;
        }
        Some(self.nearest_from(query, (0, f32::INFINITY)))
    }

    /// Like `nearest`, but starts from a known candidate, which is kept unless
    /// some point is strictly closer.
    pub fn nearest_from(&self, query: &[f32], best: (usize, f32)) -> (usize, f32) {
        let mut best = best;
        if !self.nodes.is_empty() {
            self.search(0, query, &mut best);
        }
        best
    }

    fn search(&self, node: usize, query: &[f32], best: &mut (usize, f32)) {
        match self.nodes[node] {
            KdNode::Leaf { start, end } => {
                for &index in &self.indices[start..end] {
                    let dist = distance2(query, self.point(index), best.1);
                    if dist < best.1 {
                        *best = (index as usize, dist);
                    }
                }
            }
            KdNode::Split { dim, value, left, right } => {
                // Left holds coordinates <= value, right holds >= value.
                let diff = query[dim] - value;
                let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
                self.search(near, query, best);
                if diff * diff < best.1 {
                    self.search(far, query, best);
                }
            }
        }
    }
}

/// Squared distance, abandoning early once it exceeds `limit`.
pub(crate) fn distance2(a: &[f32], b: &[f32], limit: f32) -> f32 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b) {
        let d = x - y;
        sum += d * d;
        if sum > limit {
            break;
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn brute_force(points: &[f32], dims: usize, query: &[f32]) -> f32 {
        points.chunks_exact(dims).map(|p| distance2(query, p, f32::INFINITY)).fold(f32::INFINITY, f32::min)
    }

    #[test]
    fn matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(17);
        for dims in [2, 9, 24] {
            let points: Vec<f32> = (0..500 * dims).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let tree = KdTree::new(&points, dims);
            assert_eq!(tree.len(), 500);
            for _ in 0..200 {
                let query: Vec<f32> = (0..dims).map(|_| rng.gen_range(-1.2..1.2)).collect();
                let (index, dist) = tree.nearest(&query).unwrap();
                assert_eq!(dist, brute_force(&points, dims, &query));
                assert_eq!(dist, distance2(&query, &points[index * dims..(index + 1) * dims], f32::INFINITY));
            }
        }
    }

    #[test]
    fn coincident_points_stay_in_one_leaf() {
        let points = vec![1.0f32; 3 * 100];
        let tree = KdTree::new(&points, 3);
        let (_, dist) = tree.nearest(&[1.0, 1.0, 2.0]).unwrap();
        assert_eq!(dist, 1.0);
    }

    #[test]
    fn known_candidate_survives_ties() {
        let points = vec![0.0f32, 0.0, 0.0, 0.0];
        let tree = KdTree::new(&points, 2);
        assert_eq!(tree.nearest_from(&[0.0, 0.0], (1, 0.0)).0, 1);
        assert!(KdTree::new(&[], 2).nearest(&[0.0, 0.0]).is_none());
    }
}
