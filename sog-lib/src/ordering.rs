use crate::column::Column;
use crate::error::{Result, SogError};

const MORTON_GRID: f32 = 1024.0;
const MORTON_MAX: u32 = 1023;

/// Runs of identical Morton codes longer than this are re-sorted within
/// their own bounding box.
pub const MAX_TIE_RUN: usize = 256;

/// Spreads the low 10 bits of `x` so that there are two zero bits between each.
pub fn part1by2(x: u32) -> u32 {
    let mut x = x & 0x0000_03ff;
    x = (x ^ (x << 16)) & 0xff00_00ff;
    x = (x ^ (x << 8)) & 0x0300_f00f;
    x = (x ^ (x << 4)) & 0x030c_30c3;
    x = (x ^ (x << 2)) & 0x0924_9249;
    x
}

pub fn morton_coord10_to_index(coord: [u32; 3]) -> u32 {
    (part1by2(coord[2]) << 2) | (part1by2(coord[1]) << 1) | part1by2(coord[0])
}

/// Computes a permutation of `0..count` that walks the points along a 3-D
/// Z-order curve fitted to their bounding box. Ties longer than `MAX_TIE_RUN`
/// are refined recursively.
pub fn morton_order<C: Column>(axes: &[C; 3], count: usize) -> Result<Vec<usize>> {
    let mut indices: Vec<usize> = (0..count).collect();
    sort_range(axes, &mut indices, 0, count)?;
    Ok(indices)
}

fn sort_range<C: Column>(axes: &[C; 3], indices: &mut [usize], start: usize, end: usize) -> Result<()> {
    if end - start < 2 {
        return Ok(());
    }

    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for &index in &indices[start..end] {
        for d in 0..3 {
            let v = axes[d].value(index);
            if v.is_nan() {
                return Err(SogError::Reorder(format!("NaN coordinate on axis {} of point {}", d, index)));
            }
            min[d] = min[d].min(v);
            max[d] = max[d].max(v);
        }
    }

    let length: [f32; 3] = std::array::from_fn(|d| max[d] - min[d]);
    if length.iter().any(|l| !l.is_finite()) {
        return Err(SogError::Reorder(format!("non-finite bounding box extent {:?}", length)));
    }
    if length.iter().all(|&l| l == 0.0) {
        return Ok(());
    }

    let multiplier = length.map(|l| if l == 0.0 { 0.0 } else { MORTON_GRID / l });

    let mut keyed: Vec<(u32, usize)> = indices[start..end].iter().map(|&index| {
        let coord = std::array::from_fn(|d| {
            let cell = ((axes[d].value(index) - min[d]) * multiplier[d]).floor();
            (cell as u32).min(MORTON_MAX)
        });
        (morton_coord10_to_index(coord), index)
    }).collect();
    keyed.sort_by_key(|&(code, _)| code);

    for (slot, &(_, index)) in indices[start..end].iter_mut().zip(keyed.iter()) {
        *slot = index;
    }

    let mut run_start = 0;
    while run_start < keyed.len() {
        let code = keyed[run_start].0;
        let mut run_end = run_start + 1;
        while run_end < keyed.len() && keyed[run_end].0 == code {
            run_end += 1;
        }
        if run_end - run_start > MAX_TIE_RUN {
            sort_range(axes, indices, start + run_start, start + run_end)?;
        }
        run_start = run_end;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_axes(rng: &mut StdRng, count: usize, scale: f32) -> [Vec<f32>; 3] {
        std::array::from_fn(|_| (0..count).map(|_| rng.gen_range(-scale..scale)).collect())
    }

    fn assert_permutation(order: &[usize], count: usize) {
        let mut seen = vec![false; count];
        for &index in order {
            assert!(!seen[index], "index {} appears twice", index);
            seen[index] = true;
        }
        assert_eq!(order.len(), count);
        assert!(seen.into_iter().all(|s| s));
    }

    #[test]
    fn part1by2_spreads_bits() {
        assert_eq!(part1by2(0b1), 0b1);
        assert_eq!(part1by2(0b11), 0b1001);
        assert_eq!(part1by2(0x3ff), 0x0924_9249);
        assert_eq!(morton_coord10_to_index([1, 0, 0]), 1);
        assert_eq!(morton_coord10_to_index([0, 1, 0]), 2);
        assert_eq!(morton_coord10_to_index([0, 0, 1]), 4);
        assert_eq!(morton_coord10_to_index([1023, 1023, 1023]), (1 << 30) - 1);
    }

    #[test]
    fn order_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        for count in [0, 1, 2, 17, 1000, 5000] {
            let axes = random_axes(&mut rng, count, 10.0);
            let order = morton_order(&axes, count).unwrap();
            assert_permutation(&order, count);
        }
    }

    #[test]
    fn colocated_points_keep_identity_order() {
        let axes = [vec![3.0f32; 300], vec![-1.0; 300], vec![0.5; 300]];
        let order = morton_order(&axes, 300).unwrap();
        assert_eq!(order, (0..300).collect::<Vec<_>>());
    }

    #[test]
    fn non_finite_extent_is_rejected() {
        let axes = [vec![0.0f32, f32::INFINITY], vec![0.0, 0.0], vec![0.0, 0.0]];
        assert!(matches!(morton_order(&axes, 2), Err(SogError::Reorder(_))));
    }

    #[test]
    fn nan_coordinate_is_rejected() {
        let axes = [vec![0.0f32, f32::NAN, 5.0, 1.0], vec![0.0, 1.0, 2.0, 3.0], vec![0.0; 4]];
        assert!(matches!(morton_order(&axes, 4), Err(SogError::Reorder(_))));
    }

    #[test]
    fn points_follow_the_curve() {
        // One point per octant corner, listed in reverse curve order.
        let axes = [
            vec![1.0f32, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0],
            vec![1.0f32, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0],
            vec![1.0f32, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        ];
        let order = morton_order(&axes, 8).unwrap();
        assert_eq!(order, vec![7, 6, 5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn large_ties_are_refined_within_their_own_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        let cluster = 600;
        let sub = random_axes(&mut rng, cluster, 0.001);

        // A single far point squeezes the whole cluster into one top-level cell.
        let axes: [Vec<f32>; 3] = std::array::from_fn(|d| {
            let mut values = vec![1000.0f32];
            values.extend(sub[d].iter().map(|v| v + 0.5));
            values
        });

        let order = morton_order(&axes, cluster + 1).unwrap();
        assert_permutation(&order, cluster + 1);
        assert_eq!(order[cluster], 0);

        let shifted: [Vec<f32>; 3] = std::array::from_fn(|d| axes[d][1..].to_vec());
        let expected: Vec<usize> = morton_order(&shifted, cluster).unwrap().into_iter().map(|i| i + 1).collect();
        assert_eq!(&order[..cluster], &expected[..]);
    }
}
