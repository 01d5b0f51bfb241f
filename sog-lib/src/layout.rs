/// Maps the n-th splat in sorted order to a pixel index in every per-splat raster.
pub trait CellLayout {
    fn cell(&self, ordinal: usize, width: usize, height: usize) -> usize;
}

/// Row-major, one pixel per splat in sorted order.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityLayout;

impl CellLayout for IdentityLayout {
    fn cell(&self, ordinal: usize, _width: usize, _height: usize) -> usize {
        ordinal
    }
}

/// Raster dimensions for `count` splats: both sides are multiples of 4 and
/// `width * height >= count`.
pub fn texture_size(count: usize) -> (usize, usize) {
    let count = count.max(1);
    let width = ((count as f64).sqrt() / 4.0).ceil() as usize * 4;
    let height = count.div_ceil(width).div_ceil(4) * 4;
    (width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_size_covers_count() {
        for count in [1, 2, 15, 16, 17, 300, 1000, 4097, 10_000, 123_457] {
            let (width, height) = texture_size(count);
            assert_eq!(width % 4, 0);
            assert_eq!(height % 4, 0);
            assert!(width * height >= count, "{}x{} < {}", width, height, count);
        }
        assert_eq!(texture_size(1), (4, 4));
        assert_eq!(texture_size(300), (20, 16));
    }
}
