use glam::{Quat, Vec3A};

use crate::tsplat::{num_sh_coeffs, Tsplat, TsplatArray};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gsplat {
    pub center: Vec3A,
    pub ln_scales: Vec3A,
    pub quaternion: Quat,
    pub logit_opacity: f32,
    pub sh0: Vec3A,
}

impl Default for Gsplat {
    fn default() -> Self {
        Self {
            center: Vec3A::ZERO,
            ln_scales: Vec3A::ZERO,
            quaternion: Quat::IDENTITY,
            logit_opacity: 0.0,
            sh0: Vec3A::ZERO,
        }
    }
}

impl Tsplat for Gsplat {
    fn center(&self) -> Vec3A { self.center }
    fn ln_scales(&self) -> Vec3A { self.ln_scales }
    fn quaternion(&self) -> Quat { self.quaternion }
    fn logit_opacity(&self) -> f32 { self.logit_opacity }
    fn sh0(&self) -> Vec3A { self.sh0 }
}

/// Full-precision splat collection. SH rest coefficients are kept in one flat
/// buffer with `sh_stride()` floats per splat.
#[derive(Clone, Debug, Default)]
pub struct GsplatArray {
    pub max_sh_degree: usize,
    pub splats: Vec<Gsplat>,
    pub sh_rest: Vec<f32>,
}

impl GsplatArray {
    pub fn sh_stride(&self) -> usize {
        3 * num_sh_coeffs(self.max_sh_degree)
    }

    /// Appends a splat. `sh_rest` is truncated or zero-padded to `sh_stride()`.
    pub fn push(&mut self, splat: Gsplat, sh_rest: &[f32]) {
        let stride = self.sh_stride();
        self.splats.push(splat);
        let available = sh_rest.len().min(stride);
        self.sh_rest.extend_from_slice(&sh_rest[..available]);
        self.sh_rest.resize(self.sh_rest.len() + stride - available, 0.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gsplat> {
        self.splats.iter()
    }
}

impl TsplatArray for GsplatArray {
    type Splat<'a> = &'a Gsplat;

    fn new_capacity(capacity: usize, max_sh_degree: usize) -> Self {
        assert!(max_sh_degree <= 3, "SH degrees must be between 0 and 3");
        Self {
            max_sh_degree,
            splats: Vec::with_capacity(capacity),
            sh_rest: Vec::with_capacity(capacity * 3 * num_sh_coeffs(max_sh_degree)),
        }
    }

    fn max_sh_degree(&self) -> usize {
        self.max_sh_degree
    }

    fn set_max_sh_degree(&mut self, max_sh_degree: usize) {
        assert!(max_sh_degree <= 3, "SH degrees must be between 0 and 3");
        if max_sh_degree >= self.max_sh_degree {
            return;
        }

        let old_coeffs = num_sh_coeffs(self.max_sh_degree);
        let new_coeffs = num_sh_coeffs(max_sh_degree);
        let mut sh_rest = Vec::with_capacity(self.splats.len() * 3 * new_coeffs);
        for row in self.sh_rest.chunks_exact(3 * old_coeffs) {
            for axis in 0..3 {
                let start = axis * old_coeffs;
                sh_rest.extend_from_slice(&row[start..start + new_coeffs]);
            }
        }
        self.sh_rest = sh_rest;
        self.max_sh_degree = max_sh_degree;
    }

    fn len(&self) -> usize {
        self.splats.len()
    }

    fn get(&self, index: usize) -> &Gsplat {
        &self.splats[index]
    }

    fn sh_rest(&self, index: usize) -> &[f32] {
        let stride = self.sh_stride();
        &self.sh_rest[index * stride..(index + 1) * stride]
    }

    fn sh_rest_mut(&mut self, index: usize) -> &mut [f32] {
        let stride = self.sh_stride();
        &mut self.sh_rest[index * stride..(index + 1) * stride]
    }
}
