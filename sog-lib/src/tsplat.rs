use glam::{Quat, Vec3A};

use crate::splat_encode::sigmoid;

/// Number of higher-order SH coefficients per color axis for each degree.
pub const SH_COEFFS: [usize; 4] = [0, 3, 8, 15];

pub fn num_sh_coeffs(sh_degree: usize) -> usize {
    SH_COEFFS[sh_degree.min(3)]
}

/// Read access to a single splat, in the raw domains the SOG container stores:
/// log-domain scales, logit-domain opacity and the DC spherical harmonic term.
pub trait Tsplat: std::fmt::Debug {
    fn center(&self) -> Vec3A;
    fn ln_scales(&self) -> Vec3A;
    fn quaternion(&self) -> Quat;
    fn logit_opacity(&self) -> f32;
    fn sh0(&self) -> Vec3A;

    fn opacity(&self) -> f32 { sigmoid(self.logit_opacity()) }

    fn scales(&self) -> Vec3A {
        Vec3A::from_array(self.ln_scales().to_array().map(f32::exp))
    }

    fn max_scale(&self) -> f32 { self.scales().max_element() }

    fn is_finite(&self) -> bool {
        self.center().is_finite() && self.ln_scales().is_finite() && self.quaternion().is_finite() &&
            self.logit_opacity().is_finite() && self.sh0().is_finite()
    }
}

impl<T: Tsplat + ?Sized> Tsplat for &T {
    fn center(&self) -> Vec3A { (**self).center() }
    fn ln_scales(&self) -> Vec3A { (**self).ln_scales() }
    fn quaternion(&self) -> Quat { (**self).quaternion() }
    fn logit_opacity(&self) -> f32 { (**self).logit_opacity() }
    fn sh0(&self) -> Vec3A { (**self).sh0() }
}

/// An ordered splat collection sharing one SH degree.
///
/// Higher-order SH coefficients are exposed per splat as `3 * num_sh_coeffs(degree)`
/// floats, axis-major: all red coefficients, then green, then blue.
pub trait TsplatArray {
    type Splat<'a>: Tsplat where Self: 'a;

    fn new() -> Self where Self: Sized { Self::new_capacity(0, 0) }
    fn new_capacity(capacity: usize, max_sh_degree: usize) -> Self;

    fn max_sh_degree(&self) -> usize;
    /// Lowers the SH degree, keeping the leading coefficients of each axis.
    /// Raising it is a no-op.
    fn set_max_sh_degree(&mut self, max_sh_degree: usize);

    fn len(&self) -> usize;
    fn is_empty(&self) -> bool { self.len() == 0 }
    fn get(&self, index: usize) -> Self::Splat<'_>;

    fn sh_rest(&self, index: usize) -> &[f32];
    fn sh_rest_mut(&mut self, index: usize) -> &mut [f32];
}
