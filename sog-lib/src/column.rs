use crate::tsplat::{Tsplat, TsplatArray};

/// Per-row scalar extraction, used wherever a pass reads one attribute
/// channel across every splat (or every codebook row).
pub trait Column {
    fn value(&self, row: usize) -> f32;
}

impl Column for [f32] {
    fn value(&self, row: usize) -> f32 { self[row] }
}

impl Column for Vec<f32> {
    fn value(&self, row: usize) -> f32 { self[row] }
}

impl<C: Column + ?Sized> Column for &C {
    fn value(&self, row: usize) -> f32 { (**self).value(row) }
}

/// One column of a row-major matrix.
#[derive(Clone, Copy, Debug)]
pub struct Strided<'a> {
    pub data: &'a [f32],
    pub stride: usize,
    pub offset: usize,
}

impl<'a> Strided<'a> {
    pub fn new(data: &'a [f32], stride: usize, offset: usize) -> Self {
        Self { data, stride, offset }
    }
}

impl Column for Strided<'_> {
    fn value(&self, row: usize) -> f32 { self.data[row * self.stride + self.offset] }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplatAttr {
    Center(usize),
    LnScale(usize),
    Sh0(usize),
}

/// One scalar attribute read straight out of a splat collection.
pub struct SplatColumn<'a, TA> {
    splats: &'a TA,
    attr: SplatAttr,
}

impl<'a, TA: TsplatArray> SplatColumn<'a, TA> {
    pub fn new(splats: &'a TA, attr: SplatAttr) -> Self {
        Self { splats, attr }
    }

    pub fn centers(splats: &'a TA) -> [Self; 3] {
        [0, 1, 2].map(|d| Self::new(splats, SplatAttr::Center(d)))
    }

    pub fn ln_scales(splats: &'a TA) -> [Self; 3] {
        [0, 1, 2].map(|d| Self::new(splats, SplatAttr::LnScale(d)))
    }

    pub fn sh0(splats: &'a TA) -> [Self; 3] {
        [0, 1, 2].map(|d| Self::new(splats, SplatAttr::Sh0(d)))
    }
}

impl<TA: TsplatArray> Column for SplatColumn<'_, TA> {
    fn value(&self, row: usize) -> f32 {
        let splat = self.splats.get(row);
        match self.attr {
            SplatAttr::Center(d) => splat.center()[d],
            SplatAttr::LnScale(d) => splat.ln_scales()[d],
            SplatAttr::Sh0(d) => splat.sh0()[d],
        }
    }
}
