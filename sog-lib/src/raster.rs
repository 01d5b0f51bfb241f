use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, ImageResult};

/// An RGBA8 pixel buffer, row-major, zero-initialized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Raster {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl Raster {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height, data: vec![0; width * height * 4] }
    }

    pub fn capacity(&self) -> usize {
        self.width * self.height
    }

    pub fn pixel(&self, cell: usize) -> [u8; 4] {
        let i4 = cell * 4;
        [self.data[i4], self.data[i4 + 1], self.data[i4 + 2], self.data[i4 + 3]]
    }

    pub fn set_pixel(&mut self, cell: usize, rgba: [u8; 4]) {
        let i4 = cell * 4;
        self.data[i4..i4 + 4].copy_from_slice(&rgba);
    }

    pub fn encode_webp(&self) -> ImageResult<Vec<u8>> {
        let mut bytes = Vec::new();
        WebPEncoder::new_lossless(&mut bytes).write_image(
            &self.data,
            self.width as u32,
            self.height as u32,
            ExtendedColorType::Rgba8,
        )?;
        Ok(bytes)
    }

    pub fn decode_webp(bytes: &[u8]) -> ImageResult<Self> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::WebP)?.into_rgba8();
        let (width, height) = image.dimensions();
        Ok(Self { width: width as usize, height: height as usize, data: image.into_raw() })
    }
}
