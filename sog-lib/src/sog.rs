use std::io::{Cursor, Read, Seek};

use glam::Vec3A;
use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};

use crate::archive::{spool_to_tempfile, ArchiveReader, ArchiveWriter};
use crate::codebook::{cluster1d, CODEBOOK_SIZE};
use crate::column::{SplatColumn, Strided};
use crate::error::{Result, SogError};
use crate::gsplat::{Gsplat, GsplatArray};
use crate::kmeans::{Clusterer, KMeans};
use crate::layout::{texture_size, CellLayout, IdentityLayout};
use crate::ordering::morton_order;
use crate::raster::Raster;
use crate::splat_encode::{
    decode_alpha8, decode_quat_smallest3, decode_u16, encode_alpha8, encode_quat_smallest3, encode_u16,
    inv_log_transform, log_transform,
};
use crate::tsplat::{num_sh_coeffs, Tsplat, TsplatArray};

pub const SOG_VERSION: u64 = 2;

pub const META_FILE: &str = "meta.json";
const MEANS_FILES: [&str; 2] = ["means_l.webp", "means_u.webp"];
const QUATS_FILE: &str = "quats.webp";
const SCALES_FILE: &str = "scales.webp";
const SH0_FILE: &str = "sh0.webp";
const SHN_FILES: [&str; 2] = ["shN_centroids.webp", "shN_labels.webp"];

/// Palette entries per row of the SH centroid raster.
pub const SH_PALETTE_ROW: usize = 64;
/// Palette indices are stored in 16 bits.
pub const MAX_SH_PALETTE: usize = 65536;

const DEFAULT_ITERATIONS: usize = 10;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SogAsset {
    #[serde(default)]
    pub generator: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SogMeans {
    pub mins: Vec<f32>,
    pub maxs: Vec<f32>,
    pub files: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SogCodebook {
    pub codebook: Vec<f32>,
    pub files: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SogFiles {
    pub files: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SogShN {
    pub count: usize,
    pub bands: usize,
    pub codebook: Vec<f32>,
    pub files: Vec<String>,
}

/// Contents of `meta.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SogMeta {
    pub version: u64,
    #[serde(default)]
    pub asset: SogAsset,
    pub count: usize,
    #[serde(default)]
    pub antialias: bool,
    pub means: SogMeans,
    pub scales: SogCodebook,
    pub quats: SogFiles,
    pub sh0: SogCodebook,
    #[serde(rename = "shN", default, skip_serializing_if = "Option::is_none")]
    pub sh_n: Option<SogShN>,
}

impl SogMeta {
    pub fn sh_degree(&self) -> usize {
        self.sh_n.as_ref().map(|sh_n| sh_n.bands).unwrap_or(0)
    }

    /// Checks everything that can be checked without looking at the rasters.
    pub fn validate(&self) -> Result<()> {
        if self.version != SOG_VERSION {
            return Err(SogError::format("version", format!("unsupported SOG version {}", self.version)));
        }
        check_format_len("means.mins", self.means.mins.len(), 3)?;
        check_format_len("means.maxs", self.means.maxs.len(), 3)?;
        check_format_len("means.files", self.means.files.len(), 2)?;
        check_format_len("scales.files", self.scales.files.len(), 1)?;
        check_format_len("quats.files", self.quats.files.len(), 1)?;
        check_format_len("sh0.files", self.sh0.files.len(), 1)?;
        check_codebook("scales.codebook", &self.scales.codebook)?;
        check_codebook("sh0.codebook", &self.sh0.codebook)?;

        if let Some(sh_n) = self.sh_n.as_ref() {
            check_format_len("shN.files", sh_n.files.len(), 2)?;
            if !(1..=3).contains(&sh_n.bands) {
                return Err(SogError::format("shN.bands", format!("expected 1..=3 bands, got {}", sh_n.bands)));
            }
            if sh_n.count == 0 || sh_n.count > MAX_SH_PALETTE {
                return Err(SogError::format("shN.count", format!("palette size {} out of range", sh_n.count)));
            }
            check_codebook("shN.codebook", &sh_n.codebook)?;
        }
        Ok(())
    }
}

fn check_format_len(field: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(SogError::format(field, format!("expected {} entries, got {}", expected, len)));
    }
    Ok(())
}

fn check_codebook(field: &str, codebook: &[f32]) -> Result<()> {
    if codebook.len() != CODEBOOK_SIZE {
        return Err(SogError::data(field, format!("expected {} entries, got {}", CODEBOOK_SIZE, codebook.len())));
    }
    Ok(())
}

/// Parses `meta.json`, rejecting any version other than 2 before looking at
/// the remaining fields.
pub fn parse_meta(bytes: &[u8]) -> Result<SogMeta> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| SogError::format(META_FILE, e.to_string()))?;
    if !value.is_object() {
        return Err(SogError::format(META_FILE, "expected a JSON object"));
    }
    match value.get("version").and_then(|v| v.as_u64()) {
        Some(SOG_VERSION) => {}
        _ => {
            let found = value.get("version").map(|v| v.to_string()).unwrap_or_else(|| "<missing>".to_string());
            return Err(SogError::format("version", format!("unsupported SOG version {}", found)));
        }
    }
    let meta: SogMeta = serde_json::from_value(value).map_err(|e| SogError::format(META_FILE, e.to_string()))?;
    meta.validate()?;
    Ok(meta)
}

/// Number of SH palette entries for a cloud of `num_splats`.
pub fn sh_palette_size(num_splats: usize) -> usize {
    let exponent = (num_splats as f64 / 1024.0).log2().floor();
    let size = (2f64.powf(exponent).min(64.0) * 1024.0) as usize;
    size.clamp(1, num_splats.max(1))
}

/// How the SH palette centroids are grouped into columns for the pooled
/// 1-D codebook.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShFlatten {
    /// `r0, r1, .., g0, g1, .., b0, b1, ..`
    #[default]
    AxisMajor,
    /// `r0, g0, b0, r1, g1, b1, ..`
    CoefficientMajor,
}

impl ShFlatten {
    /// Offsets into an axis-major row, in column order.
    fn offsets(self, coeffs: usize) -> Vec<usize> {
        match self {
            ShFlatten::AxisMajor => (0..3 * coeffs).collect(),
            ShFlatten::CoefficientMajor => (0..coeffs).flat_map(|j| (0..3).map(move |axis| axis * coeffs + j)).collect(),
        }
    }
}

fn sh_centroid_cell(entry: usize, coeff: usize, coeffs: usize) -> usize {
    let row = entry / SH_PALETTE_ROW;
    let column = (entry % SH_PALETTE_ROW) * coeffs + coeff;
    row * SH_PALETTE_ROW * coeffs + column
}

fn axis_range(values: impl Iterator<Item = f32>) -> (f32, f32) {
    match values.filter(|v| v.is_finite()).minmax() {
        MinMaxResult::NoElements => (0.0, 0.0),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(min, max) => (min, max),
    }
}

/// Cell index of every ordinal, checked to be in range and distinct.
fn layout_cells(layout: &dyn CellLayout, count: usize, width: usize, height: usize) -> Option<Vec<usize>> {
    let capacity = width * height;
    let mut used = vec![false; capacity];
    let mut cells = Vec::with_capacity(count);
    for ordinal in 0..count {
        let cell = layout.cell(ordinal, width, height);
        if cell >= capacity || used[cell] {
            return None;
        }
        used[cell] = true;
        cells.push(cell);
    }
    Some(cells)
}

pub struct SogEncoder<'a, TA: TsplatArray> {
    pub splats: &'a TA,
    pub max_sh: usize,
    pub iterations: usize,
    pub generator: String,
    pub antialias: bool,
    pub sh_flatten: ShFlatten,
    layout: Box<dyn CellLayout + 'a>,
    clusterer: Box<dyn Clusterer + 'a>,
}

impl<'a, TA: TsplatArray> SogEncoder<'a, TA> {
    pub fn new(splats: &'a TA) -> Self {
        Self {
            splats,
            max_sh: 3,
            iterations: DEFAULT_ITERATIONS,
            generator: format!("sog-lib {}", env!("CARGO_PKG_VERSION")),
            antialias: false,
            sh_flatten: ShFlatten::default(),
            layout: Box::new(IdentityLayout),
            clusterer: Box::new(KMeans),
        }
    }

    pub fn with_max_sh(mut self, max_sh: usize) -> Self {
        self.max_sh = max_sh.min(3);
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_generator(mut self, generator: impl Into<String>) -> Self {
        self.generator = generator.into();
        self
    }

    pub fn with_antialias(mut self, antialias: bool) -> Self {
        self.antialias = antialias;
        self
    }

    pub fn with_sh_flatten(mut self, sh_flatten: ShFlatten) -> Self {
        self.sh_flatten = sh_flatten;
        self
    }

    pub fn with_layout(mut self, layout: impl CellLayout + 'a) -> Self {
        self.layout = Box::new(layout);
        self
    }

    pub fn with_clusterer(mut self, clusterer: impl Clusterer + 'a) -> Self {
        self.clusterer = Box::new(clusterer);
        self
    }

    pub fn encode(&self, logger: impl Fn(&str)) -> Result<Vec<u8>> {
        Ok(self.encode_with_order(logger)?.0)
    }

    /// Encodes the collection, also returning the splat order used: raster
    /// ordinal `i` holds input splat `order[i]`.
    pub fn encode_with_order(&self, logger: impl Fn(&str)) -> Result<(Vec<u8>, Vec<usize>)> {
        let num_splats = self.splats.len();
        if num_splats == 0 {
            return Err(SogError::InvalidInput("cannot encode an empty splat collection".to_string()));
        }
        let input_sh_degree = self.splats.max_sh_degree();
        if input_sh_degree > 3 {
            return Err(SogError::InvalidInput(format!("SH degree {} exceeds 3", input_sh_degree)));
        }
        let sh_degree = input_sh_degree.min(self.max_sh);
        logger(&format!("Encoding SOG: num_splats={}, sh_degree={}", num_splats, sh_degree));

        let order = match morton_order(&SplatColumn::centers(self.splats), num_splats) {
            Ok(order) => order,
            Err(err) => {
                logger(&format!("{}, keeping input order", err));
                (0..num_splats).collect()
            }
        };

        let (width, height) = texture_size(num_splats);
        let cells = layout_cells(self.layout.as_ref(), num_splats, width, height).ok_or_else(|| {
            SogError::InvalidInput(format!("cell layout does not map {} splats into {}x{} distinct cells", num_splats, width, height))
        })?;
        let targets: Vec<(usize, usize)> = order.iter().copied().zip(cells.iter().copied()).collect();
        logger(&format!("Raster size {}x{}", width, height));

        let mut archive = ArchiveWriter::new();

        let means = self.encode_means(&targets, width, height, &mut archive)?;
        self.encode_quats(&targets, width, height, &mut archive)?;
        let scales = self.encode_scales(&targets, width, height, &mut archive)?;
        logger("Encoded means, quats and scales");
        let sh0 = self.encode_sh0(&targets, width, height, &mut archive)?;
        let sh_n = if sh_degree > 0 {
            Some(self.encode_sh_n(sh_degree, &targets, width, height, &mut archive, &logger)?)
        } else {
            None
        };

        let meta = SogMeta {
            version: SOG_VERSION,
            asset: SogAsset { generator: self.generator.clone() },
            count: num_splats,
            antialias: self.antialias,
            means,
            scales,
            quats: SogFiles { files: vec![QUATS_FILE.to_string()] },
            sh0,
            sh_n,
        };
        let meta_bytes = serde_json::to_vec(&meta).map_err(|e| SogError::io(META_FILE, e))?;
        archive.add(META_FILE, &meta_bytes, true)?;

        Ok((archive.finish()?, order))
    }

    fn encode_means(&self, targets: &[(usize, usize)], width: usize, height: usize, archive: &mut ArchiveWriter) -> Result<SogMeans> {
        let num_splats = self.splats.len();
        let ranges: [(f32, f32); 3] = std::array::from_fn(|d| {
            axis_range((0..num_splats).map(|i| log_transform(self.splats.get(i).center()[d])))
        });

        let mut lower = Raster::new(width, height);
        let mut upper = Raster::new(width, height);
        for &(index, cell) in targets {
            let center = self.splats.get(index).center();
            let q: [u16; 3] = std::array::from_fn(|d| encode_u16(log_transform(center[d]), ranges[d].0, ranges[d].1));
            lower.set_pixel(cell, [(q[0] & 0xff) as u8, (q[1] & 0xff) as u8, (q[2] & 0xff) as u8, 255]);
            upper.set_pixel(cell, [(q[0] >> 8) as u8, (q[1] >> 8) as u8, (q[2] >> 8) as u8, 255]);
        }
        write_raster(archive, MEANS_FILES[0], &lower)?;
        write_raster(archive, MEANS_FILES[1], &upper)?;

        Ok(SogMeans {
            mins: ranges.iter().map(|r| r.0).collect(),
            maxs: ranges.iter().map(|r| r.1).collect(),
            files: MEANS_FILES.iter().map(|f| f.to_string()).collect(),
        })
    }

    fn encode_quats(&self, targets: &[(usize, usize)], width: usize, height: usize, archive: &mut ArchiveWriter) -> Result<()> {
        let mut quats = Raster::new(width, height);
        for &(index, cell) in targets {
            quats.set_pixel(cell, encode_quat_smallest3(self.splats.get(index).quaternion()));
        }
        write_raster(archive, QUATS_FILE, &quats)
    }

    fn encode_scales(&self, targets: &[(usize, usize)], width: usize, height: usize, archive: &mut ArchiveWriter) -> Result<SogCodebook> {
        let codebook = cluster1d(&SplatColumn::ln_scales(self.splats), self.splats.len(), self.clusterer.as_ref(), self.iterations)?;

        let mut scales = Raster::new(width, height);
        for &(index, cell) in targets {
            scales.set_pixel(cell, [codebook.label(index, 0), codebook.label(index, 1), codebook.label(index, 2), 255]);
        }
        write_raster(archive, SCALES_FILE, &scales)?;

        Ok(SogCodebook { codebook: codebook.codebook, files: vec![SCALES_FILE.to_string()] })
    }

    fn encode_sh0(&self, targets: &[(usize, usize)], width: usize, height: usize, archive: &mut ArchiveWriter) -> Result<SogCodebook> {
        let codebook = cluster1d(&SplatColumn::sh0(self.splats), self.splats.len(), self.clusterer.as_ref(), self.iterations)?;

        let mut sh0 = Raster::new(width, height);
        for &(index, cell) in targets {
            let alpha = encode_alpha8(self.splats.get(index).logit_opacity());
            sh0.set_pixel(cell, [codebook.label(index, 0), codebook.label(index, 1), codebook.label(index, 2), alpha]);
        }
        write_raster(archive, SH0_FILE, &sh0)?;

        Ok(SogCodebook { codebook: codebook.codebook, files: vec![SH0_FILE.to_string()] })
    }

    fn encode_sh_n(
        &self, sh_degree: usize, targets: &[(usize, usize)], width: usize, height: usize,
        archive: &mut ArchiveWriter, logger: &impl Fn(&str),
    ) -> Result<SogShN> {
        let num_splats = self.splats.len();
        let coeffs = num_sh_coeffs(sh_degree);
        let input_coeffs = num_sh_coeffs(self.splats.max_sh_degree());
        let dims = 3 * coeffs;

        let mut data = Vec::with_capacity(num_splats * dims);
        for index in 0..num_splats {
            let sh = self.splats.sh_rest(index);
            for axis in 0..3 {
                let start = axis * input_coeffs;
                data.extend_from_slice(&sh[start..start + coeffs]);
            }
        }

        let palette_size = sh_palette_size(num_splats);
        logger(&format!("Clustering {}-dimensional SH into a palette of {}", dims, palette_size));
        let palette = self.clusterer.cluster(&data, dims, palette_size, self.iterations)?;
        palette.validate(num_splats, dims, palette_size)?;
        let palette_count = palette.num_centroids();

        let offsets = self.sh_flatten.offsets(coeffs);
        let columns: Vec<Strided> = offsets.iter().map(|&offset| Strided::new(&palette.centroids, dims, offset)).collect();
        let codebook = cluster1d(&columns, palette_count, self.clusterer.as_ref(), self.iterations)?;

        let mut centroids = Raster::new(SH_PALETTE_ROW * coeffs, palette_count.div_ceil(SH_PALETTE_ROW));
        for entry in 0..palette_count {
            for (position, &offset) in offsets.iter().enumerate() {
                let (axis, coeff) = (offset / coeffs, offset % coeffs);
                let i4 = sh_centroid_cell(entry, coeff, coeffs) * 4;
                centroids.data[i4 + axis] = codebook.label(entry, position);
                centroids.data[i4 + 3] = 255;
            }
        }

        let mut labels = Raster::new(width, height);
        for &(index, cell) in targets {
            let label = palette.labels[index];
            labels.set_pixel(cell, [(label & 0xff) as u8, ((label >> 8) & 0xff) as u8, 0, 255]);
        }

        write_raster(archive, SHN_FILES[0], &centroids)?;
        write_raster(archive, SHN_FILES[1], &labels)?;

        Ok(SogShN {
            count: palette_count,
            bands: sh_degree,
            codebook: codebook.codebook,
            files: SHN_FILES.iter().map(|f| f.to_string()).collect(),
        })
    }
}

fn write_raster(archive: &mut ArchiveWriter, name: &str, raster: &Raster) -> Result<()> {
    let bytes = raster.encode_webp().map_err(|e| SogError::io(name, e))?;
    archive.add(name, &bytes, false)
}

fn read_raster<R: Read + Seek>(archive: &mut ArchiveReader<R>, name: &str) -> Result<Raster> {
    let bytes = archive.read(name)?;
    let raster = Raster::decode_webp(&bytes).map_err(|e| SogError::io(name, e))?;
    if raster.data.len() != raster.capacity() * 4 {
        return Err(SogError::io(name, format!("decoded {} bytes for a {}x{} RGBA raster", raster.data.len(), raster.width, raster.height)));
    }
    Ok(raster)
}

fn check_same_shape(field: &str, raster: &Raster, reference: &Raster) -> Result<()> {
    if raster.width != reference.width || raster.height != reference.height {
        return Err(SogError::data(field, format!(
            "raster is {}x{}, expected {}x{}", raster.width, raster.height, reference.width, reference.height,
        )));
    }
    Ok(())
}

struct ShNRasters<'m> {
    meta: &'m SogShN,
    centroids: Raster,
    labels: Raster,
}

pub struct SogDecoder<'a> {
    layout: Box<dyn CellLayout + 'a>,
}

impl Default for SogDecoder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> SogDecoder<'a> {
    pub fn new() -> Self {
        Self { layout: Box::new(IdentityLayout) }
    }

    pub fn with_layout(mut self, layout: impl CellLayout + 'a) -> Self {
        self.layout = Box::new(layout);
        self
    }

    pub fn decode_bytes(&self, bytes: &[u8], logger: impl Fn(&str)) -> Result<GsplatArray> {
        self.decode(Cursor::new(bytes), logger)
    }

    /// Decodes from a non-seekable stream by spooling it to a temporary file first.
    pub fn decode_stream<R: Read>(&self, reader: R, logger: impl Fn(&str)) -> Result<GsplatArray> {
        let file = spool_to_tempfile(reader)?;
        self.decode(file, logger)
    }

    pub fn read_meta<R: Read + Seek>(&self, reader: R) -> Result<SogMeta> {
        let mut archive = ArchiveReader::open(reader)?;
        parse_meta(&archive.read(META_FILE)?)
    }

    /// Decodes a complete container. Every shape check runs before any splat
    /// is produced; splats come back in raster order.
    pub fn decode<R: Read + Seek>(&self, reader: R, logger: impl Fn(&str)) -> Result<GsplatArray> {
        let mut archive = ArchiveReader::open(reader)?;
        let meta = parse_meta(&archive.read(META_FILE)?)?;
        let num_splats = meta.count;
        let sh_degree = meta.sh_degree();
        logger(&format!("Decoding SOG: num_splats={}, sh_degree={}, generator={:?}", num_splats, sh_degree, meta.asset.generator));

        let means_l = read_raster(&mut archive, &meta.means.files[0])?;
        let means_u = read_raster(&mut archive, &meta.means.files[1])?;
        let quats = read_raster(&mut archive, &meta.quats.files[0])?;
        let scales = read_raster(&mut archive, &meta.scales.files[0])?;
        let sh0 = read_raster(&mut archive, &meta.sh0.files[0])?;

        check_same_shape("means.files", &means_u, &means_l)?;
        check_same_shape("quats.files", &quats, &means_l)?;
        check_same_shape("scales.files", &scales, &means_l)?;
        check_same_shape("sh0.files", &sh0, &means_l)?;
        let (width, height) = texture_size(num_splats);
        if means_l.width != width || means_l.height != height {
            return Err(SogError::data("count", format!(
                "{} splats need {}x{} rasters, found {}x{}", num_splats, width, height, means_l.width, means_l.height,
            )));
        }

        let sh_n = match meta.sh_n.as_ref() {
            Some(sh_n) => {
                let centroids = read_raster(&mut archive, &sh_n.files[0])?;
                let labels = read_raster(&mut archive, &sh_n.files[1])?;
                check_same_shape("shN.files", &labels, &means_l)?;
                let coeffs = num_sh_coeffs(sh_n.bands);
                if centroids.width != SH_PALETTE_ROW * coeffs {
                    return Err(SogError::data("shN.bands", format!(
                        "centroid raster width {} does not match {} bands", centroids.width, sh_n.bands,
                    )));
                }
                if centroids.height != sh_n.count.div_ceil(SH_PALETTE_ROW) {
                    return Err(SogError::data("shN.count", format!(
                        "{} palette entries need {} centroid rows, found {}",
                        sh_n.count, sh_n.count.div_ceil(SH_PALETTE_ROW), centroids.height,
                    )));
                }
                Some(ShNRasters { meta: sh_n, centroids, labels })
            }
            None => None,
        };

        let cells = layout_cells(self.layout.as_ref(), num_splats, means_l.width, means_l.height).ok_or_else(|| {
            SogError::data("layout", format!("cell layout does not map {} splats into distinct raster cells", num_splats))
        })?;

        let palette = sh_n.as_ref().map(decode_sh_palette).unwrap_or_default();
        let dims = 3 * num_sh_coeffs(sh_degree);

        let mins = &meta.means.mins;
        let maxs = &meta.means.maxs;
        let mut splats = GsplatArray::new_capacity(num_splats, sh_degree);
        for (ordinal, &cell) in cells.iter().enumerate() {
            let lower = means_l.pixel(cell);
            let upper = means_u.pixel(cell);
            let center = Vec3A::from_array(std::array::from_fn(|d| {
                let q = lower[d] as u16 | ((upper[d] as u16) << 8);
                inv_log_transform(decode_u16(q, mins[d], maxs[d]))
            }));

            let rotation = quats.pixel(cell);
            let quaternion = decode_quat_smallest3(rotation).ok_or_else(|| {
                SogError::data("quats.files", format!("invalid rotation mode {} for splat {}", rotation[3], ordinal))
            })?;

            let scale = scales.pixel(cell);
            let color = sh0.pixel(cell);
            let splat = Gsplat {
                center,
                ln_scales: Vec3A::from_array(std::array::from_fn(|d| meta.scales.codebook[scale[d] as usize])),
                quaternion,
                logit_opacity: decode_alpha8(color[3]),
                sh0: Vec3A::from_array(std::array::from_fn(|d| meta.sh0.codebook[color[d] as usize])),
            };

            match sh_n.as_ref() {
                Some(sh_n) => {
                    let label_pixel = sh_n.labels.pixel(cell);
                    let label = label_pixel[0] as usize | ((label_pixel[1] as usize) << 8);
                    if label >= sh_n.meta.count {
                        return Err(SogError::data("shN.files", format!(
                            "palette index {} for splat {} exceeds palette size {}", label, ordinal, sh_n.meta.count,
                        )));
                    }
                    splats.push(splat, &palette[label * dims..(label + 1) * dims]);
                }
                None => splats.push(splat, &[]),
            }
        }

        Ok(splats)
    }
}

/// Expands the centroid raster into `count` axis-major coefficient rows.
fn decode_sh_palette(sh_n: &ShNRasters) -> Vec<f32> {
    let coeffs = num_sh_coeffs(sh_n.meta.bands);
    let codebook = &sh_n.meta.codebook;
    let mut palette = Vec::with_capacity(sh_n.meta.count * 3 * coeffs);
    for entry in 0..sh_n.meta.count {
        for axis in 0..3 {
            for coeff in 0..coeffs {
                let label = sh_n.centroids.data[sh_centroid_cell(entry, coeff, coeffs) * 4 + axis];
                palette.push(codebook[label as usize]);
            }
        }
    }
    palette
}

pub fn encode_sog<TA: TsplatArray>(splats: &TA, logger: impl Fn(&str)) -> Result<Vec<u8>> {
    SogEncoder::new(splats).encode(logger)
}

pub fn decode_sog(bytes: &[u8], logger: impl Fn(&str)) -> Result<GsplatArray> {
    SogDecoder::new().decode_bytes(bytes, logger)
}

pub fn decode_sog_reader<R: Read>(reader: R, logger: impl Fn(&str)) -> Result<GsplatArray> {
    SogDecoder::new().decode_stream(reader, logger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_cloud(count: usize, sh_degree: usize, seed: u64) -> GsplatArray {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut splats = GsplatArray::new_capacity(count, sh_degree);
        let stride = splats.sh_stride();
        for _ in 0..count {
            let quaternion = Quat::from_xyzw(
                rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0),
            ).normalize();
            let splat = Gsplat {
                center: Vec3A::new(rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0)),
                ln_scales: Vec3A::new(rng.gen_range(-5.0..0.0), rng.gen_range(-5.0..0.0), rng.gen_range(-5.0..0.0)),
                quaternion,
                logit_opacity: rng.gen_range(-4.0..4.0),
                sh0: Vec3A::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)),
            };
            let sh: Vec<f32> = (0..stride).map(|_| rng.gen_range(-0.3..0.3)).collect();
            splats.push(splat, &sh);
        }
        splats
    }

    fn rewrite_archive(bytes: &[u8], edit_meta: impl FnOnce(&mut serde_json::Value), replace: Option<(&str, Vec<u8>)>) -> Vec<u8> {
        let mut reader = ArchiveReader::open(Cursor::new(bytes)).unwrap();
        let mut writer = ArchiveWriter::new();
        let mut edit_meta = Some(edit_meta);
        for name in reader.names() {
            let mut data = reader.read(&name).unwrap();
            if name == META_FILE {
                let mut meta: serde_json::Value = serde_json::from_slice(&data).unwrap();
                (edit_meta.take().unwrap())(&mut meta);
                data = serde_json::to_vec(&meta).unwrap();
            }
            if let Some((replace_name, replace_data)) = replace.as_ref() {
                if name == *replace_name {
                    data = replace_data.clone();
                }
            }
            writer.add(&name, &data, false).unwrap();
        }
        writer.finish().unwrap()
    }

    fn encoded_cloud() -> Vec<u8> {
        encode_sog(&random_cloud(200, 1, 5), |_| {}).unwrap()
    }

    #[test]
    fn palette_size_follows_splat_count() {
        assert_eq!(sh_palette_size(1), 1);
        assert_eq!(sh_palette_size(300), 256);
        assert_eq!(sh_palette_size(1024), 1024);
        assert_eq!(sh_palette_size(10_000), 8192);
        assert_eq!(sh_palette_size(10_000_000), 65536);
    }

    #[test]
    fn centroid_cells_wrap_every_64_entries() {
        assert_eq!(sh_centroid_cell(0, 2, 3), 2);
        assert_eq!(sh_centroid_cell(63, 0, 3), 189);
        assert_eq!(sh_centroid_cell(64, 0, 3), 192);
        assert_eq!(sh_centroid_cell(65, 1, 8), 64 * 8 + 8 + 1);
    }

    #[test]
    fn manifest_lists_every_entry() {
        let bytes = encoded_cloud();
        let mut reader = ArchiveReader::open(Cursor::new(&bytes[..])).unwrap();
        let meta = parse_meta(&reader.read(META_FILE).unwrap()).unwrap();
        assert_eq!(meta.version, 2);
        assert_eq!(meta.count, 200);
        assert_eq!(meta.means.files, vec!["means_l.webp", "means_u.webp"]);
        let sh_n = meta.sh_n.as_ref().unwrap();
        assert_eq!(sh_n.bands, 1);
        assert_eq!(sh_n.count, 128);
        assert_eq!(sh_n.files, vec!["shN_centroids.webp", "shN_labels.webp"]);
        assert!(meta.scales.codebook.windows(2).all(|w| w[0] <= w[1]));
        for name in ["means_l.webp", "means_u.webp", "quats.webp", "scales.webp", "sh0.webp", "shN_centroids.webp", "shN_labels.webp"] {
            assert!(reader.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn zero_degree_omits_sh_n() {
        let bytes = encode_sog(&random_cloud(50, 0, 1), |_| {}).unwrap();
        let mut reader = ArchiveReader::open(Cursor::new(&bytes[..])).unwrap();
        let meta_bytes = reader.read(META_FILE).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&meta_bytes).unwrap();
        assert!(value.get("shN").is_none());
        assert!(!reader.contains("shN_labels.webp"));
    }

    #[test]
    fn version_gate_rejects_other_versions() {
        let bytes = encoded_cloud();
        for version in [serde_json::json!(1), serde_json::json!(3), serde_json::json!("2"), serde_json::Value::Null] {
            let tampered = rewrite_archive(&bytes, |meta| meta["version"] = version, None);
            match decode_sog(&tampered, |_| {}) {
                Err(SogError::Format { field, .. }) => assert_eq!(field, "version"),
                other => panic!("expected version error, got {:?}", other.map(|s| s.splats.len())),
            }
        }
    }

    #[test]
    fn wrong_array_lengths_are_format_errors() {
        let bytes = encoded_cloud();
        let tampered = rewrite_archive(&bytes, |meta| meta["means"]["mins"] = serde_json::json!([0.0, 0.0]), None);
        assert!(decode_sog(&tampered, |_| {}).unwrap_err().is_format());

        let tampered = rewrite_archive(&bytes, |meta| meta["shN"]["files"] = serde_json::json!(["shN_centroids.webp"]), None);
        assert!(decode_sog(&tampered, |_| {}).unwrap_err().is_format());
    }

    #[test]
    fn missing_raster_is_a_format_error() {
        let bytes = encoded_cloud();
        let tampered = rewrite_archive(&bytes, |meta| meta["quats"]["files"] = serde_json::json!(["nope.webp"]), None);
        match decode_sog(&tampered, |_| {}) {
            Err(SogError::Format { field, .. }) => assert_eq!(field, "nope.webp"),
            other => panic!("expected missing entry, got {:?}", other.map(|s| s.splats.len())),
        }
    }

    #[test]
    fn short_codebook_is_a_data_error() {
        let bytes = encoded_cloud();
        let tampered = rewrite_archive(&bytes, |meta| {
            meta["scales"]["codebook"].as_array_mut().unwrap().pop();
        }, None);
        match decode_sog(&tampered, |_| {}) {
            Err(SogError::Data { field, .. }) => assert_eq!(field, "scales.codebook"),
            other => panic!("expected codebook error, got {:?}", other.map(|s| s.splats.len())),
        }
    }

    #[test]
    fn shape_mismatches_are_data_errors() {
        let bytes = encoded_cloud();

        let tampered = rewrite_archive(&bytes, |meta| meta["count"] = serde_json::json!(100_000), None);
        assert!(decode_sog(&tampered, |_| {}).unwrap_err().is_data());

        let tampered = rewrite_archive(&bytes, |meta| meta["shN"]["bands"] = serde_json::json!(2), None);
        match decode_sog(&tampered, |_| {}) {
            Err(SogError::Data { field, .. }) => assert_eq!(field, "shN.bands"),
            other => panic!("expected band error, got {:?}", other.map(|s| s.splats.len())),
        }

        let small = Raster::new(4, 4).encode_webp().unwrap();
        let tampered = rewrite_archive(&bytes, |_| {}, Some(("scales.webp", small)));
        match decode_sog(&tampered, |_| {}) {
            Err(SogError::Data { field, .. }) => assert_eq!(field, "scales.files"),
            other => panic!("expected shape error, got {:?}", other.map(|s| s.splats.len())),
        }
    }

    #[test]
    fn raster_dimensions_must_match_count() {
        // 100 splats need 12x12 rasters, the archive holds 16x16.
        let tampered = rewrite_archive(&encoded_cloud(), |meta| meta["count"] = serde_json::json!(100), None);
        match decode_sog(&tampered, |_| {}) {
            Err(SogError::Data { field, .. }) => assert_eq!(field, "count"),
            other => panic!("expected dimension error, got {:?}", other.map(|s| s.splats.len())),
        }
    }

    #[test]
    fn palette_count_must_match_centroid_rows() {
        // 128 entries fill two centroid rows; 200 would need four.
        let tampered = rewrite_archive(&encoded_cloud(), |meta| meta["shN"]["count"] = serde_json::json!(200), None);
        match decode_sog(&tampered, |_| {}) {
            Err(SogError::Data { field, .. }) => assert_eq!(field, "shN.count"),
            other => panic!("expected palette count error, got {:?}", other.map(|s| s.splats.len())),
        }
    }

    #[test]
    fn palette_label_out_of_range_is_a_data_error() {
        let (width, height) = texture_size(200);
        let mut labels = Raster::new(width, height);
        for cell in 0..labels.capacity() {
            labels.set_pixel(cell, [255, 255, 0, 255]);
        }
        let tampered = rewrite_archive(&encoded_cloud(), |_| {}, Some(("shN_labels.webp", labels.encode_webp().unwrap())));
        match decode_sog(&tampered, |_| {}) {
            Err(SogError::Data { field, .. }) => assert_eq!(field, "shN.files"),
            other => panic!("expected label error, got {:?}", other.map(|s| s.splats.len())),
        }
    }

    #[test]
    fn non_finite_position_keeps_input_order() {
        let mut splats = random_cloud(50, 1, 6);
        splats.splats[3].center.x = f32::NAN;
        let messages = std::cell::RefCell::new(Vec::new());
        let (bytes, order) = SogEncoder::new(&splats)
            .encode_with_order(|s| messages.borrow_mut().push(s.to_string()))
            .unwrap();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
        assert!(messages.borrow().iter().any(|m| m.contains("keeping input order")));

        let decoded = decode_sog(&bytes, |_| {}).unwrap();
        assert_eq!(decoded.len(), 50);
        for i in (0..50).filter(|&i| i != 3) {
            assert!((decoded.get(i).center - splats.get(i).center).abs().max_element() < 0.01);
        }
    }

    #[test]
    fn invalid_rotation_mode_is_a_data_error() {
        let bytes = encoded_cloud();
        let (width, height) = texture_size(200);
        let blank = Raster::new(width, height).encode_webp().unwrap();
        let tampered = rewrite_archive(&bytes, |_| {}, Some(("quats.webp", blank)));
        assert!(decode_sog(&tampered, |_| {}).unwrap_err().is_data());
    }

    #[test]
    fn corrupt_image_is_an_io_error() {
        let bytes = encoded_cloud();
        let tampered = rewrite_archive(&bytes, |_| {}, Some(("sh0.webp", vec![1, 2, 3, 4])));
        match decode_sog(&tampered, |_| {}) {
            Err(SogError::Io { entry, .. }) => assert_eq!(entry, "sh0.webp"),
            other => panic!("expected io error, got {:?}", other.map(|s| s.splats.len())),
        }
    }

    #[test]
    fn empty_collection_is_rejected() {
        let splats = GsplatArray::new();
        assert!(matches!(encode_sog(&splats, |_| {}), Err(SogError::InvalidInput(_))));
    }

    #[test]
    fn sh_roundtrip_for_both_flatten_orders() {
        // Eight distinct SH patterns fit easily in a 128-entry palette.
        let mut splats = random_cloud(200, 1, 9);
        for index in 0..200 {
            let pattern = (index % 8) as f32;
            for (i, value) in splats.sh_rest_mut(index).iter_mut().enumerate() {
                *value = (pattern - 3.5) * 0.05 + i as f32 * 0.01;
            }
        }
        for flatten in [ShFlatten::AxisMajor, ShFlatten::CoefficientMajor] {
            let (bytes, order) = SogEncoder::new(&splats).with_sh_flatten(flatten).encode_with_order(|_| {}).unwrap();
            let decoded = decode_sog(&bytes, |_| {}).unwrap();
            assert_eq!(decoded.max_sh_degree(), 1);
            for (ordinal, &index) in order.iter().enumerate() {
                for (a, b) in decoded.sh_rest(ordinal).iter().zip(splats.sh_rest(index)) {
                    assert!((a - b).abs() < 0.01, "{:?}: {} vs {}", flatten, a, b);
                }
            }
        }
    }

    #[test]
    fn max_sh_drops_higher_bands() {
        let splats = random_cloud(100, 2, 4);
        let bytes = SogEncoder::new(&splats).with_max_sh(0).encode(|_| {}).unwrap();
        let decoded = decode_sog(&bytes, |_| {}).unwrap();
        assert_eq!(decoded.max_sh_degree(), 0);
        assert_eq!(decoded.len(), 100);
    }

    struct ReversedLayout;

    impl CellLayout for ReversedLayout {
        fn cell(&self, ordinal: usize, width: usize, height: usize) -> usize {
            width * height - 1 - ordinal
        }
    }

    #[test]
    fn custom_layout_roundtrips_when_shared() {
        let splats = random_cloud(64, 0, 2);
        let plain = decode_sog(&encode_sog(&splats, |_| {}).unwrap(), |_| {}).unwrap();
        let bytes = SogEncoder::new(&splats).with_layout(ReversedLayout).encode(|_| {}).unwrap();
        let reversed = SogDecoder::new().with_layout(ReversedLayout).decode_bytes(&bytes, |_| {}).unwrap();
        assert_eq!(plain.len(), reversed.len());
        for i in 0..plain.len() {
            assert_eq!(plain.get(i).center, reversed.get(i).center);
            assert_eq!(plain.get(i).quaternion, reversed.get(i).quaternion);
        }
    }

    #[test]
    fn stream_decode_matches_bytes_decode() {
        let bytes = encoded_cloud();
        let from_bytes = decode_sog(&bytes, |_| {}).unwrap();
        let from_stream = decode_sog_reader(&bytes[..], |_| {}).unwrap();
        assert_eq!(from_bytes.splats, from_stream.splats);
        assert_eq!(from_bytes.sh_rest, from_stream.sh_rest);
    }
}
