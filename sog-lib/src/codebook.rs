use ordered_float::OrderedFloat;

use crate::column::Column;
use crate::error::Result;
use crate::kmeans::Clusterer;

pub const CODEBOOK_SIZE: usize = 256;

/// A shared ascending codebook and one byte label per (row, column).
#[derive(Clone, Debug)]
pub struct Codebook1d {
    pub codebook: Vec<f32>,
    pub num_columns: usize,
    /// Row-major: `labels[row * num_columns + column]`.
    pub labels: Vec<u8>,
}

impl Codebook1d {
    pub fn label(&self, row: usize, column: usize) -> u8 {
        self.labels[row * self.num_columns + column]
    }
}

/// Quantizes every value of `columns` (each `num_rows` long) against one
/// pooled 256-entry codebook. The codebook is sorted ascending so labels
/// are reproducible regardless of the clusterer's centroid order.
pub fn cluster1d<C: Column>(columns: &[C], num_rows: usize, clusterer: &dyn Clusterer, iterations: usize) -> Result<Codebook1d> {
    let num_columns = columns.len();
    let mut data = Vec::with_capacity(num_rows * num_columns);
    for column in columns {
        data.extend((0..num_rows).map(|row| column.value(row)));
    }

    let result = clusterer.cluster(&data, 1, CODEBOOK_SIZE, iterations)?;
    result.validate(data.len(), 1, CODEBOOK_SIZE)?;

    let mut order: Vec<usize> = (0..result.num_centroids()).collect();
    order.sort_by_key(|&i| OrderedFloat(result.centroid(i)[0]));

    let mut rank = vec![0u8; order.len()];
    for (new_index, &old_index) in order.iter().enumerate() {
        rank[old_index] = new_index as u8;
    }

    let mut codebook: Vec<f32> = order.iter().map(|&i| result.centroid(i)[0]).collect();
    // Small inputs yield fewer centroids; repeat the largest so the codebook
    // stays full-size and non-decreasing.
    let pad = codebook.last().copied().unwrap_or(0.0);
    codebook.resize(CODEBOOK_SIZE, pad);

    let mut labels = vec![0u8; num_rows * num_columns];
    for column in 0..num_columns {
        for row in 0..num_rows {
            labels[row * num_columns + column] = rank[result.labels[column * num_rows + row] as usize];
        }
    }

    Ok(Codebook1d { codebook, num_columns, labels })
}
