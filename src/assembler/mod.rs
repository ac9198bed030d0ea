//! Collects the cells of one cell type across samples into a single genes × cells matrix.

use std::collections::BTreeMap;

use nalgebra_sparse::CscMatrix;

use crate::error::{Result, SubpopError};
use crate::sparse::{hstack, MatrixSelect};
use crate::utils::SampleIdentifier;

/// Normalized expression of one sample with a cell type label per column.
#[derive(Debug, Clone)]
pub struct SampleMatrix {
    /// genes × cells
    pub matrix: CscMatrix<f64>,
    pub cell_types: Vec<String>,
}

impl SampleMatrix {
    pub fn new(matrix: CscMatrix<f64>, cell_types: Vec<String>) -> Result<Self> {
        if cell_types.len() != matrix.ncols() {
            return Err(SubpopError::input(format!(
                "{} cell type labels for {} cells",
                cell_types.len(),
                matrix.ncols()
            )));
        }
        Ok(Self { matrix, cell_types })
    }

    pub fn columns_of(&self, cell_type: &str) -> Vec<usize> {
        self.cell_types
            .iter()
            .enumerate()
            .filter_map(|(i, label)| (label == cell_type).then_some(i))
            .collect()
    }
}

/// Concatenated matrix and, per column, the sample and column it came from.
#[derive(Debug, Clone)]
pub struct AssembledMatrix<S: SampleIdentifier> {
    pub matrix: CscMatrix<f64>,
    pub cells: Vec<(S, usize)>,
}

impl<S: SampleIdentifier> AssembledMatrix<S> {
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }
}

/// Selects the columns labelled `cell_type` from each sample and concatenates them.
///
/// Samples are visited in `selection` order, or in key order when `selection` is
/// `None`. No matching cells gives a matrix with zero columns.
pub fn assemble_cell_type<S: SampleIdentifier>(
    samples: &BTreeMap<S, SampleMatrix>,
    selection: Option<&[S]>,
    cell_type: &str,
) -> Result<AssembledMatrix<S>> {
    if samples.is_empty() {
        return Err(SubpopError::input("no samples provided"));
    }

    let chosen: Vec<(&S, &SampleMatrix)> = match selection {
        Some(ids) => {
            if ids.is_empty() {
                return Err(SubpopError::input("sample selection is empty"));
            }
            ids.iter()
                .map(|id| {
                    samples
                        .get_key_value(id)
                        .ok_or_else(|| SubpopError::input(format!("unknown sample {:?}", id)))
                })
                .collect::<Result<_>>()?
        }
        None => samples.iter().collect(),
    };

    let n_genes = chosen[0].1.matrix.nrows();
    let mut blocks = Vec::with_capacity(chosen.len());
    let mut cells = Vec::new();

    for (id, sample) in &chosen {
        if sample.cell_types.len() != sample.matrix.ncols() {
            return Err(SubpopError::input(format!(
                "sample {:?} has {} cell type labels for {} cells",
                id,
                sample.cell_types.len(),
                sample.matrix.ncols()
            )));
        }
        if sample.matrix.nrows() != n_genes {
            return Err(SubpopError::input(format!(
                "sample {:?} has {} genes, expected {}",
                id,
                sample.matrix.nrows(),
                n_genes
            )));
        }

        let columns = sample.columns_of(cell_type);
        log::debug!("Sample {:?}: {} cells of type {}", id, columns.len(), cell_type);
        cells.extend(columns.iter().map(|&c| ((*id).clone(), c)));
        blocks.push(sample.matrix.select_cols(&columns)?);
    }

    let refs: Vec<&CscMatrix<f64>> = blocks.iter().collect();
    let matrix = hstack(&refs)?;
    log::info!(
        "Assembled {} cells of type {} from {} samples ({} genes)",
        matrix.ncols(),
        cell_type,
        chosen.len(),
        n_genes
    );

    Ok(AssembledMatrix { matrix, cells })
}
