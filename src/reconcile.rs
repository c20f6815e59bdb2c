//! Aligns an uploaded table to the model's feature schema.
//!
//! Reconciliation never rejects a batch: absent columns are synthesized as
//! all-missing, non-numeric cells become missing, and every missing cell is
//! filled with its column's median over the batch.

use crate::table::Table;

/// Fill value for a column that has no numeric cell at all.
pub const EMPTY_COLUMN_FILL: f64 = 0.0;

/// Dense row-major `f64` matrix whose columns follow the model card.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    n_rows: usize,
    n_cols: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    #[cfg(test)]
    pub(crate) fn from_rows(rows: &[Vec<f64>], n_cols: usize) -> Self {
        let mut data = Vec::with_capacity(rows.len() * n_cols);
        for row in rows {
            assert_eq!(row.len(), n_cols, "row width mismatch");
            data.extend_from_slice(row);
        }
        Self {
            n_rows: rows.len(),
            n_cols,
            data,
        }
    }

    pub fn zeros(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            data: vec![0.0; n_rows * n_cols],
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_cols..(i + 1) * self.n_cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.n_rows).map(move |i| self.row(i))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.rows().map(<[f64]>::to_vec).collect()
    }
}

/// Output of [`reconcile`].
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub matrix: FeatureMatrix,
    /// Card features absent from the upload, in card order.
    pub missing_features: Vec<String>,
    /// Number of cells that were filled by imputation.
    pub imputed_cells: usize,
}

/// Median of the given values; `None` for an empty slice. Reorders `values`.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

pub fn reconcile(batch: &Table, features: &[String]) -> Reconciled {
    let n_rows = batch.n_rows();
    let n_cols = features.len();
    let mut matrix = FeatureMatrix::zeros(n_rows, n_cols);
    let mut missing_features = Vec::new();
    let mut imputed_cells = 0;

    for (j, name) in features.iter().enumerate() {
        let column: Vec<Option<f64>> = match batch.column(name) {
            Some(cells) => cells.map(|c| c.to_f64()).collect(),
            None => {
                missing_features.push(name.clone());
                vec![None; n_rows]
            }
        };

        let mut present: Vec<f64> = column.iter().flatten().copied().collect();
        let fill = median(&mut present).unwrap_or(EMPTY_COLUMN_FILL);

        for (i, v) in column.into_iter().enumerate() {
            matrix.data[i * n_cols + j] = v.unwrap_or_else(|| {
                imputed_cells += 1;
                fill
            });
        }
    }

    if !missing_features.is_empty() {
        tracing::debug!(missing = ?missing_features, "synthesized absent feature columns");
    }

    Reconciled {
        matrix,
        missing_features,
        imputed_cells,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn median_odd_even_and_empty() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn non_numeric_cells_take_column_median() {
        let rows = br#"[{"a": "1.0", "b": "x"}, {"a": "3.0", "b": "4.0"}]"#;
        let batch = Table::from_json(rows).unwrap();
        let out = reconcile(&batch, &names(&["a", "b"]));
        assert_eq!(out.matrix.to_rows(), vec![vec![1.0, 4.0], vec![3.0, 4.0]]);
        assert!(out.missing_features.is_empty());
        assert_eq!(out.imputed_cells, 1);
    }

    #[test]
    fn output_follows_feature_order_and_drops_extras() {
        let batch = Table::new(
            names(&["extra", "b", "a"]),
            vec![vec![Cell::Text("zzz".into()), Cell::Number(2.0), Cell::Number(1.0)]],
        );
        let out = reconcile(&batch, &names(&["a", "b"]));
        assert_eq!(out.matrix.n_cols(), 2);
        assert_eq!(out.matrix.row(0), &[1.0, 2.0]);
    }

    #[test]
    fn absent_columns_are_synthesized_with_fallback() {
        let batch = Table::from_json(br#"[{"a": 1}, {"a": 5}, {"a": "?"}]"#).unwrap();
        let out = reconcile(&batch, &names(&["a", "b", "c"]));
        assert_eq!(out.missing_features, names(&["b", "c"]));
        assert_eq!(out.matrix.n_cols(), 3);
        assert_eq!(
            out.matrix.to_rows(),
            vec![vec![1.0, 0.0, 0.0], vec![5.0, 0.0, 0.0], vec![3.0, 0.0, 0.0]]
        );
        assert_eq!(out.imputed_cells, 7);
    }

    #[test]
    fn infinities_are_imputed() {
        let batch = Table::from_csv(b"a\ninf\n2\n4\n-Infinity\n").unwrap();
        let out = reconcile(&batch, &names(&["a"]));
        assert_eq!(out.matrix.to_rows(), vec![vec![3.0], vec![2.0], vec![4.0], vec![3.0]]);
    }

    #[test]
    fn empty_batch_yields_empty_matrix() {
        let batch = Table::from_csv(b"a,b\n").unwrap();
        let out = reconcile(&batch, &names(&["a", "b"]));
        assert_eq!(out.matrix.n_rows(), 0);
        assert_eq!(out.matrix.rows().count(), 0);
    }
}
