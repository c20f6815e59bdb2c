//! Append-only store of user-labelled rows.

use crate::table::Table;
use parking_lot::Mutex;
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("missing feature column(s): {}", .0.join(", "))]
    MissingFeatures(Vec<String>),
    #[error("label column '{0}' not found")]
    MissingLabel(String),
    #[error("failed to write feedback file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to write feedback file: {0}")]
    Csv(#[from] csv::Error),
}

/// CSV file of feature columns (card order) followed by the label column.
#[derive(Debug)]
pub struct FeedbackStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FeedbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends every row of `batch`. Rows must carry all `features` and the
    /// label column; nothing is written otherwise. Returns the row count.
    pub fn append(
        &self,
        batch: &Table,
        features: &[String],
        label_col: &str,
    ) -> Result<usize, FeedbackError> {
        let missing: Vec<String> = features
            .iter()
            .filter(|f| !batch.has_column(f))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(FeedbackError::MissingFeatures(missing));
        }
        let label_idx = batch
            .column_index(label_col)
            .ok_or_else(|| FeedbackError::MissingLabel(label_col.to_string()))?;

        let idx: Vec<usize> = features
            .iter()
            .filter_map(|f| batch.column_index(f))
            .chain(std::iter::once(label_idx))
            .collect();

        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let new_file = !self.path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if new_file {
            let header = features.iter().map(String::as_str).chain(std::iter::once(label_col));
            wtr.write_record(header)?;
        }
        for row in batch.rows() {
            wtr.write_record(idx.iter().map(|&i| row[i].to_string()))?;
        }
        wtr.flush()?;

        tracing::info!(rows = batch.n_rows(), path = %self.path.display(), "stored feedback rows");
        Ok(batch.n_rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> Vec<String> {
        vec!["a".into(), "b".into()]
    }

    #[test]
    fn writes_header_once_in_card_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path().join("nested/feedback.csv"));

        let first = Table::from_csv(b"label,b,a,extra\nyes,2,1,z\n").unwrap();
        assert_eq!(store.append(&first, &features(), "label").unwrap(), 1);
        let second = Table::from_json(br#"[{"a": 3, "b": "4", "label": "no"}]"#).unwrap();
        assert_eq!(store.append(&second, &features(), "label").unwrap(), 1);

        let written = fs::read_to_string(store.path()).unwrap();
        assert_eq!(written, "a,b,label\n1,2,yes\n3,4,no\n");
    }

    #[test]
    fn rejects_missing_columns_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::new(dir.path().join("feedback.csv"));

        let no_b = Table::from_csv(b"a,label\n1,yes\n").unwrap();
        match store.append(&no_b, &features(), "label") {
            Err(FeedbackError::MissingFeatures(m)) => assert_eq!(m, vec!["b"]),
            other => panic!("unexpected {other:?}"),
        }
        let no_label = Table::from_csv(b"a,b\n1,2\n").unwrap();
        assert!(matches!(
            store.append(&no_label, &features(), "disposition"),
            Err(FeedbackError::MissingLabel(l)) if l == "disposition"
        ));
        assert!(!store.path().exists());
    }
}
