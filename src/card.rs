use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error("failed to read model card at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model card {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

fn default_target() -> String {
    "label".to_string()
}

/// Feature schema and class labels the model was trained with.
///
/// `features` is authoritative for input ordering; nothing beyond presence
/// of the two lists is checked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCard {
    pub features: Vec<String>,
    pub classes: Vec<String>,
    /// Label column expected in feedback uploads.
    #[serde(default = "default_target")]
    pub target: String,
}

impl ModelCard {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CardError> {
        let path = path.as_ref();
        let txt = fs::read_to_string(path).map_err(|source| CardError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&txt).map_err(|source| CardError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(txt: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(txt)
    }

    pub fn n_features(&self) -> usize {
        self.features.len()
    }
}
