//! Model artifacts and the capabilities they expose.
//!
//! An artifact is inspected once at load time and wrapped in a [`Classifier`]
//! that records whether it can produce class probabilities or only labels.

use crate::reconcile::FeatureMatrix;
use std::path::Path;

pub mod native;
#[cfg(feature = "torchscript")]
pub mod torch;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model artifact at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model artifact {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported model artifact {0}")]
    UnsupportedFormat(String),
    #[error("invalid model artifact: {0}")]
    Invalid(String),
    #[error("feature length mismatch: got {got}, expected {expected}")]
    FeatureMismatch { got: usize, expected: usize },
    #[error("unexpected model output: {0}")]
    Output(String),
    #[cfg(feature = "torchscript")]
    #[error("torch: {0}")]
    Torch(#[from] tch::TchError),
}

/// Label-producing capability. Labels are indices into the class list.
pub trait LabelModel: Send + Sync {
    fn predict_labels(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError>;

    /// Class ordering baked into the artifact, if it carries one.
    fn classes(&self) -> Option<&[String]> {
        None
    }

    /// Input width the artifact was built for, if it records it.
    fn n_features(&self) -> Option<usize> {
        None
    }

    /// One importance score per input feature, if the model can tell.
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }
}

/// Probability-producing capability; also able to emit labels.
pub trait ProbabilityModel: LabelModel {
    /// `rows × classes` probabilities.
    fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Probabilistic,
    LabelOnly,
}

/// A loaded artifact, tagged with the inference strategy it supports.
pub enum Classifier {
    Probabilistic(Box<dyn ProbabilityModel>),
    LabelOnly(Box<dyn LabelModel>),
}

impl Classifier {
    pub fn kind(&self) -> ModelKind {
        match self {
            Classifier::Probabilistic(_) => ModelKind::Probabilistic,
            Classifier::LabelOnly(_) => ModelKind::LabelOnly,
        }
    }

    pub fn predict_labels(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
        match self {
            Classifier::Probabilistic(m) => m.predict_labels(x),
            Classifier::LabelOnly(m) => m.predict_labels(x),
        }
    }

    pub fn classes(&self) -> Option<&[String]> {
        match self {
            Classifier::Probabilistic(m) => m.classes(),
            Classifier::LabelOnly(m) => m.classes(),
        }
    }

    pub fn n_features(&self) -> Option<usize> {
        match self {
            Classifier::Probabilistic(m) => m.n_features(),
            Classifier::LabelOnly(m) => m.n_features(),
        }
    }

    pub fn feature_importances(&self) -> Option<Vec<f64>> {
        match self {
            Classifier::Probabilistic(m) => m.feature_importances(),
            Classifier::LabelOnly(m) => m.feature_importances(),
        }
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier").field("kind", &self.kind()).finish()
    }
}

/// Loads an artifact, picking the decoder from the file extension.
///
/// `n_features` is the card's feature width; TorchScript modules are tried
/// with an input of that width.
pub fn load(path: impl AsRef<Path>, n_features: usize) -> Result<Classifier, ModelError> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "json" => native::load(path),
        "pt" | "ts" | "torchscript" => load_torchscript(path, n_features),
        _ => Err(ModelError::UnsupportedFormat(path.display().to_string())),
    }
}

#[cfg(feature = "torchscript")]
fn load_torchscript(path: &Path, n_features: usize) -> Result<Classifier, ModelError> {
    torch::load(path, n_features)
}

#[cfg(not(feature = "torchscript"))]
fn load_torchscript(path: &Path, _n_features: usize) -> Result<Classifier, ModelError> {
    Err(ModelError::UnsupportedFormat(format!(
        "{} (built without the `torchscript` feature)",
        path.display()
    )))
}

/// Checks the input width against what the artifact expects.
pub(crate) fn check_width(x: &FeatureMatrix, expected: usize) -> Result<(), ModelError> {
    if x.n_cols() != expected {
        return Err(ModelError::FeatureMismatch {
            got: x.n_cols(),
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load("models/model.joblib", 2).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedFormat(_)));
    }

    #[test]
    fn absent_native_artifact_is_a_read_error() {
        let err = load("/no/such/dir/model.json", 2).unwrap_err();
        assert!(matches!(err, ModelError::Read { .. }));
    }
}
