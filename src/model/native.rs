//! JSON-encoded artifacts exported by the training pipeline.
//!
//! ```json
//! {"kind": "linear", "classes": ["FP", "CANDIDATE"], "weights": [[0.4, -1.2]], "bias": [0.1]}
//! {"kind": "centroid", "centroids": [[0.0, 1.0], [3.0, 2.0]], "labels": [0, 1]}
//! ```

use super::{check_width, Classifier, LabelModel, ModelError, ProbabilityModel};
use crate::reconcile::FeatureMatrix;
use serde::Deserialize;
use std::{fs, path::Path};

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum NativeArtifact {
    Linear(LinearModel),
    Centroid(CentroidModel),
}

pub fn load(path: &Path) -> Result<Classifier, ModelError> {
    let txt = fs::read_to_string(path).map_err(|source| ModelError::Read {
        path: path.display().to_string(),
        source,
    })?;
    from_json(&txt).map_err(|e| match e {
        NativeLoadError::Parse(source) => ModelError::Parse {
            path: path.display().to_string(),
            source,
        },
        NativeLoadError::Model(e) => e,
    })
}

enum NativeLoadError {
    Parse(serde_json::Error),
    Model(ModelError),
}

fn from_json(txt: &str) -> Result<Classifier, NativeLoadError> {
    let artifact: NativeArtifact = serde_json::from_str(txt).map_err(NativeLoadError::Parse)?;
    match artifact {
        NativeArtifact::Linear(m) => {
            m.validate().map_err(NativeLoadError::Model)?;
            Ok(Classifier::Probabilistic(Box::new(m)))
        }
        NativeArtifact::Centroid(m) => {
            m.validate().map_err(NativeLoadError::Model)?;
            Ok(Classifier::LabelOnly(Box::new(m)))
        }
    }
}

// ---------- Linear (softmax / logistic) ----------

/// Multinomial linear model.
///
/// `weights` holds one row per class (`classes × features`). A single row is
/// read as a binary logistic model whose output is the second class.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    #[serde(default)]
    classes: Option<Vec<String>>,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

impl LinearModel {
    pub fn new(
        weights: Vec<Vec<f64>>,
        bias: Vec<f64>,
        classes: Option<Vec<String>>,
    ) -> Result<Self, ModelError> {
        let m = Self { classes, weights, bias };
        m.validate()?;
        Ok(m)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.weights.is_empty() {
            return Err(ModelError::Invalid("linear model has no weight rows".into()));
        }
        if self.bias.len() != self.weights.len() {
            return Err(ModelError::Invalid(format!(
                "bias length {} doesn't match {} weight rows",
                self.bias.len(),
                self.weights.len()
            )));
        }
        let width = self.weights[0].len();
        if self.weights.iter().any(|row| row.len() != width) {
            return Err(ModelError::Invalid("weight rows have different lengths".into()));
        }
        if let Some(classes) = &self.classes {
            if classes.len() != self.n_outputs() {
                return Err(ModelError::Invalid(format!(
                    "{} classes declared for {} outputs",
                    classes.len(),
                    self.n_outputs()
                )));
            }
        }
        Ok(())
    }

    fn width(&self) -> usize {
        self.weights[0].len()
    }

    fn is_binary(&self) -> bool {
        self.weights.len() == 1
    }

    fn n_outputs(&self) -> usize {
        if self.is_binary() {
            2
        } else {
            self.weights.len()
        }
    }

    fn margins(&self, row: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| b + w.iter().zip(row).map(|(w, x)| w * x).sum::<f64>())
            .collect()
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn softmax(z: &[f64]) -> Vec<f64> {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = z.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

impl LabelModel for LinearModel {
    fn predict_labels(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
        let proba = self.predict_proba(x)?;
        Ok(proba.iter().map(|p| crate::inference::argmax(p)).collect())
    }

    fn classes(&self) -> Option<&[String]> {
        self.classes.as_deref()
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.width())
    }

    /// Mean absolute coefficient per feature, normalized to sum to one.
    fn feature_importances(&self) -> Option<Vec<f64>> {
        let width = self.width();
        let mut imp = vec![0.0; width];
        for row in &self.weights {
            for (acc, w) in imp.iter_mut().zip(row) {
                *acc += w.abs();
            }
        }
        let total: f64 = imp.iter().sum();
        if total > 0.0 {
            imp.iter_mut().for_each(|v| *v /= total);
        }
        Some(imp)
    }
}

impl ProbabilityModel for LinearModel {
    fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ModelError> {
        check_width(x, self.width())?;
        Ok(x.rows()
            .map(|row| {
                let z = self.margins(row);
                if self.is_binary() {
                    let p = sigmoid(z[0]);
                    vec![1.0 - p, p]
                } else {
                    softmax(&z)
                }
            })
            .collect())
    }
}

// ---------- Nearest centroid ----------

/// Nearest-centroid classifier. Emits labels only.
///
/// `labels[i]` is the class index of `centroids[i]`; without `labels`, the
/// centroid's position is its class.
#[derive(Debug, Clone, Deserialize)]
pub struct CentroidModel {
    #[serde(default)]
    classes: Option<Vec<String>>,
    centroids: Vec<Vec<f64>>,
    #[serde(default)]
    labels: Option<Vec<usize>>,
}

impl CentroidModel {
    pub fn new(centroids: Vec<Vec<f64>>, labels: Option<Vec<usize>>) -> Result<Self, ModelError> {
        let m = Self {
            classes: None,
            centroids,
            labels,
        };
        m.validate()?;
        Ok(m)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let Some(first) = self.centroids.first() else {
            return Err(ModelError::Invalid("centroid model has no centroids".into()));
        };
        if self.centroids.iter().any(|c| c.len() != first.len()) {
            return Err(ModelError::Invalid("centroids have different lengths".into()));
        }
        if let Some(labels) = &self.labels {
            if labels.len() != self.centroids.len() {
                return Err(ModelError::Invalid(format!(
                    "{} labels for {} centroids",
                    labels.len(),
                    self.centroids.len()
                )));
            }
        }
        Ok(())
    }

    fn width(&self) -> usize {
        self.centroids[0].len()
    }

    fn nearest(&self, row: &[f64]) -> usize {
        let dist = |c: &[f64]| c.iter().zip(row).map(|(a, b)| (a - b) * (a - b)).sum::<f64>();
        let mut best = 0;
        let mut best_d = f64::INFINITY;
        for (i, c) in self.centroids.iter().enumerate() {
            let d = dist(c);
            if d < best_d {
                best = i;
                best_d = d;
            }
        }
        best
    }
}

impl LabelModel for CentroidModel {
    fn predict_labels(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
        check_width(x, self.width())?;
        Ok(x.rows()
            .map(|row| {
                let i = self.nearest(row);
                self.labels.as_ref().map_or(i, |l| l[i])
            })
            .collect())
    }

    fn classes(&self) -> Option<&[String]> {
        self.classes.as_deref()
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.width())
    }
}
