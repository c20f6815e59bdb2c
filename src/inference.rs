//! Runs a reconciled batch through the model, falling back from class
//! probabilities to labels when the former are unavailable.

use crate::model::{Classifier, ModelError};
use crate::reconcile::FeatureMatrix;
use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("no class labels available")]
    NoClasses,
    #[error("probability output is not {rows}x{classes}")]
    NotRectangular { rows: usize, classes: usize },
    #[error("model returned {got} labels for {expected} rows")]
    LabelCount { got: usize, expected: usize },
    #[error("probability path failed ({proba}); label path failed ({labels})")]
    Exhausted {
        proba: Box<InferenceError>,
        labels: Box<InferenceError>,
    },
}

/// Which capability produced the scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Probabilities,
    OneHotLabels,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RowPrediction {
    pub prediction: String,
    pub proba: IndexMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub rows: Vec<RowPrediction>,
    pub source: ScoreSource,
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// One-hot rows over `n_classes`. Out-of-range labels land in slot 0.
pub fn one_hot(labels: &[usize], n_classes: usize) -> Vec<Vec<f64>> {
    labels
        .iter()
        .map(|&label| {
            let slot = if label < n_classes {
                label
            } else {
                tracing::warn!(label, n_classes, "label outside class list; using slot 0");
                0
            };
            let mut row = vec![0.0; n_classes];
            row[slot] = 1.0;
            row
        })
        .collect()
}

fn probabilities(
    model: &Classifier,
    x: &FeatureMatrix,
    n_classes: usize,
) -> Result<Vec<Vec<f64>>, InferenceError> {
    let Classifier::Probabilistic(m) = model else {
        return Err(ModelError::Output("model exposes no probabilities".into()).into());
    };
    let proba = m.predict_proba(x)?;
    if proba.len() != x.n_rows() || proba.iter().any(|row| row.len() != n_classes) {
        return Err(InferenceError::NotRectangular {
            rows: x.n_rows(),
            classes: n_classes,
        });
    }
    Ok(proba)
}

fn pseudo_probabilities(
    model: &Classifier,
    x: &FeatureMatrix,
    n_classes: usize,
) -> Result<Vec<Vec<f64>>, InferenceError> {
    let labels = model.predict_labels(x)?;
    if labels.len() != x.n_rows() {
        return Err(InferenceError::LabelCount {
            got: labels.len(),
            expected: x.n_rows(),
        });
    }
    Ok(one_hot(&labels, n_classes))
}

/// Scores every row of `x`.
///
/// The class list is the artifact's own ordering when it carries one, else
/// `card_classes`. Probabilistic models are asked for probabilities first;
/// on failure, and for label-only models, labels are turned into one-hot
/// pseudo-probabilities so the output shape is the same either way.
pub fn predict(
    model: &Classifier,
    card_classes: &[String],
    x: &FeatureMatrix,
) -> Result<Prediction, InferenceError> {
    let classes = model.classes().unwrap_or(card_classes);
    if classes.is_empty() {
        return Err(InferenceError::NoClasses);
    }

    let (scores, source) = if x.n_rows() == 0 {
        (Vec::new(), ScoreSource::Probabilities)
    } else {
        match probabilities(model, x, classes.len()) {
            Ok(p) => (p, ScoreSource::Probabilities),
            Err(proba_err) => {
                if matches!(model, Classifier::Probabilistic(_)) {
                    tracing::warn!(
                        error = %proba_err,
                        "predict_proba failed; falling back to labels"
                    );
                }
                match pseudo_probabilities(model, x, classes.len()) {
                    Ok(p) => (p, ScoreSource::OneHotLabels),
                    Err(label_err) => {
                        return Err(InferenceError::Exhausted {
                            proba: Box::new(proba_err),
                            labels: Box::new(label_err),
                        })
                    }
                }
            }
        }
    };

    let rows = scores
        .into_iter()
        .map(|p| {
            let prediction = classes[argmax(&p)].clone();
            let proba = classes.iter().cloned().zip(p).collect();
            RowPrediction { prediction, proba }
        })
        .collect();

    Ok(Prediction { rows, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::native::{CentroidModel, LinearModel};
    use crate::model::{LabelModel, ProbabilityModel};

    fn classes() -> Vec<String> {
        vec!["no".to_string(), "yes".to_string()]
    }

    struct Broken;

    impl LabelModel for Broken {
        fn predict_labels(&self, _: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
            Err(ModelError::Output("labels down".into()))
        }
    }

    impl ProbabilityModel for Broken {
        fn predict_proba(&self, _: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ModelError> {
            Err(ModelError::Output("proba down".into()))
        }
    }

    /// Probabilities fail, labels work.
    struct FlakyProba;

    impl LabelModel for FlakyProba {
        fn predict_labels(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
            Ok(vec![1; x.n_rows()])
        }
    }

    impl ProbabilityModel for FlakyProba {
        fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ModelError> {
            // wrong width
            Ok(vec![vec![1.0]; x.n_rows()])
        }
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[0.2, 0.5, 0.5]), 1);
        assert_eq!(argmax(&[0.7, 0.3]), 0);
    }

    #[test]
    fn probabilistic_label_is_argmax_of_distribution() {
        let weights = vec![vec![1.0, -1.0], vec![-1.0, 1.0]];
        let m = LinearModel::new(weights, vec![0.0, 0.0], None).unwrap();
        let model = Classifier::Probabilistic(Box::new(m));
        let x = FeatureMatrix::from_rows(&[vec![3.0, 0.0], vec![0.0, 3.0]], 2);
        let out = predict(&model, &classes(), &x).unwrap();
        assert_eq!(out.source, ScoreSource::Probabilities);
        for row in &out.rows {
            let (best, _) = row
                .proba
                .iter()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .unwrap();
            assert_eq!(&row.prediction, best);
        }
        assert_eq!(out.rows[0].prediction, "no");
        assert_eq!(out.rows[1].prediction, "yes");
    }

    #[test]
    fn label_only_model_yields_one_hot() {
        let m = CentroidModel::new(vec![vec![0.0], vec![10.0]], None).unwrap();
        let model = Classifier::LabelOnly(Box::new(m));
        let x = FeatureMatrix::from_rows(&[vec![9.0]], 1);
        let out = predict(&model, &classes(), &x).unwrap();
        assert_eq!(out.source, ScoreSource::OneHotLabels);
        let row = &out.rows[0];
        assert_eq!(row.prediction, "yes");
        assert_eq!(row.proba.keys().collect::<Vec<_>>(), vec!["no", "yes"]);
        assert_eq!(row.proba.values().copied().collect::<Vec<_>>(), vec![0.0, 1.0]);
    }

    #[test]
    fn unknown_label_goes_to_first_slot() {
        let m = CentroidModel::new(vec![vec![0.0]], Some(vec![7])).unwrap();
        let model = Classifier::LabelOnly(Box::new(m));
        let out = predict(&model, &classes(), &FeatureMatrix::zeros(1, 1)).unwrap();
        assert_eq!(out.rows[0].prediction, "no");
        assert_eq!(out.rows[0].proba["no"], 1.0);
    }

    #[test]
    fn malformed_probabilities_fall_back_to_labels() {
        let model = Classifier::Probabilistic(Box::new(FlakyProba));
        let out = predict(&model, &classes(), &FeatureMatrix::zeros(2, 3)).unwrap();
        assert_eq!(out.source, ScoreSource::OneHotLabels);
        assert!(out.rows.iter().all(|r| r.prediction == "yes"));
    }

    #[test]
    fn both_paths_failing_is_an_error() {
        let model = Classifier::Probabilistic(Box::new(Broken));
        let err = predict(&model, &classes(), &FeatureMatrix::zeros(1, 2)).unwrap_err();
        assert!(matches!(err, InferenceError::Exhausted { .. }));
        let msg = err.to_string();
        assert!(msg.contains("proba down") && msg.contains("labels down"));
    }

    #[test]
    fn artifact_classes_take_precedence() {
        let m = LinearModel::new(
            vec![vec![1.0]],
            vec![0.0],
            Some(vec!["FALSE POSITIVE".into(), "CONFIRMED".into()]),
        )
        .unwrap();
        let model = Classifier::Probabilistic(Box::new(m));
        let out = predict(&model, &classes(), &FeatureMatrix::from_rows(&[vec![4.0]], 1)).unwrap();
        assert_eq!(out.rows[0].prediction, "CONFIRMED");
        assert!(out.rows[0].proba.contains_key("FALSE POSITIVE"));
    }

    #[test]
    fn empty_batch_and_empty_classes() {
        let m = CentroidModel::new(vec![vec![0.0]], None).unwrap();
        let model = Classifier::LabelOnly(Box::new(m));
        let out = predict(&model, &classes(), &FeatureMatrix::zeros(0, 1)).unwrap();
        assert!(out.rows.is_empty());
        assert!(matches!(
            predict(&model, &[], &FeatureMatrix::zeros(1, 1)),
            Err(InferenceError::NoClasses)
        ));
    }
}
