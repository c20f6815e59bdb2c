use crate::{
    card::{CardError, ModelCard},
    config::ServiceConfig,
    feedback::FeedbackStore,
    inference::{self, InferenceError},
    model::{self, Classifier, ModelError},
    reconcile::FeatureMatrix,
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Card(#[from] CardError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("model expects {model} features but the card lists {card}")]
    FeatureWidth { model: usize, card: usize },
    #[error("warmup prediction failed: {0}")]
    Warmup(#[from] InferenceError),
}

/// Everything a request handler needs; built once and never mutated.
#[derive(Debug)]
pub struct ServiceContext {
    pub card: ModelCard,
    pub model: Classifier,
    pub feedback: FeedbackStore,
    pub log_predictions: bool,
}

impl ServiceContext {
    /// Loads the card and the artifact named by `config`, then runs one
    /// all-zero row through the model so a broken artifact fails here
    /// rather than on the first request.
    ///
    /// An artifact that records an input width different from the card's
    /// feature count is rejected.
    pub fn load(config: &ServiceConfig) -> Result<Self, StartupError> {
        let card = ModelCard::load(&config.card_path)?;
        let model = model::load(&config.model_path, card.n_features())?;
        if let Some(in_dim) = model.n_features() {
            if in_dim != card.n_features() {
                return Err(StartupError::FeatureWidth {
                    model: in_dim,
                    card: card.n_features(),
                });
            }
        }
        let ctx = Self::new(card, model, FeedbackStore::new(&config.feedback_csv));
        Ok(Self {
            log_predictions: config.log_predictions,
            ..ctx.warmed_up()?
        })
    }

    pub fn new(card: ModelCard, model: Classifier, feedback: FeedbackStore) -> Self {
        Self {
            card,
            model,
            feedback,
            log_predictions: false,
        }
    }

    fn warmed_up(self) -> Result<Self, InferenceError> {
        let dummy = FeatureMatrix::zeros(1, self.card.n_features());
        let out = inference::predict(&self.model, &self.card.classes, &dummy)?;
        tracing::info!(source = ?out.source, "warmup prediction ok");
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, path::Path, path::PathBuf};

    const CARD: &str = r#"{"features": ["a","b"], "classes": ["no","yes"]}"#;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let p = dir.join(name);
        fs::write(&p, body).unwrap();
        p
    }

    fn config(dir: &Path, card: &str, model: &str) -> ServiceConfig {
        ServiceConfig {
            card_path: write(dir, "card.json", card),
            model_path: write(dir, "model.json", model),
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn absent_model_file_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            card_path: write(dir.path(), "card.json", CARD),
            model_path: dir.path().join("model.json"),
            ..ServiceConfig::default()
        };
        let err = ServiceContext::load(&config).unwrap_err();
        assert!(matches!(err, StartupError::Model(ModelError::Read { .. })));
        assert!(err.to_string().contains("model.json"));
    }

    #[test]
    fn absent_card_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            card_path: dir.path().join("card.json"),
            ..ServiceConfig::default()
        };
        assert!(matches!(ServiceContext::load(&config), Err(StartupError::Card(_))));
    }

    #[test]
    fn wider_linear_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let model = r#"{"kind": "linear", "weights": [[1.0, 0.0, 2.0]], "bias": [0.0]}"#;
        let err = ServiceContext::load(&config(dir.path(), CARD, model)).unwrap_err();
        assert!(matches!(err, StartupError::FeatureWidth { model: 3, card: 2 }));
        assert_eq!(err.to_string(), "model expects 3 features but the card lists 2");
    }

    #[test]
    fn narrower_centroid_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let model = r#"{"kind": "centroid", "centroids": [[0.0]]}"#;
        assert!(matches!(
            ServiceContext::load(&config(dir.path(), CARD, model)),
            Err(StartupError::FeatureWidth { model: 1, card: 2 })
        ));
    }

    #[test]
    fn card_without_classes_fails_warmup() {
        let dir = tempfile::tempdir().unwrap();
        let card = r#"{"features": ["a","b"], "classes": []}"#;
        let model = r#"{"kind": "centroid", "centroids": [[0.0, 0.0]]}"#;
        assert!(matches!(
            ServiceContext::load(&config(dir.path(), card, model)),
            Err(StartupError::Warmup(InferenceError::NoClasses))
        ));
    }

    #[test]
    fn loads_card_and_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = r#"{"kind": "linear", "weights": [[1, 0], [0, 1]], "bias": [0, 0]}"#;
        let config = ServiceConfig {
            log_predictions: true,
            ..config(dir.path(), CARD, model)
        };
        let ctx = ServiceContext::load(&config).unwrap();
        assert_eq!(ctx.card.features, vec!["a", "b"]);
        assert_eq!(ctx.model.kind(), model::ModelKind::Probabilistic);
        assert!(ctx.log_predictions);
    }
}
