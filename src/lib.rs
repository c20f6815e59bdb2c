//! Prediction API for a pre-trained exoplanet classifier.
//!
//! Uploaded rows are reconciled against the model card's feature schema
//! ([`reconcile`]), scored by the loaded artifact ([`inference`]) and
//! returned as per-row labels with class probabilities ([`api`]).

pub mod api;
pub mod card;
pub mod config;
pub mod context;
pub mod feedback;
pub mod inference;
pub mod model;
pub mod reconcile;
pub mod table;

pub use card::ModelCard;
pub use config::ServiceConfig;
pub use context::{ServiceContext, StartupError};
pub use model::{Classifier, ModelKind};
