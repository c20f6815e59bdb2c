use std::{net::SocketAddr, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key}={value}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Service settings, read once from the environment at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub model_path: PathBuf,
    pub card_path: PathBuf,
    pub feedback_csv: PathBuf,
    pub bind_addr: String,
    pub port: u16,
    /// Log a summary of every reconciled batch (`LOG_PRED=1`).
    pub log_predictions: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/model.json"),
            card_path: PathBuf::from("models/model_card.json"),
            feedback_csv: PathBuf::from("data/user_feedback.csv"),
            bind_addr: "0.0.0.0".to_string(),
            port: 8001,
            log_predictions: false,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unset keys keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = lookup("MODEL_PATH") {
            cfg.model_path = v.into();
        }
        if let Some(v) = lookup("MODEL_CARD") {
            cfg.card_path = v.into();
        }
        if let Some(v) = lookup("FEEDBACK_CSV") {
            cfg.feedback_csv = v.into();
        }
        if let Some(v) = lookup("BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Some(v) = lookup("PORT") {
            cfg.port = v.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                key: "PORT",
                value: v.clone(),
                reason: e.to_string(),
            })?;
        }
        cfg.log_predictions = lookup("LOG_PRED").as_deref() == Some("1");
        Ok(cfg)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.bind_addr, self.port);
        addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            key: "BIND_ADDR",
            value: self.bind_addr.clone(),
            reason: e.to_string(),
        })
    }
}
