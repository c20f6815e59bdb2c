use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::{
    context::ServiceContext,
    feedback::FeedbackError,
    inference::{self, InferenceError, RowPrediction},
    model::ModelKind,
    reconcile::{self, FeatureMatrix},
    table::{Format, Table, TableError},
};

/// Uploads larger than this are refused by the extractor.
pub const UPLOAD_LIMIT_BYTES: usize = 32 * 1024 * 1024;

const DEFAULT_TOPK: usize = 15;

pub type AppState = Arc<ServiceContext>;

// ---------- Errors ----------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("could not read upload: {0}")]
    Upload(String),
    #[error("could not read upload: {0}")]
    Table(#[from] TableError),
    #[error("prediction failed: {0}")]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Upload(_) | ApiError::Table(_) => StatusCode::BAD_REQUEST,
            ApiError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Feedback(
                FeedbackError::MissingFeatures(_) | FeedbackError::MissingLabel(_),
            ) => StatusCode::BAD_REQUEST,
            ApiError::Feedback(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = json!({ "ok": false, "error": self.to_string() });
        if let ApiError::Feedback(FeedbackError::MissingFeatures(missing)) = &self {
            body["missing"] = json!(missing);
        }
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(body)).into_response()
    }
}

// ---------- Request/Response types ----------

#[derive(Serialize)]
struct Health {
    ok: bool,
    model_loaded: bool,
    n_features: usize,
    version: &'static str,
    model_kind: ModelKind,
}

#[derive(Serialize)]
struct Features<'a> {
    features: &'a [String],
    classes: &'a [String],
    target: &'a str,
}

#[derive(Serialize)]
struct PredictOut {
    ok: bool,
    results: Vec<RowPrediction>,
    missing_features: Vec<String>,
}

#[derive(Deserialize)]
struct ExplainParams {
    topk: Option<usize>,
}

#[derive(Serialize)]
struct Importance<'a> {
    feature: &'a str,
    importance: f64,
}

#[derive(Deserialize)]
struct FeedbackParams {
    label_col: Option<String>,
}

// ---------- Upload decoding ----------

/// Reads a batch from a multipart `file` field, a JSON body, or a CSV body.
async fn read_upload(req: Request) -> Result<Table, ApiError> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| ApiError::Upload(e.body_text()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Upload(e.body_text()))?
        {
            if field.name() != Some("file") {
                continue;
            }
            let format = Format::from_filename(field.file_name().unwrap_or_default());
            let bytes = field.bytes().await.map_err(|e| ApiError::Upload(e.body_text()))?;
            return Ok(Table::decode(&bytes, format)?);
        }
        return Err(ApiError::Upload("multipart body has no `file` field".into()));
    }

    let format = if content_type.starts_with("application/json") {
        Format::Json
    } else {
        Format::Csv
    };
    let bytes = Bytes::from_request(req, &())
        .await
        .map_err(|e| ApiError::Upload(e.body_text()))?;
    Ok(Table::decode(&bytes, format)?)
}

// ---------- Handlers ----------

async fn health(State(ctx): State<AppState>) -> Json<Health> {
    Json(Health {
        ok: true,
        model_loaded: true,
        n_features: ctx.card.n_features(),
        version: env!("CARGO_PKG_VERSION"),
        model_kind: ctx.model.kind(),
    })
}

async fn features(State(ctx): State<AppState>) -> Response {
    Json(Features {
        features: &ctx.card.features,
        classes: &ctx.card.classes,
        target: &ctx.card.target,
    })
    .into_response()
}

async fn predict(State(ctx): State<AppState>, req: Request) -> Result<Json<PredictOut>, ApiError> {
    let batch = read_upload(req).await?;
    let reconciled = reconcile::reconcile(&batch, &ctx.card.features);

    if ctx.log_predictions {
        log_batch_summary(&ctx.card.features, &reconciled.matrix);
    }

    let out = inference::predict(&ctx.model, &ctx.card.classes, &reconciled.matrix)?;
    tracing::debug!(
        rows = out.rows.len(),
        imputed = reconciled.imputed_cells,
        source = ?out.source,
        "predicted batch"
    );

    Ok(Json(PredictOut {
        ok: true,
        results: out.rows,
        missing_features: reconciled.missing_features,
    }))
}

async fn explain(State(ctx): State<AppState>, Query(params): Query<ExplainParams>) -> Response {
    let Some(imp) = ctx.model.feature_importances() else {
        let message = "this model does not provide feature importances";
        return Json(json!({ "ok": true, "message": message })).into_response();
    };

    let mut items: Vec<Importance> = ctx
        .card
        .features
        .iter()
        .zip(imp)
        .map(|(feature, importance)| Importance {
            feature: feature.as_str(),
            importance,
        })
        .collect();
    items.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    items.truncate(params.topk.unwrap_or(DEFAULT_TOPK));

    Json(json!({ "ok": true, "importances": items })).into_response()
}

async fn feedback(
    State(ctx): State<AppState>,
    Query(params): Query<FeedbackParams>,
    req: Request,
) -> Result<Json<serde_json::Value>, ApiError> {
    let batch = read_upload(req).await?;
    let label_col = params.label_col.unwrap_or_else(|| ctx.card.target.clone());
    let stored = ctx.feedback.append(&batch, &ctx.card.features, &label_col)?;
    Ok(Json(json!({ "ok": true, "stored_rows": stored })))
}

// ---------- Debug signal ----------

fn log_batch_summary(features: &[String], x: &FeatureMatrix) {
    let v = x.as_slice();
    let nz = v.iter().filter(|x| **x != 0.0).count();
    let mean = if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 };
    let std = if v.len() < 2 {
        0.0
    } else {
        (v.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / v.len() as f64).sqrt()
    };
    let sample: Vec<String> = match x.rows().next() {
        Some(first) => features
            .iter()
            .zip(first)
            .take(6)
            .map(|(name, val)| format!("{}={:.3}", name, val))
            .collect(),
        None => Vec::new(),
    };
    tracing::info!(
        "recv rows={} in_dim={} nonzero={} mean={:.3} std={:.3} sample=[{}]",
        x.n_rows(),
        x.n_cols(),
        nz,
        mean,
        std,
        sample.join(", ")
    );
}

// ---------- Router ----------

pub fn router(ctx: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/features", get(features))
        .route("/predict", post(predict))
        .route("/explain", get(explain))
        .route("/feedback", post(feedback))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES))
        .with_state(ctx)
}
