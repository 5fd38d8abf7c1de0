use crate::config::Config;
use crate::diagnostics::{run_diagnostics, DiagnosticsReport, RequestInfo};
use crate::errors::Error;
use crate::metrics::CLIENT_ERRORS_TOTAL;
use crate::model::{Envelope, TelemetryParams};
use crate::proxy::fetch_telemetry;
use crate::upstream::UpstreamClient;
use crate::validate::USAGE_HINT;
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderValue, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info_span, Instrument};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: Arc<dyn UpstreamClient>,
}

#[derive(Debug, Deserialize)]
pub struct DiagnosticsQuery {
    device_id: Option<String>,
}

pub fn create_router(config: Arc<Config>, upstream: Arc<dyn UpstreamClient>) -> Router {
    let state = AppState { config, upstream };

    Router::new()
        .route("/api/telemetry", get(get_telemetry).options(preflight))
        .route(
            "/.netlify/functions/onenet-proxy",
            get(get_telemetry).options(preflight),
        )
        .route("/api/diagnostics", get(get_diagnostics).options(preflight))
        .route(
            "/.netlify/functions/test-connection",
            get(get_diagnostics).options(preflight),
        )
        .layer(middleware::map_response(with_cors_headers))
        .with_state(state)
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn with_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,POST,PUT,DELETE,OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

/// Query strings axum cannot deserialize (e.g. a repeated `device_id`) are
/// answered like any other invalid input.
fn rejected_query(rejection: QueryRejection) -> Error {
    CLIENT_ERRORS_TOTAL.inc();
    Error::InvalidInput {
        message: rejection.body_text(),
        hint: USAGE_HINT.to_string(),
    }
}

async fn get_telemetry(
    State(state): State<AppState>,
    query: Result<Query<TelemetryParams>, QueryRejection>,
) -> Result<Json<Envelope>, AppError> {
    let Query(params) = query.map_err(rejected_query)?;
    let span = info_span!("telemetry", request_id = %uuid::Uuid::new_v4());
    let envelope = fetch_telemetry(&state.config, state.upstream.as_ref(), &params)
        .instrument(span)
        .await?;
    Ok(Json(envelope))
}

async fn get_diagnostics(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    query: Result<Query<DiagnosticsQuery>, QueryRejection>,
) -> Result<Json<DiagnosticsReport>, AppError> {
    let Query(query) = query.map_err(rejected_query)?;
    let request = RequestInfo {
        method: method.to_string(),
        path: uri.path().to_string(),
    };
    let span = info_span!("diagnostics", request_id = %uuid::Uuid::new_v4());
    let report = run_diagnostics(
        &state.config,
        state.upstream.as_ref(),
        query.device_id.as_deref(),
        request,
    )
    .instrument(span)
    .await;
    Ok(Json(report))
}

/// Handler-boundary error. Known gateway errors keep their classified status;
/// anything else becomes a 500 envelope carrying the error message.
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.0.downcast_ref::<Error>() {
            Some(e) => {
                if e.status().is_server_error() {
                    error!("API error: {}", e);
                }
                (e.status(), Json(Envelope::failure(e))).into_response()
            }
            None => {
                error!("API error: {:#}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(Envelope::internal(format!("{:#}", self.0))),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
