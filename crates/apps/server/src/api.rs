use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Path as AxumPath, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use foundation::{GeoBounds, MAX_LATITUDE, MAX_LONGITUDE, MIN_LATITUDE, MIN_LONGITUDE};
use serde::Deserialize;
use stamps::{RateLimiter, StampError, StampPipeline, StampQuery, StampRequest};
use streaming::{
    ErrorBody, ErrorCode, StampAccepted, StampSubmission, StampSummary, TextureVersionInfo,
    TileChanges, TileId,
};
use tracing::{error, warn};

use crate::feed;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: StampPipeline,
    pub limiter: Arc<RateLimiter>,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stamps", post(post_stamp))
        .route("/stamps/recent", get(get_recent_stamps))
        .route("/stamps/feed", get(get_feed))
        .route("/texture/version", get(get_texture_version))
        .route("/texture/changes", get(get_texture_changes))
        .route("/tiles/:x/:y", get(get_tile))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Stamp(StampError),
    NotFound(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stamp(err) => write!(f, "{err}"),
            Self::NotFound(what) => write!(f, "{what} not found"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<StampError> for ApiError {
    fn from(err: StampError) -> Self {
        Self::Stamp(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, retry_after) = match &self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound, None),
            Self::Stamp(err) => match err {
                StampError::InvalidInput { .. } => {
                    (StatusCode::BAD_REQUEST, ErrorCode::InvalidInput, None)
                }
                StampError::RateLimited { retry_after_secs } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    ErrorCode::RateLimited,
                    Some(*retry_after_secs),
                ),
                StampError::Busy { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Busy, Some(1))
                }
                StampError::Storage(e) => {
                    error!(error = %e, "storage failure");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        ErrorCode::StorageFailure,
                        Some(5),
                    )
                }
                StampError::Internal(msg) => {
                    error!(error = %msg, "internal failure");
                    (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Internal, None)
                }
            },
        };

        let (field, retryable) = match &self {
            Self::Stamp(err) => (err.field().map(str::to_string), err.is_retryable()),
            Self::NotFound(_) => (None, false),
        };
        let body = ErrorBody {
            error: self.to_string(),
            code,
            field,
            retryable,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(http::header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

async fn post_stamp(
    State(state): State<AppState>,
    body: Result<Json<StampSubmission>, JsonRejection>,
) -> Result<Json<StampAccepted>, ApiError> {
    let Json(submission) =
        body.map_err(|rejection| StampError::invalid("body", rejection.body_text()))?;
    let request = StampRequest::from_submission(submission)?;
    let user_id = request.user_id.trim().to_string();

    state.limiter.try_acquire(&user_id, Instant::now())?;
    match state.pipeline.ingest(request).await {
        Ok(receipt) => Ok(Json(receipt.into())),
        Err(err) => {
            state.limiter.refund(&user_id);
            if matches!(err, StampError::Busy { .. }) {
                warn!(user_id = %user_id, "stamp rejected while texture busy");
            }
            Err(err.into())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct VersionParams {
    #[serde(default)]
    tiles: bool,
}

async fn get_texture_version(
    State(state): State<AppState>,
    Query(params): Query<VersionParams>,
) -> Json<TextureVersionInfo> {
    Json(state.pipeline.version_info(params.tiles))
}

#[derive(Debug, Default, Deserialize)]
struct ChangesParams {
    #[serde(default)]
    since: u64,
}

async fn get_texture_changes(
    State(state): State<AppState>,
    Query(params): Query<ChangesParams>,
) -> Result<Json<TileChanges>, ApiError> {
    Ok(Json(state.pipeline.changed_tiles_since(params.since).await?))
}

async fn get_tile(
    State(state): State<AppState>,
    AxumPath((x, y)): AxumPath<(u32, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let y = parse_tile_y(&y).ok_or_else(|| StampError::invalid("tile", "invalid tile index"))?;
    let id = TileId::new(x, y);
    if !state.pipeline.config().grid.contains(id) {
        return Err(ApiError::NotFound(format!("tile {id}")));
    }

    let current = etag(state.pipeline.current_version());
    let unchanged = headers
        .get(http::header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == current);
    if unchanged {
        return Ok((StatusCode::NOT_MODIFIED, [(http::header::ETAG, current)]).into_response());
    }

    let (version, png) = state.pipeline.tile_png(id).await?;
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("image/png"),
    );
    if let Ok(value) = HeaderValue::from_str(&etag(version)) {
        headers.insert(http::header::ETAG, value);
    }
    headers.insert(
        http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );
    Ok((StatusCode::OK, headers, Body::from(png)).into_response())
}

fn etag(version: u64) -> String {
    format!("\"v{version}\"")
}

fn parse_tile_y(raw: &str) -> Option<u32> {
    raw.trim_end_matches(".png").parse::<u32>().ok()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentParams {
    limit: Option<usize>,
    lat_min: Option<f64>,
    lat_max: Option<f64>,
    long_min: Option<f64>,
    long_max: Option<f64>,
}

const MAX_RECENT: usize = 200;

impl RecentParams {
    /// Missing edges default to the whole globe; `longMin > longMax` selects
    /// a box crossing the antimeridian.
    fn to_query(&self) -> Result<StampQuery, StampError> {
        let limit = self
            .limit
            .unwrap_or(StampQuery::default().limit)
            .clamp(1, MAX_RECENT);

        let edges = [self.lat_min, self.lat_max, self.long_min, self.long_max];
        if edges.iter().all(Option::is_none) {
            return Ok(StampQuery {
                limit,
                bounds: None,
            });
        }

        let lat_min = checked(self.lat_min, "latMin", MIN_LATITUDE, MAX_LATITUDE)?;
        let lat_max = checked(self.lat_max, "latMax", MIN_LATITUDE, MAX_LATITUDE)?;
        let long_min = checked(self.long_min, "longMin", MIN_LONGITUDE, MAX_LONGITUDE)?;
        let long_max = checked(self.long_max, "longMax", MIN_LONGITUDE, MAX_LONGITUDE)?;
        Ok(StampQuery {
            limit,
            bounds: Some(GeoBounds::new(
                lat_min.unwrap_or(MIN_LATITUDE),
                lat_max.unwrap_or(MAX_LATITUDE),
                long_min.unwrap_or(MIN_LONGITUDE),
                long_max.unwrap_or(MAX_LONGITUDE),
            )),
        })
    }
}

fn checked(
    value: Option<f64>,
    field: &'static str,
    min: f64,
    max: f64,
) -> Result<Option<f64>, StampError> {
    match value {
        Some(v) if !v.is_finite() || v < min || v > max => Err(StampError::invalid(
            field,
            format!("{v} outside [{min}, {max}]"),
        )),
        other => Ok(other),
    }
}

async fn get_recent_stamps(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<StampSummary>>, ApiError> {
    let query = params.to_query()?;
    Ok(Json(state.pipeline.recent_stamps(query).await?))
}

async fn get_feed(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| feed::serve_feed(socket, state.pipeline))
}

#[cfg(test)]
mod tests {
    use stamps::{StorageError, StorageOp};

    use super::*;

    fn status_and_retry(err: StampError) -> (StatusCode, Option<String>) {
        let response = ApiError::from(err).into_response();
        let retry = response
            .headers()
            .get(http::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        (response.status(), retry)
    }

    #[test]
    fn errors_map_to_status_codes() {
        assert_eq!(
            status_and_retry(StampError::invalid("latitude", "too far north")),
            (StatusCode::BAD_REQUEST, None)
        );
        assert_eq!(
            status_and_retry(StampError::RateLimited {
                retry_after_secs: 42
            }),
            (StatusCode::TOO_MANY_REQUESTS, Some("42".to_string()))
        );
        assert_eq!(
            status_and_retry(StampError::Busy { waited_ms: 10_000 }),
            (StatusCode::SERVICE_UNAVAILABLE, Some("1".to_string()))
        );
        assert_eq!(
            status_and_retry(StorageError::new(StorageOp::SaveTile, "disk full").into()).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_and_retry(StampError::Internal("boom".into())).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::NotFound("tile 9_9".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn recent_params_without_edges_have_no_bounds() {
        let query = RecentParams::default().to_query().unwrap();
        assert_eq!(query.limit, 50);
        assert!(query.bounds.is_none());

        let capped = RecentParams {
            limit: Some(10_000),
            ..RecentParams::default()
        };
        assert_eq!(capped.to_query().unwrap().limit, MAX_RECENT);
    }

    #[test]
    fn recent_params_fill_missing_edges() {
        let params = RecentParams {
            lat_min: Some(10.0),
            long_min: Some(170.0),
            long_max: Some(-170.0),
            ..RecentParams::default()
        };
        let bounds = params.to_query().unwrap().bounds.unwrap();
        assert_eq!(bounds.lat_min(), 10.0);
        assert_eq!(bounds.lat_max(), 90.0);
        assert!(bounds.crosses_antimeridian());
    }

    #[test]
    fn recent_params_reject_out_of_range_edges() {
        let params = RecentParams {
            lat_max: Some(95.0),
            ..RecentParams::default()
        };
        assert_eq!(params.to_query().unwrap_err().field(), Some("latMax"));
    }

    #[test]
    fn tile_y_accepts_png_suffix() {
        assert_eq!(parse_tile_y("3"), Some(3));
        assert_eq!(parse_tile_y("3.png"), Some(3));
        assert_eq!(parse_tile_y("x.png"), None);
        assert_eq!(etag(12), "\"v12\"");
    }
}
