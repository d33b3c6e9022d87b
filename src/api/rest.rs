use anyhow::Result;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::api::websocket::handle_ws_upgrade;
use crate::config::ApiConfig;
use crate::db::models::{Accident, CreateAccident, Location, Severity, Status, UpdateAccident};
use crate::db::repositories::ListFilter;
use crate::error::Error;
use crate::messaging::broadcast::Broadcaster;
use crate::services::{AccidentService, AccidentStats};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AccidentService>,
    pub broadcaster: Arc<Broadcaster>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(_) | Error::Malformed(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::BAD_REQUEST.as_u16(),
            },
            Error::NotFound(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::NOT_FOUND.as_u16(),
            },
            Error::Config(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::BAD_REQUEST.as_u16(),
            },
            _ => ApiError {
                message: err.to_string(),
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            },
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(
        config: &ApiConfig,
        service: Arc<AccidentService>,
        broadcaster: Arc<Broadcaster>,
    ) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            state: AppState {
                service,
                broadcaster,
            },
        })
    }

    pub async fn run(&self) -> Result<()> {
        // The dashboard is served from another origin, so allow everything
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .max_age(Duration::from_secs(3600));

        let app = Router::new()
            .route(
                "/api/accidents",
                get(list_accidents).post(create_accident),
            )
            .route("/api/accidents/stats", get(get_stats))
            .route(
                "/api/accidents/:id",
                get(get_accident).put(update_accident),
            )
            .route("/api/upload-image", axum::routing::post(upload_image))
            .route("/ws", get(handle_ws_upgrade))
            .with_state(self.state.clone())
            .layer(cors);

        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down...");
            })
            .await?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub severity: Option<Severity>,
    pub status: Option<Status>,
    pub limit: Option<i64>,
}

async fn list_accidents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Accident>>> {
    let accidents = state
        .service
        .list(&ListFilter {
            severity: query.severity,
            status: query.status,
            limit: query.limit,
        })
        .await?;

    Ok(Json(accidents))
}

async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<AccidentStats>> {
    let stats = state.service.stats().await?;
    Ok(Json(stats))
}

async fn get_accident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Accident>> {
    let accident = state.service.get(id).await?.ok_or_else(|| ApiError {
        message: format!("Accident not found: {}", id),
        status: StatusCode::NOT_FOUND.as_u16(),
    })?;

    Ok(Json(accident))
}

async fn create_accident(
    State(state): State<AppState>,
    Json(req): Json<CreateAccident>,
) -> ApiResult<(StatusCode, Json<Accident>)> {
    let accident = state.service.create(req).await?;
    Ok((StatusCode::CREATED, Json(accident)))
}

async fn update_accident(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<UpdateAccident>,
) -> ApiResult<Json<Accident>> {
    let accident = state.service.update(id, &changes).await?;
    Ok(Json(accident))
}

/// Multipart upload from camera units: binary `image` part plus `location`,
/// `severity` and `deviceId` form fields.
async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Accident>)> {
    let mut image_base64 = None;
    let mut location = Location::default();
    let mut severity = None;
    let mut device_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from(Error::Validation(format!("Invalid multipart request: {}", e))))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::from(Error::Validation(format!("Unreadable image part: {}", e)))
                })?;
                image_base64 = Some(general_purpose::STANDARD.encode(&bytes));
            }
            "location" => {
                let text = field.text().await.map_err(|e| {
                    ApiError::from(Error::Validation(format!("Unreadable form field: {}", e)))
                })?;
                if !text.is_empty() {
                    location = text.parse().map_err(ApiError::from)?;
                }
            }
            "severity" => {
                let text = field.text().await.map_err(|e| {
                    ApiError::from(Error::Validation(format!("Unreadable form field: {}", e)))
                })?;
                if !text.is_empty() {
                    severity = Some(text.parse::<Severity>().map_err(ApiError::from)?);
                }
            }
            "deviceId" => {
                device_id = Some(field.text().await.map_err(|e| {
                    ApiError::from(Error::Validation(format!("Unreadable form field: {}", e)))
                })?);
            }
            _ => {}
        }
    }

    let image_base64 = image_base64
        .ok_or_else(|| ApiError::from(Error::Validation("image part is required".to_string())))?;

    let accident = state
        .service
        .create(CreateAccident {
            image_base64,
            location: Some(location),
            severity,
            device_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(accident)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping_matches_taxonomy() {
        let err: ApiError = Error::Validation("bad".to_string()).into();
        assert_eq!(err.status, 400);

        let err: ApiError = Error::NotFound("missing".to_string()).into();
        assert_eq!(err.status, 404);

        let err: ApiError = Error::Database("down".to_string()).into();
        assert_eq!(err.status, 500);
    }

    #[test]
    fn anyhow_errors_downcast_to_domain_errors() {
        let err: anyhow::Error = Error::NotFound("missing".to_string()).into();
        let api: ApiError = err.into();
        assert_eq!(api.status, 404);
    }
}
