use axum::{
    Extension, Json, Router,
    extract::{Path, Query},
    routing::get,
};
use serde::Deserialize;

use crate::server::{
    dtos::episode_dto::DataResponse,
    error::{AppResult, Error},
    services::app_services::AppServices,
};

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

/// thin passthroughs over the discovery api, the interesting work lives in
/// the episode and proxy controllers
pub struct CatalogController;

impl CatalogController {
    pub fn app() -> Router {
        Router::new()
            .route("/home", get(Self::home))
            .route("/search", get(Self::search))
            .route("/anime/{id}", get(Self::anime))
    }

    async fn home(
        Extension(services): Extension<AppServices>,
    ) -> AppResult<Json<DataResponse>> {
        let data = services.provider.home().await?;
        Ok(Json(DataResponse { data }))
    }

    async fn search(
        Extension(services): Extension<AppServices>,
        Query(params): Query<SearchQuery>,
    ) -> AppResult<Json<DataResponse>> {
        let query = params
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| Error::BadRequest("q is required".to_string()))?;

        let data = services.provider.search(query).await?;
        Ok(Json(DataResponse { data }))
    }

    async fn anime(
        Extension(services): Extension<AppServices>,
        Path(id): Path<String>,
    ) -> AppResult<Json<DataResponse>> {
        let data = services.provider.anime(&id).await?;
        Ok(Json(DataResponse { data }))
    }
}
