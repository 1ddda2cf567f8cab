use axum::{
    Extension, Json, Router,
    extract::Query,
    routing::{get, post},
};
use tracing::info;

use crate::database::sources::Category;
use crate::server::{
    dtos::episode_dto::{
        DEFAULT_CATEGORY, DEFAULT_SERVER, DataResponse, EpisodeQuery, PrewarmRequest,
        PrewarmResponse, SourcesQuery, SourcesResponse,
    },
    error::{AppResult, Error},
    services::app_services::AppServices,
    utils::id_utils,
};

pub struct EpisodeController;

impl EpisodeController {
    pub fn app() -> Router {
        Router::new()
            .route("/episode/servers", get(Self::servers))
            .route("/episode/sources", get(Self::sources))
            .route("/episode/prewarm", post(Self::prewarm))
    }

    async fn servers(
        Extension(services): Extension<AppServices>,
        Query(params): Query<EpisodeQuery>,
    ) -> AppResult<Json<DataResponse>> {
        let episode_id = id_utils::sanitize_episode_id(&params.anime_episode_id)?;

        let data = services.provider.episode_servers(&episode_id).await?;

        Ok(Json(DataResponse { data }))
    }

    async fn sources(
        Extension(services): Extension<AppServices>,
        Query(params): Query<SourcesQuery>,
    ) -> AppResult<Json<SourcesResponse>> {
        let episode_id = id_utils::sanitize_episode_id(&params.anime_episode_id)?;
        let category = parse_category(params.category.as_deref())?;
        let server = params.server.as_deref().unwrap_or(DEFAULT_SERVER);

        let outcome = services
            .sources
            .get_sources(&episode_id, category, server)
            .await?;

        Ok(Json(SourcesResponse {
            data: outcome.data,
            from_cache: outcome.from_cache,
            stale: outcome.stale,
        }))
    }

    async fn prewarm(
        Extension(services): Extension<AppServices>,
        Json(request): Json<PrewarmRequest>,
    ) -> AppResult<Json<PrewarmResponse>> {
        if request.episode_ids.is_empty() {
            return Err(Error::BadRequest("episodeIds must not be empty".to_string()));
        }

        let category = parse_category(request.category.as_deref())?;
        let server = request
            .server
            .clone()
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());

        info!(
            "pre-warm requested for {} episode ids ({}/{})",
            request.episode_ids.len(),
            category,
            server
        );

        let count = services
            .sources
            .prewarm(request.episode_ids, category, server)
            .await;

        Ok(Json(PrewarmResponse {
            status: "scheduled",
            count,
        }))
    }
}

fn parse_category(raw: Option<&str>) -> AppResult<Category> {
    match raw {
        None | Some("") => Ok(DEFAULT_CATEGORY),
        Some(value) => Category::parse(value).ok_or_else(|| {
            Error::BadRequest(format!("category must be sub, dub or raw, got '{value}'"))
        }),
    }
}
