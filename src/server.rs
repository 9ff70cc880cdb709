//! HTTP front end serving live status matrices and job timelines.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use log::{error, info, warn};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use crate::config::Config;
use crate::error::CISummaryError;
use crate::output::{render_html, render_svg};
use crate::providers::circleci::aggregate::aggregate;
use crate::providers::circleci::client::CircleCiClient;
use crate::providers::circleci::crawler::Crawler;
use crate::providers::circleci::snapshot::Snapshot;
use crate::providers::circleci::timeline::layout;
use crate::providers::circleci::views::View;
use crate::report::{MatrixOptions, StatusMatrix};

pub struct AppState {
    pub client: Arc<CircleCiClient>,
    pub config: Config,
    /// Snapshots of served crawls land here for later `--cached` reports.
    pub cache_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct MatrixQuery {
    pages: Option<u32>,
}

enum ServerError {
    NotFound,
    Upstream(CISummaryError),
}

impl From<CISummaryError> for ServerError {
    fn from(e: CISummaryError) -> Self {
        Self::Upstream(e)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            Self::Upstream(e) => {
                error!("Request failed: {e}");
                (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
            }
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/:vcs/:org/:repo/workflow_timeline/:id", get(workflow_timeline))
        .route("/:vcs/:org/:repo/:view", get(status_matrix))
        .layer(CompressionLayer::new())
        .with_state(state)
}

/// Serves until the process is stopped.
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let address = format!("{}:{}", state.config.server.bind, state.config.server.port);
    if state.config.server.allowed_slugs.is_empty() {
        warn!("No allowed slugs configured; every report request will be a 404");
    }

    let listener = TcpListener::bind(&address).await?;
    info!("Serving reports on http://{address}");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn allowed_slug(state: &AppState, vcs: &str, org: &str, repo: &str) -> Result<String, ServerError> {
    let slug = format!("{vcs}/{org}/{repo}");
    if state.config.server.is_allowed(&slug) {
        Ok(slug)
    } else {
        warn!("Rejected request for unlisted project {slug}");
        Err(ServerError::NotFound)
    }
}

async fn status_matrix(
    State(state): State<Arc<AppState>>,
    Path((vcs, org, repo, view)): Path<(String, String, String, String)>,
    Query(query): Query<MatrixQuery>,
) -> Result<Html<String>, ServerError> {
    let view: View = view.parse().map_err(|_| ServerError::NotFound)?;
    let slug = allowed_slug(&state, &vcs, &org, &repo)?;
    let pages = query.pages.unwrap_or_else(|| view.default_pages());

    let crawler = Crawler::new(Arc::clone(&state.client))
        .with_workers(state.config.crawl.jobs)
        .with_filter(view.filter(None, state.config.server.ignored_for(&slug)));
    let data = aggregate(crawler.crawl(view.source(&slug, None), pages).await?);

    let snapshot = Snapshot::for_project(&state.cache_dir, &slug, view.as_str());
    if let Err(e) = snapshot.save(&data) {
        warn!("Failed to save snapshot {}: {e}", snapshot.path().display());
    }

    let options = MatrixOptions {
        app_url: state.config.circleci.app_url.clone(),
        trailing_workflows: state.config.report.trailing_workflows.clone(),
    };
    let matrix = StatusMatrix::build(&data, &slug, view.as_str(), &options, Utc::now());
    Ok(Html(render_html(&matrix, true)))
}

async fn workflow_timeline(
    State(state): State<Arc<AppState>>,
    Path((vcs, org, repo, id)): Path<(String, String, String, String)>,
) -> Result<Response, ServerError> {
    allowed_slug(&state, &vcs, &org, &repo)?;

    let jobs = state.client.workflow_jobs(&id).await?.value;
    let chart = layout(&jobs).chart(&jobs);
    let svg = render_svg(&chart, &format!("workflow {id}"));

    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn create_state(base_url: &str) -> Arc<AppState> {
        create_state_in(base_url, std::env::temp_dir().join("cisummary-server-tests"))
    }

    fn create_state_in(base_url: &str, cache_dir: PathBuf) -> Arc<AppState> {
        let mut config = Config::default();
        config.server.allowed_slugs = vec!["gh/acme/app".to_string()];
        config.server.ignored_pipelines.insert("gh/acme/app".to_string(), vec![2]);
        config.crawl.jobs = 4;

        let client = CircleCiClient::new(base_url, Some(Token::from("test-token")), None).unwrap();
        Arc::new(AppState {
            client: Arc::new(client),
            config,
            cache_dir,
        })
    }

    async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, String) {
        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = get(create_state("http://127.0.0.1:1"), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_unlisted_slug_is_not_found() {
        let state = create_state("http://127.0.0.1:1");

        let (status, _) = get(Arc::clone(&state), "/gh/acme/other/main").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(state, "/gh/acme/other/workflow_timeline/w1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_view_is_not_found() {
        let (status, _) = get(create_state("http://127.0.0.1:1"), "/gh/acme/app/nightly").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_crawl_failure_is_bad_gateway() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v2/project/gh/acme/app/pipeline")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .with_body("upstream down")
            .create_async()
            .await;

        let (status, body) = get(create_state(&server.url()), "/gh/acme/app/all?pages=1").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("upstream down"));
    }

    #[tokio::test]
    async fn test_matrix_page_skips_ignored_pipelines() {
        let mut server = mockito::Server::new_async().await;
        let pipelines = server
            .mock("GET", "/api/v2/project/gh/acme/app/pipeline")
            .match_query(mockito::Matcher::UrlEncoded("branch".into(), "main".into()))
            .with_status(200)
            .with_body(
                r#"{"items": [
                    {"id": "p1", "number": 1, "project_slug": "gh/acme/app", "vcs": {"branch": "main"}},
                    {"id": "p2", "number": 2, "project_slug": "gh/acme/app", "vcs": {"branch": "main"}}
                ], "next_page_token": null}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let workflows = server
            .mock("GET", "/api/v2/pipeline/p1/workflow")
            .with_status(200)
            .with_body(
                r#"{"items": [{"id": "w1", "name": "build", "status": "success",
                    "created_at": "2024-05-01T10:00:00Z", "stopped_at": "2024-05-01T10:05:00Z"}],
                    "next_page_token": null}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let jobs = server
            .mock("GET", "/api/v2/workflow/w1/job")
            .with_status(200)
            .with_body(
                r#"{"items": [{"id": "j1", "name": "compile", "status": "success", "job_number": 9}],
                    "next_page_token": null}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let cache_dir = tempfile::TempDir::new().unwrap();
        let state = create_state_in(&server.url(), cache_dir.path().to_path_buf());

        let (status, body) = get(state, "/gh/acme/app/main?pages=1").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("CI summary: main"));
        assert!(body.contains("href=\"workflow_timeline/w1\""));
        assert!(body.contains("5:00"));
        assert!(body.contains("/pipelines/gh/acme/app/1/workflows/w1/jobs/9"));
        pipelines.assert_async().await;
        workflows.assert_async().await;
        jobs.assert_async().await;

        // The served crawl is replayable by a cached report
        let saved = Snapshot::for_project(cache_dir.path(), "gh/acme/app", "main")
            .load()
            .unwrap();
        assert_eq!(saved.pipelines.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_workflow_timeline_is_svg() {
        let mut server = mockito::Server::new_async().await;
        let _jobs = server
            .mock("GET", "/api/v2/workflow/w1/job")
            .with_status(200)
            .with_body(
                r#"{"items": [
                    {"id": "a", "name": "checkout", "status": "success", "dependencies": [],
                     "started_at": "2024-05-01T10:00:00Z", "stopped_at": "2024-05-01T10:01:00Z"},
                    {"id": "b", "name": "unit-tests", "status": "failed", "dependencies": ["a"],
                     "started_at": "2024-05-01T10:01:00Z", "stopped_at": "2024-05-01T10:02:00Z"}
                ], "next_page_token": null}"#,
            )
            .create_async()
            .await;

        let response = create_router(create_state(&server.url()))
            .oneshot(
                Request::builder()
                    .uri("/gh/acme/app/workflow_timeline/w1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/svg+xml");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let svg = String::from_utf8_lossy(&bytes);
        assert!(svg.contains(">unit-test</text>"));
    }
}
