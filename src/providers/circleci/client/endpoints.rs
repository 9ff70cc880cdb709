use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::core::{CircleCiClient, Fetched};
use crate::error::Result;
use crate::providers::circleci::cache::CacheKey;
use crate::providers::circleci::types::{Job, Page, Pipeline, Workflow};

/// Body of `POST workflow/{id}/rerun`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RerunRequest {
    pub jobs: Vec<String>,
    pub from_failed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RerunResponse {
    #[serde(default)]
    pub workflow_id: Option<String>,
}

fn workflow_is_terminal(workflow: &Workflow) -> bool {
    workflow.status.is_terminal()
}

fn jobs_are_terminal(page: &Page<Job>) -> bool {
    page.items.iter().all(|job| job.status.is_terminal())
}

impl CircleCiClient {
    /// One page of a project's pipelines, optionally restricted to a branch.
    /// Never cached: the pipeline set of a branch keeps growing.
    pub async fn project_pipelines(
        &self,
        project_slug: &str,
        branch: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<Page<Pipeline>> {
        let mut query = Vec::new();
        if let Some(branch) = branch {
            query.push(("branch", branch));
        }
        if let Some(token) = page_token {
            query.push(("page-token", token));
        }
        self.get(&format!("project/{project_slug}/pipeline"), &query)
            .await
    }

    /// One page of all pipelines of an organization.
    pub async fn org_pipelines(
        &self,
        org_slug: &str,
        page_token: Option<&str>,
    ) -> Result<Page<Pipeline>> {
        let mut query = vec![("org-slug", org_slug), ("mine", "false")];
        if let Some(token) = page_token {
            query.push(("page-token", token));
        }
        self.get("pipeline", &query).await
    }

    /// Every workflow of a pipeline, following pagination.
    pub async fn pipeline_workflows(&self, pipeline_id: &str) -> Result<Vec<Workflow>> {
        self.all_pages(&format!("pipeline/{pipeline_id}/workflow"))
            .await
    }

    /// A single workflow; cached once its status is terminal.
    pub async fn workflow(&self, workflow_id: &str) -> Result<Fetched<Workflow>> {
        let path = format!("workflow/{workflow_id}");
        self.cached(CacheKey::workflow(workflow_id), workflow_is_terminal, || async move {
            self.get(&path, &[]).await
        })
        .await
    }

    /// Every job of a workflow, following pagination; cached once every job
    /// has reached a terminal status.
    pub async fn workflow_jobs(&self, workflow_id: &str) -> Result<Fetched<Vec<Job>>> {
        let fetched = self
            .cached(
                CacheKey::workflow_jobs(workflow_id),
                jobs_are_terminal,
                || async {
                    let items = self
                        .all_pages(&format!("workflow/{workflow_id}/job"))
                        .await?;
                    Ok(Page {
                        items,
                        next_page_token: None,
                    })
                },
            )
            .await?;

        Ok(Fetched {
            value: fetched.value.items,
            cached: fetched.cached,
        })
    }

    /// Triggers a re-run of a workflow.
    pub async fn rerun_workflow(
        &self,
        workflow_id: &str,
        request: &RerunRequest,
    ) -> Result<RerunResponse> {
        self.post(&format!("workflow/{workflow_id}/rerun"), request)
            .await
    }

    async fn all_pages<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let query: Vec<(&str, &str)> = cursor
                .as_deref()
                .map(|token| vec![("page-token", token)])
                .unwrap_or_default();
            let page: Page<T> = self.get(path, &query).await?;
            items.extend(page.items);

            match page.next_page_token {
                Some(token) => {
                    debug!("Following next page of {path}");
                    cursor = Some(token);
                }
                None => break,
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::auth::Token;
    use crate::providers::circleci::cache::memory::MemoryCache;
    use crate::providers::circleci::cache::{CacheStore, FileCache};
    use crate::providers::circleci::types::Status;

    fn client_with_cache(base_url: &str, cache: Arc<dyn CacheStore>) -> CircleCiClient {
        CircleCiClient::new(base_url, Some(Token::from("test-token")), Some(cache)).unwrap()
    }

    fn workflow_body(id: &str, status: &str) -> String {
        json!({
            "id": id,
            "name": "build",
            "status": status,
            "created_at": "2024-05-01T10:00:00Z",
            "stopped_at": "2024-05-01T10:20:00Z"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_terminal_workflow_is_served_from_cache_on_second_run() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v2/workflow/w1")
            .with_status(200)
            .with_body(workflow_body("w1", "success"))
            .expect(1)
            .create_async()
            .await;

        let temp_dir = tempfile::TempDir::new().unwrap();

        // First run populates the on-disk cache
        let first = client_with_cache(
            &server.url(),
            Arc::new(FileCache::new(temp_dir.path()).unwrap()),
        );
        let fetched = first.workflow("w1").await.unwrap();
        assert!(!fetched.cached);
        let written = std::fs::read(temp_dir.path().join("workflow-w1.json")).unwrap();

        // Second run, new client, same directory: no network call
        let second = client_with_cache(
            &server.url(),
            Arc::new(FileCache::new(temp_dir.path()).unwrap()),
        );
        let fetched = second.workflow("w1").await.unwrap();
        assert!(fetched.cached);
        assert_eq!(fetched.value.status, Status::Success);
        assert_eq!(second.request_counts().uncached_requests, 0);
        assert_eq!(second.request_counts().total_requests, 1);

        let reread = std::fs::read(temp_dir.path().join("workflow-w1.json")).unwrap();
        assert_eq!(written, reread);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_running_workflow_is_always_refetched() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v2/workflow/w2")
            .with_status(200)
            .with_body(workflow_body("w2", "running"))
            .expect(2)
            .create_async()
            .await;

        let cache = Arc::new(MemoryCache::default());
        let client = client_with_cache(&server.url(), cache.clone());

        assert!(!client.workflow("w2").await.unwrap().cached);
        assert!(!client.workflow("w2").await.unwrap().cached);
        assert_eq!(cache.len(), 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stale_running_entry_is_never_written() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v2/workflow/w3")
            .with_status(200)
            .with_body(workflow_body("w3", "on_hold"))
            .create_async()
            .await;

        let cache = Arc::new(MemoryCache::default());
        let client = client_with_cache(&server.url(), cache.clone());
        client.workflow("w3").await.unwrap();

        assert!(cache.payload(&CacheKey::workflow("w3")).is_none());
    }

    #[tokio::test]
    async fn test_workflow_jobs_follow_pages_and_cache_when_all_terminal() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/api/v2/workflow/w1/job")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "items": [{"id": "j1", "name": "lint", "status": "success", "dependencies": []}],
                    "next_page_token": "page2"
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/api/v2/workflow/w1/job")
            .match_query(Matcher::UrlEncoded("page-token".into(), "page2".into()))
            .with_status(200)
            .with_body(
                json!({
                    "items": [{"id": "j2", "name": "test", "status": "failed", "dependencies": ["j1"]}],
                    "next_page_token": null
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let cache = Arc::new(MemoryCache::default());
        let client = client_with_cache(&server.url(), cache.clone());

        let jobs = client.workflow_jobs("w1").await.unwrap();
        assert_eq!(jobs.value.len(), 2);
        assert_eq!(jobs.value[1].dependencies, vec!["j1".to_string()]);

        let again = client.workflow_jobs("w1").await.unwrap();
        assert!(again.cached);
        assert_eq!(again.value, jobs.value);
        assert!(cache.payload(&CacheKey::workflow_jobs("w1")).is_some());

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_workflow_jobs_with_pending_job_not_cached() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v2/workflow/w9/job")
            .with_status(200)
            .with_body(
                json!({
                    "items": [
                        {"id": "j1", "name": "lint", "status": "success"},
                        {"id": "j2", "name": "deploy", "status": "blocked"}
                    ],
                    "next_page_token": null
                })
                .to_string(),
            )
            .create_async()
            .await;

        let cache = Arc::new(MemoryCache::default());
        let client = client_with_cache(&server.url(), cache.clone());
        client.workflow_jobs("w9").await.unwrap();

        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_project_pipelines_passes_branch_and_cursor() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v2/project/gh/acme/app/pipeline")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("branch".into(), "main".into()),
                Matcher::UrlEncoded("page-token".into(), "abc".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"items": [], "next_page_token": null}"#)
            .expect(1)
            .create_async()
            .await;

        let client = CircleCiClient::new(&server.url(), Some(Token::from("t")), None).unwrap();
        let page = client
            .project_pipelines("gh/acme/app", Some("main"), Some("abc"))
            .await
            .unwrap();

        assert!(page.items.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rerun_posts_job_list() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/workflow/w1/rerun")
            .match_body(Matcher::Json(json!({"jobs": ["j1"], "from_failed": false})))
            .with_status(202)
            .with_body(r#"{"workflow_id": "w1-rerun"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = CircleCiClient::new(&server.url(), Some(Token::from("t")), None).unwrap();
        let response = client
            .rerun_workflow(
                "w1",
                &RerunRequest {
                    jobs: vec!["j1".to_string()],
                    from_failed: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(response.workflow_id.as_deref(), Some("w1-rerun"));
        mock.assert_async().await;
    }
}
