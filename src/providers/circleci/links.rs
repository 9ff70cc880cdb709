use super::types::Pipeline;

pub const DEFAULT_APP_URL: &str = "https://app.circleci.com";

/// Web page of a workflow in the CircleCI app.
///
/// e.g. <https://app.circleci.com/pipelines/gh/acme/app/42/workflows/0b7f…>
pub fn workflow_url(
    app_url: &str,
    project_slug: &str,
    pipeline_number: u64,
    workflow_id: &str,
) -> String {
    format!(
        "{}/pipelines/{project_slug}/{pipeline_number}/workflows/{workflow_id}",
        app_url.trim_end_matches('/')
    )
}

/// Web page of a job; jobs only get a number once they start.
pub fn job_url(workflow_url: &str, job_number: u64) -> String {
    format!("{workflow_url}/jobs/{job_number}")
}

/// Commit page on the VCS host, when the pipeline knows its repository URL
/// and revision.
pub fn commit_url(pipeline: &Pipeline) -> Option<String> {
    let repository = pipeline.vcs.origin_repository_url.as_deref()?;
    let revision = pipeline.vcs.revision.as_deref()?;
    let repository = repository.trim_end_matches('/').trim_end_matches(".git");

    if repository.contains("bitbucket.org") {
        Some(format!("{repository}/commits/{revision}"))
    } else {
        Some(format!("{repository}/commit/{revision}"))
    }
}

/// Accepts either a bare workflow id or any URL ending in one.
pub fn workflow_id_from(input: &str) -> &str {
    let without_query = input.split(['?', '#']).next().unwrap_or(input);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(without_query)
}
