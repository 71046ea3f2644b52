use std::time::Duration;

use confidant_common::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

/// Public profile data used by the GitHub review mode.
#[derive(Debug, Clone, PartialEq)]
pub struct GitHubProfile {
    pub login: String,
    pub bio: Option<String>,
    pub public_repos: u64,
    /// Most recently updated repositories, newest first.
    pub recent_repos: Vec<String>,
}

#[derive(Deserialize)]
struct UserBody {
    login: String,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    public_repos: u64,
}

#[derive(Deserialize)]
struct RepoBody {
    name: String,
}

/// Unauthenticated client for the GitHub REST API.
pub struct GitHubClient {
    client: Client,
    base_url: String,
    max_repos: usize,
    timeout: Duration,
}

impl GitHubClient {
    pub fn new(base_url: impl Into<String>, max_repos: usize, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_repos,
            timeout,
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// `None` when the user does not exist.
    pub async fn profile(&self, username: &str) -> Result<Option<GitHubProfile>> {
        let response = self
            .get(&format!("{}/users/{username}", self.base_url), &[])
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let user: UserBody = read_json(response).await?;

        let per_page = self.max_repos.to_string();
        let response = self
            .get(
                &format!("{}/users/{username}/repos", self.base_url),
                &[("sort", "updated"), ("per_page", per_page.as_str())],
            )
            .await?;
        let repos: Vec<RepoBody> = read_json(response).await?;

        Ok(Some(GitHubProfile {
            login: user.login,
            bio: user.bio.filter(|bio| !bio.trim().is_empty()),
            public_repos: user.public_repos,
            recent_repos: repos
                .into_iter()
                .take(self.max_repos)
                .map(|repo| repo.name)
                .collect(),
        }))
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .query(query)
            .header("Accept", "application/vnd.github+json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("github request failed: {e}")))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(Error::UpstreamStatus {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }
    response
        .json()
        .await
        .map_err(|e| Error::ProviderUnavailable(format!("failed to parse github response: {e}")))
}
