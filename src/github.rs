use async_trait::async_trait;
use std::time::Duration;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{GitHubConfig, RunConfig};
use crate::credentials::ApiToken;
use crate::discovery::{is_safe_component, Discovery, RepoDescriptor};

/// Page size of every listing request
pub const PER_PAGE: u32 = 100;

/// Failure to obtain the complete repository catalog
#[derive(Debug, Error)]
pub enum CatalogFetchError {
    #[error("error getting repos list from github, query={query}, err={source}")]
    Transport {
        query: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("error getting repos list from github, query={query}, status={status}, reason={reason}")]
    Status {
        query: String,
        status: u16,
        reason: String,
    },

    #[error("malformed repos list from github, query={query}, err={source}")]
    Decode {
        query: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot build github client: {0}")]
    Client(String),
}

impl CatalogFetchError {
    /// The request URL that failed, when there was one
    pub fn query(&self) -> Option<&str> {
        match self {
            CatalogFetchError::Transport { query, .. }
            | CatalogFetchError::Status { query, .. }
            | CatalogFetchError::Decode { query, .. } => Some(query.as_str()),
            CatalogFetchError::Client(_) => None,
        }
    }
}

/// Time limits for every API request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// Whole request, from connect to the end of the body
    pub request: Duration,
    pub connect: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(60),
            connect: Duration::from_secs(10),
        }
    }
}

impl From<&GitHubConfig> for HttpTimeouts {
    fn from(github: &GitHubConfig) -> Self {
        Self {
            request: Duration::from_secs(github.request_timeout),
            connect: Duration::from_secs(github.connect_timeout),
        }
    }
}

/// Client for the organization repository listing API
#[derive(Debug)]
pub struct GitHubClient {
    client: Client,
    api_url: String,
    org_name: String,
}

impl GitHubClient {
    /// Build a client that authenticates every request with `token`
    pub fn new(
        api_url: &str,
        org_name: &str,
        token: &ApiToken,
        user_agent: &str,
        timeouts: HttpTimeouts,
    ) -> Result<Self, CatalogFetchError> {
        if !is_safe_component(org_name) {
            return Err(CatalogFetchError::Client(format!(
                "invalid organization name: {:?}",
                org_name
            )));
        }

        let mut headers = HeaderMap::new();

        let mut auth = HeaderValue::from_str(&format!("token {}", token.expose()))
            .map_err(|_| CatalogFetchError::Client("token contains invalid characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|_| CatalogFetchError::Client("invalid user agent".into()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeouts.request)
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| CatalogFetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            org_name: org_name.to_string(),
        })
    }

    /// Build a client from the run settings
    pub fn from_run_config(run: &RunConfig) -> Result<Self, CatalogFetchError> {
        Self::new(
            &run.github.api_url,
            &run.org_name,
            &run.token,
            &run.github.user_agent,
            HttpTimeouts::from(&run.github),
        )
    }

    pub fn org_name(&self) -> &str {
        &self.org_name
    }

    fn page_url(&self, page: u32) -> String {
        format!(
            "{}/orgs/{}/repos?per_page={}&page={}",
            self.api_url, self.org_name, PER_PAGE, page
        )
    }

    /// Fetch a single page of the organization's repositories
    pub async fn fetch_page(&self, page: u32) -> Result<Vec<RepoDescriptor>, CatalogFetchError> {
        let query = self.page_url(page);
        debug!("request='{}'", query);

        let response = self
            .client
            .get(&query)
            .send()
            .await
            .map_err(|source| CatalogFetchError::Transport {
                query: query.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CatalogFetchError::Status {
                query,
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| CatalogFetchError::Transport {
                query: query.clone(),
                source,
            })?;

        serde_json::from_slice::<Vec<RepoDescriptor>>(&body)
            .map_err(|source| CatalogFetchError::Decode { query, source })
    }

    /// List all repositories of the organization, page by page, until the
    /// API returns an empty page
    pub async fn list_organization_repositories(
        &self,
    ) -> Result<Vec<RepoDescriptor>, CatalogFetchError> {
        info!("getting github repo list for organization {}...", self.org_name);

        let mut repositories = Vec::new();
        let mut page = 1u32;

        loop {
            let items = self.fetch_page(page).await?;
            if items.is_empty() {
                break;
            }

            repositories.extend(items);
            page += 1;
        }

        debug!(
            "organization={}, n_repos={}",
            self.org_name,
            repositories.len()
        );
        Ok(repositories)
    }
}

#[async_trait]
impl Discovery for GitHubClient {
    async fn discover(&self) -> Result<Vec<RepoDescriptor>, CatalogFetchError> {
        self.list_organization_repositories().await
    }

    fn provider_name(&self) -> &'static str {
        "GitHub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::collections::HashSet;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page_of(prefix: &str, count: usize) -> serde_json::Value {
        let repos: Vec<_> = (0..count)
            .map(|i| {
                json!({
                    "id": i,
                    "name": format!("{}-{}", prefix, i),
                    "full_name": format!("acme/{}-{}", prefix, i),
                    "private": true,
                })
            })
            .collect();
        json!(repos)
    }

    fn client_for(server: &MockServer) -> GitHubClient {
        GitHubClient::new(
            &server.uri(),
            "acme",
            &ApiToken::new("s3cret"),
            "test-agent",
            HttpTimeouts::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_pagination_collects_every_page() {
        let server = MockServer::start().await;

        for (page, prefix) in [("1", "a"), ("2", "b")] {
            Mock::given(method("GET"))
                .and(path("/orgs/acme/repos"))
                .and(query_param("per_page", "100"))
                .and(query_param("page", page))
                .and(header("authorization", "token s3cret"))
                .respond_with(ResponseTemplate::new(200).set_body_json(page_of(prefix, 100)))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let repos = client_for(&server)
            .list_organization_repositories()
            .await
            .unwrap();

        assert_eq!(repos.len(), 200);
        let unique: HashSet<_> = repos.iter().map(|r| r.full_name.clone()).collect();
        assert_eq!(unique.len(), 200);
        assert!(unique.contains("acme/a-0"));
        assert!(unique.contains("acme/b-99"));
    }

    #[tokio::test]
    async fn test_empty_organization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let repos = client_for(&server).discover().await.unwrap();
        assert!(repos.is_empty());
    }

    #[tokio::test]
    async fn test_non_ok_status_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "message": "Bad credentials"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).discover().await.unwrap_err();
        assert_matches!(err, CatalogFetchError::Status { status: 401, .. });
        assert!(err.query().unwrap().contains("page=1"));
        assert!(err.to_string().contains("Unauthorized"));
    }

    #[tokio::test]
    async fn test_failure_on_later_page_discards_partial_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_of("a", 100)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let result = client_for(&server).discover().await;
        assert_matches!(result, Err(CatalogFetchError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let result = client_for(&server).discover().await;
        assert_matches!(result, Err(CatalogFetchError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_object_instead_of_array_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"message": "Not Found"})),
            )
            .mount(&server)
            .await;

        let result = client_for(&server).discover().await;
        assert_matches!(result, Err(CatalogFetchError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_transport_failure() {
        // Nothing listens on port 9 (discard) on test machines.
        let client = GitHubClient::new(
            "http://127.0.0.1:9",
            "acme",
            &ApiToken::new("t"),
            "ua",
            HttpTimeouts::default(),
        )
        .unwrap();

        let result = client.discover().await;
        assert_matches!(result, Err(CatalogFetchError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_stalled_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let timeouts = HttpTimeouts {
            request: Duration::from_millis(200),
            connect: Duration::from_secs(1),
        };
        let client =
            GitHubClient::new(&server.uri(), "acme", &ApiToken::new("t"), "ua", timeouts).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), client.discover())
            .await
            .expect("request was never cut off");
        assert_matches!(
            result,
            Err(CatalogFetchError::Transport { ref source, .. }) if source.is_timeout()
        );
    }

    #[test]
    fn test_timeouts_from_config() {
        let github = GitHubConfig {
            request_timeout: 5,
            connect_timeout: 2,
            ..GitHubConfig::default()
        };
        assert_eq!(
            HttpTimeouts::from(&github),
            HttpTimeouts {
                request: Duration::from_secs(5),
                connect: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn test_org_name_must_be_a_path_component() {
        for org in ["acme/../admin", "acme?page=9", "acme#x", "", ".."] {
            let result = GitHubClient::new(
                "https://api.github.com",
                org,
                &ApiToken::new("t"),
                "ua",
                HttpTimeouts::default(),
            );
            assert_matches!(result, Err(CatalogFetchError::Client(_)), "accepted {:?}", org);
        }
    }

    #[test]
    fn test_page_url() {
        let client = GitHubClient::new(
            "https://api.github.com/",
            "mycompany",
            &ApiToken::new("t"),
            "ua",
            HttpTimeouts::default(),
        )
        .unwrap();

        assert_eq!(
            client.page_url(3),
            "https://api.github.com/orgs/mycompany/repos?per_page=100&page=3"
        );
    }
}
