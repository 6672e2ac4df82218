use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const ERROR_BODY_LIMIT: usize = 512;

/// Google Workspace API endpoints and tenant settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Customer id for Directory and Chrome Policy calls (`my_customer` = caller's tenant).
    pub customer_id: String,
    /// Admin SDK root (Reports and Directory APIs).
    pub admin_base_url: String,
    /// Chrome Policy API root.
    pub policy_base_url: String,
    /// Cloud Identity API root (DLP rules).
    pub identity_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            customer_id: "my_customer".to_string(),
            admin_base_url: "https://admin.googleapis.com".to_string(),
            policy_base_url: "https://chromepolicy.googleapis.com".to_string(),
            identity_base_url: "https://cloudidentity.googleapis.com".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Error type for Workspace API calls.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{api} request failed: {source}")]
    Request {
        api: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{api} returned HTTP {status}: {message}")]
    Status {
        api: &'static str,
        status: u16,
        message: String,
    },

    #[error("Invalid {api} base URL: {url}")]
    BaseUrl { api: &'static str, url: String },

    #[error("Failed to parse {api} response: {source}")]
    Decode {
        api: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Filters for the Chrome audit log.
#[derive(Debug, Clone)]
pub struct ActivityQuery {
    pub user_key: String,
    pub event_name: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub org_unit_id: Option<String>,
    pub max_results: u32,
}

impl Default for ActivityQuery {
    fn default() -> Self {
        Self {
            user_key: "all".to_string(),
            event_name: None,
            start_time: None,
            end_time: None,
            org_unit_id: None,
            max_results: 50,
        }
    }
}

/// HTTP client for the Workspace APIs, authenticated per call with the
/// caller's OAuth access token.
#[derive(Clone, Debug)]
pub struct WorkspaceClient {
    config: WorkspaceConfig,
    client: Client,
}

impl WorkspaceClient {
    pub fn new(config: WorkspaceConfig) -> Result<Self, WorkspaceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("chromedash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(WorkspaceError::Client)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Chrome audit events from the Admin SDK Reports API.
    pub async fn chrome_activities(
        &self,
        token: &str,
        query: &ActivityQuery,
    ) -> Result<Value, WorkspaceError> {
        let url = self.reports_url(&query.user_key)?;
        let mut params = vec![("maxResults", query.max_results.to_string())];
        if let Some(ref event_name) = query.event_name {
            params.push(("eventName", event_name.clone()));
        }
        if let Some(ref start_time) = query.start_time {
            params.push(("startTime", start_time.clone()));
        }
        if let Some(ref end_time) = query.end_time {
            params.push(("endTime", end_time.clone()));
        }
        if let Some(ref org_unit_id) = query.org_unit_id {
            params.push(("orgUnitID", org_unit_id.clone()));
        }

        self.execute(
            "Reports API",
            self.client.get(url).bearer_auth(token).query(&params),
        )
        .await
    }

    /// Reports API activity URL with `user_key` as one escaped path segment.
    fn reports_url(&self, user_key: &str) -> Result<Url, WorkspaceError> {
        let invalid = || WorkspaceError::BaseUrl {
            api: "Reports API",
            url: self.config.admin_base_url.clone(),
        };
        let mut url = Url::parse(&self.config.admin_base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["admin", "reports", "v1", "activity", "users"])
            .push(user_key)
            .extend(["applications", "chrome"]);
        Ok(url)
    }

    /// All org units of the customer from the Directory API.
    pub async fn list_org_units(&self, token: &str) -> Result<Value, WorkspaceError> {
        let url = format!(
            "{}/admin/directory/v1/customer/{}/orgunits",
            self.config.admin_base_url, self.config.customer_id
        );
        self.execute(
            "Directory API",
            self.client
                .get(&url)
                .bearer_auth(token)
                .query(&[("type", "all")]),
        )
        .await
    }

    /// Browsers enrolled in Chrome Browser Cloud Management.
    pub async fn list_browsers(
        &self,
        token: &str,
        max_results: u32,
        org_unit_path: Option<&str>,
    ) -> Result<Value, WorkspaceError> {
        let url = format!(
            "{}/admin/directory/v1.1beta1/customer/{}/devices/chromebrowsers",
            self.config.admin_base_url, self.config.customer_id
        );
        let mut params = vec![
            ("projection", "BASIC".to_string()),
            ("maxResults", max_results.to_string()),
        ];
        if let Some(path) = org_unit_path {
            params.push(("orgUnitPath", path.to_string()));
        }
        self.execute(
            "Chrome Browser Management API",
            self.client.get(&url).bearer_auth(token).query(&params),
        )
        .await
    }

    /// DLP rules from the Cloud Identity policies API.
    pub async fn list_dlp_rules(&self, token: &str) -> Result<Value, WorkspaceError> {
        let url = format!("{}/v1beta1/policies", self.config.identity_base_url);
        self.execute(
            "Cloud Identity API",
            self.client.get(&url).bearer_auth(token).query(&[
                ("filter", "setting.type.matches('rule.dlp')"),
                ("pageSize", "100"),
            ]),
        )
        .await
    }

    /// Resolved values of the policies matching `schema_filter` on an org unit.
    pub async fn resolve_policies(
        &self,
        token: &str,
        org_unit_id: &str,
        schema_filter: &str,
    ) -> Result<Value, WorkspaceError> {
        let url = format!(
            "{}/v1/customers/{}/policies:resolve",
            self.config.policy_base_url, self.config.customer_id
        );
        let org_unit = org_unit_id.trim_start_matches("id:");
        let body = json!({
            "policySchemaFilter": schema_filter,
            "policyTargetKey": {
                "targetResource": format!("orgunits/{}", org_unit)
            }
        });
        self.execute(
            "Chrome Policy API",
            self.client.post(&url).bearer_auth(token).json(&body),
        )
        .await
    }

    async fn execute(
        &self,
        api: &'static str,
        request: RequestBuilder,
    ) -> Result<Value, WorkspaceError> {
        let response = request
            .send()
            .await
            .map_err(|source| WorkspaceError::Request { api, source })?;

        let status = response.status();
        debug!("{} responded with {}", api, status);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkspaceError::Status {
                api,
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        response
            .json()
            .await
            .map_err(|source| WorkspaceError::Decode { api, source })
    }
}

/// Extract the human-readable message from a Google API error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(ERROR_BODY_LIMIT).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, Query},
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use std::collections::HashMap;

    /// Serve `app` on an ephemeral port and return its base URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client_for(base_url: &str) -> WorkspaceClient {
        WorkspaceClient::new(WorkspaceConfig {
            customer_id: "C0123".to_string(),
            admin_base_url: base_url.to_string(),
            policy_base_url: base_url.to_string(),
            identity_base_url: base_url.to_string(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_chrome_activities_sends_token_and_filters() {
        let app = Router::new().route(
            "/admin/reports/v1/activity/users/all/applications/chrome",
            get(
                |headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                    let auth = headers["authorization"].to_str().unwrap().to_string();
                    Json(json!({
                        "auth": auth,
                        "eventName": q.get("eventName"),
                        "maxResults": q.get("maxResults")
                    }))
                },
            ),
        );
        let base = serve(app).await;

        let query = ActivityQuery {
            event_name: Some("CONTENT_TRANSFER".to_string()),
            max_results: 10,
            ..Default::default()
        };
        let value = client_for(&base)
            .chrome_activities("tok-123", &query)
            .await
            .unwrap();

        assert_eq!(value["auth"], "Bearer tok-123");
        assert_eq!(value["eventName"], "CONTENT_TRANSFER");
        assert_eq!(value["maxResults"], "10");
    }

    #[tokio::test]
    async fn test_chrome_activities_escapes_user_key() {
        let app = Router::new()
            .route(
                "/admin/reports/v1/activity/users/{user}/applications/chrome",
                get(|Path(user): Path<String>| async move { Json(json!({ "user": user })) }),
            )
            .route(
                "/admin/directory/v1/users",
                get(|| async { Json(json!({ "user": "escaped" })) }),
            );
        let base = serve(app).await;

        let query = ActivityQuery {
            user_key: "../../directory/v1/users".to_string(),
            ..Default::default()
        };
        let value = client_for(&base)
            .chrome_activities("tok", &query)
            .await
            .unwrap();

        assert_eq!(value["user"], "../../directory/v1/users");
    }

    #[test]
    fn test_reports_url_keeps_base_path() {
        let client = client_for("https://example.test/proxy/");
        let url = client.reports_url("alice@example.com").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.test/proxy/admin/reports/v1/activity/users/alice@example.com/applications/chrome"
        );

        let client = client_for("not a url");
        assert!(matches!(
            client.reports_url("all"),
            Err(WorkspaceError::BaseUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_policies_targets_org_unit() {
        let app = Router::new().route(
            "/v1/customers/C0123/policies:resolve",
            post(|Json(body): Json<Value>| async move { Json(body) }),
        );
        let base = serve(app).await;

        let value = client_for(&base)
            .resolve_policies("tok", "id:03ph8a2z", "chrome.users.OnPrintEnterpriseConnector")
            .await
            .unwrap();

        assert_eq!(value["policyTargetKey"]["targetResource"], "orgunits/03ph8a2z");
        assert_eq!(
            value["policySchemaFilter"],
            "chrome.users.OnPrintEnterpriseConnector"
        );
    }

    #[tokio::test]
    async fn test_error_status_surfaces_google_message() {
        let app = Router::new().route(
            "/admin/directory/v1/customer/C0123/orgunits",
            get(|| async {
                (
                    StatusCode::FORBIDDEN,
                    Json(json!({
                        "error": { "code": 403, "message": "Not Authorized to access this resource/api" }
                    })),
                )
            }),
        );
        let base = serve(app).await;

        let err = client_for(&base).list_org_units("tok").await.unwrap_err();
        match err {
            WorkspaceError::Status {
                status, message, ..
            } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Not Authorized to access this resource/api");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_error_message_truncates_plain_bodies() {
        let body = "x".repeat(2000);
        assert_eq!(error_message(&body).len(), ERROR_BODY_LIMIT);
    }
}
