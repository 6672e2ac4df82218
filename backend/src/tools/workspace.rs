//! Built-in Chrome Enterprise diagnostic tools.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::info;

use super::{optional_str, required_str, Tool, ToolContext, ToolError};
use crate::workspace::{ActivityQuery, WorkspaceClient};

/// Enterprise Connector policy schemas inspected by `get_connector_policies`.
const CONNECTOR_SCHEMAS: &[&str] = &[
    "chrome.users.OnFileAttachedEnterpriseConnector",
    "chrome.users.OnFileDownloadedEnterpriseConnector",
    "chrome.users.OnBulkDataEntryEnterpriseConnector",
    "chrome.users.OnPrintEnterpriseConnector",
    "chrome.users.OnSecurityEventEnterpriseConnector",
];

const DEFAULT_ACTIVITY_DAYS: i64 = 7;

/// Read an optional bounded integer argument.
fn bounded_u32(args: &Value, key: &str, default: u32, max: u32) -> Result<u32, ToolError> {
    match &args[key] {
        Value::Null => Ok(default),
        value => value
            .as_u64()
            .filter(|n| (1..=max as u64).contains(n))
            .map(|n| n as u32)
            .ok_or_else(|| {
                ToolError::InvalidArguments(format!("{} must be between 1 and {}", key, max))
            }),
    }
}

fn items(response: &Value, key: &str) -> Vec<Value> {
    response[key].as_array().cloned().unwrap_or_default()
}

pub struct ChromeActivityTool {
    client: WorkspaceClient,
}

impl ChromeActivityTool {
    pub fn new(client: WorkspaceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ChromeActivityTool {
    fn name(&self) -> &'static str {
        "get_chrome_activity"
    }

    fn description(&self) -> &'static str {
        "Fetch Chrome audit log events (content transfers, malware transfers, password reuse, \
         sensitive data transfers) from the Admin SDK Reports API"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_key": {
                    "type": "string",
                    "description": "User email or 'all' (default)"
                },
                "event_name": {
                    "type": "string",
                    "description": "Optional event filter, e.g. 'CONTENT_TRANSFER' or 'SENSITIVE_DATA_TRANSFER'"
                },
                "start_time": {
                    "type": "string",
                    "description": "RFC 3339 start time. Defaults to 7 days ago."
                },
                "end_time": {
                    "type": "string",
                    "description": "Optional RFC 3339 end time"
                },
                "org_unit_id": {
                    "type": "string",
                    "description": "Optional org unit id to restrict events to"
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 1000,
                    "description": "Maximum number of events (default 50)"
                }
            },
            "required": []
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let start_time = match optional_str(&args, "start_time")? {
            Some(start) => start.to_string(),
            None => (Utc::now() - ChronoDuration::days(DEFAULT_ACTIVITY_DAYS))
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let query = ActivityQuery {
            user_key: optional_str(&args, "user_key")?
                .unwrap_or("all")
                .to_string(),
            event_name: optional_str(&args, "event_name")?.map(str::to_string),
            start_time: Some(start_time),
            end_time: optional_str(&args, "end_time")?.map(str::to_string),
            org_unit_id: optional_str(&args, "org_unit_id")?.map(str::to_string),
            max_results: bounded_u32(&args, "max_results", 50, 1000)?,
        };

        info!(
            "Session {}: fetching Chrome activity for {} (event: {:?})",
            ctx.session_id(),
            query.user_key,
            query.event_name
        );
        let response = self
            .client
            .chrome_activities(ctx.access_token(), &query)
            .await?;
        let events = items(&response, "items");

        Ok(json!({
            "count": events.len(),
            "events": events,
            "next_page_token": response.get("nextPageToken")
        }))
    }
}

pub struct DlpRulesTool {
    client: WorkspaceClient,
}

impl DlpRulesTool {
    pub fn new(client: WorkspaceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for DlpRulesTool {
    fn name(&self) -> &'static str {
        "list_dlp_rules"
    }

    fn description(&self) -> &'static str {
        "List Chrome data loss prevention rules configured in Cloud Identity"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn call(&self, ctx: &ToolContext, _args: Value) -> Result<Value, ToolError> {
        info!("Session {}: listing DLP rules", ctx.session_id());
        let response = self.client.list_dlp_rules(ctx.access_token()).await?;
        let rules = items(&response, "policies");
        Ok(json!({ "count": rules.len(), "rules": rules }))
    }
}

pub struct ConnectorPoliciesTool {
    client: WorkspaceClient,
}

impl ConnectorPoliciesTool {
    pub fn new(client: WorkspaceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ConnectorPoliciesTool {
    fn name(&self) -> &'static str {
        "get_connector_policies"
    }

    fn description(&self) -> &'static str {
        "Resolve Chrome Enterprise Connector policies (file attach, download, paste, print, \
         security events) for an org unit"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "org_unit_id": {
                    "type": "string",
                    "description": "The org unit id (from list_org_units)"
                }
            },
            "required": ["org_unit_id"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let org_unit_id = required_str(&args, "org_unit_id")?;
        info!(
            "Session {}: resolving connector policies for {}",
            ctx.session_id(),
            org_unit_id
        );

        let mut policies = Vec::new();
        for schema in CONNECTOR_SCHEMAS {
            ctx.log("info", format!("Resolving {}", schema));
            let response = self
                .client
                .resolve_policies(ctx.access_token(), org_unit_id, schema)
                .await?;
            policies.extend(items(&response, "resolvedPolicies"));
        }

        Ok(json!({
            "org_unit_id": org_unit_id,
            "count": policies.len(),
            "policies": policies
        }))
    }
}

pub struct OrgUnitsTool {
    client: WorkspaceClient,
}

impl OrgUnitsTool {
    pub fn new(client: WorkspaceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for OrgUnitsTool {
    fn name(&self) -> &'static str {
        "list_org_units"
    }

    fn description(&self) -> &'static str {
        "List the organizational units of the Workspace customer"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn call(&self, ctx: &ToolContext, _args: Value) -> Result<Value, ToolError> {
        info!("Session {}: listing org units", ctx.session_id());
        let response = self.client.list_org_units(ctx.access_token()).await?;
        let org_units: Vec<Value> = items(&response, "organizationUnits")
            .into_iter()
            .map(|ou| {
                json!({
                    "name": ou["name"],
                    "org_unit_id": ou["orgUnitId"],
                    "org_unit_path": ou["orgUnitPath"],
                    "parent_org_unit_id": ou["parentOrgUnitId"]
                })
            })
            .collect();
        Ok(json!({ "count": org_units.len(), "org_units": org_units }))
    }
}

pub struct EnrolledBrowsersTool {
    client: WorkspaceClient,
}

impl EnrolledBrowsersTool {
    pub fn new(client: WorkspaceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for EnrolledBrowsersTool {
    fn name(&self) -> &'static str {
        "list_enrolled_browsers"
    }

    fn description(&self) -> &'static str {
        "List browsers enrolled in Chrome Browser Cloud Management, optionally within an org unit"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "org_unit_path": {
                    "type": "string",
                    "description": "Optional org unit path, e.g. '/Engineering'"
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 100,
                    "description": "Maximum number of browsers (default 100)"
                }
            },
            "required": []
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let org_unit_path = optional_str(&args, "org_unit_path")?;
        let max_results = bounded_u32(&args, "max_results", 100, 100)?;
        info!(
            "Session {}: listing enrolled browsers (org unit: {:?})",
            ctx.session_id(),
            org_unit_path
        );
        let response = self
            .client
            .list_browsers(ctx.access_token(), max_results, org_unit_path)
            .await?;
        let browsers = items(&response, "browsers");
        Ok(json!({ "count": browsers.len(), "browsers": browsers }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::WorkspaceConfig;
    use axum::{routing::get, Json, Router};
    use std::sync::Weak;

    fn ctx() -> ToolContext {
        ToolContext::new("s1", "tok", Weak::new())
    }

    fn offline_client() -> WorkspaceClient {
        WorkspaceClient::new(WorkspaceConfig {
            admin_base_url: "http://127.0.0.1:9".to_string(),
            policy_base_url: "http://127.0.0.1:9".to_string(),
            identity_base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_bounded_u32() {
        assert_eq!(bounded_u32(&json!({}), "n", 50, 100).unwrap(), 50);
        assert_eq!(bounded_u32(&json!({ "n": 7 }), "n", 50, 100).unwrap(), 7);
        assert!(bounded_u32(&json!({ "n": 0 }), "n", 50, 100).is_err());
        assert!(bounded_u32(&json!({ "n": 101 }), "n", 50, 100).is_err());
        assert!(bounded_u32(&json!({ "n": "5" }), "n", 50, 100).is_err());
    }

    #[tokio::test]
    async fn test_connector_policies_requires_org_unit() {
        let tool = ConnectorPoliciesTool::new(offline_client());
        let err = tool.call(&ctx(), json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_activity_rejects_bad_max_results() {
        let tool = ChromeActivityTool::new(offline_client());
        let err = tool
            .call(&ctx(), json!({ "max_results": 5000 }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_tool_error() {
        let tool = OrgUnitsTool::new(offline_client());
        let err = tool.call(&ctx(), json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Workspace(_)));
        assert!(err.client_message().starts_with("Tool call failed:"));
    }

    #[tokio::test]
    async fn test_org_units_are_flattened() {
        let app = Router::new().route(
            "/admin/directory/v1/customer/my_customer/orgunits",
            get(|| async {
                Json(json!({
                    "organizationUnits": [{
                        "name": "Engineering",
                        "orgUnitId": "id:03ph8a2z",
                        "orgUnitPath": "/Engineering",
                        "parentOrgUnitId": "id:root"
                    }]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = WorkspaceClient::new(WorkspaceConfig {
            admin_base_url: base,
            ..Default::default()
        })
        .unwrap();
        let value = OrgUnitsTool::new(client).call(&ctx(), json!({})).await.unwrap();

        assert_eq!(value["count"], 1);
        assert_eq!(value["org_units"][0]["org_unit_path"], "/Engineering");
        assert_eq!(value["org_units"][0]["org_unit_id"], "id:03ph8a2z");
    }
}
