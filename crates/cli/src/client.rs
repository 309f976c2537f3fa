//! HTTP client for the keybranch server API.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use keybranch_core::models::{Branch, DiffResult, ForkResult, MergeRequest, MergeResult};

const USER_HEADER: &str = "x-keybranch-user";

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Thin typed wrapper over the server's JSON endpoints.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    user: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, user: Option<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let agent = format!("keybranch-cli/{}", env!("CARGO_PKG_VERSION"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&agent).context("invalid user agent")?,
        );
        if let Some(user) = &user {
            headers.insert(
                USER_HEADER,
                HeaderValue::from_str(user).context("user name is not a valid header value")?,
            );
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn list_branches(&self, space_id: &str) -> Result<Vec<Branch>> {
        let url = self.url(&format!("/api/spaces/{space_id}/branches"));
        let resp = self.http.get(&url).send().await.context(url)?;
        decode(resp).await
    }

    pub async fn fork(&self, space_id: &str, name: &str, from_branch_id: &str) -> Result<ForkResult> {
        let url = self.url(&format!("/api/spaces/{space_id}/branches"));
        let mut body = json!({"name": name, "fromBranchId": from_branch_id});
        if let Some(user) = &self.user {
            body["userId"] = json!(user);
        }
        let resp = self.http.post(&url).json(&body).send().await.context(url)?;
        decode(resp).await
    }

    pub async fn delete_branch(&self, branch_id: &str) -> Result<()> {
        let url = self.url(&format!("/api/branches/{branch_id}"));
        let resp = self.http.delete(&url).send().await.context(url)?;
        let _: serde_json::Value = decode(resp).await?;
        Ok(())
    }

    pub async fn diff(&self, source_id: &str, target_id: &str) -> Result<DiffResult> {
        let url = self.url(&format!("/api/branches/{source_id}/diff/{target_id}"));
        let resp = self.http.get(&url).send().await.context(url)?;
        decode(resp).await
    }

    pub async fn merge(&self, source_id: &str, request: &MergeRequest) -> Result<MergeResult> {
        let url = self.url(&format!("/api/branches/{source_id}/merge"));
        let resp = self.http.post(&url).json(request).send().await.context(url)?;
        decode(resp).await
    }
}

/// Parse a success body as `T`, or turn an `{"error": ..}` body into an error.
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    debug!(%status, url = %resp.url(), "server responded");
    if status.is_success() {
        return resp.json::<T>().await.context("malformed response body");
    }

    let text = resp.text().await.unwrap_or_default();
    anyhow::bail!("{}", error_message(status, &text))
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => format!("{} ({})", parsed.error, status),
        Err(_) if body.trim().is_empty() => format!("server returned {}", status),
        Err(_) => format!("server returned {}: {}", status, body.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_bodies_are_unwrapped() {
        let msg = error_message(
            StatusCode::BAD_REQUEST,
            r#"{"error":"Cannot delete the default branch"}"#,
        );
        assert_eq!(msg, "Cannot delete the default branch (400 Bad Request)");
    }

    #[test]
    fn non_json_bodies_are_shown_raw() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "upstream down\n"),
            "server returned 502 Bad Gateway: upstream down"
        );
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, ""),
            "server returned 404 Not Found"
        );
    }

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let client = ApiClient::new("http://localhost:3000/", Some("alice".into())).unwrap();
        assert_eq!(
            client.url("/api/health"),
            "http://localhost:3000/api/health"
        );
    }
}
