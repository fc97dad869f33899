//! Discovery of the active file through the Nitrado HTTP API.
//!
//! Discovery is an optional second opinion: when credentials are present it
//! names the newest ADM file and hands out a short-lived direct download
//! URL for it. Any failure just means "unavailable" and the poll cycle
//! carries on with the directory scan alone.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::DiscoveryError;
use crate::naming::{is_log_file, timestamp_from_name};
use crate::target::PollTarget;

pub const DEFAULT_API_BASE: &str = "https://api.nitrado.net";
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials needed to ask the API about a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryCredentials {
    pub token: String,
    pub service_id: u64,
    pub folder_prefix: String,
}

impl DiscoveryCredentials {
    /// Target fields first, then `NITRADO_API_TOKEN`, `NITRADO_SERVICE_ID`
    /// and `NITRADO_LOG_DIR`. On failure returns the missing pieces.
    pub fn resolve(target: &PollTarget) -> Result<Self, Vec<&'static str>> {
        Self::resolve_with(target, |key| std::env::var(key).ok())
    }

    pub fn resolve_with<F>(target: &PollTarget, env: F) -> Result<Self, Vec<&'static str>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let token = non_empty(target.nitrado_api_token.clone()).or_else(|| non_empty(env("NITRADO_API_TOKEN")));
        let service_id = target
            .nitrado_service_id
            .or_else(|| env("NITRADO_SERVICE_ID").and_then(|s| s.trim().parse::<u64>().ok()));
        let folder_prefix =
            non_empty(target.nitrado_log_folder_prefix.clone()).or_else(|| non_empty(env("NITRADO_LOG_DIR")));

        match (token, service_id, folder_prefix) {
            (Some(token), Some(service_id), Some(folder_prefix)) => Ok(Self {
                token,
                service_id,
                folder_prefix,
            }),
            (token, service_id, folder_prefix) => {
                let mut missing = Vec::new();
                if token.is_none() {
                    missing.push("token");
                }
                if service_id.is_none() {
                    missing.push("service_id");
                }
                if folder_prefix.is_none() {
                    missing.push("dir");
                }
                Err(missing)
            }
        }
    }
}

/// The API's view of the active file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryHint {
    pub file_name: String,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Found(DiscoveryHint),
    /// Not configured or not reachable; carries a short diagnostic.
    Unavailable(String),
}

impl DiscoveryOutcome {
    pub fn hint(&self) -> Option<&DiscoveryHint> {
        match self {
            DiscoveryOutcome::Found(hint) => Some(hint),
            DiscoveryOutcome::Unavailable(_) => None,
        }
    }

    pub fn into_hint(self) -> Option<DiscoveryHint> {
        match self {
            DiscoveryOutcome::Found(hint) => Some(hint),
            DiscoveryOutcome::Unavailable(_) => None,
        }
    }
}

/// Secondary signal and transport for the active file.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Never fails; problems come back as [`DiscoveryOutcome::Unavailable`].
    async fn discover(&self, target: &PollTarget) -> DiscoveryOutcome;

    /// Fetches a whole object from a download URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>, DiscoveryError>;
}

/// Discovery switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiscovery;

#[async_trait]
impl Discovery for NoDiscovery {
    async fn discover(&self, _target: &PollTarget) -> DiscoveryOutcome {
        DiscoveryOutcome::Unavailable("disabled".to_string())
    }

    async fn download(&self, _url: &str) -> Result<Vec<u8>, DiscoveryError> {
        Err(DiscoveryError::Malformed("discovery disabled".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Default, Deserialize)]
struct ListData {
    #[serde(default)]
    entries: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadData {
    token: DownloadToken,
}

#[derive(Debug, Deserialize)]
struct DownloadToken {
    url: Option<String>,
}

/// Client for the Nitrado file server API.
#[derive(Debug, Clone)]
pub struct NitradoDiscovery {
    client: reqwest::Client,
    api_base: String,
    timeout: Duration,
    download_timeout: Duration,
}

impl NitradoDiscovery {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            timeout,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT.max(timeout),
        })
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    async fn lookup(&self, creds: &DiscoveryCredentials) -> Result<DiscoveryHint, DiscoveryError> {
        let base = format!("{}/services/{}/gameservers/file_server", self.api_base, creds.service_id);

        let response = self
            .client
            .get(format!("{}/list", base))
            .bearer_auth(&creds.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("dir", creds.folder_prefix.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }
        let listing: Envelope<ListData> = response.json().await?;

        let file_name = listing
            .data
            .entries
            .into_iter()
            .filter_map(|entry| entry.name)
            .filter(|name| is_log_file(name))
            .max_by(|a, b| (timestamp_from_name(a), a).cmp(&(timestamp_from_name(b), b)))
            .ok_or_else(|| DiscoveryError::Malformed("no ADM entries".to_string()))?;

        let file_path = format!("{}/{}", creds.folder_prefix.trim_end_matches('/'), file_name);
        let response = self
            .client
            .get(format!("{}/download", base))
            .bearer_auth(&creds.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("file", file_path.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }
        let download: Envelope<DownloadData> = response.json().await?;
        let download_url = download
            .data
            .token
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| DiscoveryError::Malformed("missing token url".to_string()))?;

        Ok(DiscoveryHint {
            file_name,
            download_url,
        })
    }
}

#[async_trait]
impl Discovery for NitradoDiscovery {
    async fn discover(&self, target: &PollTarget) -> DiscoveryOutcome {
        let creds = match DiscoveryCredentials::resolve(target) {
            Ok(creds) => creds,
            Err(missing) => {
                return DiscoveryOutcome::Unavailable(format!("disabled (missing {})", missing.join(", ")))
            }
        };

        match tokio::time::timeout(self.timeout, self.lookup(&creds)).await {
            Ok(Ok(hint)) => {
                debug!("API reports {} as newest", hint.file_name);
                DiscoveryOutcome::Found(hint)
            }
            Ok(Err(e)) => DiscoveryOutcome::Unavailable(e.to_string()),
            Err(_) => DiscoveryOutcome::Unavailable(format!("timed out after {:?}", self.timeout)),
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, DiscoveryError> {
        let response = self.client.get(url).timeout(self.download_timeout).send().await?;
        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Request, State};
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::Router;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    const OLD: &str = "DayZServer_X1_x64_2024-01-01_00-00-00.ADM";
    const NEW: &str = "DayZServer_X1_x64_2024-01-01_01-00-00.ADM";

    fn target_with_creds() -> PollTarget {
        let mut target = PollTarget::new("ftp.example.net", "u", "p");
        target.nitrado_api_token = Some("tok".to_string());
        target.nitrado_service_id = Some(4242);
        target.nitrado_log_folder_prefix = Some("/games/ni1/noftp/dayzxb/config/".to_string());
        target
    }

    type Route = Arc<dyn Fn(&str, &str) -> (u16, String) + Send + Sync>;

    #[derive(Clone)]
    struct Responder {
        route: Route,
        base: String,
        seen: Arc<Mutex<Vec<String>>>,
    }

    /// Renders the request line and headers as text so routes can match on them.
    async fn respond(State(responder): State<Responder>, request: Request) -> impl IntoResponse {
        let mut head = format!("{} {} HTTP/1.1\r\n", request.method(), request.uri());
        for (name, value) in request.headers() {
            head.push_str(&format!("{}: {}\r\n", name, value.to_str().unwrap_or_default()));
        }
        responder.seen.lock().expect("lock").push(head.clone());
        let (status, body) = (responder.route)(&head, &responder.base);
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
    }

    /// Local HTTP server. `route` maps a request head to `(status, body)`;
    /// every request head is recorded.
    async fn serve<F>(route: F) -> (String, Arc<Mutex<Vec<String>>>)
    where
        F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("addr"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new().fallback(respond).with_state(Responder {
            route: Arc::new(route),
            base: base.clone(),
            seen: seen.clone(),
        });

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (base, seen)
    }

    #[test]
    fn test_credentials_from_target_and_env() {
        let creds = DiscoveryCredentials::resolve_with(&target_with_creds(), |_| None).expect("complete");
        assert_eq!(creds.service_id, 4242);

        let bare = PollTarget::new("h", "u", "p");
        let missing = DiscoveryCredentials::resolve_with(&bare, |_| None).expect_err("incomplete");
        assert_eq!(missing, vec!["token", "service_id", "dir"]);

        let from_env = DiscoveryCredentials::resolve_with(&bare, |key| match key {
            "NITRADO_API_TOKEN" => Some("envtok".to_string()),
            "NITRADO_SERVICE_ID" => Some("17".to_string()),
            "NITRADO_LOG_DIR" => Some("/logs".to_string()),
            _ => None,
        })
        .expect("complete from env");
        assert_eq!(from_env.token, "envtok");
        assert_eq!(from_env.service_id, 17);
        assert_eq!(from_env.folder_prefix, "/logs");
    }

    #[test]
    fn test_blank_prefix_counts_as_missing() {
        let mut target = PollTarget::new("h", "u", "p");
        target.nitrado_api_token = Some("tok".to_string());
        target.nitrado_service_id = Some(1);
        target.nitrado_log_folder_prefix = Some("   ".to_string());
        let creds = DiscoveryCredentials::resolve_with(&target, |_| None);
        assert_eq!(creds, Err(vec!["dir"]));
    }

    #[tokio::test]
    async fn test_discovers_newest_and_downloads() {
        let (base, seen) = serve(|head, base| {
            let line = head.lines().next().unwrap_or_default().to_string();
            if line.contains("/file_server/list") {
                let body = serde_json::json!({
                    "data": {"entries": [
                        {"name": OLD}, {"name": NEW}, {"name": "DayZServer_X1_x64.RPT"}
                    ]}
                });
                (200, body.to_string())
            } else if line.contains("/file_server/download") {
                let body = serde_json::json!({"data": {"token": {"url": format!("{}/blob", base)}}});
                (200, body.to_string())
            } else if line.contains("/blob") {
                (200, "12:00:00 | line\n".to_string())
            } else {
                (404, "{}".to_string())
            }
        })
        .await;

        let discovery = NitradoDiscovery::new(&base, Duration::from_secs(5)).expect("client");
        let outcome = discovery.discover(&target_with_creds()).await;
        let hint = outcome.hint().expect("found").clone();
        assert_eq!(hint.file_name, NEW);
        assert_eq!(hint.download_url, format!("{}/blob", base));

        let body = discovery.download(&hint.download_url).await.expect("download");
        assert_eq!(body, b"12:00:00 | line\n");

        let heads = seen.lock().expect("lock").clone();
        assert!(heads[0].starts_with("GET /services/4242/gameservers/file_server/list?dir="));
        assert!(heads[0].to_ascii_lowercase().contains("authorization: bearer tok"));
        assert!(heads[1].contains(NEW));
    }

    #[tokio::test]
    async fn test_http_error_is_unavailable() {
        let (base, _) = serve(|_, _| (401, "{}".to_string())).await;
        let discovery = NitradoDiscovery::new(&base, Duration::from_secs(5)).expect("client");
        match discovery.discover(&target_with_creds()).await {
            DiscoveryOutcome::Unavailable(reason) => assert!(reason.contains("401")),
            other => panic!("expected unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_adm_entries_is_unavailable() {
        let (base, _) = serve(|_, _| (200, r#"{"data":{"entries":[{"name":"a.RPT"}]}}"#.to_string())).await;
        let discovery = NitradoDiscovery::new(&base, Duration::from_secs(5)).expect("client");
        let outcome = discovery.discover(&target_with_creds()).await;
        assert_eq!(outcome, DiscoveryOutcome::Unavailable("Malformed response: no ADM entries".to_string()));
    }
}
