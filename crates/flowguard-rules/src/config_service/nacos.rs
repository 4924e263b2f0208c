//! Nacos configuration client over the v1 open API
//!
//! Requests fail over across the configured servers: a transport failure
//! moves to the next server, an authentication rejection re-authenticates
//! once and retries the same server.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use flowguard_common::{CONFIG_READ_TIMEOUT_MS, CONFIG_WRITE_TIMEOUT_MS, DEFAULT_GROUP};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::ConfigService;
use crate::error::ConfigServiceError;

const CONFIG_PATH: &str = "/v1/cs/configs";
const AUTH_PATH: &str = "/v1/auth/login";

/// Token lifetime assumed when the login response carries none
const DEFAULT_TOKEN_TTL_SECS: u64 = 18000;

/// Tokens this close to expiry are refreshed before use
const TOKEN_REFRESH_WINDOW: Duration = Duration::from_secs(300);

/// Connection settings for the Nacos configuration service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NacosSettings {
    /// Server addresses, `host:port` or full `http://host:port` URLs
    pub server_addrs: Vec<String>,
    /// Context path (e.g., "/nacos")
    pub context_path: String,
    /// Namespace (tenant) id; empty for the public namespace
    pub namespace: String,
    /// Group every rule blob is published under
    pub group: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Publish timeout in milliseconds
    pub write_timeout_ms: u64,
}

impl Default for NacosSettings {
    fn default() -> Self {
        Self {
            server_addrs: vec!["127.0.0.1:8848".to_string()],
            context_path: "/nacos".to_string(),
            namespace: String::new(),
            group: DEFAULT_GROUP.to_string(),
            username: None,
            password: None,
            connect_timeout_ms: 5000,
            read_timeout_ms: CONFIG_READ_TIMEOUT_MS,
            write_timeout_ms: CONFIG_WRITE_TIMEOUT_MS,
        }
    }
}

impl NacosSettings {
    /// Create settings with a single server address
    pub fn new(server_addr: &str) -> Self {
        Self {
            server_addrs: vec![server_addr.to_string()],
            ..Default::default()
        }
    }

    /// Create settings with multiple server addresses
    pub fn with_servers(server_addrs: Vec<String>) -> Self {
        Self {
            server_addrs,
            ..Default::default()
        }
    }

    /// Set authentication credentials
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_context_path(mut self, path: &str) -> Self {
        self.context_path = path.to_string();
        self
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64, write_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self.write_timeout_ms = write_ms;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    fn auth_enabled(&self) -> bool {
        self.username
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }
}

fn normalize_server(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

#[derive(Clone, Debug)]
struct TokenInfo {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: Option<String>,
    token_ttl: Option<u64>,
}

/// Nacos configuration client with authentication and failover
pub struct NacosConfigClient {
    client: Client,
    settings: NacosSettings,
    servers: Vec<String>,
    current_server_index: RwLock<usize>,
    token: RwLock<Option<TokenInfo>>,
}

impl std::fmt::Debug for NacosConfigClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NacosConfigClient")
            .field("servers", &self.servers)
            .field("namespace", &self.settings.namespace)
            .finish()
    }
}

impl NacosConfigClient {
    /// Create a client. Authentication happens lazily on the first request.
    pub fn new(settings: NacosSettings) -> Result<Self, ConfigServiceError> {
        let servers: Vec<String> = settings
            .server_addrs
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| normalize_server(s))
            .collect();
        if servers.is_empty() {
            return Err(ConfigServiceError::InvalidSettings(
                "at least one server address is required".to_string(),
            ));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            settings,
            servers,
            current_server_index: RwLock::new(0),
            token: RwLock::new(None),
        })
    }

    pub fn settings(&self) -> &NacosSettings {
        &self.settings
    }

    fn current_server(&self) -> &str {
        &self.servers[*self.current_server_index.read()]
    }

    /// Switch to the next server (for failover)
    fn switch_to_next_server(&self) {
        let mut index = self.current_server_index.write();
        *index = (*index + 1) % self.servers.len();
        debug!(server = %self.servers[*index], "Switched configuration server");
    }

    /// Build full URL with context path
    fn build_url(&self, path: &str) -> String {
        let context_path = self.settings.context_path.trim_matches('/');
        if context_path.is_empty() {
            format!("{}{}", self.current_server(), path)
        } else {
            format!("{}/{}{}", self.current_server(), context_path, path)
        }
    }

    fn get_token(&self) -> Option<String> {
        self.token.read().as_ref().and_then(|t| {
            if t.expires_at > Instant::now() + TOKEN_REFRESH_WINDOW {
                Some(t.access_token.clone())
            } else {
                None
            }
        })
    }

    fn set_token(&self, access_token: String, ttl_seconds: u64) {
        *self.token.write() = Some(TokenInfo {
            access_token,
            expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
        });
    }

    /// Log in and cache the access token
    pub async fn authenticate(&self) -> Result<(), ConfigServiceError> {
        let url = self.build_url(AUTH_PATH);
        let username = self.settings.username.clone().unwrap_or_default();
        let password = self.settings.password.clone().unwrap_or_default();

        debug!(url = %url, "Authenticating with configuration server");

        let response = self
            .client
            .post(&url)
            .timeout(self.settings.read_timeout())
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(ConfigServiceError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConfigServiceError::Auth(format!(
                "login returned status {}",
                status.as_u16()
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ConfigServiceError::Auth(format!("malformed login response: {}", e)))?;
        let access_token = login
            .access_token
            .ok_or_else(|| ConfigServiceError::Auth("login response has no accessToken".to_string()))?;
        let ttl = login.token_ttl.unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        self.set_token(access_token, ttl);
        debug!(ttl_secs = ttl, "Authentication successful");
        Ok(())
    }

    async fn ensure_token(&self) -> Result<Option<String>, ConfigServiceError> {
        if !self.settings.auth_enabled() {
            return Ok(None);
        }
        if let Some(token) = self.get_token() {
            return Ok(Some(token));
        }

        self.authenticate().await?;
        self.get_token()
            .map(Some)
            .ok_or_else(|| ConfigServiceError::Auth("token expired right after login".to_string()))
    }

    /// Send a config request, failing over to the next server only when a
    /// connection could not be established. Any other transport error,
    /// timeouts included, is returned as is: the request may have reached
    /// the server, and resending a publish elsewhere would apply it twice.
    async fn send<F>(&self, build: F) -> Result<Response, ConfigServiceError>
    where
        F: Fn(&Client, String) -> RequestBuilder,
    {
        let mut attempts = 0;
        let mut reauthenticated = false;
        let mut last_error = None;

        while attempts < self.servers.len() {
            let url = self.build_url(CONFIG_PATH);
            let mut request = build(&self.client, url);
            if let Some(token) = self.ensure_token().await? {
                request = request.header("accessToken", token);
            }

            match request.send().await {
                Ok(response)
                    if is_auth_rejection(response.status())
                        && self.settings.auth_enabled()
                        && !reauthenticated =>
                {
                    warn!("Token rejected, re-authenticating");
                    reauthenticated = true;
                    *self.token.write() = None;
                    self.authenticate().await?;
                }
                Ok(response) => return Ok(response),
                Err(e) if !e.is_connect() => {
                    warn!(server = %self.current_server(), error = %e, "Request failed");
                    return Err(ConfigServiceError::from_transport(e));
                }
                Err(e) => {
                    warn!(server = %self.current_server(), error = %e, "Connection failed, switching to next server");
                    self.switch_to_next_server();
                    last_error = Some(ConfigServiceError::from_transport(e));
                    attempts += 1;
                }
            }
        }

        Err(last_error.unwrap_or(ConfigServiceError::AllServersFailed))
    }
}

fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

async fn status_error(response: Response) -> ConfigServiceError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ConfigServiceError::Status { status, body }
}

#[async_trait]
impl ConfigService for NacosConfigClient {
    async fn get_config(
        &self,
        data_id: &str,
        group: &str,
        timeout: Duration,
    ) -> Result<Option<String>, ConfigServiceError> {
        let namespace = self.settings.namespace.as_str();
        let response = self
            .send(|client, url| {
                client.get(url).timeout(timeout).query(&[
                    ("dataId", data_id),
                    ("group", group),
                    ("tenant", namespace),
                ])
            })
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(data_id = %data_id, group = %group, "Config not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(response).await);
        }

        let content = response
            .text()
            .await
            .map_err(ConfigServiceError::from_transport)?;
        debug!(data_id = %data_id, group = %group, bytes = content.len(), "Config fetched");
        Ok(Some(content))
    }

    async fn publish_config(
        &self,
        data_id: &str,
        group: &str,
        content: &str,
        cas_md5: Option<&str>,
    ) -> Result<bool, ConfigServiceError> {
        let mut form = vec![
            ("dataId", data_id),
            ("group", group),
            ("tenant", self.settings.namespace.as_str()),
            ("content", content),
            ("type", "json"),
        ];
        if let Some(md5) = cas_md5 {
            form.push(("casMd5", md5));
        }

        let timeout = self.settings.write_timeout();
        let response = self
            .send(|client, url| client.post(url).timeout(timeout).form(&form))
            .await?;

        if !response.status().is_success() {
            let err = status_error(response).await;
            error!(data_id = %data_id, group = %group, error = %err, "Config publish failed");
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(ConfigServiceError::from_transport)?;
        let published = body.trim() == "true";
        if published {
            info!(data_id = %data_id, group = %group, cas = cas_md5.is_some(), "Config published");
        } else {
            warn!(data_id = %data_id, group = %group, body = %body, "Config publish not accepted");
        }
        Ok(published)
    }
}
