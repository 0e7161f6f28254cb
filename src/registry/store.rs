//! Remote config stores
//!
//! The store is a plain rendezvous point: it hands back whatever payload was
//! last published and offers no compare-and-swap.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::NacosConfig;
use crate::error::{CkmanError, Result};

#[async_trait]
pub trait RemoteConfigStore: Send + Sync {
    /// Current payload, empty when nothing was ever published
    async fn get_config(&self) -> Result<Vec<u8>>;

    /// Replace the stored payload
    async fn publish_config(&self, payload: &[u8]) -> Result<()>;
}

/// Process-local store, used when no shared store is configured
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    payload: Mutex<Vec<u8>>,
    publishes: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: Vec<u8>) -> Self {
        Self {
            payload: Mutex::new(payload),
            publishes: AtomicUsize::new(0),
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        self.payload.lock().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteConfigStore for MemoryConfigStore {
    async fn get_config(&self) -> Result<Vec<u8>> {
        Ok(self.payload.lock().clone())
    }

    async fn publish_config(&self, payload: &[u8]) -> Result<()> {
        *self.payload.lock() = payload.to_vec();
        self.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Lifetime assumed when the login response carries no `tokenTtl`
const DEFAULT_TOKEN_TTL_SECS: u64 = 18_000;
/// A token is renewed this long before the server expires it
const TOKEN_REFRESH_MARGIN_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    token_ttl: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

impl CachedToken {
    fn issued(value: String, ttl_secs: Option<u64>, now: Instant) -> Self {
        let ttl = ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let lifetime = if ttl > TOKEN_REFRESH_MARGIN_SECS {
            ttl - TOKEN_REFRESH_MARGIN_SECS
        } else {
            ttl / 2
        };
        Self {
            value,
            refresh_at: now + Duration::from_secs(lifetime),
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.refresh_at
    }
}

fn is_auth_failure(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
}

/// Store backed by a Nacos config service (open API v1)
pub struct NacosConfigStore {
    client: reqwest::Client,
    config: NacosConfig,
    token: Mutex<Option<CachedToken>>,
}

impl NacosConfigStore {
    pub fn new(config: NacosConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/nacos/v1/{}", self.config.addr.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<Option<String>> {
        if self.config.username.is_empty() {
            return Ok(None);
        }
        if let Some(token) = self.token.lock().as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(Some(token.value.clone()));
            }
        }

        let resp = self
            .client
            .post(self.url("auth/login"))
            .form(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CkmanError::Http(format!("nacos login returned {}", resp.status())));
        }
        let login: LoginResponse = resp.json().await?;
        debug!("nacos login succeeded, token ttl {:?}s", login.token_ttl);
        let token = CachedToken::issued(login.access_token, login.token_ttl, Instant::now());
        let value = token.value.clone();
        *self.token.lock() = Some(token);
        Ok(Some(value))
    }

    /// Drop the cached token after the server rejected it.
    /// Returns whether a fresh login is worth a retry.
    fn invalidate_token(&self) -> bool {
        if self.config.username.is_empty() {
            return false;
        }
        debug!("nacos rejected the access token, logging in again");
        self.token.lock().take();
        true
    }

    fn params(&self, token: Option<String>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("dataId", self.config.data_id.clone()),
            ("group", self.config.group.clone()),
            ("tenant", self.config.namespace.clone()),
        ];
        if let Some(token) = token {
            params.push(("accessToken", token));
        }
        params
    }
}

#[async_trait]
impl RemoteConfigStore for NacosConfigStore {
    async fn get_config(&self) -> Result<Vec<u8>> {
        self.fetch().await.map_err(|e| CkmanError::SyncPull(e.to_string()))
    }

    async fn publish_config(&self, payload: &[u8]) -> Result<()> {
        self.publish(payload).await.map_err(|e| CkmanError::SyncPush(e.to_string()))
    }
}

impl NacosConfigStore {
    async fn send_fetch(&self) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .get(self.url("cs/configs"))
            .query(&self.params(token))
            .send()
            .await?;
        Ok(resp)
    }

    async fn fetch(&self) -> Result<Vec<u8>> {
        let mut resp = self.send_fetch().await?;
        if is_auth_failure(resp.status()) && self.invalidate_token() {
            resp = self.send_fetch().await?;
        }
        match resp.status() {
            reqwest::StatusCode::NOT_FOUND => {
                debug!("nacos config {} not published yet", self.config.data_id);
                Ok(Vec::new())
            }
            status if status.is_success() => Ok(resp.bytes().await?.to_vec()),
            status => Err(CkmanError::Http(format!("nacos get config returned {}", status))),
        }
    }

    async fn send_publish(&self, payload: &[u8]) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        let mut form = self.params(token);
        form.push(("content", String::from_utf8_lossy(payload).into_owned()));
        form.push(("type", "json".to_string()));

        Ok(self.client.post(self.url("cs/configs")).form(&form).send().await?)
    }

    async fn publish(&self, payload: &[u8]) -> Result<()> {
        let mut resp = self.send_publish(payload).await?;
        if is_auth_failure(resp.status()) && self.invalidate_token() {
            resp = self.send_publish(payload).await?;
        }
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() || body.trim() != "true" {
            return Err(CkmanError::Http(format!("nacos publish returned {} {}", status, body.trim())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_store_overwrites() {
        let store = MemoryConfigStore::new();
        assert!(store.get_config().await.unwrap().is_empty());

        store.publish_config(b"one").await.unwrap();
        store.publish_config(b"two").await.unwrap();
        assert_eq!(store.get_config().await.unwrap(), b"two".to_vec());
        assert_eq!(store.publish_count(), 2);
    }

    #[test]
    fn test_nacos_urls_and_params() {
        let store = NacosConfigStore::new(NacosConfig {
            enabled: true,
            addr: "http://nacos:8848/".to_string(),
            ..NacosConfig::default()
        })
        .unwrap();
        assert_eq!(store.url("cs/configs"), "http://nacos:8848/nacos/v1/cs/configs");

        let params = store.params(Some("tok".to_string()));
        assert!(params.contains(&("accessToken", "tok".to_string())));
        assert!(params.iter().any(|(k, _)| *k == "dataId"));
    }

    #[test]
    fn test_token_expires_with_ttl() {
        let login: LoginResponse =
            serde_json::from_str(r#"{"accessToken":"tok","tokenTtl":600,"globalAdmin":true}"#).unwrap();
        assert_eq!(login.token_ttl, Some(600));

        let now = Instant::now();
        let token = CachedToken::issued(login.access_token, login.token_ttl, now);
        assert!(token.is_fresh(now + Duration::from_secs(500)));
        assert!(!token.is_fresh(now + Duration::from_secs(580)));
        assert!(!token.is_fresh(now + Duration::from_secs(601)));

        // very short lifetimes still get renewed before they lapse
        let short = CachedToken::issued("tok".to_string(), Some(10), now);
        assert!(short.is_fresh(now + Duration::from_secs(4)));
        assert!(!short.is_fresh(now + Duration::from_secs(5)));

        let login: LoginResponse = serde_json::from_str(r#"{"accessToken":"tok"}"#).unwrap();
        let token = CachedToken::issued(login.access_token, login.token_ttl, now);
        assert!(token.is_fresh(now + Duration::from_secs(DEFAULT_TOKEN_TTL_SECS - 60)));
        assert!(!token.is_fresh(now + Duration::from_secs(DEFAULT_TOKEN_TTL_SECS)));
    }

    #[test]
    fn test_only_auth_statuses_trigger_relogin() {
        assert!(is_auth_failure(reqwest::StatusCode::UNAUTHORIZED));
        assert!(is_auth_failure(reqwest::StatusCode::FORBIDDEN));
        assert!(!is_auth_failure(reqwest::StatusCode::NOT_FOUND));
        assert!(!is_auth_failure(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
    }

    /// Serve one canned response per connection and record each request
    async fn scripted_nacos(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let length = text[..end]
                            .lines()
                            .find_map(|l| {
                                let (name, value) = l.split_once(':')?;
                                name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                            })
                            .unwrap_or(0);
                        if request.len() >= end + 4 + length {
                            break;
                        }
                    }
                }
                log.lock().push(String::from_utf8_lossy(&request).to_string());
                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        (addr, seen)
    }

    fn authed_store(addr: String) -> NacosConfigStore {
        NacosConfigStore::new(NacosConfig {
            enabled: true,
            addr,
            username: "nacos".to_string(),
            password: "nacos".to_string(),
            ..NacosConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_rejected_token_is_renewed_once() {
        let (addr, seen) = scripted_nacos(vec![
            (200, r#"{"accessToken":"first","tokenTtl":18000}"#),
            (403, "token expired"),
            (200, r#"{"accessToken":"second","tokenTtl":18000}"#),
            (200, "payload"),
            (200, "true"),
        ])
        .await;
        let store = authed_store(addr);

        assert_eq!(store.get_config().await.unwrap(), b"payload".to_vec());
        store.publish_config(b"{}").await.unwrap();

        let requests = seen.lock().clone();
        assert_eq!(requests.len(), 5);
        assert!(requests[1].contains("accessToken=first"));
        assert!(requests[2].starts_with("POST /nacos/v1/auth/login"));
        assert!(requests[3].contains("accessToken=second"));
        // the renewed token is cached for the next call
        assert!(requests[4].starts_with("POST /nacos/v1/cs/configs"));
        assert!(requests[4].contains("accessToken=second"));
    }

    #[tokio::test]
    async fn test_second_rejection_is_reported() {
        let (addr, _seen) = scripted_nacos(vec![
            (200, r#"{"accessToken":"first"}"#),
            (401, "unauthorized"),
            (200, r#"{"accessToken":"second"}"#),
            (401, "unauthorized"),
        ])
        .await;
        let store = authed_store(addr);

        let err = store.get_config().await.unwrap_err();
        assert!(matches!(err, CkmanError::SyncPull(_)));
        assert!(err.to_string().contains("401"));
    }
}
