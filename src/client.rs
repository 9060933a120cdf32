//! HTTP client for the monitoring dashboard.
//!
//! Every request shares one cookie jar, so a session established by the
//! first page load carries through to status polls, replies and toggles.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::config::{Endpoints, RefresherConfig};
use crate::error::{RefreshError, Result};

/// Header the dashboard reads the anti-forgery token from.
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Body of the history-status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Id of the newest chat history row; missing or null reads as 0.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub latest_id: u64,
}

fn null_as_zero<'de, D>(de: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(de)?.unwrap_or(0))
}

/// JSON body of the session-stop request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleRequest {
    pub user_id: String,
    pub human: bool,
}

/// JSON acknowledgement some reply endpoints return.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyAckBody {
    #[serde(default)]
    pub success: bool,
}

/// Thin wrapper over `reqwest::Client` that knows the dashboard's routes.
#[derive(Debug, Clone)]
pub struct MonitorClient {
    http: reqwest::Client,
    jar: Arc<Jar>,
    base: Url,
    page: Url,
    endpoints: Endpoints,
}

impl MonitorClient {
    /// Build a client from the relevant parts of `config`.
    ///
    /// # Errors
    /// [`RefreshError::Config`] when `base_url` or `page_path` do not form
    /// a valid URL.
    pub fn new(config: &RefresherConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| RefreshError::Config(format!("base_url: {e}")))?;
        let page = base
            .join(&config.page_path)
            .map_err(|e| RefreshError::Config(format!("page_path: {e}")))?;

        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RefreshError::Config(format!("http client: {e}")))?;

        Ok(Self {
            http,
            jar,
            base,
            page,
            endpoints: config.endpoints.clone(),
        })
    }

    /// URL of the watched page.
    pub fn page_url(&self) -> &Url {
        &self.page
    }

    /// Resolve a path or absolute URL against the dashboard origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| RefreshError::Config(format!("bad path '{path}': {e}")))
    }

    /// Look up a cookie the jar holds for the dashboard origin.
    pub fn cookie_header(&self) -> Option<String> {
        self.jar
            .cookies(&self.base)
            .and_then(|v| v.to_str().ok().map(str::to_string))
    }

    /// Seed the jar, e.g. with a session cookie obtained out of band.
    pub fn add_cookie(&self, cookie: &str) {
        self.jar.add_cookie_str(cookie, &self.base);
    }

    /// Fetch the full HTML of the watched page.
    ///
    /// # Returns
    /// - `Ok(String)` on a 2xx response.
    /// - `Err(RefreshError::Connect)` on transport failure.
    /// - `Err(RefreshError::Http)` on a non-2xx status.
    pub async fn fetch_page(&self) -> Result<String> {
        let url = self.page.clone();
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RefreshError::connect(url.as_str(), e))?;
        let resp = ensure_success(resp)?;
        resp.text().await.map_err(|e| RefreshError::connect(url.as_str(), e))
    }

    /// Fetch the newest history id for `user_id`.
    pub async fn fetch_status(&self, user_id: &str) -> Result<StatusSnapshot> {
        let url = self.resolve(&self.endpoints.status_path(user_id))?;
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RefreshError::connect(url.as_str(), e))?;
        let resp = ensure_success(resp)?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RefreshError::connect(url.as_str(), e))?;
        serde_json::from_slice(&bytes).map_err(|e| RefreshError::Json {
            field: "latest_id".into(),
            detail: e.to_string(),
        })
    }

    /// POST the mode toggle. Any HTTP response counts as settled, so the
    /// status is returned rather than checked.
    pub async fn post_toggle(&self, request: &ToggleRequest, token: &str) -> Result<StatusCode> {
        let url = self.resolve(&self.endpoints.stop_path(&request.user_id))?;
        let resp = self
            .http
            .post(url.clone())
            .header(CSRF_HEADER, token)
            .json(request)
            .send()
            .await
            .map_err(|e| RefreshError::connect(url.as_str(), e))?;
        Ok(resp.status())
    }

    /// POST URL-encoded reply fields to `action`.
    pub async fn post_reply(
        &self,
        action: &str,
        fields: &[(String, String)],
        token: &str,
    ) -> Result<reqwest::Response> {
        let url = self.resolve(action)?;
        self.http
            .post(url.clone())
            .header(CSRF_HEADER, token)
            .form(fields)
            .send()
            .await
            .map_err(|e| RefreshError::connect(url.as_str(), e))
    }
}

/// Turn a non-2xx response into [`RefreshError::Http`].
pub fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(RefreshError::Http {
            status: resp.status().as_u16(),
            url: resp.url().to_string(),
        })
    }
}
