//! Refresher configuration.
//!
//! Defaults match the monitoring dashboard's markup and endpoints. A TOML
//! file can override any subset of fields; the CLI then overrides the file.
//!
//! ```toml
//! base_url = "http://127.0.0.1:8000"
//! page_path = "/monitor/sessions/U123/"
//! poll_interval_ms = 5000
//! reply_ack = "json-field"
//!
//! [selectors]
//! log_area = ".chat-log-area"
//! ```

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::csrf::CsrfSource;
use crate::dom::Selector;
use crate::error::{RefreshError, Result};
use crate::viewport::ViewportGeometry;

/// What a poll tick refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshMode {
    /// Session detail page: consult the status endpoint, patch the log
    /// area only when new history exists.
    Session,
    /// Monitor list page: replace the monitor section every tick.
    Section,
}

impl std::fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshMode::Session => write!(f, "session"),
            RefreshMode::Section => write!(f, "section"),
        }
    }
}

/// How a reply POST is judged successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplyAck {
    /// Any 2xx status.
    HttpStatus,
    /// 2xx and a JSON body with `"success": true`.
    JsonField,
}

impl std::fmt::Display for ReplyAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyAck::HttpStatus => write!(f, "http-status"),
            ReplyAck::JsonField => write!(f, "json-field"),
        }
    }
}

/// Endpoint path templates. `{user_id}` is substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub history_status: String,
    pub session_stop: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            history_status: "/monitor/session/history-status/{user_id}/".to_string(),
            session_stop: "/monitor/session/stop/{user_id}/".to_string(),
        }
    }
}

impl Endpoints {
    pub fn status_path(&self, user_id: &str) -> String {
        self.history_status.replace("{user_id}", user_id)
    }

    pub fn stop_path(&self, user_id: &str) -> String {
        self.session_stop.replace("{user_id}", user_id)
    }
}

/// Selector strings and attribute names for the dashboard markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub log_container: String,
    pub log_area: String,
    pub chat_log: String,
    pub message: String,
    pub monitor_section: String,
    pub reply_form: String,
    pub reply_input: String,
    pub toggle_button: String,
    pub token_field: String,
    pub token_meta: String,
    pub user_id_attr: String,
    pub last_log_id_attr: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            log_container: ".log-container".to_string(),
            log_area: ".chat-log-area".to_string(),
            chat_log: ".chat-log".to_string(),
            message: ".message".to_string(),
            monitor_section: ".monitor-section".to_string(),
            reply_form: "#reply-form".to_string(),
            reply_input: "#reply-message-input".to_string(),
            toggle_button: "#stopButton".to_string(),
            token_field: "[name=csrfmiddlewaretoken]".to_string(),
            token_meta: r#"meta[name="csrf-token"]"#.to_string(),
            user_id_attr: "data-user-id".to_string(),
            last_log_id_attr: "data-last-log-id".to_string(),
        }
    }
}

/// [`SelectorConfig`] with every selector parsed.
#[derive(Debug, Clone)]
pub struct Selectors {
    pub log_container: Selector,
    pub log_area: Selector,
    pub chat_log: Selector,
    pub message: Selector,
    pub monitor_section: Selector,
    pub reply_form: Selector,
    pub reply_input: Selector,
    pub toggle_button: Selector,
    pub token_field: Selector,
    pub token_meta: Selector,
    /// Any element with a `name` attribute; used to serialize forms.
    pub form_field: Selector,
    pub user_id_attr: String,
    pub last_log_id_attr: String,
}

impl SelectorConfig {
    /// Parse every selector.
    ///
    /// # Errors
    /// Returns the first [`RefreshError::Selector`] encountered.
    pub fn compile(&self) -> Result<Selectors> {
        Ok(Selectors {
            log_container: Selector::parse(&self.log_container)?,
            log_area: Selector::parse(&self.log_area)?,
            chat_log: Selector::parse(&self.chat_log)?,
            message: Selector::parse(&self.message)?,
            monitor_section: Selector::parse(&self.monitor_section)?,
            reply_form: Selector::parse(&self.reply_form)?,
            reply_input: Selector::parse(&self.reply_input)?,
            toggle_button: Selector::parse(&self.toggle_button)?,
            token_field: Selector::parse(&self.token_field)?,
            token_meta: Selector::parse(&self.token_meta)?,
            form_field: Selector::parse("[name]")?,
            user_id_attr: self.user_id_attr.clone(),
            last_log_id_attr: self.last_log_id_attr.clone(),
        })
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefresherConfig {
    /// Dashboard origin, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
    /// Path of the page being watched, relative to `base_url`.
    pub page_path: String,
    pub mode: RefreshMode,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Distance from the bottom, in pixels, that still counts as "at bottom".
    pub bottom_threshold_px: f64,
    pub reply_ack: ReplyAck,
    /// Refuse replies whose trimmed message is empty.
    pub require_message: bool,
    /// Toggle button label meaning "switch to human reply mode".
    pub human_mode_label: String,
    /// Token sources for the toggle request, tried in order.
    pub token_sources: Vec<CsrfSource>,
    pub token_field_name: String,
    pub token_cookie: String,
    pub endpoints: Endpoints,
    pub selectors: SelectorConfig,
    pub viewport: ViewportGeometry,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            page_path: "/monitor/".to_string(),
            mode: RefreshMode::Session,
            poll_interval_ms: 5_000,
            connect_timeout_ms: 3_000,
            request_timeout_ms: 10_000,
            bottom_threshold_px: 10.0,
            reply_ack: ReplyAck::HttpStatus,
            require_message: true,
            human_mode_label: "応答モードに切り替え".to_string(),
            token_sources: vec![CsrfSource::FormField, CsrfSource::Cookie],
            token_field_name: "csrfmiddlewaretoken".to_string(),
            token_cookie: "csrftoken".to_string(),
            endpoints: Endpoints::default(),
            selectors: SelectorConfig::default(),
            viewport: ViewportGeometry::default(),
        }
    }
}

impl RefresherConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: RefresherConfig =
            toml::from_str(s).map_err(|e| RefreshError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values that would make the refresher misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(RefreshError::Config("poll_interval_ms must be > 0".into()));
        }
        if !self.bottom_threshold_px.is_finite() || self.bottom_threshold_px < 0.0 {
            return Err(RefreshError::Config(
                "bottom_threshold_px must be a finite, non-negative number".into(),
            ));
        }
        if self.viewport.row_height <= 0.0 || self.viewport.client_height <= 0.0 {
            return Err(RefreshError::Config("viewport dimensions must be positive".into()));
        }
        if reqwest::Url::parse(&self.base_url).is_err() {
            return Err(RefreshError::Config(format!("invalid base_url '{}'", self.base_url)));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
