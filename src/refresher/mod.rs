//! # LiveViewRefresher
//!
//! Keeps a local copy of a monitoring dashboard page current and acts on
//! it the way an operator in a browser tab would.
//!
//! ## What It Does
//!
//! 1. **Polling**: every tick asks the history-status endpoint for the
//!    newest chat id and, only when it is ahead of the last-seen id, fetches
//!    the page and patches the log area in place.
//! 2. **Scroll preservation**: a reader scrolled into history keeps their
//!    place; a reader at the bottom, or any patch that brings new messages,
//!    pins the log to the bottom.
//! 3. **Replies**: submits the reply form (or Ctrl+Enter in its input).
//! 4. **Mode toggle**: posts the bot/human switch and reloads the page.
//!
//! Everything runs on one thread. The live document lives in a `RefCell`
//! and borrows never cross an `.await`; poll cycles are spawned with
//! `spawn_local`, so [`LiveViewRefresher::run`] must be driven inside a
//! [`tokio::task::LocalSet`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! let refresher = Rc::new(LiveViewRefresher::builder(config).events(tx).build()?);
//! refresher.load().await?;
//! let local = tokio::task::LocalSet::new();
//! local.run_until(Rc::clone(&refresher).run()).await;
//! ```

pub mod live;
mod poller;
mod reply;
mod toggle;

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use reqwest::StatusCode;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::MonitorClient;
use crate::config::{RefreshMode, RefresherConfig, Selectors};
use crate::error::Result;

pub use live::{ChatMessage, LiveView, PatchResult, ReplyForm, ToggleControl};
pub use poller::PollGate;

/// Consecutive failures after which poll errors are logged at `error`.
const FAILURE_ESCALATION: u32 = 5;

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// A previous cycle is still in flight; this tick was skipped.
    Busy,
    /// The page carries no session id.
    NoSession,
    /// The server has nothing newer than the last-seen id.
    UpToDate { latest_id: u64 },
    /// The log area was replaced.
    Patched {
        latest_id: u64,
        /// Messages beyond the pre-patch count.
        new_messages: Vec<ChatMessage>,
    },
    /// The monitor section was replaced.
    SectionReplaced,
    /// The fetched or live page lacks the subtree to patch.
    PageChanged,
    /// The last-seen id moved past this cycle's snapshot meanwhile.
    Stale { latest_id: u64 },
}

/// Notifications for whoever is displaying the live view.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshEvent {
    Patched {
        latest_id: u64,
        new_messages: Vec<ChatMessage>,
    },
    SectionReplaced,
    Reloaded { user_id: Option<String> },
    ReplySent,
    Toggled { human: bool, status: u16 },
}

/// Operator input, mirroring the browser events the dashboard listens for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    /// Focus moves to the element with this id.
    Focus { target_id: String },
    /// A key press while some element has focus.
    KeyDown { key: String, ctrl: bool },
    /// The reply form is submitted.
    Submit,
    /// The element with this id is clicked.
    Click { target_id: String },
}

/// What a [`UserEvent`] led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Ignored,
    Focused,
    Replied,
    Toggled { human: bool, status: StatusCode },
}

/// The refresher. Construct with [`LiveViewRefresher::builder`].
pub struct LiveViewRefresher {
    config: RefresherConfig,
    selectors: Selectors,
    client: MonitorClient,
    view: RefCell<LiveView>,
    gate: PollGate,
    consecutive_failures: Cell<u32>,
    events: Option<mpsc::UnboundedSender<RefreshEvent>>,
}

impl LiveViewRefresher {
    pub fn builder(config: RefresherConfig) -> LiveViewRefresherBuilder {
        LiveViewRefresherBuilder::new(config)
    }

    pub fn config(&self) -> &RefresherConfig {
        &self.config
    }

    pub fn client(&self) -> &MonitorClient {
        &self.client
    }

    /// Borrow the live view. Do not hold the borrow across an `.await`.
    pub fn view(&self) -> Ref<'_, LiveView> {
        self.view.borrow()
    }

    /// Mutate the live view, e.g. to simulate the reader scrolling.
    pub fn with_view_mut<R>(&self, f: impl FnOnce(&mut LiveView) -> R) -> R {
        f(&mut self.view.borrow_mut())
    }

    /// Fetch the page and make it the live document.
    pub async fn load(&self) -> Result<()> {
        let html = self.client.fetch_page().await?;
        self.load_html(&html);
        Ok(())
    }

    /// Make `html` the live document without touching the network.
    pub fn load_html(&self, html: &str) {
        let user_id = {
            let mut view = self.view.borrow_mut();
            view.reload(html);
            view.user_id().map(str::to_string)
        };
        info!(user_id = ?user_id, page = %self.client.page_url(), "live view loaded");
        self.emit(RefreshEvent::Reloaded { user_id });
    }

    fn emit(&self, event: RefreshEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone means nobody is watching; that is not an error.
            let _ = tx.send(event);
        }
    }

    /// Handle one operator event.
    ///
    /// # Errors
    /// Propagates failures of the reply or toggle it triggers.
    pub async fn handle_event(&self, event: UserEvent) -> Result<Handled> {
        match event {
            UserEvent::Focus { target_id } => {
                let found = self.view.borrow_mut().focus(&target_id);
                Ok(if found { Handled::Focused } else { Handled::Ignored })
            }
            UserEvent::KeyDown { key, ctrl } => {
                let shortcut = ctrl && key == "Enter";
                if shortcut && self.view.borrow().reply_input_focused() {
                    self.submit_reply().await?;
                    Ok(Handled::Replied)
                } else {
                    Ok(Handled::Ignored)
                }
            }
            UserEvent::Submit => {
                self.submit_reply().await?;
                Ok(Handled::Replied)
            }
            UserEvent::Click { target_id } => {
                if !self.view.borrow().is_toggle_button(&target_id) {
                    return Ok(Handled::Ignored);
                }
                let (human, status) = self.toggle().await?;
                Ok(Handled::Toggled { human, status })
            }
        }
    }

    /// Like [`handle_event`](Self::handle_event), but failures are logged
    /// instead of returned.
    pub async fn dispatch(&self, event: UserEvent) {
        let label = format!("{event:?}");
        match self.handle_event(event).await {
            Ok(handled) => debug!(event = %label, ?handled, "user event handled"),
            Err(e) if e.is_silent() => debug!(event = %label, reason = %e, "user event aborted"),
            Err(e) => warn!(event = %label, error = %e, "user event failed"),
        }
    }

    /// Run one cycle for the configured mode and log the result.
    pub async fn run_cycle(&self) -> Option<PollOutcome> {
        let result = match self.config.mode {
            RefreshMode::Session => self.poll_once().await,
            RefreshMode::Section => self.refresh_section().await,
        };

        match result {
            Ok(outcome) => {
                if !matches!(outcome, PollOutcome::Busy) {
                    self.consecutive_failures.set(0);
                }
                match &outcome {
                    PollOutcome::Patched {
                        latest_id,
                        new_messages,
                    } => {
                        info!(latest_id, new = new_messages.len(), "chat log patched");
                        self.emit(RefreshEvent::Patched {
                            latest_id: *latest_id,
                            new_messages: new_messages.clone(),
                        });
                    }
                    PollOutcome::SectionReplaced => {
                        debug!("monitor section replaced");
                        self.emit(RefreshEvent::SectionReplaced);
                    }
                    other => debug!(outcome = ?other, "poll cycle finished"),
                }
                Some(outcome)
            }
            Err(e) => {
                let failures = self.consecutive_failures.get().saturating_add(1);
                self.consecutive_failures.set(failures);
                if failures >= FAILURE_ESCALATION {
                    error!(
                        error = %e,
                        url = %self.client.page_url(),
                        consecutive_failures = failures,
                        "poll failed repeatedly, will retry next tick"
                    );
                } else {
                    warn!(
                        error = %e,
                        url = %self.client.page_url(),
                        "poll failed, will retry next tick"
                    );
                }
                None
            }
        }
    }

    /// Tick forever, spawning a cycle per tick onto the current `LocalSet`.
    ///
    /// The first cycle fires one interval after the call. Drop the task to
    /// stop.
    pub async fn run(self: Rc<Self>) {
        let period = self.config.poll_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            mode = %self.config.mode,
            interval_ms = self.config.poll_interval_ms,
            "refresher running"
        );

        loop {
            ticker.tick().await;
            let this = Rc::clone(&self);
            tokio::task::spawn_local(async move {
                this.run_cycle().await;
            });
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.get()
    }
}

/// Builder for [`LiveViewRefresher`].
pub struct LiveViewRefresherBuilder {
    config: RefresherConfig,
    events: Option<mpsc::UnboundedSender<RefreshEvent>>,
}

impl LiveViewRefresherBuilder {
    pub fn new(config: RefresherConfig) -> Self {
        Self {
            config,
            events: None,
        }
    }

    /// Send [`RefreshEvent`]s to `tx`.
    pub fn events(mut self, tx: mpsc::UnboundedSender<RefreshEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Override the poll interval (default 5 s).
    pub fn poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn mode(mut self, mode: RefreshMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Validate the config, compile selectors and build the HTTP client.
    /// The live view starts empty; call [`LiveViewRefresher::load`].
    ///
    /// # Errors
    /// [`RefreshError::Config`](crate::error::RefreshError::Config) or
    /// [`RefreshError::Selector`](crate::error::RefreshError::Selector).
    pub fn build(self) -> Result<LiveViewRefresher> {
        self.config.validate()?;
        let selectors = self.config.selectors.compile()?;
        let client = MonitorClient::new(&self.config)?;
        let view = LiveView::load("", selectors.clone(), self.config.viewport);

        Ok(LiveViewRefresher {
            config: self.config,
            selectors,
            client,
            view: RefCell::new(view),
            gate: PollGate::default(),
            consecutive_failures: Cell::new(0),
            events: self.events,
        })
    }
}
