//! The live document and the page-lifetime state that goes with it.

use serde::{Deserialize, Serialize};

use crate::config::Selectors;
use crate::dom::{Document, Node};
use crate::viewport::{ScrollState, Viewport, ViewportGeometry};

/// One `.message` element of the chat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    pub classes: Vec<String>,
}

impl ChatMessage {
    fn from_node(node: &Node) -> Self {
        let text = node.text().split_whitespace().collect::<Vec<_>>().join(" ");
        Self {
            text,
            classes: node.classes(),
        }
    }
}

/// The reply form as it would be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyForm {
    /// `action` attribute; `None` means "post back to the page".
    pub action: Option<String>,
    /// Successful controls in document order.
    pub fields: Vec<(String, String)>,
}

impl ReplyForm {
    /// First value submitted under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// The session-mode toggle button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleControl {
    pub user_id: Option<String>,
    /// Trimmed label text.
    pub label: String,
}

/// Result of trying to patch the log area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchResult {
    Applied,
    /// The old or new page lacks the log area.
    Missing,
    /// A newer patch already advanced the last-seen id.
    Stale,
}

/// A parsed dashboard page plus the state scoped to its lifetime: the
/// session id, the last-seen history id and the chat log's scroll surface.
#[derive(Debug)]
pub struct LiveView {
    document: Document,
    selectors: Selectors,
    geometry: ViewportGeometry,
    viewport: Option<Viewport>,
    chat_log: Option<Node>,
    user_id: Option<String>,
    last_seen: u64,
    focused: Option<Node>,
}

impl LiveView {
    /// Parse `html` and read the session attributes from it.
    pub fn load(html: &str, selectors: Selectors, geometry: ViewportGeometry) -> Self {
        let mut view = Self {
            document: Document::parse(html),
            selectors,
            geometry,
            viewport: None,
            chat_log: None,
            user_id: None,
            last_seen: 0,
            focused: None,
        };
        view.read_session();
        view
    }

    /// Replace the whole page, as a browser reload would. Session id,
    /// last-seen id, scroll position and focus start over.
    pub fn reload(&mut self, html: &str) {
        self.document = Document::parse(html);
        self.focused = None;
        self.read_session();
    }

    fn read_session(&mut self) {
        let container = self.document.select_first(&self.selectors.log_container);
        self.user_id = container
            .as_ref()
            .and_then(|c| c.attr(&self.selectors.user_id_attr))
            .filter(|id| !id.is_empty());
        self.last_seen = container
            .as_ref()
            .and_then(|c| c.attr(&self.selectors.last_log_id_attr))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        self.chat_log = self.document.select_first(&self.selectors.chat_log);
        self.viewport = self
            .chat_log
            .as_ref()
            .map(|log| Viewport::new(self.geometry, self.rows_in(log)));
    }

    fn rows_in(&self, log: &Node) -> usize {
        log.select_all(&self.selectors.message).len()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn selectors(&self) -> &Selectors {
        &self.selectors
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    /// Simulate the reader scrolling the chat log.
    pub fn scroll_to(&mut self, top: f64) {
        if let Some(vp) = self.viewport.as_mut() {
            vp.set_scroll_top(top);
        }
    }

    pub fn message_count(&self) -> usize {
        self.document.count(&self.selectors.message)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.document
            .select_all(&self.selectors.message)
            .iter()
            .map(ChatMessage::from_node)
            .collect()
    }

    pub fn capture_scroll(&self, threshold: f64) -> ScrollState {
        ScrollState::capture(
            self.viewport.as_ref().map(Viewport::metrics),
            self.message_count(),
            threshold,
        )
    }

    /// Swap the log area for the one in `fresh` and advance the last-seen
    /// id to `latest_id`.
    ///
    /// Nothing is mutated unless the patch applies.
    pub fn patch_log(&mut self, fresh: &Document, latest_id: u64) -> PatchResult {
        if latest_id <= self.last_seen {
            return PatchResult::Stale;
        }
        let area = &self.selectors.log_area;
        let (Some(new_area), Some(old_area)) =
            (fresh.select_first(area), self.document.select_first(area))
        else {
            return PatchResult::Missing;
        };
        if !old_area.replace_with(&new_area) {
            return PatchResult::Missing;
        }

        self.last_seen = latest_id;
        self.relayout_chat_log();
        PatchResult::Applied
    }

    /// After a patch: a chat log that survived keeps its scroll offset, a
    /// replaced one starts a fresh surface at the top.
    fn relayout_chat_log(&mut self) {
        let current = self.document.select_first(&self.selectors.chat_log);
        let survived = match (&self.chat_log, &current) {
            (Some(old), Some(new)) => old.same_node(new),
            _ => false,
        };
        let viewport = match &current {
            Some(log) => {
                let rows = self.rows_in(log);
                match self.viewport.take() {
                    Some(mut vp) if survived => {
                        vp.relayout(rows);
                        Some(vp)
                    }
                    _ => Some(Viewport::new(self.geometry, rows)),
                }
            }
            None => None,
        };
        self.viewport = viewport;
        self.chat_log = current;
    }

    /// Replace the monitor section with the one in `fresh`.
    pub fn replace_section(&mut self, fresh: &Document) -> bool {
        let section = &self.selectors.monitor_section;
        let (Some(new), Some(old)) = (
            fresh.select_first(section),
            self.document.select_first(section),
        ) else {
            return false;
        };
        old.replace_with(&new)
    }

    pub fn restore_scroll(&mut self, top: f64) {
        self.scroll_to(top);
    }

    pub fn scroll_to_bottom(&mut self) {
        if let Some(vp) = self.viewport.as_mut() {
            vp.scroll_to_bottom();
        }
    }

    // -- reply form --------------------------------------------------------

    /// Serialize the reply form as a browser would on submit.
    pub fn reply_form(&self) -> Option<ReplyForm> {
        let form = self.document.select_first(&self.selectors.reply_form)?;
        let fields = form
            .select_all(&self.selectors.form_field)
            .iter()
            .filter_map(successful_control)
            .collect();
        Some(ReplyForm {
            action: form.attr("action").filter(|a| !a.is_empty()),
            fields,
        })
    }

    fn reply_input(&self) -> Option<Node> {
        self.document.select_first(&self.selectors.reply_input)
    }

    /// Type `text` into the reply input. Returns `false` if there is none.
    pub fn set_reply_input(&mut self, text: &str) -> bool {
        match self.reply_input() {
            Some(input) => {
                input.set_form_value(text);
                true
            }
            None => false,
        }
    }

    pub fn clear_reply_input(&mut self) {
        if let Some(input) = self.reply_input() {
            input.set_form_value("");
        }
    }

    pub fn reply_input_value(&self) -> Option<String> {
        self.reply_input().map(|n| n.form_value())
    }

    // -- focus -------------------------------------------------------------

    /// Focus the element with `id`. Returns `false` when no such element.
    pub fn focus(&mut self, id: &str) -> bool {
        self.focused = self.document.element_by_id(id);
        self.focused.is_some()
    }

    pub fn blur(&mut self) {
        self.focused = None;
    }

    pub fn reply_input_focused(&self) -> bool {
        match (&self.focused, self.reply_input()) {
            (Some(focused), Some(input)) => focused.same_node(&input),
            _ => false,
        }
    }

    /// Whether the element with `id` is the toggle button.
    pub fn is_toggle_button(&self, id: &str) -> bool {
        match (
            self.document.element_by_id(id),
            self.document.select_first(&self.selectors.toggle_button),
        ) {
            (Some(target), Some(button)) => target.same_node(&button),
            _ => false,
        }
    }

    pub fn toggle_control(&self) -> Option<ToggleControl> {
        let button = self.document.select_first(&self.selectors.toggle_button)?;
        Some(ToggleControl {
            user_id: button
                .attr(&self.selectors.user_id_attr)
                .filter(|id| !id.is_empty()),
            label: button.text().trim().to_string(),
        })
    }
}

/// `(name, value)` for a control that takes part in submission.
fn successful_control(node: &Node) -> Option<(String, String)> {
    let tag = node.tag_name()?;
    if tag != "input" && tag != "textarea" && tag != "select" {
        return None;
    }
    if node.attr("disabled").is_some() {
        return None;
    }
    let name = node.attr("name").filter(|n| !n.is_empty())?;
    if tag == "input" {
        let kind = node.attr("type").unwrap_or_default().to_ascii_lowercase();
        match kind.as_str() {
            "submit" | "button" | "reset" | "image" | "file" => return None,
            "checkbox" | "radio" => {
                node.attr("checked")?;
                let value = node.attr("value").unwrap_or_else(|| "on".to_string());
                return Some((name, value));
            }
            _ => {}
        }
    }
    Some((name, node.form_value()))
}
