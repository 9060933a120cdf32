//! Reply form submission.

use tracing::{debug, info};

use super::{LiveViewRefresher, RefreshEvent};
use crate::client::{ensure_success, ReplyAckBody};
use crate::config::ReplyAck;
use crate::error::{RefreshError, Result};

impl LiveViewRefresher {
    /// Type `text` into the reply input and submit the form.
    pub async fn reply(&self, text: &str) -> Result<()> {
        let typed = self.view.borrow_mut().set_reply_input(text);
        if !typed {
            return Err(RefreshError::MissingNode {
                selector: self.selectors.reply_input.to_string(),
            });
        }
        self.submit_reply().await
    }

    /// Submit the reply form as it currently stands.
    ///
    /// Nothing is sent when the form is missing, the message is blank
    /// (with `require_message` on) or no token is present. On success the
    /// input is cleared and the log scrolled to the bottom; on failure the
    /// input keeps its text.
    pub async fn submit_reply(&self) -> Result<()> {
        let form = self
            .view
            .borrow()
            .reply_form()
            .ok_or_else(|| RefreshError::MissingNode {
                selector: self.selectors.reply_form.to_string(),
            })?;

        let message = form.get("message").unwrap_or_default();
        if self.config.require_message && message.trim().is_empty() {
            debug!("reply skipped: empty message");
            return Err(RefreshError::EmptyMessage);
        }

        let token = form
            .get(&self.config.token_field_name)
            .filter(|t| !t.is_empty())
            .ok_or(RefreshError::MissingToken)?
            .to_string();

        let action = form
            .action
            .clone()
            .unwrap_or_else(|| self.client.page_url().to_string());

        let resp = self.client.post_reply(&action, &form.fields, &token).await?;
        let resp = ensure_success(resp)?;

        if self.config.reply_ack == ReplyAck::JsonField {
            let url = resp.url().to_string();
            let ack: ReplyAckBody = resp.json().await.map_err(|e| RefreshError::Json {
                field: "success".into(),
                detail: e.to_string(),
            })?;
            if !ack.success {
                return Err(RefreshError::Rejected { url });
            }
        }

        {
            let mut view = self.view.borrow_mut();
            view.clear_reply_input();
            view.scroll_to_bottom();
        }
        info!(action = %action, "reply sent");
        self.emit(RefreshEvent::ReplySent);
        Ok(())
    }
}
