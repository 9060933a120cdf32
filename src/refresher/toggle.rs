//! Bot/human mode toggle.

use reqwest::StatusCode;
use tracing::info;

use super::{LiveViewRefresher, RefreshEvent};
use crate::client::ToggleRequest;
use crate::csrf::{resolve_token, TokenLocator};
use crate::error::{RefreshError, Result};

impl LiveViewRefresher {
    /// Click the toggle button: post the new mode, then reload the page.
    ///
    /// The requested mode is read off the button label: the configured
    /// human-mode label asks for human replies, anything else for the bot.
    /// Whatever status the server answers with, the page is reloaded so the
    /// live view shows the server's own idea of the mode. A transport
    /// failure skips the reload.
    ///
    /// # Returns
    /// `(human, status)` of the request that was sent.
    pub async fn toggle(&self) -> Result<(bool, StatusCode)> {
        let (request, token) = {
            let view = self.view.borrow();
            let control = view
                .toggle_control()
                .ok_or_else(|| RefreshError::MissingNode {
                    selector: self.selectors.toggle_button.to_string(),
                })?;
            let user_id = control
                .user_id
                .ok_or_else(|| RefreshError::MissingUserId {
                    selector: self.selectors.toggle_button.to_string(),
                })?;
            let human = control.label == self.config.human_mode_label;

            let locator = TokenLocator {
                meta: &self.selectors.token_meta,
                field: &self.selectors.token_field,
            };
            let cookies = self.client.cookie_header();
            let token = resolve_token(
                &self.config.token_sources,
                view.document(),
                &locator,
                cookies.as_deref(),
                &self.config.token_cookie,
            )
            .ok_or(RefreshError::MissingToken)?;

            (ToggleRequest { user_id, human }, token)
        };

        let status = self.client.post_toggle(&request, &token).await?;
        info!(
            user_id = %request.user_id,
            human = request.human,
            status = status.as_u16(),
            "mode toggle settled, reloading"
        );

        self.load().await?;
        self.emit(RefreshEvent::Toggled {
            human: request.human,
            status: status.as_u16(),
        });
        Ok((request.human, status))
    }
}
