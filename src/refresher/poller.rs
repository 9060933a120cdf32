//! Poll cycles: status check, page fetch, log patch, scroll fix-up.

use std::cell::Cell;

use tracing::debug;

use super::{LiveViewRefresher, PatchResult, PollOutcome};
use crate::dom::Document;
use crate::error::Result;
use crate::viewport::{plan, ScrollAction};

/// Single-slot gate: at most one poll cycle in flight.
///
/// A tick that finds the slot taken is dropped rather than queued, so a
/// slow response can never be overtaken by a newer one.
#[derive(Debug, Default)]
pub struct PollGate {
    in_flight: Cell<bool>,
}

impl PollGate {
    /// Claim the slot, or `None` if a cycle already holds it.
    pub fn try_enter(&self) -> Option<PollSlot<'_>> {
        if self.in_flight.replace(true) {
            return None;
        }
        Some(PollSlot { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.get()
    }
}

/// Releases the gate on drop, including when the cycle fails with `?`.
#[derive(Debug)]
pub struct PollSlot<'a> {
    gate: &'a PollGate,
}

impl Drop for PollSlot<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.set(false);
    }
}

impl LiveViewRefresher {
    /// One session-mode cycle.
    ///
    /// # Returns
    /// - `Ok(PollOutcome::UpToDate)` without fetching the page when the
    ///   server's `latest_id` is not ahead of the last-seen id.
    /// - `Ok(PollOutcome::Patched)` after a successful patch.
    /// - `Err(_)` on network, HTTP or JSON failure; the live view is
    ///   untouched.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let Some(_slot) = self.gate.try_enter() else {
            debug!("previous poll still in flight, skipping tick");
            return Ok(PollOutcome::Busy);
        };

        let (user_id, known) = {
            let view = self.view.borrow();
            (view.user_id().map(str::to_string), view.last_seen())
        };
        let Some(user_id) = user_id else {
            return Ok(PollOutcome::NoSession);
        };

        let status = self.client.fetch_status(&user_id).await?;
        let latest_id = status.latest_id;
        if latest_id <= known {
            return Ok(PollOutcome::UpToDate { latest_id });
        }

        let before = self
            .view
            .borrow()
            .capture_scroll(self.config.bottom_threshold_px);

        let html = self.client.fetch_page().await?;
        let fresh = Document::parse(&html);

        let patched = self.view.borrow_mut().patch_log(&fresh, latest_id);
        match patched {
            PatchResult::Applied => {}
            PatchResult::Missing => {
                debug!(latest_id, "log area missing, nothing to patch");
                return Ok(PollOutcome::PageChanged);
            }
            PatchResult::Stale => {
                debug!(latest_id, "discarding stale patch");
                return Ok(PollOutcome::Stale { latest_id });
            }
        }

        let (new_count, new_messages) = {
            let view = self.view.borrow();
            let all = view.messages();
            let new_messages = all.iter().skip(before.message_count).cloned().collect();
            (all.len(), new_messages)
        };

        match plan(&before, new_count) {
            ScrollAction::PinToBottom => {
                // Give layout one scheduler turn before reading scroll_height.
                tokio::task::yield_now().await;
                self.view.borrow_mut().scroll_to_bottom();
            }
            ScrollAction::Restore(top) => self.view.borrow_mut().restore_scroll(top),
        }

        Ok(PollOutcome::Patched {
            latest_id,
            new_messages,
        })
    }

    /// One section-mode cycle: fetch the page and swap the monitor section.
    pub async fn refresh_section(&self) -> Result<PollOutcome> {
        let Some(_slot) = self.gate.try_enter() else {
            debug!("previous refresh still in flight, skipping tick");
            return Ok(PollOutcome::Busy);
        };

        let html = self.client.fetch_page().await?;
        let fresh = Document::parse(&html);
        if self.view.borrow_mut().replace_section(&fresh) {
            Ok(PollOutcome::SectionReplaced)
        } else {
            debug!("monitor section missing, nothing to patch");
            Ok(PollOutcome::PageChanged)
        }
    }

    /// Whether a poll cycle currently holds the gate.
    pub fn poll_in_flight(&self) -> bool {
        self.gate.is_busy()
    }
}
