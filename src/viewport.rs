// convo-view - Conversation viewport sync and derived-content caching
// Copyright (C) 2025  Simon Peter Rothgang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Scroll bookkeeping for one open conversation.
//!
//! The controller never touches a real scroll container. It consumes raw
//! metrics from the presentation layer and answers with [`ScrollCommand`]s
//! and adjustments for the caller to apply.

use crate::policy::ViewportPolicy;
use std::rc::Rc;
use tokio::sync::mpsc;

/// Older-history side of the message store for the active conversation.
#[async_trait::async_trait(?Send)]
pub trait MessageHistory {
    fn has_more(&self) -> bool;
    fn is_loading(&self) -> bool;
    async fn load_more(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollCommand {
    ToBottom { smooth: bool },
    To { scroll_top: f64 },
}

/// Identifies one backward-pagination round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadOlderTicket {
    conversation: u64,
    seq: u64,
}

#[derive(Debug)]
pub enum ViewportEvent {
    /// The store's `load_more` finished, successfully or not.
    OlderHistoryLoaded { ticket: LoadOlderTicket, result: Result<(), String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewportState {
    pub auto_follow: bool,
    pub is_loading_older: bool,
    pub last_known_content_height: f64,
    pub last_message_count: usize,
    pub last_conversation_id: Option<String>,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            auto_follow: true,
            is_loading_older: false,
            last_known_content_height: 0.0,
            last_message_count: 0,
            last_conversation_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportMode {
    AtBottomFollowing,
    ScrolledUpNotFollowing,
    LoadingOlder,
}

/// What the presentation layer should show after a scroll event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollUpdate {
    pub show_scroll_button: bool,
    pub auto_follow: bool,
    pub load_older: Option<LoadOlderTicket>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrependAdjustment {
    /// Height added above the previous first item.
    pub delta: f64,
    /// Absolute scroll position that keeps the previous first item in place.
    pub scroll_top: f64,
}

impl PrependAdjustment {
    /// Non-animated jump the presentation layer applies before repainting.
    #[must_use]
    pub fn scroll_command(&self) -> ScrollCommand {
        ScrollCommand::To { scroll_top: self.scroll_top }
    }
}

/// The store's `load_more` always runs to completion; its result is only
/// applied while the ticket here still matches.
struct PendingLoad {
    ticket: LoadOlderTicket,
    pre_fetch_height: f64,
}

/// New scroll position after `post_height - pre_height` pixels were inserted
/// above the viewport.
#[must_use]
pub fn compensate_prepend(scroll_top: f64, pre_height: f64, post_height: f64) -> f64 {
    (finite_or_zero(scroll_top) + finite_or_zero(post_height) - finite_or_zero(pre_height)).max(0.0)
}

/// Clamp a scroll position into `[0, content_height - viewport_height]`.
#[must_use]
pub fn clamp_scroll_top(scroll_top: f64, content_height: f64, viewport_height: f64) -> f64 {
    let max = (finite_or_zero(content_height) - finite_or_zero(viewport_height)).max(0.0);
    finite_or_zero(scroll_top).clamp(0.0, max)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

pub struct ViewportController {
    state: ViewportState,
    policy: ViewportPolicy,
    show_scroll_button: bool,
    last_scroll_top: f64,
    viewport_height: f64,
    history: Rc<dyn MessageHistory>,
    event_tx: mpsc::UnboundedSender<ViewportEvent>,
    pending: Option<PendingLoad>,
    /// Bumped on every conversation change; tickets from earlier generations are stale.
    conversation: u64,
    next_seq: u64,
    closed: bool,
}

impl ViewportController {
    /// Create a controller and the channel on which pagination completions arrive.
    pub fn new(
        history: Rc<dyn MessageHistory>,
        policy: ViewportPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ViewportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let controller = Self {
            state: ViewportState::default(),
            policy,
            show_scroll_button: false,
            last_scroll_top: 0.0,
            viewport_height: 0.0,
            history,
            event_tx,
            pending: None,
            conversation: 0,
            next_seq: 0,
            closed: false,
        };
        (controller, event_rx)
    }

    #[must_use]
    pub fn state(&self) -> &ViewportState {
        &self.state
    }

    #[must_use]
    pub fn auto_follow(&self) -> bool {
        self.state.auto_follow
    }

    #[must_use]
    pub fn show_scroll_button(&self) -> bool {
        self.show_scroll_button
    }

    #[must_use]
    pub fn mode(&self) -> ViewportMode {
        if self.state.is_loading_older {
            ViewportMode::LoadingOlder
        } else if self.state.auto_follow {
            ViewportMode::AtBottomFollowing
        } else {
            ViewportMode::ScrolledUpNotFollowing
        }
    }

    /// Reset for a newly opened conversation. The returned jump must be
    /// applied before the new content is first painted.
    pub fn on_conversation_changed(&mut self, new_id: &str) -> ScrollCommand {
        self.pending = None;
        self.conversation += 1;
        self.state = ViewportState {
            last_conversation_id: Some(new_id.to_owned()),
            ..ViewportState::default()
        };
        self.show_scroll_button = false;
        self.last_scroll_top = 0.0;
        tracing::debug!(conversation_id = new_id, "viewport reset for conversation");
        ScrollCommand::ToBottom { smooth: false }
    }

    /// Follow the tail when new messages arrive, unless the user scrolled away
    /// or older history is being spliced in.
    pub fn on_content_appended(&mut self, new_count: usize) -> Option<ScrollCommand> {
        let grew = new_count > self.state.last_message_count;
        self.state.last_message_count = new_count;
        (grew && self.state.auto_follow && !self.state.is_loading_older)
            .then_some(ScrollCommand::ToBottom { smooth: true })
    }

    pub fn on_scroll(
        &mut self,
        scroll_top: f64,
        content_height: f64,
        viewport_height: f64,
    ) -> ScrollUpdate {
        if !(scroll_top.is_finite() && content_height.is_finite() && viewport_height.is_finite()) {
            tracing::warn!(
                scroll_top,
                content_height,
                viewport_height,
                "non-finite scroll metrics"
            );
        }
        let scroll_top = finite_or_zero(scroll_top).max(0.0);
        let content_height = finite_or_zero(content_height).max(0.0);
        let viewport_height = finite_or_zero(viewport_height).max(0.0);

        self.last_scroll_top = scroll_top;
        self.viewport_height = viewport_height;
        self.state.last_known_content_height = content_height;

        let distance_from_bottom = content_height - scroll_top - viewport_height;
        self.show_scroll_button = distance_from_bottom > self.policy.scroll_button_threshold_px;
        self.state.auto_follow = distance_from_bottom < self.policy.follow_threshold_px;

        let load_older = self.request_load_older_if_needed(
            scroll_top,
            self.history.has_more(),
            self.history.is_loading(),
        );
        ScrollUpdate {
            show_scroll_button: self.show_scroll_button,
            auto_follow: self.state.auto_follow,
            load_older,
        }
    }

    /// Start backward pagination when the top edge is near. The completion
    /// arrives as [`ViewportEvent::OlderHistoryLoaded`].
    pub fn request_load_older_if_needed(
        &mut self,
        scroll_top: f64,
        has_more: bool,
        is_currently_loading: bool,
    ) -> Option<LoadOlderTicket> {
        if self.closed
            || self.state.is_loading_older
            || !has_more
            || is_currently_loading
            || scroll_top >= self.policy.load_older_threshold_px
        {
            return None;
        }

        let ticket = LoadOlderTicket { conversation: self.conversation, seq: self.next_seq };
        self.next_seq += 1;
        self.state.is_loading_older = true;
        let pre_fetch_height = self.state.last_known_content_height;
        tracing::debug!(?ticket, pre_fetch_height, "loading older history");

        let history = Rc::clone(&self.history);
        let event_tx = self.event_tx.clone();
        tokio::task::spawn_local(async move {
            let result = history.load_more().await.map_err(|err| format!("{err:#}"));
            let _ = event_tx.send(ViewportEvent::OlderHistoryLoaded { ticket, result });
        });
        self.pending = Some(PendingLoad { ticket, pre_fetch_height });
        Some(ticket)
    }

    pub fn handle_event(&mut self, event: ViewportEvent) {
        match event {
            ViewportEvent::OlderHistoryLoaded { ticket, result } => {
                self.on_older_history_loaded(ticket, result);
            }
        }
    }

    /// Completion handler for `load_more`, run on success and on failure.
    /// A failure releases the pagination lock right away; a success keeps it
    /// until [`Self::on_older_content_prepended`] applies the height delta.
    /// Returns `false` for a stale ticket.
    pub fn on_older_history_loaded(
        &mut self,
        ticket: LoadOlderTicket,
        result: Result<(), String>,
    ) -> bool {
        if !self.owns(ticket) {
            tracing::debug!(?ticket, "ignoring stale pagination completion");
            return false;
        }
        if let Err(error) = result {
            tracing::warn!(?ticket, %error, "loading older history failed");
            self.pending = None;
            self.state.is_loading_older = false;
        }
        true
    }

    /// Keep the previously visible item fixed after older content was
    /// inserted above it.
    pub fn on_older_content_prepended(
        &mut self,
        ticket: LoadOlderTicket,
        post_fetch_content_height: f64,
    ) -> Option<PrependAdjustment> {
        if !self.owns(ticket) {
            tracing::debug!(?ticket, "ignoring stale prepend measurement");
            return None;
        }
        let pending = self.pending.take()?;
        let post = finite_or_zero(post_fetch_content_height).max(0.0);
        let delta = post - pending.pre_fetch_height;
        let scroll_top = clamp_scroll_top(
            compensate_prepend(self.last_scroll_top, pending.pre_fetch_height, post),
            post,
            self.viewport_height,
        );
        self.last_scroll_top = scroll_top;
        self.state.last_known_content_height = post;
        self.state.is_loading_older = false;
        tracing::debug!(?ticket, delta, scroll_top, "compensated for prepended history");
        Some(PrependAdjustment { delta, scroll_top })
    }

    /// Imperative jump to the tail, e.g. from the scroll button.
    pub fn scroll_to_bottom(&mut self, smooth: bool) -> ScrollCommand {
        self.state.auto_follow = true;
        self.show_scroll_button = false;
        ScrollCommand::ToBottom { smooth }
    }

    /// Teardown: forget pending pagination and ignore everything after.
    /// A `load_more` already running still finishes inside the store.
    pub fn shutdown(&mut self) {
        self.closed = true;
        self.pending = None;
        self.state.is_loading_older = false;
    }

    fn owns(&self, ticket: LoadOlderTicket) -> bool {
        !self.closed && self.pending.as_ref().is_some_and(|pending| pending.ticket == ticket)
    }
}
