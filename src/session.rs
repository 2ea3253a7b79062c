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

//! Per-conversation wiring of the viewport and typing components over the
//! process-wide derived-content caches.

use crate::cache::preview::{LinkPreviewService, PreviewCache};
use crate::cache::translation::{TranslationCache, TranslationService};
use crate::policy::{CachePolicy, TypingPolicy, ViewportPolicy};
use crate::typing::{ChannelTypingNotifier, TypingEvent, TypingSignal};
use crate::viewport::{MessageHistory, ScrollCommand, ViewportController, ViewportEvent};
use std::rc::Rc;
use tokio::sync::mpsc;

/// The two derived-content caches, shared by every open conversation.
///
/// Constructed explicitly and handed around by `Rc`, so tests get isolated
/// instances and [`DerivedContent::reset`] gives a defined teardown.
pub struct DerivedContent {
    pub translations: TranslationCache,
    pub previews: PreviewCache,
}

impl DerivedContent {
    pub fn new(
        translation_service: Rc<dyn TranslationService>,
        preview_service: Rc<dyn LinkPreviewService>,
        policy: &CachePolicy,
    ) -> Self {
        Self {
            translations: TranslationCache::new(translation_service, policy.translation_ttl),
            previews: PreviewCache::new(preview_service, policy.preview_ttl),
        }
    }

    pub fn reset(&self) {
        self.translations.cache().reset();
        self.previews.cache().reset();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionPolicies {
    pub viewport: ViewportPolicy,
    pub typing: TypingPolicy,
}

/// Owner of the state tied to the currently open conversation.
pub struct ConversationSession {
    conversation_id: String,
    viewport: ViewportController,
    viewport_events: mpsc::UnboundedReceiver<ViewportEvent>,
    typing: TypingSignal,
    typing_tx: mpsc::UnboundedSender<TypingEvent>,
    content: Rc<DerivedContent>,
    policies: SessionPolicies,
}

impl ConversationSession {
    /// Open `conversation_id`. The returned command must be applied before
    /// the first paint.
    pub fn open(
        conversation_id: &str,
        history: Rc<dyn MessageHistory>,
        typing_tx: mpsc::UnboundedSender<TypingEvent>,
        content: Rc<DerivedContent>,
        policies: SessionPolicies,
    ) -> (Self, ScrollCommand) {
        let (mut viewport, viewport_events) = ViewportController::new(history, policies.viewport);
        let jump = viewport.on_conversation_changed(conversation_id);
        let typing = new_typing_signal(conversation_id, &typing_tx, policies.typing);
        let session = Self {
            conversation_id: conversation_id.to_owned(),
            viewport,
            viewport_events,
            typing,
            typing_tx,
            content,
            policies,
        };
        (session, jump)
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Move to another conversation: the old typing signal is torn down (its
    /// peer sees "stopped" if needed) and the viewport starts over.
    pub fn switch_to(&mut self, conversation_id: &str) -> ScrollCommand {
        tracing::info!(
            from = %self.conversation_id,
            to = conversation_id,
            "switching conversation"
        );
        self.typing.teardown();
        self.typing = new_typing_signal(conversation_id, &self.typing_tx, self.policies.typing);
        self.conversation_id = conversation_id.to_owned();
        self.viewport.on_conversation_changed(conversation_id)
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut ViewportController {
        &mut self.viewport
    }

    pub fn typing(&self) -> &TypingSignal {
        &self.typing
    }

    pub fn content(&self) -> &DerivedContent {
        &self.content
    }

    pub fn on_input_changed(&self, has_content: bool) {
        self.typing.on_input_changed(has_content);
    }

    pub fn on_message_sent(&self) {
        self.typing.stop_immediately();
    }

    /// Wait for the next pagination completion and apply it.
    pub async fn next_viewport_event(&mut self) -> bool {
        let Some(event) = self.viewport_events.recv().await else {
            return false;
        };
        self.viewport.handle_event(event);
        true
    }

    /// Apply every queued pagination completion without waiting.
    pub fn drain_viewport_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.viewport_events.try_recv() {
            self.viewport.handle_event(event);
            applied += 1;
        }
        applied
    }

    pub fn close(&mut self) {
        self.typing.teardown();
        self.viewport.shutdown();
        tracing::debug!(conversation_id = %self.conversation_id, "conversation closed");
    }
}

fn new_typing_signal(
    conversation_id: &str,
    typing_tx: &mpsc::UnboundedSender<TypingEvent>,
    policy: TypingPolicy,
) -> TypingSignal {
    let notifier = ChannelTypingNotifier::new(conversation_id, typing_tx.clone());
    TypingSignal::new(Rc::new(notifier), policy)
}
