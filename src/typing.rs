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

//! Debounced "typing" presence signal.
//!
//! The peer should see "typing" on the first keystroke and "stopped" only
//! after a quiet period, not after every key. Start is emitted once per
//! burst; every input event pushes the trailing stop timer back.

use crate::policy::TypingPolicy;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outbound side of the presence transport for one conversation.
pub trait TypingNotifier {
    fn emit_typing_start(&self);
    fn emit_typing_stop(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingEvent {
    Started { conversation_id: String },
    Stopped { conversation_id: String },
}

/// Notifier that forwards to the transport task over a channel.
pub struct ChannelTypingNotifier {
    conversation_id: String,
    tx: mpsc::UnboundedSender<TypingEvent>,
}

impl ChannelTypingNotifier {
    pub fn new(conversation_id: impl Into<String>, tx: mpsc::UnboundedSender<TypingEvent>) -> Self {
        Self { conversation_id: conversation_id.into(), tx }
    }
}

impl TypingNotifier for ChannelTypingNotifier {
    fn emit_typing_start(&self) {
        let conversation_id = self.conversation_id.clone();
        let _ = self.tx.send(TypingEvent::Started { conversation_id });
    }

    fn emit_typing_stop(&self) {
        let conversation_id = self.conversation_id.clone();
        let _ = self.tx.send(TypingEvent::Stopped { conversation_id });
    }
}

struct PendingStop {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TypingState {
    is_signaling: bool,
    pending_stop: Option<PendingStop>,
    generation: u64,
    closed: bool,
}

impl TypingState {
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending_stop.take() {
            pending.handle.abort();
        }
    }
}

pub struct TypingSignal {
    state: Rc<RefCell<TypingState>>,
    notifier: Rc<dyn TypingNotifier>,
    policy: TypingPolicy,
}

impl TypingSignal {
    pub fn new(notifier: Rc<dyn TypingNotifier>, policy: TypingPolicy) -> Self {
        Self { state: Rc::new(RefCell::new(TypingState::default())), notifier, policy }
    }

    #[must_use]
    pub fn is_signaling(&self) -> bool {
        self.state.borrow().is_signaling
    }

    /// Feed one input change. Must be called inside a `LocalSet`.
    pub fn on_input_changed(&self, has_content: bool) {
        let emit_start = {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return;
            }
            state.cancel_pending();
            let start = has_content && !state.is_signaling;
            if start {
                state.is_signaling = true;
            }
            start
        };
        if emit_start {
            tracing::debug!("typing started");
            self.notifier.emit_typing_start();
        }
        self.schedule_stop();
    }

    /// Stop right away, e.g. when the message is sent.
    pub fn stop_immediately(&self) {
        let emit_stop = {
            let mut state = self.state.borrow_mut();
            state.cancel_pending();
            std::mem::take(&mut state.is_signaling)
        };
        if emit_stop {
            tracing::debug!("typing stopped immediately");
            self.notifier.emit_typing_stop();
        }
    }

    /// Conversation teardown: stop, then ignore any further input.
    pub fn teardown(&self) {
        self.stop_immediately();
        self.state.borrow_mut().closed = true;
    }

    fn schedule_stop(&self) {
        let deadline = tokio::time::Instant::now() + self.policy.idle;
        let mut state = self.state.borrow_mut();
        state.generation += 1;
        let generation = state.generation;
        let weak = Rc::downgrade(&self.state);
        let notifier = Rc::clone(&self.notifier);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep_until(deadline).await;
            fire_stop(&weak, generation, notifier.as_ref());
        });
        state.pending_stop = Some(PendingStop { generation, handle });
    }
}

fn fire_stop(state: &Weak<RefCell<TypingState>>, generation: u64, notifier: &dyn TypingNotifier) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let emit_stop = {
        let mut state = state.borrow_mut();
        let current = state.pending_stop.as_ref().is_some_and(|p| p.generation == generation);
        if state.closed || !current {
            return;
        }
        state.pending_stop = None;
        std::mem::take(&mut state.is_signaling)
    };
    if emit_stop {
        tracing::debug!("typing stopped after idle");
        notifier.emit_typing_stop();
    }
}

impl Drop for TypingSignal {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.cancel_pending();
        }
    }
}
