// Conversation-level scenarios: switching, pagination and typing through one session.

use convo_view::session::{ConversationSession, SessionPolicies};
use convo_view::typing::TypingEvent;
use convo_view::viewport::{PrependAdjustment, ScrollCommand, ViewportMode};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::LocalSet;

use crate::helpers::{EchoTranslationService, ScriptedHistory, SlowPreviewService, derived_content};

fn started(id: &str) -> TypingEvent {
    TypingEvent::Started { conversation_id: id.to_owned() }
}

fn stopped(id: &str) -> TypingEvent {
    TypingEvent::Stopped { conversation_id: id.to_owned() }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<TypingEvent>) -> Vec<TypingEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn paging_through_history_keeps_the_anchor_and_recovers_from_failure() {
    LocalSet::new()
        .run_until(async {
            let history = ScriptedHistory::new();
            let content = derived_content(
                EchoTranslationService::new(),
                SlowPreviewService::new(Duration::ZERO),
            );
            let (typing_tx, _typing_rx) = mpsc::unbounded_channel();
            let (mut session, jump) = ConversationSession::open(
                "c1",
                history.clone(),
                typing_tx,
                content,
                SessionPolicies::default(),
            );
            assert_eq!(jump, ScrollCommand::ToBottom { smooth: false });
            assert_eq!(
                session.viewport_mut().on_content_appended(50),
                Some(ScrollCommand::ToBottom { smooth: true })
            );

            // First attempt fails; the lock is released so the UI stays usable.
            history.fail_next.set(true);
            let update = session.viewport_mut().on_scroll(20.0, 5000.0, 800.0);
            assert!(update.load_older.is_some());
            assert!(session.next_viewport_event().await);
            assert_eq!(session.viewport().mode(), ViewportMode::ScrolledUpNotFollowing);

            // Second attempt succeeds and the prepend is compensated exactly.
            let ticket = session.viewport_mut().on_scroll(20.0, 5000.0, 800.0).load_older.unwrap();
            assert!(session.next_viewport_event().await);
            assert_eq!(session.viewport().mode(), ViewportMode::LoadingOlder);
            let adjustment = session.viewport_mut().on_older_content_prepended(ticket, 6200.0);
            assert_eq!(adjustment, Some(PrependAdjustment { delta: 1200.0, scroll_top: 1220.0 }));
            assert_eq!(session.viewport().mode(), ViewportMode::ScrolledUpNotFollowing);
            assert_eq!(history.loads.get(), 2);

            // History exhausted: no more triggers.
            history.has_more.set(false);
            assert_eq!(session.viewport_mut().on_scroll(0.0, 6200.0, 800.0).load_older, None);
            assert_eq!(session.drain_viewport_events(), 0);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn switching_conversations_resets_viewport_and_stops_typing() {
    LocalSet::new()
        .run_until(async {
            let history = ScriptedHistory::new();
            let content = derived_content(
                EchoTranslationService::new(),
                SlowPreviewService::new(Duration::ZERO),
            );
            let (typing_tx, mut typing_rx) = mpsc::unbounded_channel();
            let (mut session, _) = ConversationSession::open(
                "c1",
                history.clone(),
                typing_tx,
                content,
                SessionPolicies::default(),
            );

            session.on_input_changed(true);
            let pending = session.viewport_mut().on_scroll(10.0, 3000.0, 600.0).load_older;
            assert!(pending.is_some());
            assert!(session.viewport().show_scroll_button());

            let jump = session.switch_to("c2");
            assert_eq!(jump, ScrollCommand::ToBottom { smooth: false });
            assert_eq!(session.conversation_id(), "c2");
            assert!(session.viewport().auto_follow());
            assert!(!session.viewport().show_scroll_button());
            assert_eq!(drain(&mut typing_rx), vec![started("c1"), stopped("c1")]);

            // The c1 load still finishes in the store; its completion is dropped.
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(session.drain_viewport_events(), 1);
            assert_eq!(session.viewport().mode(), ViewportMode::AtBottomFollowing);

            session.on_input_changed(true);
            session.on_message_sent();
            tokio::time::sleep(Duration::from_secs(3)).await;
            assert_eq!(drain(&mut typing_rx), vec![started("c2"), stopped("c2")]);

            session.close();
            session.on_input_changed(true);
            tokio::time::sleep(Duration::from_secs(3)).await;
            assert!(drain(&mut typing_rx).is_empty());
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn idle_typing_stops_after_quiet_period() {
    LocalSet::new()
        .run_until(async {
            let content = derived_content(
                EchoTranslationService::new(),
                SlowPreviewService::new(Duration::ZERO),
            );
            let (typing_tx, mut typing_rx) = mpsc::unbounded_channel();
            let (session, _) = ConversationSession::open(
                "c9",
                ScriptedHistory::new(),
                typing_tx,
                content,
                SessionPolicies::default(),
            );
            session.on_input_changed(true);
            tokio::time::sleep(Duration::from_millis(1999)).await;
            assert_eq!(drain(&mut typing_rx), vec![started("c9")]);
            tokio::time::sleep(Duration::from_millis(2)).await;
            assert_eq!(drain(&mut typing_rx), vec![stopped("c9")]);
            assert!(!session.typing().is_signaling());
            assert_eq!(session.content().previews.cache().len(), 0);
        })
        .await;
}
