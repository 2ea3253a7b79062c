// Derived-content scenarios across the shared translation and preview caches.

use convo_view::cache::translation::TranslationResult;
use convo_view::policy::DEFAULT_TRANSLATION_TTL;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::task::LocalSet;
use tokio::time::Instant;

use crate::helpers::{EchoTranslationService, SlowPreviewService, derived_content};

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn two_messages_rendering_one_url_share_a_single_request() {
    LocalSet::new()
        .run_until(async {
            let previews = SlowPreviewService::new(Duration::from_millis(100));
            let content = derived_content(EchoTranslationService::new(), previews.clone());
            let started = Instant::now();

            let (first, second) = tokio::join!(
                content.previews.preview("https://example.com/a"),
                content.previews.preview("https://example.com/a"),
            );

            assert_eq!(previews.calls.get(), 1);
            assert_eq!(first, second);
            assert_eq!(first.title.as_deref(), Some("Example"));
            assert_eq!(started.elapsed(), Duration::from_millis(100));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn late_joiner_gets_the_in_flight_answer() {
    LocalSet::new()
        .run_until(async {
            let previews = SlowPreviewService::new(Duration::from_millis(100));
            let content = derived_content(EchoTranslationService::new(), previews.clone());

            let early = content.previews.preview("https://example.com/b");
            let late = async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                assert!(content.previews.cache().is_pending(&"https://example.com/b".to_owned()));
                content.previews.preview("https://example.com/b").await
            };
            let (early, late) = tokio::join!(early, late);
            assert_eq!(early, late);
            assert_eq!(previews.calls.get(), 1);

            // A different URL is a different key.
            content.previews.preview("https://example.com/c").await;
            assert_eq!(previews.calls.get(), 2);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn preview_cache_has_no_automatic_expiry() {
    LocalSet::new()
        .run_until(async {
            let previews = SlowPreviewService::new(Duration::from_millis(10));
            let content = derived_content(EchoTranslationService::new(), previews.clone());
            content.previews.preview("https://example.com/a").await;
            tokio::time::sleep(Duration::from_secs(7 * 24 * 60 * 60)).await;
            content.previews.preview("https://example.com/a").await;
            assert_eq!(previews.calls.get(), 1);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn translation_failure_is_cached_until_ttl_then_retried() {
    LocalSet::new()
        .run_until(async {
            let translations = EchoTranslationService::new();
            let content =
                derived_content(translations.clone(), SlowPreviewService::new(Duration::ZERO));

            translations.failing.set(true);
            let failed = content.translations.translate("m1", "hi", "de", "web").await;
            assert_eq!(failed, TranslationResult::failed("provider timeout"));

            translations.failing.set(false);
            tokio::time::sleep(DEFAULT_TRANSLATION_TTL - Duration::from_millis(1)).await;
            let still_failed = content.translations.translate("m1", "hi", "de", "web").await;
            assert!(!still_failed.success);
            assert_eq!(translations.calls.get(), 1);

            tokio::time::sleep(Duration::from_millis(2)).await;
            let recovered = content.translations.translate("m1", "hi", "de", "web").await;
            assert_eq!(recovered.translated_text.as_deref(), Some("de:HI"));
            assert_eq!(translations.calls.get(), 2);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn reset_isolates_instances_and_clears_entries() {
    LocalSet::new()
        .run_until(async {
            let instant = || SlowPreviewService::new(Duration::ZERO);
            let a = derived_content(EchoTranslationService::new(), instant());
            let b = derived_content(EchoTranslationService::new(), instant());
            a.translations.translate("m1", "hi", "fr", "web").await;
            assert!(a.translations.cached("m1", "fr").is_some());
            assert!(b.translations.cached("m1", "fr").is_none());

            a.reset();
            assert!(a.translations.cache().is_empty());
            assert!(a.previews.cache().is_empty());
        })
        .await;
}
