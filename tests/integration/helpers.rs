use convo_view::cache::preview::{LinkPreview, LinkPreviewService};
use convo_view::cache::translation::{TranslationResult, TranslationService};
use convo_view::policy::CachePolicy;
use convo_view::session::DerivedContent;
use convo_view::viewport::MessageHistory;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// Preview service that answers `{title: "Example"}` after `latency`.
pub struct SlowPreviewService {
    pub latency: Duration,
    pub calls: Cell<usize>,
}

impl SlowPreviewService {
    pub fn new(latency: Duration) -> Rc<Self> {
        Rc::new(Self { latency, calls: Cell::new(0) })
    }
}

#[async_trait::async_trait(?Send)]
impl LinkPreviewService for SlowPreviewService {
    async fn fetch_preview(&self, _url: &str) -> anyhow::Result<LinkPreview> {
        self.calls.set(self.calls.get() + 1);
        tokio::time::sleep(self.latency).await;
        Ok(LinkPreview { title: Some("Example".to_owned()), ..LinkPreview::default() })
    }
}

/// Translation service that upper-cases the text, or fails when `failing` is set.
pub struct EchoTranslationService {
    pub calls: Cell<usize>,
    pub failing: Cell<bool>,
}

impl EchoTranslationService {
    pub fn new() -> Rc<Self> {
        Rc::new(Self { calls: Cell::new(0), failing: Cell::new(false) })
    }
}

#[async_trait::async_trait(?Send)]
impl TranslationService for EchoTranslationService {
    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        _platform: &str,
    ) -> anyhow::Result<TranslationResult> {
        self.calls.set(self.calls.get() + 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.failing.get() {
            anyhow::bail!("provider timeout");
        }
        let translated = format!("{target_language}:{}", text.to_uppercase());
        Ok(TranslationResult::translated(translated, "echo"))
    }
}

pub fn derived_content(
    translations: Rc<EchoTranslationService>,
    previews: Rc<SlowPreviewService>,
) -> Rc<DerivedContent> {
    Rc::new(DerivedContent::new(translations, previews, &CachePolicy::default()))
}

/// Message store stand-in with a configurable outcome for `load_more`.
pub struct ScriptedHistory {
    pub has_more: Cell<bool>,
    pub fail_next: Cell<bool>,
    pub loads: Cell<usize>,
}

impl ScriptedHistory {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            has_more: Cell::new(true),
            fail_next: Cell::new(false),
            loads: Cell::new(0),
        })
    }
}

#[async_trait::async_trait(?Send)]
impl MessageHistory for ScriptedHistory {
    fn has_more(&self) -> bool {
        self.has_more.get()
    }

    fn is_loading(&self) -> bool {
        false
    }

    async fn load_more(&self) -> anyhow::Result<()> {
        self.loads.set(self.loads.get() + 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        if self.fail_next.replace(false) {
            anyhow::bail!("history endpoint returned 503");
        }
        Ok(())
    }
}
