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

use super::{DerivedContentCache, FallbackReason};
use crate::policy::Ttl;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::Duration;

const GENERIC_FAILURE: &str = "Translation failed";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranslationKey {
    pub message_id: String,
    pub target_language: String,
}

impl TranslationKey {
    pub fn new(message_id: impl Into<String>, target_language: impl Into<String>) -> Self {
        Self { message_id: message_id.into(), target_language: target_language.into() }
    }
}

/// Answer of the translation service, also used as the cached value.
///
/// A failed translation stays distinguishable: `success` is `false` and
/// `error` says why.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranslationResult {
    pub fn translated(text: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            success: true,
            translated_text: Some(text.into()),
            provider: Some(provider.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), ..Self::default() }
    }

    #[must_use]
    pub fn is_useful(&self) -> bool {
        self.success && self.translated_text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

#[async_trait::async_trait(?Send)]
pub trait TranslationService {
    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        platform: &str,
    ) -> anyhow::Result<TranslationResult>;
}

fn translation_fallback(_key: &TranslationKey, reason: FallbackReason) -> TranslationResult {
    match reason {
        FallbackReason::Empty => TranslationResult::failed(GENERIC_FAILURE),
        FallbackReason::Failed(error) if error.trim().is_empty() => {
            TranslationResult::failed(GENERIC_FAILURE)
        }
        FallbackReason::Failed(error) => TranslationResult::failed(error),
    }
}

/// Translations keyed by message and target language.
#[derive(Clone)]
pub struct TranslationCache {
    cache: DerivedContentCache<TranslationKey, TranslationResult>,
    service: Rc<dyn TranslationService>,
}

impl TranslationCache {
    pub fn new(service: Rc<dyn TranslationService>, ttl: Ttl) -> Self {
        let cache = DerivedContentCache::new("translation", ttl, translation_fallback)
            .with_usefulness(TranslationResult::is_useful);
        Self { cache, service }
    }

    pub async fn translate(
        &self,
        message_id: &str,
        text: &str,
        target_language: &str,
        platform: &str,
    ) -> TranslationResult {
        let key = TranslationKey::new(message_id, target_language);
        let service = Rc::clone(&self.service);
        let text = text.to_owned();
        let target_language = target_language.to_owned();
        let platform = platform.to_owned();
        self.cache
            .get_or_fetch(key, move || async move {
                let result = service.translate(&text, &target_language, &platform).await?;
                if result.success {
                    return Ok(Some(result));
                }
                // Surface the service's own reason through the fallback.
                let reason = result.error.unwrap_or_else(|| GENERIC_FAILURE.to_owned());
                Err(anyhow::anyhow!(reason))
            })
            .await
    }

    #[must_use]
    pub fn cached(&self, message_id: &str, target_language: &str) -> Option<TranslationResult> {
        self.cache.peek(&TranslationKey::new(message_id, target_language))
    }

    pub fn invalidate(&self, message_id: &str, target_language: &str) -> bool {
        self.cache.invalidate(&TranslationKey::new(message_id, target_language))
    }

    pub fn cache(&self) -> &DerivedContentCache<TranslationKey, TranslationResult> {
        &self.cache
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateRequest<'a> {
    text: &'a str,
    target_language: &'a str,
    platform: &'a str,
}

/// Translation service reached over HTTP: POSTs JSON to a single endpoint
/// and expects a [`TranslationResult`] back.
pub struct HttpTranslationService {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpTranslationService {
    pub fn new(endpoint: reqwest::Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait::async_trait(?Send)]
impl TranslationService for HttpTranslationService {
    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        platform: &str,
    ) -> anyhow::Result<TranslationResult> {
        tracing::debug!(
            endpoint = %self.endpoint,
            target_language,
            platform,
            "requesting translation"
        );
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&TranslateRequest { text, target_language, platform })
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<TranslationResult>().await?)
    }
}
