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

use super::DerivedContentCache;
use crate::policy::Ttl;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::Duration;

/// Metadata shown in a link card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPreview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

impl LinkPreview {
    /// Degraded card naming only the site, used when nothing better exists.
    pub fn from_domain(url: &str) -> Self {
        let domain = domain_of(url);
        Self { title: Some(domain.clone()), site_name: Some(domain), ..Self::default() }
    }

    #[must_use]
    pub fn is_useful(&self) -> bool {
        [&self.title, &self.description, &self.image]
            .into_iter()
            .any(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

/// Host of `url` without a leading `www.`; the raw input if it does not parse.
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.trim_start_matches("www.").to_owned()))
        .unwrap_or_else(|| url.to_owned())
}

#[async_trait::async_trait(?Send)]
pub trait LinkPreviewService {
    async fn fetch_preview(&self, url: &str) -> anyhow::Result<LinkPreview>;
}

/// Link previews keyed by URL.
#[derive(Clone)]
pub struct PreviewCache {
    cache: DerivedContentCache<String, LinkPreview>,
    service: Rc<dyn LinkPreviewService>,
}

impl PreviewCache {
    pub fn new(service: Rc<dyn LinkPreviewService>, ttl: Ttl) -> Self {
        let cache = DerivedContentCache::new("link_preview", ttl, |url: &String, _| {
            LinkPreview::from_domain(url)
        })
        .with_usefulness(LinkPreview::is_useful);
        Self { cache, service }
    }

    pub async fn preview(&self, url: &str) -> LinkPreview {
        let service = Rc::clone(&self.service);
        let target = url.to_owned();
        self.cache
            .get_or_fetch(url.to_owned(), move || async move {
                service.fetch_preview(&target).await.map(Some)
            })
            .await
    }

    #[must_use]
    pub fn cached(&self, url: &str) -> Option<LinkPreview> {
        self.cache.peek(&url.to_owned())
    }

    pub fn invalidate(&self, url: &str) -> bool {
        self.cache.invalidate(&url.to_owned())
    }

    pub fn cache(&self) -> &DerivedContentCache<String, LinkPreview> {
        &self.cache
    }
}

/// Fetches the page itself and scrapes Open Graph / Twitter / HTML metadata.
pub struct HttpLinkPreviewService {
    client: reqwest::Client,
}

impl HttpLinkPreviewService {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("convo-view/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait(?Send)]
impl LinkPreviewService for HttpLinkPreviewService {
    async fn fetch_preview(&self, url: &str) -> anyhow::Result<LinkPreview> {
        let page_url = Url::parse(url)?;
        if !matches!(page_url.scheme(), "http" | "https") {
            anyhow::bail!("unsupported scheme `{}`", page_url.scheme());
        }
        let response = self.client.get(page_url.clone()).send().await?.error_for_status()?;
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|v| v.to_ascii_lowercase().contains("html"));
        if !is_html {
            tracing::debug!(%page_url, "preview target is not html");
            return Ok(LinkPreview::default());
        }
        let final_url = response.url().clone();
        let body = response.text().await?;
        Ok(extract_metadata(&body, &final_url))
    }
}

/// Build a preview from an HTML document.
pub fn extract_metadata(html: &str, page_url: &Url) -> LinkPreview {
    let lower = html.to_ascii_lowercase();
    let metas = collect_tags(html, &lower, "<meta");
    let meta = |keys: &[&str]| {
        keys.iter().find_map(|key| {
            metas.iter().find_map(|attrs| {
                let name = attr(attrs, "property").or_else(|| attr(attrs, "name"))?;
                if !name.eq_ignore_ascii_case(key) {
                    return None;
                }
                attr(attrs, "content").map(|v| decode_entities(v.trim())).filter(|v| !v.is_empty())
            })
        })
    };

    let title = meta(&["og:title", "twitter:title"]).or_else(|| title_tag(html, &lower));
    let description = meta(&["og:description", "twitter:description", "description"]);
    let image = meta(&["og:image", "og:image:url", "twitter:image"])
        .and_then(|raw| resolve_against(page_url, &raw));
    let site_name = meta(&["og:site_name"]);
    let favicon = collect_tags(html, &lower, "<link")
        .iter()
        .find(|attrs| {
            attr(attrs, "rel").is_some_and(|rel| {
                rel.split_ascii_whitespace().any(|r| r.eq_ignore_ascii_case("icon"))
            })
        })
        .and_then(|attrs| attr(attrs, "href"))
        .and_then(|href| resolve_against(page_url, &decode_entities(href)))
        .or_else(|| resolve_against(page_url, "/favicon.ico"));

    LinkPreview { title, description, image, site_name, favicon }
}

/// Attribute sections (`<tag ... >` without the brackets) of every `tag` in the document.
fn collect_tags<'a>(html: &'a str, lower: &str, tag: &str) -> Vec<Vec<(String, &'a str)>> {
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(pos) = lower[from..].find(tag) {
        let start = from + pos + tag.len();
        let Some(len) = lower[start..].find('>') else {
            break;
        };
        let next_is_boundary =
            html[start..].chars().next().is_some_and(|c| c.is_ascii_whitespace() || c == '/');
        if next_is_boundary {
            out.push(parse_attributes(&html[start..start + len]));
        }
        from = start + len;
    }
    out
}

fn parse_attributes(raw: &str) -> Vec<(String, &str)> {
    let mut attrs = Vec::new();
    let mut rest = raw.trim_start();
    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c == '=' || c.is_ascii_whitespace() || c == '/')
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();
        let value = if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            let (value, remainder) = match after_eq.chars().next() {
                Some(quote @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    let end = body.find(quote).unwrap_or(body.len());
                    (&body[..end], body.get(end + 1..).unwrap_or(""))
                }
                _ => {
                    let end =
                        after_eq.find(|c: char| c.is_ascii_whitespace()).unwrap_or(after_eq.len());
                    (&after_eq[..end], &after_eq[end..])
                }
            };
            rest = remainder;
            value
        } else {
            if name.is_empty() {
                // Stray '/' or similar; skip one char.
                let skip = rest.chars().next().map_or(0, char::len_utf8);
                rest = &rest[skip..];
            }
            ""
        };
        if !name.is_empty() {
            attrs.push((name, value));
        }
        rest = rest.trim_start();
    }
    attrs
}

fn attr<'a>(attrs: &[(String, &'a str)], name: &str) -> Option<&'a str> {
    attrs.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
}

fn title_tag(html: &str, lower: &str) -> Option<String> {
    let open = lower.find("<title")?;
    let body_start = open + lower[open..].find('>')? + 1;
    let body_end = body_start + lower[body_start..].find("</title")?;
    let title = decode_entities(html[body_start..body_end].trim());
    (!title.is_empty()).then_some(title)
}

fn resolve_against(base: &Url, raw: &str) -> Option<String> {
    base.join(raw.trim()).ok().map(String::from)
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
