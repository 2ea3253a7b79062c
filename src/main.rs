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

use clap::Parser;
use convo_view::cache::preview::{HttpLinkPreviewService, PreviewCache};
use convo_view::cache::translation::{HttpTranslationService, TranslationCache};
use convo_view::error::AppError;
use convo_view::policy::{self, CachePolicy};
use convo_view::{Cli, Command};
use std::fs::OpenOptions;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

#[allow(clippy::exit)]
fn main() {
    if let Err(err) = run() {
        if let Some(app_error) = extract_app_error(&err) {
            eprintln!("{}", app_error.user_message());
            tracing::error!(error = %format!("{err:#}"), "command failed");
            std::process::exit(app_error.exit_code());
        }
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let mut policy = CachePolicy {
        http_timeout: Duration::from_secs(cli.timeout_secs),
        ..CachePolicy::default()
    };

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local_set = tokio::task::LocalSet::new();

    rt.block_on(local_set.run_until(async move {
        match cli.command {
            Command::Preview { urls } => run_preview(&policy, &urls).await,
            Command::Translate {
                to,
                platform,
                message_id,
                endpoint,
                translation_ttl_hours,
                text,
            } => {
                if let Some(hours) = translation_ttl_hours {
                    policy.translation_ttl = policy::ttl_from_hours(hours);
                }
                let endpoint = endpoint.ok_or(AppError::MissingTranslationEndpoint)?;
                let endpoint = parse_url(&endpoint, "translation endpoint")?;
                run_translate(&policy, endpoint, &message_id, &text, &to, &platform).await
            }
        }
    }))
}

async fn run_preview(policy: &CachePolicy, urls: &[String]) -> anyhow::Result<()> {
    for url in urls {
        parse_url(url, "preview url")?;
    }
    let service = HttpLinkPreviewService::new(policy.http_timeout)
        .map_err(|e| anyhow::Error::new(AppError::HttpClient).context(e))?;
    let cache = PreviewCache::new(Rc::new(service), policy.preview_ttl);

    // All URLs are requested together; duplicates join the first fetch.
    let previews = futures::future::join_all(urls.iter().map(|url| cache.preview(url))).await;
    tracing::info!(requested = urls.len(), fetched = cache.cache().len(), "previews resolved");
    for (url, preview) in urls.iter().zip(previews) {
        let line = serde_json::json!({ "url": url, "preview": preview });
        println!("{line}");
    }
    Ok(())
}

async fn run_translate(
    policy: &CachePolicy,
    endpoint: reqwest::Url,
    message_id: &str,
    text: &str,
    target_language: &str,
    platform: &str,
) -> anyhow::Result<()> {
    let service = HttpTranslationService::new(endpoint, policy.http_timeout)
        .map_err(|e| anyhow::Error::new(AppError::HttpClient).context(e))?;
    let cache = TranslationCache::new(Rc::new(service), policy.translation_ttl);
    let result = cache.translate(message_id, text, target_language, platform).await;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

fn parse_url(raw: &str, what: &str) -> anyhow::Result<reqwest::Url> {
    reqwest::Url::parse(raw).map_err(|e| {
        anyhow::Error::new(AppError::InvalidUrl).context(format!("{what} `{raw}`: {e}"))
    })
}

/// First [`AppError`] anywhere in the context chain decides the exit code.
fn extract_app_error(err: &anyhow::Error) -> Option<AppError> {
    err.chain().find_map(|cause| cause.downcast_ref::<AppError>()).cloned()
}

/// Diagnostics go to `--log-file` only; stdout carries command output.
fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let Some(path) = cli.log_file.as_ref() else {
        if std::env::var_os("RUST_LOG").is_some() {
            eprintln!("convo-view: RUST_LOG is ignored unless --log-file <PATH> is given.");
        }
        return Ok(());
    };

    let directives = cli
        .log_filter
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_owned());
    let filter = tracing_subscriber::EnvFilter::try_new(directives.as_str())
        .map_err(|e| anyhow::anyhow!("invalid tracing filter `{directives}`: {e}"))?;

    let file = open_log_file(path, cli.log_append)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))?;

    tracing::info!(
        target: "convo_view::startup",
        version = env!("CARGO_PKG_VERSION"),
        log_file = %path.display(),
        filter = %directives,
        append = cli.log_append,
        "convo-view diagnostics started"
    );

    Ok(())
}

fn open_log_file(path: &Path, append: bool) -> anyhow::Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(|e| anyhow::anyhow!("cannot open log file {}: {e}", path.display()))
}
