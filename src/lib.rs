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

pub mod cache;
pub mod error;
pub mod policy;
pub mod session;
pub mod typing;
pub mod viewport;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "convo-view",
    about = "Resolve chat link previews and translations through the shared caches"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Write tracing diagnostics to this file
    #[arg(long, global = true)]
    pub log_file: Option<std::path::PathBuf>,

    /// Tracing filter directives (defaults to RUST_LOG, then "info")
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    /// Append to --log-file instead of truncating it
    #[arg(long, global = true)]
    pub log_append: bool,

    /// HTTP timeout for preview and translation requests, in seconds
    #[arg(long, global = true, default_value_t = policy::DEFAULT_HTTP_TIMEOUT.as_secs())]
    pub timeout_secs: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch link previews; repeated URLs share one request
    Preview {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Translate a message through the translation cache
    Translate {
        /// Target language code (e.g. "es")
        #[arg(long)]
        to: String,

        #[arg(long, default_value = "cli")]
        platform: String,

        #[arg(long, default_value = "cli")]
        message_id: String,

        /// Translation service endpoint
        #[arg(long, env = "CONVO_VIEW_TRANSLATE_ENDPOINT")]
        endpoint: Option<String>,

        /// Override the 24h translation cache lifetime
        #[arg(long)]
        translation_ttl_hours: Option<u64>,

        text: String,
    },
}
