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

//! Tunables for the viewport, typing and derived-content subsystems.

use std::time::Duration;

/// Pagination starts once the top edge is closer than this.
pub const DEFAULT_LOAD_OLDER_THRESHOLD_PX: f64 = 100.0;
/// The jump-to-latest button shows once the bottom is farther than this.
pub const DEFAULT_SCROLL_BUTTON_THRESHOLD_PX: f64 = 100.0;
/// Auto-follow engages once the bottom is closer than this.
pub const DEFAULT_FOLLOW_THRESHOLD_PX: f64 = 50.0;

pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_millis(2000);

pub const DEFAULT_TRANSLATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[allow(clippy::struct_field_names)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportPolicy {
    pub load_older_threshold_px: f64,
    pub scroll_button_threshold_px: f64,
    pub follow_threshold_px: f64,
}

impl Default for ViewportPolicy {
    fn default() -> Self {
        Self {
            load_older_threshold_px: DEFAULT_LOAD_OLDER_THRESHOLD_PX,
            scroll_button_threshold_px: DEFAULT_SCROLL_BUTTON_THRESHOLD_PX,
            follow_threshold_px: DEFAULT_FOLLOW_THRESHOLD_PX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingPolicy {
    /// Quiet period after the last keystroke before "stopped" is sent.
    pub idle: Duration,
}

impl Default for TypingPolicy {
    fn default() -> Self {
        Self { idle: DEFAULT_TYPING_IDLE }
    }
}

/// Lifetime of a resolved cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    After(Duration),
    /// Lives until invalidated or the cache is reset.
    Session,
}

impl Ttl {
    #[must_use]
    pub fn expires_at(self, resolved_at: tokio::time::Instant) -> Option<tokio::time::Instant> {
        match self {
            Self::After(ttl) => resolved_at.checked_add(ttl),
            Self::Session => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub translation_ttl: Ttl,
    pub preview_ttl: Ttl,
    pub http_timeout: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            translation_ttl: Ttl::After(DEFAULT_TRANSLATION_TTL),
            preview_ttl: Ttl::Session,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// TTL from a user-supplied hour count. Saturates instead of overflowing;
/// a lifetime past the clock's range behaves like [`Ttl::Session`].
#[must_use]
pub fn ttl_from_hours(hours: u64) -> Ttl {
    Ttl::After(Duration::from_secs(hours.saturating_mul(60 * 60)))
}
