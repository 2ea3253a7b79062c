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

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Translation endpoint not configured")]
    MissingTranslationEndpoint,
    #[error("HTTP client setup failed")]
    HttpClient,
}

impl AppError {
    pub const INVALID_URL_EXIT_CODE: i32 = 30;
    pub const MISSING_TRANSLATION_ENDPOINT_EXIT_CODE: i32 = 31;
    pub const HTTP_CLIENT_EXIT_CODE: i32 = 32;

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidUrl => Self::INVALID_URL_EXIT_CODE,
            Self::MissingTranslationEndpoint => Self::MISSING_TRANSLATION_ENDPOINT_EXIT_CODE,
            Self::HttpClient => Self::HTTP_CLIENT_EXIT_CODE,
        }
    }

    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "A URL argument could not be parsed. Use absolute http(s) URLs.",
            Self::MissingTranslationEndpoint => {
                "No translation endpoint. Pass --endpoint or set CONVO_VIEW_TRANSLATE_ENDPOINT."
            }
            Self::HttpClient => "Failed to initialise the HTTP client.",
        }
    }
}
