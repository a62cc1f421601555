// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Upstream backend targets, keyed by country ISO code at configuration time.

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum BackendParseError {
    #[error("Invalid backend URL {url:?}: {source}")]
    Malformed {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Backend URL {0:?} must use the http or https scheme")]
    UnsupportedScheme(String),

    #[error("Backend URL {0:?} has no host")]
    MissingHost(String),
}

/// One per-country upstream. Immutable after configuration load; the raw URL
/// string doubles as the circuit-breaker key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub url: String,
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl BackendTarget {
    /// Parses an `http://host[:port]` or `https://host[:port]` URL. A missing
    /// port defaults to 80 or 443 based on the scheme.
    pub fn parse(raw: &str) -> Result<Self, BackendParseError> {
        let parsed = Url::parse(raw).map_err(|source| BackendParseError::Malformed {
            url: raw.to_string(),
            source,
        })?;

        let secure = match parsed.scheme() {
            "http" => false,
            "https" => true,
            _ => return Err(BackendParseError::UnsupportedScheme(raw.to_string())),
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| BackendParseError::MissingHost(raw.to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(if secure { 443 } else { 80 });

        Ok(Self {
            url: raw.to_string(),
            host,
            port,
            secure,
        })
    }

    /// Base endpoint used to build upstream request URLs.
    pub fn endpoint(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}
