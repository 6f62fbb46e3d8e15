//! Response classification
//!
//! | Condition | Classification |
//! |-----------|----------------|
//! | No response (transport failure) | `TransportError` |
//! | HTTP 403 | `Blocked` |
//! | Body contains the challenge-redirect marker | `Blocked` |
//! | HTTP 429 | `Blocked` |
//! | Any other status than 200 | `SoftInvalid` |
//! | Body contains `captcha` / `blocked` (any case) | `SoftInvalid` |
//! | Otherwise | `Success` |

use crate::crawler::fetcher::FetchResponse;
use aho_corasick::{AhoCorasick, BuildError};
use std::fmt;

/// Marker of the challenge page a blocked client is redirected to
pub const BLOCK_PAGE_MARKER: &str = "geo.captcha-delivery.com";

const SOFT_MARKERS: [&str; 2] = ["captcha", "blocked"];

/// Outcome of one fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Page fetched and usable
    Success,

    /// Unexpected status or content marker; the path is consumed
    SoftInvalid,

    /// Hard block; terminal for the identity that observed it
    Blocked,

    /// No response at all; the path is put back on the frontier
    TransportError,
}

impl Classification {
    /// True when the identity must stop issuing requests
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Blocked)
    }

    /// True for the two recoverable failure kinds counted as errors
    pub fn is_error(&self) -> bool {
        matches!(self, Self::SoftInvalid | Self::TransportError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SoftInvalid => "soft_invalid",
            Self::Blocked => "blocked",
            Self::TransportError => "transport_error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Labels responses as success, soft-invalid or blocked
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    soft_markers: AhoCorasick,
}

impl ResponseClassifier {
    pub fn new() -> Result<Self, BuildError> {
        let soft_markers = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(SOFT_MARKERS)?;

        Ok(Self { soft_markers })
    }

    /// Classifies a fetch outcome; `None` means the transport raised
    pub fn classify(&self, response: Option<&FetchResponse>) -> Classification {
        let Some(response) = response else {
            return Classification::TransportError;
        };

        if response.status == 403 || response.body.contains(BLOCK_PAGE_MARKER) {
            return Classification::Blocked;
        }

        if response.status == 429 {
            return Classification::Blocked;
        }

        if response.status != 200 {
            return Classification::SoftInvalid;
        }

        if self.soft_markers.is_match(&response.body) {
            return Classification::SoftInvalid;
        }

        Classification::Success
    }
}
