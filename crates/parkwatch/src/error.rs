// Copyright 2026 Parkwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for a sampling run.

use std::path::PathBuf;
use std::time::Duration;

/// Process exit codes reported by the binary.
pub mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const OTHER: u8 = 1;
    pub const USAGE: u8 = 2;
    pub const EXTRACTION: u8 = 3;
    pub const IO: u8 = 4;
    pub const NETWORK: u8 = 5;
}

/// Which retry bucket a failure falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connection, timeout or non-2xx status.
    Network,
    /// The remote answered with something that is not the data feed.
    NonData,
    /// Content arrived but no value could be derived from it.
    Extraction,
    Other,
}

/// All errors that can occur while acquiring, extracting or persisting a sample.
#[derive(thiserror::Error, Debug)]
pub enum ScrapeError {
    #[error("network error: {message}")]
    Network {
        message: String,
        /// HTTP status when the server answered at all.
        status: Option<u16>,
    },

    #[error("non-data response: {0}")]
    NonDataResponse(String),

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("timed out after {waited:?} waiting for store lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl ScrapeError {
    pub fn network(message: impl Into<String>) -> Self {
        ScrapeError::Network {
            message: message.into(),
            status: None,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            ScrapeError::Network { .. } => FailureClass::Network,
            ScrapeError::NonDataResponse(_) => FailureClass::NonData,
            ScrapeError::TargetNotFound(_) | ScrapeError::ExtractionFailed(_) => {
                FailureClass::Extraction
            }
            _ => FailureClass::Other,
        }
    }

    /// HTTP 429 and 503 ask the client to slow down.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            ScrapeError::Network {
                status: Some(429 | 503),
                ..
            }
        )
    }

    pub fn exit_code(&self) -> u8 {
        use exit_codes::*;
        match self {
            ScrapeError::Network { .. } | ScrapeError::NonDataResponse(_) => NETWORK,
            ScrapeError::TargetNotFound(_) | ScrapeError::ExtractionFailed(_) => EXTRACTION,
            ScrapeError::LockTimeout { .. } | ScrapeError::Io(_) | ScrapeError::Csv(_) => IO,
            ScrapeError::Config(_) => USAGE,
            ScrapeError::Browser(_) => OTHER,
        }
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        ScrapeError::Network {
            message: e.to_string(),
            status: e.status().map(|s| s.as_u16()),
        }
    }
}

pub type ScrapeResult<T> = Result<T, ScrapeError>;
