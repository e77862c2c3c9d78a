// File: errors.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::fmt;

#[derive(Debug)]
pub enum ScanError {
    InvalidConfig(String),
    InvalidUrl(url::ParseError),
    Client(reqwest::Error),
    Serialization(serde_json::Error),
    Io(std::io::Error),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "Invalid scan configuration: {}", msg),
            Self::InvalidUrl(e) => write!(f, "Invalid target URL: {}", e),
            Self::Client(e) => write!(f, "HTTP client error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidConfig(_) => None,
            Self::InvalidUrl(e) => Some(e),
            Self::Client(e) => Some(e),
            Self::Serialization(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<url::ParseError> for ScanError {
    fn from(error: url::ParseError) -> Self {
        Self::InvalidUrl(error)
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(error: reqwest::Error) -> Self {
        Self::Client(error)
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error)
    }
}

impl From<std::io::Error> for ScanError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
