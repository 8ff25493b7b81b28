// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("could not read image file '{0}': {1}")]
    Io(String, #[source] std::io::Error),

    #[error("'{0}' is not a regular file")]
    NotAFile(String),

    #[error("image '{0}' is {1} bytes; the limit is {2} bytes")]
    TooLarge(String, u64, u64),

    #[error("unsupported image format for '{0}' (expected png, jpeg, webp, or gif)")]
    UnsupportedFormat(String),

    #[error("invalid data URL: '{0}'")]
    InvalidDataUrl(String),

    #[error("base64 decode error: {0}")]
    Base64(String),
}
