// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Document analysis seam.
//!
//! The AI audit itself is an external collaborator; the core hands it
//! decrypted bytes and stores nothing it returns beyond the audit trail.

use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DocumentAnalysis {
    /// Format detected from the file signature, if recognised.
    pub detected_format: Option<String>,
    /// Whether the detected format agrees with the declared content type.
    pub content_type_matches: bool,
    pub findings: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("document analysis failed: {0}")]
pub struct AnalyzerError(pub String);

#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        content_type: &str,
        plaintext: &[u8],
    ) -> Result<DocumentAnalysis, AnalyzerError>;
}

/// Identify an image format from its leading bytes.
pub fn sniff_format(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        let brand = &bytes[8..12];
        if matches!(brand, b"heic" | b"heix" | b"mif1" | b"msf1" | b"hevc") {
            return Some("image/heic");
        }
    }
    None
}

/// Structural checks only: signature sniffing against the declared type.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormatAnalyzer;

#[async_trait]
impl DocumentAnalyzer for FormatAnalyzer {
    async fn analyze(
        &self,
        content_type: &str,
        plaintext: &[u8],
    ) -> Result<DocumentAnalysis, AnalyzerError> {
        let detected = sniff_format(plaintext);
        let matches = detected == Some(content_type);

        let mut findings = Vec::new();
        match detected {
            None => findings.push("unrecognised file signature".to_string()),
            Some(format) if !matches => {
                findings.push(format!("declared {content_type} but file is {format}"))
            }
            Some(_) => {}
        }

        Ok(DocumentAnalysis {
            detected_format: detected.map(str::to_string),
            content_type_matches: matches,
            findings,
        })
    }
}
