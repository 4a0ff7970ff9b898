//! Upload filename handling.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::errors::{Error, Result};

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("valid regex"));

/// Families of documents accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PowerPoint,
    Word,
    Pdf,
}

impl DocumentKind {
    const SUPPORTED: [(&'static str, DocumentKind); 5] = [
        ("ppt", DocumentKind::PowerPoint),
        ("pptx", DocumentKind::PowerPoint),
        ("doc", DocumentKind::Word),
        ("docx", DocumentKind::Word),
        ("pdf", DocumentKind::Pdf),
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::PowerPoint => "PowerPoint",
            DocumentKind::Word => "Word",
            DocumentKind::Pdf => "PDF",
        }
    }

    /// Classify an upload by its extension.
    pub fn from_filename(filename: &str) -> Result<(Self, String)> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        Self::SUPPORTED
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(ext, kind)| (*kind, ext.to_string()))
            .ok_or_else(|| Error::BadRequest {
                message: format!("Unsupported file type. Supported types are: {}", Self::supported_description()),
            })
    }

    /// e.g. `.ppt (PowerPoint), .pptx (PowerPoint), ...`
    pub fn supported_description() -> String {
        Self::SUPPORTED
            .iter()
            .map(|(ext, kind)| format!(".{ext} ({})", kind.label()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Make an uploaded filename safe to use on disk and in URLs.
///
/// The stem keeps only ASCII letters and digits, with every other run of characters collapsed to
/// a single `_` and no leading or trailing `_`. The extension is lowercased. Browsers that
/// append the extension twice (`deck.pptx.pptx`) get it collapsed.
pub fn sanitize_filename(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() => (stem, Some(ext.to_ascii_lowercase())),
        _ => (name, None),
    };

    let stem = match &extension {
        Some(ext) => {
            let doubled = format!(".{ext}");
            if stem.to_ascii_lowercase().ends_with(&doubled) {
                &stem[..stem.len() - doubled.len()]
            } else {
                stem
            }
        }
        None => stem,
    };

    let mut clean = NON_ALPHANUMERIC.replace_all(stem, "_").trim_matches('_').to_string();
    if clean.is_empty() {
        clean = "document".to_string();
    }

    match extension {
        Some(ext) => format!("{clean}.{ext}"),
        None => clean,
    }
}
