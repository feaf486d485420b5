//! Extension compatibility table
//!
//! Maps each convertible source extension to the target extensions the
//! headless converter can produce from it. Keys are lower-case and every
//! lookup normalises its argument first, so `Report.DOCX` and `report.docx`
//! resolve to the same entry.
//!
//! | Source | Targets |
//! |--------|---------|
//! | Presentations (pptx, ppt, pps, ppsx, odp) | pdf |
//! | Word processing (docx, doc, dotx, dot, docm, dotm, wps) | pdf, odt, html |
//! | OpenDocument text (odt) | pdf, html, docx |
//! | Rich text (rtf) | pdf, docx, txt |
//! | Plain text (txt) | pdf, odt, doc, docx, html |
//! | Web pages (html, htm) | pdf, odt, docx |
//! | Spreadsheets (xlsx, xls, ods, csv) | pdf |
//! | Images (png, jpg, jpeg, jfif, gif, bmp) | pdf |
//! | PDF | pdf |

use once_cell::sync::Lazy;
use std::collections::HashMap;

const PDF_ONLY: &[&str] = &["pdf"];
const WORD_TARGETS: &[&str] = &["pdf", "odt", "html"];

static COMPATIBILITY: &[(&str, &[&str])] = &[
    // Presentations
    ("pptx", PDF_ONLY),
    ("ppt", PDF_ONLY),
    ("pps", PDF_ONLY),
    ("ppsx", PDF_ONLY),
    ("odp", PDF_ONLY),
    // PDF re-export (repairs, PDF/A via filters)
    ("pdf", PDF_ONLY),
    // Word processing
    ("docx", WORD_TARGETS),
    ("doc", WORD_TARGETS),
    ("dotx", WORD_TARGETS),
    ("dot", WORD_TARGETS),
    ("docm", WORD_TARGETS),
    ("dotm", WORD_TARGETS),
    ("wps", WORD_TARGETS),
    ("odt", &["pdf", "html", "docx"]),
    ("rtf", &["pdf", "docx", "txt"]),
    ("txt", &["pdf", "odt", "doc", "docx", "html"]),
    ("html", &["pdf", "odt", "docx"]),
    ("htm", &["pdf", "odt", "docx"]),
    // Spreadsheets
    ("xlsx", PDF_ONLY),
    ("xls", PDF_ONLY),
    ("ods", PDF_ONLY),
    ("csv", PDF_ONLY),
    // Images
    ("png", PDF_ONLY),
    ("jpg", PDF_ONLY),
    ("jpeg", PDF_ONLY),
    ("jfif", PDF_ONLY),
    ("gif", PDF_ONLY),
    ("bmp", PDF_ONLY),
];

static TABLE: Lazy<HashMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| COMPATIBILITY.iter().copied().collect());

/// Normalise an extension for table lookups: strip a leading dot, lower-case.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}

/// Whether the converter accepts files with this extension as input
pub fn is_supported_input(ext: &str) -> bool {
    TABLE.contains_key(normalize_extension(ext).as_str())
}

/// Target extensions reachable from `ext`, empty for unknown inputs
pub fn allowed_outputs(ext: &str) -> &'static [&'static str] {
    TABLE
        .get(normalize_extension(ext).as_str())
        .copied()
        .unwrap_or(&[])
}

/// Whether a `from` document can be converted to `to`
pub fn can_convert(from: &str, to: &str) -> bool {
    let to = normalize_extension(to);
    allowed_outputs(from).iter().any(|t| *t == to)
}

/// Every known source extension, in table order
pub fn supported_inputs() -> impl Iterator<Item = &'static str> {
    COMPATIBILITY.iter().map(|(ext, _)| *ext)
}
