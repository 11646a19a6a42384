// src/source.rs

use crate::BoxError;
use crate::payslip::{self, ParseResult, ParserConfig};
use crate::vision::{Image, StructuredExtraction, TextRecognizer};
use lopdf::{Dictionary, Document, Object};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Minimum number of non-whitespace characters we expect from a
/// "real" text PDF. Below this threshold we treat it as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// A file as read from disk.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, BoxError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { filename, bytes })
    }

    pub fn kind(&self) -> DocumentKind {
        detect_kind(&self.bytes, &self.filename)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image(&'static str),
    Text,
}

/// Magic bytes first, then the file extension.
pub fn detect_kind(bytes: &[u8], filename: &str) -> DocumentKind {
    if bytes.starts_with(b"%PDF") {
        return DocumentKind::Pdf;
    }
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return DocumentKind::Image("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return DocumentKind::Image("image/jpeg");
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return DocumentKind::Image("image/webp");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return DocumentKind::Image("image/gif");
    }

    let extension = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("pdf") => DocumentKind::Pdf,
        Some("png") => DocumentKind::Image("image/png"),
        Some("jpg" | "jpeg") => DocumentKind::Image("image/jpeg"),
        Some("webp") => DocumentKind::Image("image/webp"),
        Some("gif") => DocumentKind::Image("image/gif"),
        _ => DocumentKind::Text,
    }
}

/// Result of attempting to extract text from a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF contains extractable text.
    Text(String),
    /// The PDF appears to be scanned; these are its embedded page images.
    Scanned(Vec<Image>),
    /// Something went wrong during extraction.
    Error(String),
}

/// Takes raw PDF bytes and returns `PdfContent`.
pub fn extract_pdf(pdf_bytes: &[u8]) -> PdfContent {
    // Phase 1: structural check with lopdf
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return PdfContent::Scanned(embedded_images(&doc));
    }

    // Phase 2: attempt full text extraction
    match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => {
            let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
            if meaningful < MIN_TEXT_CHARS {
                info!(chars = meaningful, "Extracted text too short, treating as scanned");
                PdfContent::Scanned(embedded_images(&doc))
            } else {
                info!(chars = meaningful, "Text extracted successfully");
                PdfContent::Text(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "pdf-extract failed, may be scanned or corrupted");
            PdfContent::Scanned(embedded_images(&doc))
        }
    }
}

/// A page resource sub-dictionary such as `Font` or `XObject`.
fn page_resource<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    page.get(b"Resources")
        .ok()
        .and_then(|r| doc.dereference(r).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .and_then(|res| res.get(key).ok())
        .and_then(|x| doc.dereference(x).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
}

fn page_dicts(doc: &Document) -> impl Iterator<Item = &Dictionary> {
    doc.get_pages()
        .into_values()
        .filter_map(|id| doc.get_object(id).ok())
        .filter_map(|obj| obj.as_dict().ok())
}

/// A page with image XObjects but no fonts is a scanned page. The document
/// counts as scanned when at least 80% of its pages are.
fn looks_like_scanned(doc: &Document) -> bool {
    let total = doc.get_pages().len();
    if total == 0 {
        return false; // Can't tell; let text extraction try
    }

    let image_only_pages = page_dicts(doc)
        .filter(|page| {
            let has_fonts = page_resource(doc, page, b"Font").is_some_and(|f| !f.is_empty());
            let has_images = page_resource(doc, page, b"XObject").is_some_and(|x| !x.is_empty());
            has_images && !has_fonts
        })
        .count();

    let ratio = image_only_pages as f64 / total as f64;
    info!(
        total_pages = total,
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );
    ratio >= 0.8
}

fn is_dct_image(dict: &Dictionary) -> bool {
    let is_image = dict
        .get(b"Subtype")
        .and_then(Object::as_name)
        .is_ok_and(|name| name == b"Image");
    let is_dct = match dict.get(b"Filter") {
        Ok(Object::Name(name)) => name == b"DCTDecode",
        Ok(Object::Array(filters)) => {
            filters.len() == 1 && filters[0].as_name().is_ok_and(|n| n == b"DCTDecode")
        }
        _ => false,
    };
    is_image && is_dct
}

/// JPEG page images (DCTDecode XObjects) in page order. Their stream
/// content is a complete JPEG file.
fn embedded_images(doc: &Document) -> Vec<Image> {
    let images: Vec<Image> = page_dicts(doc)
        .filter_map(|page| page_resource(doc, page, b"XObject"))
        .flat_map(|xobjects| xobjects.iter())
        .filter_map(|(_, obj)| doc.dereference(obj).ok())
        .filter_map(|(_, resolved)| resolved.as_stream().ok())
        .filter(|stream| is_dct_image(&stream.dict))
        .map(|stream| Image {
            bytes: stream.content.clone(),
            mime: "image/jpeg",
        })
        .collect();
    debug!(count = images.len(), "Embedded JPEG images");
    images
}

/// How a document's text is turned into a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// The line-oriented heuristic parser.
    #[default]
    Lines,
    /// Only the three totals; fails if any is missing.
    Totals,
    /// Ask the vision model for items directly. Text inputs fall back to `Lines`.
    Structured,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lines" => Ok(Mode::Lines),
            "totals" => Ok(Mode::Totals),
            "structured" => Ok(Mode::Structured),
            other => Err(format!("unknown mode: {other} (expected lines, totals or structured)")),
        }
    }
}

/// What a document holds once read: text for the parser, or images for
/// the vision model.
#[derive(Debug)]
pub enum Content {
    Text(String),
    Images(Vec<Image>),
}

impl Content {
    pub fn needs_vision(&self) -> bool {
        matches!(self, Content::Images(_))
    }
}

pub fn read_content(doc: &SourceDocument) -> Result<Content, BoxError> {
    match doc.kind() {
        DocumentKind::Text => Ok(Content::Text(
            String::from_utf8_lossy(&doc.bytes).into_owned(),
        )),
        DocumentKind::Image(mime) => Ok(Content::Images(vec![Image {
            bytes: doc.bytes.clone(),
            mime,
        }])),
        DocumentKind::Pdf => match extract_pdf(&doc.bytes) {
            PdfContent::Text(text) => Ok(Content::Text(text)),
            PdfContent::Scanned(images) if images.is_empty() => Err(format!(
                "{} looks scanned but has no embedded JPEG pages",
                doc.filename
            )
            .into()),
            PdfContent::Scanned(images) => Ok(Content::Images(images)),
            PdfContent::Error(e) => Err(e.into()),
        },
    }
}

fn parse_text(text: &str, mode: Mode, config: &ParserConfig) -> Result<ParseResult, BoxError> {
    match mode {
        Mode::Totals => Ok(payslip::parse_totals_only(text)?),
        Mode::Lines | Mode::Structured => Ok(payslip::parse_payslip(text, config)),
    }
}

/// Run the chosen mode over the content. Images need a recognizer.
pub async fn parse_content(
    content: &Content,
    mode: Mode,
    recognizer: Option<&dyn TextRecognizer>,
    config: &ParserConfig,
) -> Result<ParseResult, BoxError> {
    let images = match content {
        Content::Text(text) => return parse_text(text, mode, config),
        Content::Images(images) => images,
    };
    let recognizer = recognizer.ok_or("Vision is disabled; cannot read image input")?;

    if mode == Mode::Structured {
        // Pages are merged before any total is derived, so a total stated
        // on a later page is never shadowed by one computed from an earlier page.
        let mut merged = StructuredExtraction::default();
        for (page, image) in images.iter().enumerate() {
            debug!(page, "Structured extraction");
            merged.merge(recognizer.extract_structured(image).await?);
        }
        return Ok(merged.assemble(config));
    }

    let mut text = String::new();
    for (page, image) in images.iter().enumerate() {
        debug!(page, "Transcribing");
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&recognizer.transcribe(image).await?);
    }
    parse_text(&text, mode, config)
}
