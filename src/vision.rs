// src/vision.rs

use crate::BoxError;
use crate::config::{VisionBackend, VisionSection};
use crate::payslip::totals::{TotalKind, classify_label};
use crate::payslip::{
    AmountError, Category, LineItem, MAX_AMOUNT, ParseResult, ParserConfig, Totals, assemble,
    check_range, resolve_amount,
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const TRANSCRIBE_PROMPT: &str = r#"You are reading a scanned Japanese payslip (給与明細書 or 賞与明細書).
Transcribe every piece of text on it, line by line, top to bottom.

Rules:
- Keep each item name next to its amount on the same line, e.g. "基本給 250,000".
- Keep section headings (支給項目, 控除項目, 勤怠項目) on their own line.
- Copy numbers exactly as printed, including commas, minus signs and parentheses.
- Do not translate, summarize or add anything. Return only the transcription."#;

const STRUCTURED_PROMPT: &str = r#"You are an expert payslip parser.
Extract the following from the payslip image and return ONLY valid JSON:
- gross: the gross amount (支給合計 or 総支給額)
- deduction: the total deduction (控除合計)
- net: the net amount (差引支給額 or 手取額)
- items: every line of 支給項目 and 控除項目

The JSON must match this schema exactly:
{
  "gross": integer or null,
  "deduction": integer or null,
  "net": integer or null,
  "items": [
    { "name": "string", "amount": integer, "category": "支給" | "控除" }
  ]
}

Use null for totals you cannot read. Return ONLY the JSON object, no markdown fences, no commentary."#;

/// An image handed to the vision model.
#[derive(Debug, Clone)]
pub struct Image {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl Image {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

/// What a model read off one page: the items it listed and the totals it
/// stated. Nothing is categorized or derived yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredExtraction {
    pub items: Vec<LineItem>,
    pub totals: Totals,
    pub raw_text: String,
}

impl StructuredExtraction {
    /// Append a later page. Items accumulate; a total stated by an earlier
    /// page is kept over a later one.
    pub fn merge(&mut self, page: StructuredExtraction) {
        let stated = [
            (TotalKind::Gross, page.totals.gross),
            (TotalKind::Deduction, page.totals.deduction),
            (TotalKind::Net, page.totals.net),
        ];
        for (kind, value) in stated {
            if let Some(value) = value {
                self.totals.assign(kind, value);
            }
        }
        self.items.extend(page.items);
        if !self.raw_text.is_empty() && !page.raw_text.is_empty() {
            self.raw_text.push('\n');
        }
        self.raw_text.push_str(&page.raw_text);
    }

    /// Categorize, derive the missing totals and check consistency.
    pub fn assemble(self, config: &ParserConfig) -> ParseResult {
        assemble(self.items, BTreeMap::new(), self.totals, &self.raw_text, config)
    }
}

/// Turns payslip images into text or structured results.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Line-by-line transcription, ready for the line parser.
    async fn transcribe(&self, image: &Image) -> Result<String, BoxError>;

    /// Direct name/amount/category extraction of one page.
    async fn extract_structured(&self, image: &Image) -> Result<StructuredExtraction, BoxError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Resolved endpoint configuration ready to make API calls.
#[derive(Debug)]
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

/// Resolve the vision config section into a concrete endpoint.
fn resolve_endpoint(vision: &VisionSection) -> Result<ResolvedEndpoint, BoxError> {
    match vision.backend {
        VisionBackend::Ollama => {
            info!(
                url = %vision.ollama.base_url,
                model = %vision.ollama.model,
                "Using Ollama (local) vision backend"
            );
            Ok(ResolvedEndpoint {
                base_url: vision.ollama.base_url.trim_end_matches('/').to_string(),
                model: vision.ollama.model.clone(),
                api_key: "ollama".to_string(), // required by API but ignored
                timeout: Duration::from_secs(vision.ollama.timeout_secs),
            })
        }
        VisionBackend::Remote => {
            let api_key = std::env::var("VISION_API_KEY")
                .map_err(|_| "VISION_API_KEY env var required for remote backend")?;
            info!(
                url = %vision.remote.base_url,
                model = %vision.remote.model,
                "Using remote vision backend"
            );
            Ok(ResolvedEndpoint {
                base_url: vision.remote.base_url.trim_end_matches('/').to_string(),
                model: vision.remote.model.clone(),
                api_key,
                timeout: Duration::from_secs(vision.remote.timeout_secs),
            })
        }
        VisionBackend::None => {
            Err("Vision is disabled (backend = \"none\"); images cannot be read".into())
        }
    }
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) => {
            if resp.status().is_success() {
                info!("Ollama server is reachable");
                true
            } else {
                warn!(status = %resp.status(), "Ollama server returned non-OK status");
                false
            }
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// OpenAI-compatible chat client for a vision-language model.
pub struct VisionClient {
    client: Client,
    endpoint: ResolvedEndpoint,
}

impl VisionClient {
    /// Resolve the configured backend and, for Ollama, make sure the server
    /// is up before any image is sent.
    pub async fn connect(vision: &VisionSection) -> Result<Self, BoxError> {
        let endpoint = resolve_endpoint(vision)?;
        let client = Client::builder().timeout(endpoint.timeout).build()?;

        if vision.backend == VisionBackend::Ollama
            && !check_ollama_health(&client, &endpoint.base_url).await
        {
            return Err(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                endpoint.base_url
            )
            .into());
        }

        Ok(Self { client, endpoint })
    }

    async fn chat(&self, prompt: &str, image: &Image) -> Result<String, BoxError> {
        let request = build_request(&self.endpoint.model, prompt, image);
        let url = format!("{}/chat/completions", self.endpoint.base_url);
        debug!(url = %url, bytes = image.bytes.len(), mime = image.mime, "Sending image");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Vision API error {status}: {body}").into());
        }

        let chat_response: ChatResponse = response.json().await?;
        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or("Empty response from vision model")?;
        Ok(content)
    }
}

#[async_trait]
impl TextRecognizer for VisionClient {
    async fn transcribe(&self, image: &Image) -> Result<String, BoxError> {
        let text = self.chat(TRANSCRIBE_PROMPT, image).await?;
        info!(chars = text.chars().count(), "Image transcribed");
        Ok(strip_fences(&text).to_string())
    }

    async fn extract_structured(&self, image: &Image) -> Result<StructuredExtraction, BoxError> {
        let content = self.chat(STRUCTURED_PROMPT, image).await?;
        let json_str = extract_json_object(strip_fences(&content))?;
        let structured: StructuredPayslip = serde_json::from_str(json_str).map_err(|e| {
            format!("Failed to parse vision response as payslip JSON: {e}\nRaw: {json_str}")
        })?;
        info!(items = structured.items.len(), "Structured extraction result");
        Ok(structured.into_extraction(json_str))
    }
}

fn build_request(model: &str, prompt: &str, image: &Image) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: vec![
                ContentPart::Text {
                    text: prompt.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image.data_url(),
                    },
                },
            ],
        }],
        temperature: 0.0,
    }
}

/// Strip markdown fences if the model added them despite instructions
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text (e.g. reasoning tokens).
fn extract_json_object(s: &str) -> Result<&str, BoxError> {
    let start = s.find('{').ok_or("No '{' found in vision response")?;
    let end = s.rfind('}').ok_or("No '}' found in vision response")?;
    if end <= start {
        return Err("Malformed JSON in vision response".into());
    }
    Ok(&s[start..=end])
}

/// Models answer with numbers, numeric strings ("250,000") or floats.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl RawAmount {
    /// Same range as amounts read from text.
    fn resolve(&self) -> Result<i64, AmountError> {
        match self {
            RawAmount::Integer(n) => check_range(*n),
            RawAmount::Float(f) if f.is_nan() => Err(AmountError::InvalidAmount(f.to_string())),
            RawAmount::Float(f) if f.abs().round() > MAX_AMOUNT as f64 => {
                Err(AmountError::Overflow(f.to_string()))
            }
            RawAmount::Float(f) => Ok(f.round() as i64),
            RawAmount::Text(s) => resolve_amount(s),
        }
    }

    fn resolve_total(raw: Option<&RawAmount>) -> Option<i64> {
        match raw?.resolve() {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(error = %e, "Unreadable total in structured result");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StructuredItem {
    name: String,
    amount: RawAmount,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StructuredPayslip {
    #[serde(default)]
    gross: Option<RawAmount>,
    #[serde(default)]
    deduction: Option<RawAmount>,
    #[serde(default)]
    net: Option<RawAmount>,
    #[serde(default)]
    items: Vec<StructuredItem>,
}

impl StructuredPayslip {
    /// Total lines the model listed as items are folded into the totals
    /// (explicit totals win) rather than kept as items.
    fn into_extraction(self, raw_text: &str) -> StructuredExtraction {
        let mut totals = Totals {
            gross: RawAmount::resolve_total(self.gross.as_ref()),
            deduction: RawAmount::resolve_total(self.deduction.as_ref()),
            net: RawAmount::resolve_total(self.net.as_ref()),
        };

        let mut items = Vec::with_capacity(self.items.len());
        for item in self.items {
            let amount = match item.amount.resolve() {
                Ok(amount) => amount,
                Err(e) => {
                    debug!(name = %item.name, error = %e, "Unreadable amount in structured item");
                    continue;
                }
            };
            let name = item.name.trim().to_string();
            if let Some(kind) = classify_label(&name) {
                totals.assign(kind, amount);
                continue;
            }
            let category = item
                .category
                .as_deref()
                .and_then(|c| c.parse::<Category>().ok())
                .unwrap_or(Category::Unknown);
            items.push(LineItem {
                name,
                amount,
                category,
                section: None,
            });
        }

        StructuredExtraction {
            items,
            totals,
            raw_text: raw_text.to_string(),
        }
    }
}
