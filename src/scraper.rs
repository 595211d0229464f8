use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
/// Page text sent to the model is cut at this many characters.
const MAX_PAGE_CHARS: usize = 120_000;

pub const DEFAULT_INSTRUCTIONS: &str = r#"Extract all job listings.
For each job listing, collect:
1. Job title
2. Job ID
3. Location
4. Date posted
5. Job category/department
6. Job description (if available on the listing page)
7. Job URL

IMPORTANT: For any field that is not available or cannot be found, explicitly include the field with a value of "N/A" rather than omitting it. Every job listing should have all seven fields listed above, even if some contain "N/A" values.

If there are multiple pages of results, only take the first 5 jobs.

Return the data as a structured list of job objects."#;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("{0} environment variable must be set")]
    MissingCredential(&'static str),

    #[error("Spider scrape failed: {0}")]
    Spider(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM request failed with status {status}: {body}")]
    Llm { status: u16, body: String },

    #[error("No content in {0} response")]
    EmptyContent(&'static str),
}

#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub url: String,
    pub instructions: String,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

/// Anything that can turn a page plus instructions into an untyped payload.
#[async_trait]
pub trait ScrapeEngine {
    async fn scrape(&self, request: &ScrapeRequest) -> Result<Value, ScrapeError>;
}

/// Fetches the page as markdown through spider.cloud, then asks a Gemini
/// model to pull the listings out. The payload is `{"content": <model text>}`.
pub struct SmartScraper {
    spider: Spider,
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl SmartScraper {
    pub fn new(settings: &Settings) -> Result<Self, ScrapeError> {
        let spider_key = settings
            .spider_api_key
            .clone()
            .ok_or(ScrapeError::MissingCredential("SPIDER_API_KEY"))?;
        let api_key = settings
            .google_api_key
            .clone()
            .ok_or(ScrapeError::MissingCredential("GOOGLE_API_KEY"))?;
        let spider = Spider::new(Some(spider_key))
            .map_err(|e| ScrapeError::Spider(format!("Failed to create Spider client: {}", e)))?;

        let model = model_id(&settings.llm_model).to_string();
        info!(model = %model, headless = settings.headless, "scraper ready");

        Ok(Self {
            spider,
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }

    async fn fetch_markdown(&self, url: &str) -> Result<String, ScrapeError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Markdown)),
            ..Default::default()
        };

        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| ScrapeError::Spider(e.to_string()))?;

        page_content(response).ok_or(ScrapeError::EmptyContent("spider"))
    }

    async fn complete(&self, prompt: String) -> Result<String, ScrapeError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part { text: Some(prompt) }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let url = format!("{}/{}:generateContent", GEMINI_API_URL, self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(ScrapeError::Llm { status: status.as_u16(), body });
        }

        let body: GenerateResponse = response.json().await?;
        body.text().ok_or(ScrapeError::EmptyContent("LLM"))
    }
}

#[async_trait]
impl ScrapeEngine for SmartScraper {
    async fn scrape(&self, request: &ScrapeRequest) -> Result<Value, ScrapeError> {
        info!(url = %request.url, "fetching page");
        let markdown = self.fetch_markdown(&request.url).await?;
        debug!(chars = markdown.chars().count(), "page fetched");

        let prompt = build_prompt(request, &markdown);
        info!(model = %self.model, "asking model for listings");
        let text = self.complete(prompt).await?;
        debug!(chars = text.len(), "model answered");

        Ok(json!({ "content": strip_fence(&text) }))
    }
}

// ── Gemini generateContent request/response types ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    /// Text parts of the first candidate, joined.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

// ── Helpers ──

fn build_prompt(request: &ScrapeRequest, markdown: &str) -> String {
    let (page, cut) = clip_page(markdown, MAX_PAGE_CHARS);
    if cut {
        warn!(
            url = %request.url,
            kept = MAX_PAGE_CHARS,
            total = markdown.chars().count(),
            "page too long, listings past the cut are not sent to the model"
        );
    }
    format!(
        "{}\n\nRespond with JSON only.\n\nSource URL: {}\n\nPage content (markdown):\n{}",
        request.instructions, request.url, page
    )
}

/// First `max` characters of `markdown`, and whether anything was dropped.
fn clip_page(markdown: &str, max: usize) -> (String, bool) {
    let mut chars = markdown.chars();
    let page: String = chars.by_ref().take(max).collect();
    (page, chars.next().is_some())
}

/// `google_genai/gemini-2.0-flash` → `gemini-2.0-flash`
fn model_id(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

/// spider.cloud answers with an array of pages, sometimes encoded as a string.
fn page_content(response: Value) -> Option<String> {
    let parsed: Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };

    parsed
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .map(strip_images)
        .filter(|md| !md.trim().is_empty())
}

/// Remove markdown image syntax: ![alt](url) and [![alt](url)](link)
fn strip_images(md: &str) -> String {
    let re = Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap();
    let cleaned = re.replace_all(md, "");
    let blanks = Regex::new(r"\n{3,}").unwrap();
    blanks.replace_all(&cleaned, "\n\n").to_string()
}

/// Drop a ```json ... ``` fence around model output, if there is one.
fn strip_fence(text: &str) -> String {
    let re = Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*\n(.*?)\n?\s*```\s*$").unwrap();
    match re.captures(text) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_prefix_is_dropped() {
        assert_eq!(model_id("google_genai/gemini-2.0-flash"), "gemini-2.0-flash");
        assert_eq!(model_id("gemini-1.5-pro"), "gemini-1.5-pro");
    }

    #[test]
    fn fence_is_stripped() {
        assert_eq!(strip_fence("```json\n[{\"title\": \"A\"}]\n```"), r#"[{"title": "A"}]"#);
        assert_eq!(strip_fence("  ```\n{}\n```  "), "{}");
        assert_eq!(strip_fence(" [1, 2] \n"), "[1, 2]");
    }

    #[test]
    fn images_removed_and_blank_runs_collapsed() {
        let md = "# Careers\n![logo](https://x/logo.png)\n\n\n\nOpen roles";
        assert_eq!(strip_images(md), "# Careers\n\nOpen roles");
    }

    #[test]
    fn page_content_from_array_or_string() {
        let arr = json!([{"content": "hello ![i](u) world", "status": 200}]);
        assert_eq!(page_content(arr).as_deref(), Some("hello  world"));

        let encoded = Value::String(r#"[{"content": "from string"}]"#.to_string());
        assert_eq!(page_content(encoded).as_deref(), Some("from string"));

        assert_eq!(page_content(json!([{"status": 500}])), None);
        assert_eq!(page_content(json!([{"content": "  "}])), None);
    }

    #[test]
    fn response_text_joins_parts() {
        let body: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "[{\"title\":"}, {"text": "\"A\"}]"}]}}]
        }))
        .unwrap();
        assert_eq!(body.text().as_deref(), Some(r#"[{"title":"A"}]"#));

        let empty: GenerateResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(empty.text().is_none());
    }

    #[test]
    fn request_serializes_camel_case() {
        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part { text: Some("hi".into()) }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".into(),
            },
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(v["contents"][0]["parts"][0]["text"], "hi");
    }

    #[test]
    fn long_pages_are_clipped() {
        assert_eq!(clip_page("abcdef", 4), ("abcd".to_string(), true));
        assert_eq!(clip_page("abcd", 4), ("abcd".to_string(), false));
        assert_eq!(clip_page("äöü", 10), ("äöü".to_string(), false));

        let request = ScrapeRequest::new("https://example.com/jobs");
        let page = "x".repeat(MAX_PAGE_CHARS + 50);
        let prompt = build_prompt(&request, &page);
        assert!(prompt.ends_with(&"x".repeat(MAX_PAGE_CHARS)));
        assert!(!prompt.ends_with(&"x".repeat(MAX_PAGE_CHARS + 1)));
    }

    #[test]
    fn prompt_carries_instructions_and_url() {
        let request = ScrapeRequest::new("https://example.com/jobs");
        let prompt = build_prompt(&request, "Engineer - Remote");
        assert!(prompt.starts_with("Extract all job listings."));
        assert!(prompt.contains("Source URL: https://example.com/jobs"));
        assert!(prompt.ends_with("Engineer - Remote"));
    }

    #[test]
    fn missing_credentials_are_reported() {
        let settings = Settings::default();
        match SmartScraper::new(&settings) {
            Err(ScrapeError::MissingCredential(name)) => assert_eq!(name, "SPIDER_API_KEY"),
            _ => panic!("expected missing credential"),
        }

        let settings = Settings {
            spider_api_key: Some("sk".into()),
            ..Settings::default()
        };
        match SmartScraper::new(&settings) {
            Err(ScrapeError::MissingCredential(name)) => assert_eq!(name, "GOOGLE_API_KEY"),
            _ => panic!("expected missing credential"),
        }
    }
}
