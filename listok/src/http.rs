//! Gemini `generateContent` client.
//!
//! One client backs all four generation collaborators:
//! - categories (text model, JSON schema `{category}`)
//! - item icons (image model, 1:1 inline image returned as a data URI)
//! - spending insight (text model, free text)
//! - weekly summaries (text model, JSON array schema)
//!
//! Requests that hit 429 are retried with exponential backoff.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use log::{debug, warn};
use lru::LruCache;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{ConfigError, GeminiConfig};
use crate::elapsed_ms;
use crate::enrichment::{Categorizer, IconGenerator};
use crate::error::{ListokError, Result};
use crate::history::normalize_product_name;
use crate::insights::{SpendingSummarizer, WeeklySummarizer};
use crate::types::{FALLBACK_CATEGORY, TripDigest, WeekBucket, WeeklySummary};

const MAX_RETRIES: u32 = 3;
const ICON_CACHE_SIZE: NonZeroUsize = NonZeroUsize::new(64).unwrap();
const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Text shown when the insight request returns no text.
pub const EMPTY_INSIGHT_TEXT: &str = "Keep tracking your expenses to save more!";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn user_text(text: String) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: Some(text),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

impl GenerationConfig {
    fn json(schema: serde_json::Value) -> Self {
        Self {
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(schema),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
    }

    /// Concatenated text of the first candidate, `None` if blank.
    fn text(&self) -> Option<String> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        (!text.trim().is_empty()).then_some(text)
    }

    fn first_inline_data(&self) -> Option<&InlineData> {
        self.parts().find_map(|p| p.inline_data.as_ref())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CategoryAnswer {
    #[serde(default)]
    category: Option<String>,
}

fn api_error(status: StatusCode, body: &[u8]) -> ListokError {
    let message = serde_json::from_slice::<ApiErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    ListokError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Backoff before retry number `attempt` (1-based): 1s, 2s, 4s max.
fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(500 * (1 << attempt.min(3)))
}

/// Category label from a JSON answer. Missing or blank falls back to "Other".
fn parse_category(text: Option<&str>) -> Result<String> {
    let Some(text) = text else {
        return Ok(FALLBACK_CATEGORY.to_string());
    };
    let answer: CategoryAnswer = serde_json::from_str(text)?;
    Ok(answer
        .category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| FALLBACK_CATEGORY.to_string()))
}

/// Data URI for an inline image, after checking the payload is valid base64.
fn image_data_uri(inline: &InlineData) -> Result<String> {
    base64::engine::general_purpose::STANDARD
        .decode(inline.data.as_bytes())
        .map_err(|e| ListokError::InvalidResponse(format!("image data is not base64: {e}")))?;
    let mime = inline
        .mime_type
        .as_deref()
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_IMAGE_MIME);
    Ok(format!("data:{};base64,{}", mime, inline.data))
}

// ============================================================================
// Client
// ============================================================================

/// Gemini API client. Cheap to clone.
#[derive(Clone)]
pub struct GeminiClient {
    inner: Arc<GeminiClientInner>,
}

struct GeminiClientInner {
    client: Client,
    text_model: String,
    image_model: String,
    base_url: String,
    /// Normalized item name -> icon data URI
    icon_cache: Mutex<LruCache<String, String>>,
}

impl GeminiClient {
    /// Build a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is not a valid header value or the
    /// HTTP client cannot be built.
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let mut api_key = HeaderValue::from_str(config.api_key.expose_secret()).map_err(|_| {
            ConfigError::InvalidEnvVar(
                "GEMINI_API_KEY".to_string(),
                "contains characters not allowed in a header".to_string(),
            )
        })?;
        api_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-goog-api-key", api_key);

        let client = Client::builder()
            .default_headers(headers)
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(GeminiClientInner {
                client,
                text_model: config.text_model.clone(),
                image_model: config.image_model.clone(),
                base_url: config.base_url.trim_end_matches('/').to_string(),
                icon_cache: Mutex::new(LruCache::new(ICON_CACHE_SIZE)),
            }),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.inner.base_url, model)
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = self.endpoint(model);
        let start = Instant::now();
        let mut retries = 0;

        loop {
            let response = self.inner.client.post(&url).json(request).send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS && retries < MAX_RETRIES {
                retries += 1;
                let wait = retry_backoff(retries);
                warn!(
                    "[Gemini] 429 from {}, retry {} after {:?}",
                    model, retries, wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.bytes().await?;
            if !status.is_success() {
                return Err(api_error(status, &body));
            }

            debug!(
                "[Gemini] {} answered {} bytes ({} ms)",
                model,
                body.len(),
                elapsed_ms(start)
            );
            return Ok(serde_json::from_slice(&body)?);
        }
    }

    fn cached_icon(&self, key: &str) -> Option<String> {
        self.inner
            .icon_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn cache_icon(&self, key: String, uri: String) {
        self.inner
            .icon_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, uri);
    }

    async fn request_icon(&self, item_name: &str) -> Result<Option<String>> {
        let request = GenerateContentRequest {
            contents: vec![Content::user_text(icon_prompt(item_name))],
            generation_config: Some(GenerationConfig {
                image_config: Some(ImageConfig {
                    aspect_ratio: "1:1".to_string(),
                }),
                ..Default::default()
            }),
        };
        let response = self.generate(&self.inner.image_model, &request).await?;
        response.first_inline_data().map(image_data_uri).transpose()
    }
}

fn category_prompt(item_name: &str) -> String {
    format!(
        "Categorize this grocery item into one short, general category \
         (e.g., \"Produce\", \"Dairy\", \"Meat\", \"Snacks\", \"Household\", \
         \"Beverages\", \"Bakery\", \"Other\"). Return ONLY the category name. Item: {item_name}"
    )
}

fn icon_prompt(item_name: &str) -> String {
    format!(
        "A clean, colorful, icon-style illustration of {item_name} on a solid white \
         background. High quality, centered."
    )
}

#[async_trait]
impl Categorizer for GeminiClient {
    async fn categorize(&self, item_name: &str) -> Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content::user_text(category_prompt(item_name))],
            generation_config: Some(GenerationConfig::json(json!({
                "type": "OBJECT",
                "properties": { "category": { "type": "STRING" } }
            }))),
        };
        let response = self.generate(&self.inner.text_model, &request).await?;
        parse_category(response.text().as_deref())
    }
}

#[async_trait]
impl IconGenerator for GeminiClient {
    /// Icon failures are logged and reported as "no icon".
    async fn generate_icon(&self, item_name: &str) -> Result<Option<String>> {
        let key = normalize_product_name(item_name);
        if let Some(uri) = self.cached_icon(&key) {
            debug!("[Gemini] Icon cache hit for {:?}", key);
            return Ok(Some(uri));
        }

        match self.request_icon(item_name).await {
            Ok(Some(uri)) => {
                self.cache_icon(key, uri.clone());
                Ok(Some(uri))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("[Gemini] Icon generation failed for {:?}: {}", item_name, e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl SpendingSummarizer for GeminiClient {
    async fn summarize_spending(&self, trips: &[TripDigest]) -> Result<String> {
        let prompt = format!(
            "Analyze these recent grocery shopping trips and provide a helpful, encouraging \
             2-sentence insight about the user's spending habits or a tip to save money. Data: {}",
            serde_json::to_string(trips)?
        );
        let request = GenerateContentRequest {
            contents: vec![Content::user_text(prompt)],
            generation_config: None,
        };
        let response = self.generate(&self.inner.text_model, &request).await?;
        Ok(response
            .text()
            .unwrap_or_else(|| EMPTY_INSIGHT_TEXT.to_string()))
    }
}

#[async_trait]
impl WeeklySummarizer for GeminiClient {
    async fn summarize_weeks(&self, weeks: &[WeekBucket]) -> Result<Vec<WeeklySummary>> {
        let data: Vec<serde_json::Value> = weeks
            .iter()
            .map(|w| json!({ "week": w.label, "items": w.items }))
            .collect();
        let prompt = format!(
            "For each week below, write a one-sentence summary of what was bought. \
             Use the week label exactly as given. Data: {}",
            serde_json::Value::Array(data)
        );
        let request = GenerateContentRequest {
            contents: vec![Content::user_text(prompt)],
            generation_config: Some(GenerationConfig::json(json!({
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "week": { "type": "STRING" },
                        "summary": { "type": "STRING" }
                    },
                    "required": ["week", "summary"]
                }
            }))),
        };
        let response = self.generate(&self.inner.text_model, &request).await?;
        let text = response
            .text()
            .ok_or_else(|| ListokError::InvalidResponse("empty weekly summary".to_string()))?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GenerateContentRequest {
            contents: vec![Content::user_text("hi".to_string())],
            generation_config: Some(GenerationConfig {
                image_config: Some(ImageConfig {
                    aspect_ratio: "1:1".to_string(),
                }),
                ..Default::default()
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["generationConfig"]["imageConfig"]["aspectRatio"], "1:1");
        assert!(json["generationConfig"].get("responseSchema").is_none());
        assert!(json["contents"][0]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn test_response_text_and_category() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"{\"category\": \"Dairy\"}"}]}}]}"#;
        let response: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parse_category(response.text().as_deref()).unwrap(),
            "Dairy"
        );

        assert_eq!(parse_category(None).unwrap(), "Other");
        assert_eq!(parse_category(Some("{}")).unwrap(), "Other");
        assert!(parse_category(Some("Dairy")).is_err());
    }

    #[test]
    fn test_inline_image_becomes_data_uri() {
        let body = r#"{"candidates":[{"content":{"parts":[
            {"text":"here you go"},
            {"inlineData":{"mimeType":"image/jpeg","data":"AAEC"}}
        ]}}]}"#;
        let response: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let inline = response.first_inline_data().unwrap();
        assert_eq!(image_data_uri(inline).unwrap(), "data:image/jpeg;base64,AAEC");

        let no_mime = InlineData {
            mime_type: None,
            data: "AAEC".to_string(),
        };
        assert_eq!(image_data_uri(&no_mime).unwrap(), "data:image/png;base64,AAEC");

        let bad = InlineData {
            mime_type: None,
            data: "not base64!".to_string(),
        };
        assert!(image_data_uri(&bad).is_err());
    }

    #[test]
    fn test_empty_response() {
        let response: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(response.text(), None);
        assert!(response.first_inline_data().is_none());
    }

    #[test]
    fn test_api_error_message() {
        let body = br#"{"error":{"code":403,"message":"API key not valid","status":"PERMISSION_DENIED"}}"#;
        match api_error(StatusCode::FORBIDDEN, body) {
            ListokError::Api { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "API key not valid");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_retry_backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_secs(1));
        assert_eq!(retry_backoff(2), Duration::from_secs(2));
        assert_eq!(retry_backoff(3), Duration::from_secs(4));
        assert_eq!(retry_backoff(9), Duration::from_secs(4));
    }

    #[test]
    fn test_endpoint() {
        let mut config = GeminiConfig::new("key");
        config.base_url = "http://localhost:9000/v1beta/".to_string();
        let client = GeminiClient::new(&config).unwrap();
        assert_eq!(
            client.endpoint("gemini-3-flash-preview"),
            "http://localhost:9000/v1beta/models/gemini-3-flash-preview:generateContent"
        );
    }
}
