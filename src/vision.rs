//! Vision adapter: turns image bytes into `(tags, description)`. Covers
//! the preprocessing pipeline and the two chat-completion response shapes
//! (OpenAI-style and Gemini-style) it can parse. Treated as a pluggable
//! remote service — the actual model is never implemented here, only the
//! adapter contract, the preprocessing that runs before any such model is
//! called, and an in-memory mock for tests.

use crate::config::AppConfig;
use crate::models::TagId;
use async_trait::async_trait;
use image::{DynamicImage, ImageEncoder, RgbImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("upstream returned no usable content")]
    EmptyResponse,

    #[error("timed out waiting for vision response")]
    Timeout,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct VisionResult {
    pub tags: Vec<String>,
    pub description: String,
}

#[async_trait]
pub trait VisionAdapter: Send + Sync {
    /// `category_id` selects a category-specific prompt upstream; bytes
    /// are expected pre-processed (see [`preprocess_for_vision`]).
    async fn analyze(
        &self,
        bytes: &[u8],
        mime_type: &str,
        category_id: Option<TagId>,
    ) -> Result<VisionResult, VisionError>;
}

/// Deterministic in-memory adapter for tests and local development
/// without a configured vision endpoint.
pub struct MockVisionAdapter {
    pub tags: Vec<String>,
    pub description: String,
}

impl Default for MockVisionAdapter {
    fn default() -> Self {
        Self {
            tags: vec!["object".to_string()],
            description: "An image.".to_string(),
        }
    }
}

#[async_trait]
impl VisionAdapter for MockVisionAdapter {
    async fn analyze(
        &self,
        _bytes: &[u8],
        _mime_type: &str,
        _category_id: Option<TagId>,
    ) -> Result<VisionResult, VisionError> {
        Ok(VisionResult {
            tags: self.tags.clone(),
            description: self.description.clone(),
        })
    }
}

/// Calls an OpenAI-compatible `chat/completions` endpoint (or any server
/// implementing that shape, e.g. a local vLLM gateway) with the image
/// inlined as a base64 data URL.
pub struct HttpVisionAdapter {
    client: reqwest::Client,
    endpoint_url: String,
    api_key: Option<String>,
    prompt_by_category: std::collections::HashMap<TagId, String>,
    default_prompt: String,
}

impl HttpVisionAdapter {
    pub fn new(endpoint_url: String, api_key: Option<String>, timeout_seconds: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .expect("vision http client always buildable with a plain timeout");

        Self {
            client,
            endpoint_url,
            api_key,
            prompt_by_category: std::collections::HashMap::new(),
            default_prompt: "Describe this image and list relevant tags as a JSON object \
                 with keys \"tags\" (array of strings) and \"description\" (string)."
                .to_string(),
        }
    }

    pub fn with_category_prompt(mut self, category_id: TagId, prompt: String) -> Self {
        self.prompt_by_category.insert(category_id, prompt);
        self
    }

    fn prompt_for(&self, category_id: Option<TagId>) -> &str {
        category_id
            .and_then(|id| self.prompt_by_category.get(&id))
            .map(String::as_str)
            .unwrap_or(&self.default_prompt)
    }
}

#[async_trait]
impl VisionAdapter for HttpVisionAdapter {
    async fn analyze(
        &self,
        bytes: &[u8],
        mime_type: &str,
        category_id: Option<TagId>,
    ) -> Result<VisionResult, VisionError> {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        let data_url = format!("data:{mime_type};base64,{b64}");

        let body = serde_json::json!({
            "model": "vision",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": self.prompt_for(category_id)},
                    {"type": "image_url", "image_url": {"url": data_url}},
                ],
            }],
        });

        let mut req = self.client.post(&self.endpoint_url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| if e.is_timeout() { VisionError::Timeout } else { e.into() })?;
        let value: serde_json::Value = resp.json().await?;

        let raw_text = extract_openai_content(&value)
            .or_else(|| extract_gemini_content(&value))
            .ok_or(VisionError::EmptyResponse)?;

        Ok(parse_vision_text(&raw_text))
    }
}

/// `choices[0].message.content`, the OpenAI-compatible shape.
fn extract_openai_content(value: &serde_json::Value) -> Option<String> {
    value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// `candidates[*].content.parts[*].text`, the Gemini shape, tried when
/// the OpenAI shape is absent.
fn extract_gemini_content(value: &serde_json::Value) -> Option<String> {
    let candidates = value.get("candidates")?.as_array()?;
    for candidate in candidates {
        if let Some(parts) = candidate.get("content")?.get("parts")?.as_array() {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    return Some(text.to_string());
                }
            }
        }
    }
    None
}

/// Extracts a `{"tags": [...], "description": "..."}` JSON object from
/// free-form model output by regex; on failure, the raw text becomes the
/// description and tags are left empty, rather than failing the task.
fn parse_vision_text(text: &str) -> VisionResult {
    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                if let Ok(value) =
                    serde_json::from_str::<serde_json::Value>(&text[start..=end])
                {
                    let tags = value
                        .get("tags")
                        .and_then(|t| t.as_array())
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default();
                    let description = value
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or("")
                        .to_string();
                    return VisionResult { tags, description };
                }
            }
        }
    }
    VisionResult {
        tags: vec![],
        description: text.trim().to_string(),
    }
}

/// Resize-and-requantize ladder: first frame only for GIF (the
/// `image` crate's generic decode already yields a single frame), flatten
/// transparency onto white, shrink the longest side, then step quality
/// and size down together until under `vision_max_image_size_kb`, never
/// going below quality 60.
pub fn preprocess_for_vision(
    bytes: &[u8],
    config: &AppConfig,
) -> Result<(Vec<u8>, &'static str), VisionError> {
    let max_bytes = (config.vision_max_image_size_kb as usize) * 1024;
    if bytes.len() <= max_bytes {
        let mime = infer::get(bytes)
            .map(|k| k.mime_type())
            .unwrap_or("application/octet-stream");
        // Only JPEG/PNG/WEBP are guaranteed decodable downstream by most
        // vision backends; anything else still gets recompressed so the
        // upstream call always receives a flattened RGB JPEG.
        if matches!(mime, "image/jpeg" | "image/png" | "image/webp") {
            return Ok((bytes.to_vec(), mime));
        }
    }

    let img = image::load_from_memory(bytes)?;
    let rgb = flatten_to_rgb(img);

    let mut out = encode_jpeg(&rgb, 2048, 85)?;
    if out.len() <= max_bytes {
        return Ok((out, "image/jpeg"));
    }

    for &side in &[1536u32, 1280, 1024, 768, 512] {
        out = encode_jpeg(&rgb, side, 75)?;
        if out.len() <= max_bytes {
            return Ok((out, "image/jpeg"));
        }
    }

    out = encode_jpeg(&rgb, 512, 60)?;
    Ok((out, "image/jpeg"))
}

/// Composites any alpha channel onto a white background, a deterministic,
/// dependency-light way to normalize transparent input before encoding.
fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut out = RgbImage::new(w, h);
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let a = a as f32 / 255.0;
        let blend = |c: u8| -> u8 { ((c as f32) * a + 255.0 * (1.0 - a)).round() as u8 };
        out.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

fn encode_jpeg(img: &RgbImage, max_side: u32, quality: u8) -> Result<Vec<u8>, VisionError> {
    let (w, h) = img.dimensions();
    let scaled = if w.max(h) > max_side {
        let dynamic = DynamicImage::ImageRgb8(img.clone());
        dynamic.resize(max_side, max_side, image::imageops::FilterType::Lanczos3)
            .to_rgb8()
    } else {
        img.clone()
    };

    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    let (w, h) = scaled.dimensions();
    encoder.write_image(scaled.as_raw(), w, h, image::ExtendedColorType::Rgb8)?;
    Ok(buf)
}

/// Builds the adapter `config.vision_endpoint_url` selects: an
/// `HttpVisionAdapter` when configured, otherwise the deterministic mock
/// (matching `LocalEmbeddingAdapter`'s role for embeddings).
pub fn adapter_from_config(config: &AppConfig) -> std::sync::Arc<dyn VisionAdapter> {
    match &config.vision_endpoint_url {
        Some(url) => std::sync::Arc::new(HttpVisionAdapter::new(
            url.clone(),
            config.vision_api_key.clone(),
            config.vision_timeout_seconds,
        )),
        None => std::sync::Arc::new(MockVisionAdapter::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_object_embedded_in_prose() {
        let text = "Sure! {\"tags\": [\"cat\", \"sofa\"], \"description\": \"A cat.\"} hope that helps";
        let result = parse_vision_text(text);
        assert_eq!(result.tags, vec!["cat", "sofa"]);
        assert_eq!(result.description, "A cat.");
    }

    #[test]
    fn falls_back_to_raw_text_on_parse_failure() {
        let result = parse_vision_text("not json at all");
        assert!(result.tags.is_empty());
        assert_eq!(result.description, "not json at all");
    }

    #[test]
    fn extracts_openai_shape() {
        let value = serde_json::json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(extract_openai_content(&value).as_deref(), Some("hi"));
    }

    #[test]
    fn extracts_gemini_shape() {
        let value =
            serde_json::json!({"candidates": [{"content": {"parts": [{"text": "hi"}]}}]});
        assert_eq!(extract_gemini_content(&value).as_deref(), Some("hi"));
    }
}
