use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::{
    config::AppConfig,
    services::{GenerateContentResponse, ImageSynthesis, InlineImage, ServiceError, TextCompletion},
};

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn loggable(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(mut json_value) => {
            truncate_base64_in_json(&mut json_value);
            json_value.to_string()
        }
        Err(_) if raw.len() > 1000 => {
            let cut = (0..=1000).rev().find(|i| raw.is_char_boundary(*i)).unwrap_or(0);
            format!("{}...", &raw[..cut])
        }
        Err(_) => raw.to_string(),
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
}

impl GeminiClient {
    pub fn new(client: Client, config: &AppConfig) -> Self {
        Self {
            client,
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn generate_content(&self, model: &str, request_body: &Value) -> Result<GenerateContentResponse, ServiceError> {
        if self.api_key.is_empty() {
            return Err(ServiceError::NotConfigured("GEMINI_API_KEY"));
        }
        let url = self.endpoint(model);
        info!("🔗 Making request to: {}", url);

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(request_body)
            .send()
            .await?;

        let status = response.status();
        info!("📥 Response status: {}", status);
        let response_text = response.text().await?;

        if !status.is_success() {
            error!("❌ API Error response: {}", loggable(&response_text));
            return Err(ServiceError::Status { status: status.as_u16(), body: response_text });
        }

        info!("📥 Raw Gemini API response: {}", loggable(&response_text));

        serde_json::from_str(&response_text).map_err(|e| ServiceError::Malformed(format!("parse error: {}", e)))
    }
}

fn inline_part(image: &InlineImage) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": base64::engine::general_purpose::STANDARD.encode(&image.bytes),
        }
    })
}

#[async_trait]
impl TextCompletion for GeminiClient {
    async fn complete(&self, instruction: &str, user_text: &str) -> Result<String, ServiceError> {
        info!("Generating text with Gemini API...");
        let payload = json!({
            "systemInstruction": {
                "parts": [{"text": instruction}]
            },
            "contents": [{
                "role": "user",
                "parts": [{"text": user_text}]
            }],
            "generationConfig": {
                "temperature": 0.7,
                "topK": 40,
                "topP": 0.95,
                "maxOutputTokens": 1024
            }
        });

        let parsed = self.generate_content(&self.text_model, &payload).await?;
        let text = parsed.text();
        if text.trim().is_empty() {
            return Err(match parsed.refusal_reason() {
                Some(reason) => ServiceError::Malformed(format!("no text content: {reason}")),
                None => ServiceError::Empty,
            });
        }
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl ImageSynthesis for GeminiClient {
    async fn synthesize(
        &self,
        prompt: &str,
        subject: &InlineImage,
        garment: &InlineImage,
    ) -> Result<GenerateContentResponse, ServiceError> {
        info!("Generating try-on image with Gemini API...");
        let request_body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": prompt},
                    inline_part(subject),
                    inline_part(garment)
                ]
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "temperature": 0.4,
                "topP": 0.95,
                "topK": 64,
                "candidateCount": 1
            }
        });

        let mut preview = request_body.clone();
        truncate_base64_in_json(&mut preview);
        info!("📤 Request body: {}", preview);

        self.generate_content(&self.image_model, &request_body).await
    }
}
