use crate::api::ProviderError;
use crate::models::ModelConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

const OCR_PROMPT: &str =
    "Extract all text from this image. Reply with the text only, nothing else.";

/// Client for the auxiliary media operations: image generation, text
/// extraction from an image, and speech synthesis. All three are plain
/// request/response exchanges with no retry.
pub struct MediaClient {
    client: Client,
}

// --- Image generation ---

#[derive(Serialize, Debug)]
struct ImageRequestBody<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
}

#[derive(Deserialize, Debug)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

/// One generated image, delivered either as a URL or inline base64,
/// depending on the provider.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub url: Option<String>,
    pub b64_json: Option<String>,
}

pub(crate) fn parse_image_response(body: &str) -> Result<GeneratedImage, ProviderError> {
    let response: ImageResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::ResponseMalformed(e.to_string()))?;
    response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ResponseMalformed("response carried no image".to_string()))
}

impl MediaClient {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    async fn post(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            log::error!("Media request to {} failed with status {}: {}", url, status, error_body);
            return Err(ProviderError::RequestFailed(format!(
                "status {}: {}",
                status, error_body
            )));
        }
        Ok(response)
    }

    /// Generates one image for the prompt.
    pub async fn generate_image(
        &self,
        config: &ModelConfig,
        api_key: &str,
        prompt: &str,
    ) -> Result<GeneratedImage, ProviderError> {
        log::info!("Requesting image generation with model {}", config.model);
        let url = format!("{}/images/generations", config.api_url.trim_end_matches('/'));
        let body = serde_json::to_value(ImageRequestBody {
            model: &config.model,
            prompt,
            n: 1,
        })
        .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let response = self.post(&url, api_key, &body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        parse_image_response(&text)
    }

    /// Extracts the text visible in an image via a single vision-style chat
    /// completion. `image_data_url` is a `data:` URL or a fetchable https URL.
    pub async fn extract_text(
        &self,
        config: &ModelConfig,
        api_key: &str,
        image_data_url: &str,
    ) -> Result<String, ProviderError> {
        log::info!("Requesting text extraction with model {}", config.model);
        let url = format!("{}/chat/completions", config.api_url.trim_end_matches('/'));
        let body = json!({
            "model": config.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": OCR_PROMPT },
                    { "type": "image_url", "image_url": { "url": image_data_url } },
                ],
            }],
        });

        let response = self.post(&url, api_key, &body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        crate::api::extract_reply(&text)?.ok_or_else(|| {
            ProviderError::ResponseMalformed("response carried no text".to_string())
        })
    }

    /// Synthesizes speech for the text and returns the raw audio bytes.
    pub async fn synthesize_speech(
        &self,
        config: &ModelConfig,
        api_key: &str,
        text: &str,
        voice: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        log::info!("Requesting speech synthesis with model {}", config.model);
        let url = format!("{}/audio/speech", config.api_url.trim_end_matches('/'));
        let body = json!({
            "model": config.model,
            "input": text,
            "voice": voice,
        });

        let response = self.post(&url, api_key, &body).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl Default for MediaClient {
    fn default() -> Self {
        Self::new()
    }
}
