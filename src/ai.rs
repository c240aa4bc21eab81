use std::fmt::Display;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{Result, TeardownError};
use crate::storyboard::Storyboard;
use crate::video::VideoPayload;

pub(crate) const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_OPENAI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

pub(crate) const STORYBOARD_PROMPT: &str = "\
Analyze this video and provide a detailed storyboard.
Divide the video into segments based on spoken phrases and visual shifts.
For each segment, I need:
1. 'startTime': The start timestamp in seconds.
2. 'endTime': The end timestamp in seconds.
3. 'script': The EXACT verbatim spoken words from the audio. Do not summarize the dialogue.
4. 'description': A short summary of the visual action in this segment.

Ensure segments cover the entire video duration.
If nobody is speaking during a segment, set 'script' to '[Music/No Audio]'.

Return ONLY a JSON array of objects with exactly these four fields. \
Do not wrap it in markdown and do not add any text before or after the array.";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum Provider {
    /// Native Gemini `generateContent` API
    #[default]
    Gemini,
    /// Any OpenAI-compatible chat completions endpoint
    Openai,
}

#[derive(Clone)]
pub(crate) struct ExtractorSettings {
    pub api_key: String,
    pub model: String,
    pub api_base: Option<String>,
    pub timeout: Duration,
}

/// A hosted multimodal model that can look at a whole video.
#[async_trait]
pub(crate) trait StoryboardExtractor: Send + Sync {
    /// Sends the video and the instruction, returns the raw response text.
    async fn generate(&self, video: &VideoPayload, prompt: &str) -> Result<String>;
}

pub(crate) fn extractor(
    provider: Provider,
    settings: ExtractorSettings,
) -> Result<Box<dyn StoryboardExtractor>> {
    Ok(match provider {
        Provider::Gemini => Box::new(GeminiExtractor::new(settings)?),
        Provider::Openai => Box::new(OpenAiExtractor::new(settings)),
    })
}

pub(crate) async fn extract_storyboard(
    extractor: &dyn StoryboardExtractor,
    video: &VideoPayload,
) -> Result<Storyboard> {
    let text = extractor.generate(video, STORYBOARD_PROMPT).await?;
    debug!(chars = text.len(), "received storyboard response");
    parse_storyboard(&text)
}

pub(crate) fn parse_storyboard(text: &str) -> Result<Storyboard> {
    Storyboard::from_json(text)
        .map_err(|e| extraction(format!("model response is not a JSON segment array: {e}")))
}

fn extraction(err: impl Display) -> TeardownError {
    TeardownError::Extraction(err.to_string())
}

pub(crate) struct GeminiExtractor {
    http: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = self
                .prompt_feedback
                .and_then(|feedback| feedback.block_reason)
                .unwrap_or_else(|| "no candidates".to_owned());
            return Err(extraction(format!("Gemini returned no content ({reason})")));
        };

        let text: String = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        if text.is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "empty".to_owned());
            return Err(extraction(format!("Gemini returned no text ({reason})")));
        }
        Ok(text)
    }
}

impl GeminiExtractor {
    pub(crate) fn new(settings: ExtractorSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(extraction)?;
        Ok(Self {
            http,
            api_key: settings.api_key,
            model: settings.model,
            api_base: settings
                .api_base
                .unwrap_or_else(|| GEMINI_API_BASE.to_owned()),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            self.model
        )
    }

    fn request_body(video: &VideoPayload, prompt: &str) -> Value {
        json!({
            "contents": [{
                "parts": [
                    { "inlineData": { "mimeType": video.mime_type, "data": video.data } },
                    { "text": prompt }
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "startTime": { "type": "NUMBER" },
                            "endTime": { "type": "NUMBER" },
                            "script": { "type": "STRING", "description": "Verbatim transcription of dialogue" },
                            "description": { "type": "STRING", "description": "Visual action summary" }
                        },
                        "required": ["startTime", "endTime", "script", "description"]
                    }
                }
            }
        })
    }
}

#[async_trait]
impl StoryboardExtractor for GeminiExtractor {
    async fn generate(&self, video: &VideoPayload, prompt: &str) -> Result<String> {
        info!(model = %self.model, mime_type = video.mime_type, "requesting storyboard from Gemini");

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(video, prompt))
            .send()
            .await
            .map_err(extraction)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(extraction(format!("Gemini API error ({status}): {body}")));
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(extraction)?
            .into_text()
    }
}

pub(crate) struct OpenAiExtractor {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiExtractor {
    pub(crate) fn new(settings: ExtractorSettings) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(settings.api_key)
            .with_api_base(
                settings
                    .api_base
                    .unwrap_or_else(|| GEMINI_OPENAI_API_BASE.to_owned()),
            );
        Self {
            client: Client::with_config(config),
            model: settings.model,
            timeout: settings.timeout,
        }
    }

    fn request(
        &self,
        video: &VideoPayload,
        prompt: &str,
    ) -> std::result::Result<CreateChatCompletionRequest, OpenAIError> {
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(vec![
                        ChatCompletionRequestUserMessageContentPart::ImageUrl(
                            ChatCompletionRequestMessageContentPartImageArgs::default()
                                .image_url(ImageUrlArgs::default().url(video.data_url()).build()?)
                                .build()?,
                        ),
                        ChatCompletionRequestUserMessageContentPart::Text(
                            ChatCompletionRequestMessageContentPartTextArgs::default()
                                .text(prompt)
                                .build()?,
                        ),
                    ]))
                    .build()?,
            )])
            .build()
    }
}

#[async_trait]
impl StoryboardExtractor for OpenAiExtractor {
    async fn generate(&self, video: &VideoPayload, prompt: &str) -> Result<String> {
        info!(model = %self.model, mime_type = video.mime_type, "requesting storyboard from chat completions");

        let request = self.request(video, prompt).map_err(extraction)?;
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| extraction(format!("no response within {:?}", self.timeout)))?
            .map_err(extraction)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| extraction("No content in chat completion response"))
    }
}
