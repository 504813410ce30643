//! 생성 모듈 - 프롬프트 완성 (OpenAI 호환 completions API)
//!
//! 단일 호출, 비스트리밍입니다. 재시도는 하지 않으며 실패는 호출자에게 전달됩니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RagConfig;
use crate::embedding::{api_error, endpoint, get_api_key, http_client, DEFAULT_BASE_URL};

/// 완성 프로바이더 트레이트
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// 프롬프트 완성
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI Completion
// ============================================================================

/// OpenAI 호환 completions 구현체
///
/// ref: https://platform.openai.com/docs/api-reference/completions
#[derive(Debug)]
pub struct OpenAiCompletion {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

impl OpenAiCompletion {
    /// 기본 파라미터(temperature 0.3, max_tokens 500)로 생성
    pub fn new(api_key: String, model: &str) -> Result<Self> {
        Ok(Self {
            api_key,
            client: http_client(Duration::from_secs(30))?,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.to_string(),
            temperature: 0.3,
            max_tokens: 500,
        })
    }

    /// 설정에서 생성 (API 키는 환경변수)
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let api_key = get_api_key()?;
        let mut completion = Self::new(api_key, &config.generation.model)?
            .with_base_url(&config.api.base_url)
            .with_timeout(Duration::from_secs(config.api.request_timeout_secs))?;
        completion.temperature = config.generation.temperature;
        completion.max_tokens = config.generation.max_tokens;
        Ok(completion)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = http_client(timeout)?;
        Ok(self)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(endpoint(&self.base_url, "completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send completion request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read completion response body")?;

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&body).context("Failed to parse completion response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .ok_or_else(|| anyhow::anyhow!("Completion response has no choices"))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
