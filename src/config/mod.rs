//! 설정 모듈
//!
//! 설정 파일(`~/.yoga-rag/config.toml`)과 환경변수를 읽어 `RagConfig`를 만듭니다.
//! 우선순위: CLI 플래그 > 환경변수 > config.toml > 기본값
//!
//! ```toml
//! [retrieval]
//! top_k = 4
//!
//! [embedding]
//! model = "text-embedding-3-small"
//!
//! [generation]
//! model = "gpt-3.5-turbo-instruct"
//! temperature = 0.3
//! max_tokens = 500
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 설정 파일 이름
const CONFIG_FILE: &str = "config.toml";

/// top_k 상한
pub const MAX_TOP_K: usize = 50;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.yoga-rag/)
///
/// `YOGA_RAG_DATA_DIR` 환경변수가 있으면 그 경로를 사용합니다.
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("YOGA_RAG_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".yoga-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// 데이터 디렉토리 (파일에는 저장하지 않음)
    #[serde(skip)]
    pub data_dir: PathBuf,
}

/// 검색 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 질문당 검색할 청크 수
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

/// 임베딩 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// 지정하지 않으면 모델 기본 차원 사용
    pub dimension: Option<usize>,
    /// 수집 시 한 번에 임베딩할 청크 수
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimension: None,
            batch_size: 64,
        }
    }
}

/// 답변 생성 설정
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo-instruct".to_string(),
            temperature: 0.3,
            max_tokens: 500,
        }
    }
}

/// API 엔드포인트 설정 (OpenAI 호환)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// 임베딩/생성 호출 타임아웃 (초)
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// 설정 검증 에러
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid top_k: {0} (must be at most 50)")]
    InvalidTopK(usize),
    #[error("Invalid model name for {0} (cannot be empty)")]
    InvalidModel(&'static str),
    #[error("Invalid embedding batch size: {0} (must be between 1 and 2048)")]
    InvalidBatchSize(usize),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidDimension(usize),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max_tokens: {0} (must be greater than 0)")]
    InvalidMaxTokens(u32),
    #[error("Invalid base URL: {0} (must start with http:// or https://)")]
    InvalidBaseUrl(String),
    #[error("Invalid request timeout: {0}s (must be between 1 and 600)")]
    InvalidTimeout(u64),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

// ============================================================================
// Loading
// ============================================================================

impl RagConfig {
    /// 데이터 디렉토리에서 설정 로드 (환경변수 적용 + 검증)
    pub fn load(data_dir: &Path) -> Result<Self> {
        Self::load_with(data_dir, |name| std::env::var(name).ok())
    }

    /// 환경변수 조회 함수를 지정해 로드
    pub fn load_with<F>(data_dir: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::load_file(data_dir)?;
        config
            .apply_env(lookup)
            .context("Invalid environment override")?;
        config.validate().context("Configuration validation failed")?;
        Ok(config)
    }

    /// config.toml만 읽기 (없으면 기본값)
    fn load_file(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<RagConfig>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::debug!("No config file at {:?}, using defaults", config_path);
            Self::default()
        };

        config.data_dir = data_dir.to_path_buf();
        Ok(config)
    }

    /// 환경변수 오버라이드 적용
    ///
    /// 테스트에서 프로세스 환경을 건드리지 않도록 조회 함수를 받습니다.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("YOGA_RAG_TOP_K").filter(|v| !v.is_empty()) {
            let parsed = value.trim().parse::<usize>();
            self.retrieval.top_k = match parsed {
                Ok(top_k) => top_k,
                Err(_) => {
                    return Err(ConfigError::InvalidEnv {
                        name: "YOGA_RAG_TOP_K",
                        value,
                    })
                }
            };
        }

        if let Some(value) = lookup("OPENAI_BASE_URL").filter(|v| !v.is_empty()) {
            self.api.base_url = value;
        }

        Ok(())
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.top_k > MAX_TOP_K {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }

        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel("embedding"));
        }
        if !(1..=2048).contains(&self.embedding.batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.embedding.batch_size));
        }
        if let Some(dim) = self.embedding.dimension {
            if !(1..=8192).contains(&dim) {
                return Err(ConfigError::InvalidDimension(dim));
            }
        }

        if self.generation.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel("generation"));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::InvalidTemperature(self.generation.temperature));
        }
        if self.generation.max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens(self.generation.max_tokens));
        }

        let base = &self.api.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(base.clone()));
        }
        if !(1..=600).contains(&self.api.request_timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.api.request_timeout_secs));
        }

        Ok(())
    }

    /// 벡터 인덱스 루트 디렉토리
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    /// 질의 기록 DB 경로
    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }
}

// ============================================================================
// Tests
// ============================================================================
