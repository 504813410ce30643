//! 에러 타입 - 수집/인덱스 로드/검색/생성 단계별 에러 분류
//!
//! 프로바이더와 저장소 내부는 `anyhow::Result`를 사용하고,
//! 파이프라인 경계에서 아래 타입으로 감쌉니다.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// Ingestion
// ============================================================================

/// 엔트리가 거부된 이유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryProblem {
    /// 필수 필드 누락 (빈 문자열 포함)
    MissingField(&'static str),
    /// 필드 값이 문자열/숫자가 아님
    InvalidType(&'static str),
    /// 배열 원소가 JSON 객체가 아님
    NotAnObject,
    /// 다른 엔트리와 ID 중복
    DuplicateId { other: usize },
}

/// 형식이 잘못된 지식 엔트리
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryError {
    /// 지식 파일 내 엔트리 순서 (0-based)
    pub index: usize,
    /// 엔트리 ID (있는 경우)
    pub id: Option<String>,
    pub problem: EntryProblem,
}

impl EntryError {
    pub fn new(index: usize, id: Option<String>, problem: EntryProblem) -> Self {
        Self { index, id, problem }
    }
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry #{}", self.index)?;
        if let Some(id) = &self.id {
            write!(f, " (id: {})", id)?;
        }
        match &self.problem {
            EntryProblem::MissingField(field) => write!(f, " is missing required field `{}`", field),
            EntryProblem::InvalidType(field) => write!(f, " has an invalid type for field `{}`", field),
            EntryProblem::NotAnObject => write!(f, " is not a JSON object"),
            EntryProblem::DuplicateId { other } => write!(f, " has the same id as entry #{}", other),
        }
    }
}

impl std::error::Error for EntryError {}

/// 인덱스 빌드 에러
///
/// 어떤 경우에도 부분적으로만 유효한 인덱스를 저장하지 않습니다.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("failed to read knowledge source: {0}")]
    Source(#[source] anyhow::Error),

    #[error("{} knowledge entries failed validation: {}", .0.len(), join_entry_errors(.0))]
    InvalidEntries(Vec<EntryError>),

    #[error("duplicate chunk ({id}, {chunk_type}) in index")]
    DuplicateChunk { id: String, chunk_type: String },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("failed to embed chunks: {0}")]
    Embedding(#[source] anyhow::Error),

    #[error("failed to persist index: {0}")]
    Storage(#[source] anyhow::Error),
}

fn join_entry_errors(errors: &[EntryError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Index Load
// ============================================================================

/// 인덱스 로드 에러 - 서비스 시작 불가 (치명적)
#[derive(Debug, Error)]
pub enum IndexLoadError {
    #[error("no index found at {0} (run `yoga-rag ingest` first)")]
    Missing(PathBuf),

    #[error("index format version {found} is not supported (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("index is corrupt: {0}")]
    Corrupt(String),

    #[error(
        "index was built with {index_model} ({index_dimension}d) but the configured \
         embedding provider is {configured_model} ({configured_dimension}d); re-run ingestion"
    )]
    ModelMismatch {
        index_model: String,
        index_dimension: usize,
        configured_model: String,
        configured_dimension: usize,
    },

    #[error("failed to read index storage: {0}")]
    Storage(#[source] anyhow::Error),
}

// ============================================================================
// Pipeline
// ============================================================================

/// 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    IndexLoad(#[from] IndexLoadError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[source] anyhow::Error),

    #[error("generation failed: {0}")]
    Generation(#[source] anyhow::Error),

    #[error("service is not ready")]
    NotReady,

    #[error("question is required")]
    EmptyQuestion,
}
