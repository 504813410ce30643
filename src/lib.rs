//! yoga-rag - 요가 지식베이스 RAG 질의응답
//!
//! 큐레이션된 요가 지식 파일을 청킹/임베딩해 LanceDB에 저장하고,
//! 질문마다 Top-K 청크를 검색해 근거 기반 답변을 생성합니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod history;
pub mod knowledge;
pub mod rag;
pub mod service;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::{get_data_dir, RagConfig};
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, OpenAiEmbedding};
pub use error::{EntryError, EntryProblem, IndexLoadError, IngestionError, RagError};
pub use generation::{CompletionProvider, OpenAiCompletion};
pub use history::{Feedback, Interaction, InteractionLog};
pub use knowledge::{
    default_chunker, ingest_file, Chunk, ChunkType, Chunker, IndexManifest, IndexStorage,
    KnowledgeEntry, LanceIndexStore, VectorIndex,
};
pub use rag::{Answer, KeywordClassifier, QaPipeline, Retriever, SafetyClassifier};
pub use service::{AskResponse, QaService};
