//! RAG 모듈 - 질문 처리 (안전 분류 → 검색 → 근거 기반 합성)

mod retriever;
mod safety;
mod synthesizer;
mod pipeline;

pub use retriever::{RetrievalResult, Retriever, SourceRef, CONTEXT_SEPARATOR};
pub use safety::{KeywordClassifier, SafetyClassifier, DEFAULT_UNSAFE_TERMS, SAFETY_NOTICE};
pub use synthesizer::{build_prompt, Synthesizer, NOT_IN_KNOWLEDGE_BASE};
pub use pipeline::{Answer, QaPipeline, NO_CONTEXT_ANSWER};
