//! Knowledge 모듈 - 지식베이스 수집 및 벡터 인덱스
//!
//! - Entry: 지식 파일 레코드
//! - Chunker: 엔트리 → main/benefits/safety 청크
//! - Vector: 메모리 인덱스 + Top-K 코사인 검색
//! - Lance: LanceDB 영구 저장 (버전 경로 + 매니페스트)
//! - Ingest: 오프라인 빌드 파이프라인

mod entry;
mod chunker;
mod vector;
mod lance;
mod ingest;

// Re-exports
pub use entry::{parse_entries, KnowledgeEntry};
pub use chunker::{default_chunker, Chunk, ChunkMetadata, ChunkType, Chunker, FacetChunker};
pub use vector::{
    cosine_similarity, EmbeddedChunk, IndexManifest, IndexStorage, ScoredChunk, VectorIndex,
    INDEX_FORMAT_VERSION,
};
pub use lance::LanceIndexStore;
pub use ingest::{build_index, ingest_entries, ingest_file, IngestReport};
