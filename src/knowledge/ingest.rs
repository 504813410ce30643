//! 수집 파이프라인 - 지식 파일 → 청크 → 임베딩 → 인덱스 저장
//!
//! 오프라인으로 지식베이스 버전마다 한 번 실행합니다.
//! 어느 단계든 실패하면 인덱스를 저장하지 않습니다.

use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::embedding::EmbeddingProvider;
use crate::error::{EntryError, EntryProblem, IngestionError};

use super::chunker::{Chunk, Chunker};
use super::entry::{parse_entries, KnowledgeEntry};
use super::vector::{EmbeddedChunk, IndexManifest, IndexStorage, VectorIndex, INDEX_FORMAT_VERSION};

/// 수집 결과
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub entry_count: usize,
    pub chunk_count: usize,
    pub dimension: usize,
    pub embedding_model: String,
    pub source_sha256: String,
}

/// 청크 임베딩 후 인덱스 생성
///
/// `batch_size` 단위로 임베딩을 요청합니다.
pub async fn build_index(
    chunks: Vec<Chunk>,
    embedder: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<VectorIndex, IngestionError> {
    let dimension = embedder.dimension();
    let batch_size = batch_size.max(1);
    let total = chunks.len();
    let mut embedded = Vec::with_capacity(total);

    for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder
            .embed_batch(&texts)
            .await
            .map_err(IngestionError::Embedding)?;

        if vectors.len() != batch.len() {
            return Err(IngestionError::Embedding(anyhow::anyhow!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            )));
        }

        for (chunk, embedding) in batch.iter().zip(vectors) {
            embedded.push(EmbeddedChunk {
                chunk: chunk.clone(),
                embedding,
            });
        }

        tracing::debug!(
            "Embedded batch {} ({}/{} chunks)",
            batch_no + 1,
            embedded.len(),
            total
        );
    }

    VectorIndex::new(dimension, embedded)
}

/// 파싱된 엔트리로 인덱스 빌드 + 저장
pub async fn ingest_entries(
    entries: &[KnowledgeEntry],
    source_sha256: String,
    chunker: &dyn Chunker,
    embedder: &dyn EmbeddingProvider,
    storage: &dyn IndexStorage,
    batch_size: usize,
) -> Result<IngestReport, IngestionError> {
    let chunks = chunker.chunk_all(entries)?;
    tracing::info!(
        "Created {} chunks from {} entries ({})",
        chunks.len(),
        entries.len(),
        chunker.name()
    );

    embed_and_save(chunks, entries.len(), source_sha256, embedder, storage, batch_size).await
}

/// 지식 파일 수집
///
/// # Arguments
/// * `path` - 지식 파일 (KnowledgeEntry JSON 배열)
pub async fn ingest_file(
    path: &Path,
    chunker: &dyn Chunker,
    embedder: &dyn EmbeddingProvider,
    storage: &dyn IndexStorage,
    batch_size: usize,
) -> Result<IngestReport, IngestionError> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
        .map_err(IngestionError::Source)?;

    let source_sha256 = format!("{:x}", Sha256::digest(&raw));

    let text = String::from_utf8(raw)
        .context("Knowledge file is not valid UTF-8")
        .map_err(IngestionError::Source)?;
    let parsed = parse_entries(&text).map_err(IngestionError::Source)?;

    tracing::info!("Loaded {} knowledge entries from {:?}", parsed.len(), path);

    let entry_count = parsed.len();
    let chunks = chunk_parsed(chunker, parsed)?;
    tracing::info!(
        "Created {} chunks from {} entries ({})",
        chunks.len(),
        entry_count,
        chunker.name()
    );

    embed_and_save(chunks, entry_count, source_sha256, embedder, storage, batch_size).await
}

/// 타입 오류 엔트리와 청킹 실패를 합쳐 원래 위치로 보고
fn chunk_parsed(
    chunker: &dyn Chunker,
    parsed: Vec<Result<KnowledgeEntry, EntryError>>,
) -> Result<Vec<Chunk>, IngestionError> {
    let mut failures = Vec::new();
    let mut entries = Vec::with_capacity(parsed.len());
    // entries[i] 의 파일 내 위치
    let mut positions = Vec::with_capacity(parsed.len());

    for (index, item) in parsed.into_iter().enumerate() {
        match item {
            Ok(entry) => {
                entries.push(entry);
                positions.push(index);
            }
            Err(e) => failures.push(e),
        }
    }

    match chunker.chunk_all(&entries) {
        Ok(chunks) if failures.is_empty() => Ok(chunks),
        Ok(_) => Err(IngestionError::InvalidEntries(failures)),
        Err(IngestionError::InvalidEntries(more)) => {
            failures.extend(more.into_iter().map(|e| relocate(e, &positions)));
            failures.sort_by_key(|f| f.index);
            Err(IngestionError::InvalidEntries(failures))
        }
        Err(other) => Err(other),
    }
}

fn relocate(mut error: EntryError, positions: &[usize]) -> EntryError {
    let at = |i: usize| positions.get(i).copied().unwrap_or(i);
    error.index = at(error.index);
    if let EntryProblem::DuplicateId { other } = &mut error.problem {
        *other = at(*other);
    }
    error
}

/// 임베딩 → 인덱스 검증 → 저장 (매니페스트는 저장소가 마지막에 기록)
async fn embed_and_save(
    chunks: Vec<Chunk>,
    entry_count: usize,
    source_sha256: String,
    embedder: &dyn EmbeddingProvider,
    storage: &dyn IndexStorage,
    batch_size: usize,
) -> Result<IngestReport, IngestionError> {
    let index = build_index(chunks, embedder, batch_size).await?;

    let manifest = IndexManifest {
        format_version: INDEX_FORMAT_VERSION,
        embedding_model: embedder.name().to_string(),
        dimension: index.dimension(),
        entry_count,
        chunk_count: index.len(),
        source_sha256,
        built_at: Utc::now(),
    };

    storage
        .save(&index, &manifest)
        .await
        .map_err(IngestionError::Storage)?;

    Ok(IngestReport {
        entry_count: manifest.entry_count,
        chunk_count: manifest.chunk_count,
        dimension: manifest.dimension,
        embedding_model: manifest.embedding_model,
        source_sha256: manifest.source_sha256,
    })
}

// ============================================================================
// Tests
// ============================================================================
