//! Vector Index - 메모리 내 벡터 인덱스 및 유사도 검색
//!
//! 인덱스는 서비스 시작 시 한 번 로드되고 이후 변경되지 않습니다.
//! 재수집 시에는 인덱스 전체를 교체합니다.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IndexLoadError, IngestionError};

use super::chunker::{Chunk, ChunkType};

/// 인덱스 저장 형식 버전 (저장 경로에 포함)
pub const INDEX_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Types
// ============================================================================

/// 임베딩된 청크
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// 검색 결과 (청크 + 유사도)
#[derive(Debug, Clone, Copy)]
pub struct ScoredChunk<'a> {
    pub chunk: &'a Chunk,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub score: f32,
}

/// 인덱스 매니페스트 (벡터와 함께 저장)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    /// 인덱스를 만든 임베딩 모델
    pub embedding_model: String,
    pub dimension: usize,
    pub entry_count: usize,
    pub chunk_count: usize,
    /// 원본 지식 파일 SHA-256 (지식베이스 버전)
    pub source_sha256: String,
    pub built_at: DateTime<Utc>,
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 메모리 벡터 인덱스
///
/// 불변식:
/// - 모든 벡터의 차원이 동일
/// - (id, chunk_type) 쌍이 유일
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    chunks: Vec<EmbeddedChunk>,
}

impl VectorIndex {
    /// 인덱스 생성 (불변식 검증)
    pub fn new(dimension: usize, chunks: Vec<EmbeddedChunk>) -> Result<Self, IngestionError> {
        let mut seen: HashSet<(&str, ChunkType)> = HashSet::with_capacity(chunks.len());

        for item in &chunks {
            if item.embedding.len() != dimension {
                return Err(IngestionError::DimensionMismatch {
                    expected: dimension,
                    actual: item.embedding.len(),
                });
            }

            let meta = &item.chunk.metadata;
            if !seen.insert((meta.id.as_str(), meta.chunk_type)) {
                return Err(IngestionError::DuplicateChunk {
                    id: meta.id.clone(),
                    chunk_type: meta.chunk_type.to_string(),
                });
            }
        }

        Ok(Self { dimension, chunks })
    }

    /// 빈 인덱스
    pub fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            chunks: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// 삽입 순서대로의 청크
    pub fn chunks(&self) -> &[EmbeddedChunk] {
        &self.chunks
    }

    /// Top-K 유사도 검색
    ///
    /// 점수 내림차순, 동점은 삽입 순서 유지 (stable sort).
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk<'_>>> {
        if query.len() != self.dimension {
            anyhow::bail!(
                "Query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            );
        }

        if k == 0 || self.chunks.is_empty() {
            return Ok(vec![]);
        }

        let mut scored: Vec<ScoredChunk<'_>> = self
            .chunks
            .iter()
            .map(|item| ScoredChunk {
                chunk: &item.chunk,
                score: cosine_similarity(query, &item.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);

        Ok(scored)
    }
}

// ============================================================================
// IndexStorage Trait
// ============================================================================

/// 인덱스 영구 저장소 트레이트
///
/// 전체 저장(save)과 전체 로드(load)만 지원합니다.
#[async_trait]
pub trait IndexStorage: Send + Sync {
    /// 인덱스 전체 저장 (기존 인덱스 교체)
    async fn save(&self, index: &VectorIndex, manifest: &IndexManifest) -> Result<()>;

    /// 인덱스 전체 로드
    async fn load(&self) -> Result<(VectorIndex, IndexManifest), IndexLoadError>;

    /// 매니페스트만 읽기 (상태 확인용)
    async fn manifest(&self) -> Result<Option<IndexManifest>>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::ChunkMetadata;

    fn embedded(id: &str, chunk_type: ChunkType, embedding: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk {
                text: format!("{} {}", id, chunk_type),
                metadata: ChunkMetadata {
                    id: id.to_string(),
                    title: format!("Pose {}", id),
                    category: None,
                    level: None,
                    chunk_type,
                },
            },
            embedding,
        }
    }

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.0001);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_new_rejects_duplicates() {
        let err = VectorIndex::new(
            2,
            vec![
                embedded("1", ChunkType::Main, vec![1.0, 0.0]),
                embedded("1", ChunkType::Main, vec![0.0, 1.0]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, IngestionError::DuplicateChunk { .. }));

        // 같은 id라도 종류가 다르면 허용
        assert!(VectorIndex::new(
            2,
            vec![
                embedded("1", ChunkType::Main, vec![1.0, 0.0]),
                embedded("1", ChunkType::Safety, vec![0.0, 1.0]),
            ],
        )
        .is_ok());
    }

    #[test]
    fn test_new_rejects_dimension_mismatch() {
        let err = VectorIndex::new(3, vec![embedded("1", ChunkType::Main, vec![1.0, 0.0])])
            .unwrap_err();
        assert!(matches!(
            err,
            IngestionError::DimensionMismatch { expected: 3, actual: 2 }
        ));
    }

    #[test]
    fn test_search_ranks_by_score() {
        let index = VectorIndex::new(
            2,
            vec![
                embedded("a", ChunkType::Main, vec![0.0, 1.0]),
                embedded("b", ChunkType::Main, vec![1.0, 0.0]),
                embedded("c", ChunkType::Main, vec![1.0, 1.0]),
            ],
        )
        .unwrap();

        let results = index.search(&[1.0, 0.1], 2).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.chunk.metadata.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_search_ties_keep_insertion_order() {
        let index = VectorIndex::new(
            2,
            vec![
                embedded("first", ChunkType::Main, vec![1.0, 0.0]),
                embedded("second", ChunkType::Main, vec![2.0, 0.0]),
                embedded("third", ChunkType::Main, vec![3.0, 0.0]),
            ],
        )
        .unwrap();

        for _ in 0..3 {
            let results = index.search(&[1.0, 0.0], 3).unwrap();
            let ids: Vec<_> = results.iter().map(|r| r.chunk.metadata.id.as_str()).collect();
            assert_eq!(ids, vec!["first", "second", "third"]);
        }
    }

    #[test]
    fn test_search_edge_cases() {
        let index = VectorIndex::new(2, vec![embedded("a", ChunkType::Main, vec![1.0, 0.0])])
            .unwrap();

        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
        assert_eq!(index.search(&[1.0, 0.0], 10).unwrap().len(), 1);
        assert!(index.search(&[1.0, 0.0, 0.0], 1).is_err());

        let empty = VectorIndex::empty(2);
        assert!(empty.is_empty());
        assert!(empty.search(&[1.0, 0.0], 4).unwrap().is_empty());
    }
}
