//! 검색기 - 질문 임베딩 후 Top-K 청크로 컨텍스트 구성

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::knowledge::{ChunkType, ScoredChunk, VectorIndex};

/// 청크 구분자
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// 검색된 청크 출처
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub title: String,
    pub id: String,
    pub category: Option<String>,
    pub chunk_type: ChunkType,
    pub score: f32,
}

impl From<&ScoredChunk<'_>> for SourceRef {
    fn from(scored: &ScoredChunk<'_>) -> Self {
        let metadata = &scored.chunk.metadata;
        Self {
            title: metadata.title.clone(),
            id: metadata.id.clone(),
            category: metadata.category.clone(),
            chunk_type: metadata.chunk_type,
            score: scored.score,
        }
    }
}

/// 검색 결과
///
/// `sources`는 유사도 순위 그대로이며 중복 제목을 합치지 않습니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    pub context: String,
    pub sources: Vec<SourceRef>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }

    /// 출처 제목 목록 (순위 순)
    pub fn titles(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.title.clone()).collect()
    }
}

/// 검색기
///
/// 인덱스는 읽기 전용으로 공유됩니다.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { index, embedder }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// 질문과 가장 유사한 청크 `k`개 검색
    ///
    /// `k == 0`이거나 인덱스가 비어 있으면 임베딩 호출 없이 빈 결과를 반환합니다.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<RetrievalResult, RagError> {
        if k == 0 || self.index.is_empty() {
            return Ok(RetrievalResult::default());
        }

        let query = self
            .embedder
            .embed(question)
            .await
            .map_err(RagError::Retrieval)?;

        let hits = self
            .index
            .search(&query, k)
            .map_err(RagError::Retrieval)?;

        for hit in &hits {
            tracing::debug!(
                "Retrieved {} [{}] score={:.4}",
                hit.chunk.metadata.title,
                hit.chunk.metadata.chunk_type,
                hit.score
            );
        }

        let context = hits
            .iter()
            .map(|hit| hit.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let sources = hits.iter().map(SourceRef::from).collect();

        Ok(RetrievalResult { context, sources })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{index_from, sample_entries, yoga_embedder, FailingEmbedder, VocabularyEmbedder};

    async fn sample_retriever() -> (Retriever, Arc<VocabularyEmbedder>) {
        let embedder = Arc::new(yoga_embedder());
        let index = index_from(&sample_entries(), embedder.as_ref()).await;
        (Retriever::new(Arc::new(index), embedder.clone()), embedder)
    }

    #[tokio::test]
    async fn test_downward_dog_benefits_ranked_first() {
        let (retriever, _) = sample_retriever().await;

        let result = retriever
            .retrieve("What are the benefits of Downward Dog?", 2)
            .await
            .unwrap();

        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.sources[0].chunk_type, ChunkType::Benefits);
        assert_eq!(result.sources[1].chunk_type, ChunkType::Main);
        assert!(result.sources[0].score >= result.sources[1].score);
        assert_eq!(
            result.context,
            "Downward Dog - Benefits\n\nStretches the spine\n\nDownward Dog\n\nA foundational pose."
        );
        // 같은 엔트리의 청크 두 개 → 제목 중복 유지
        assert_eq!(result.titles(), vec!["Downward Dog", "Downward Dog"]);
        assert_eq!(result.sources[0].category.as_deref(), Some("pose"));
    }

    #[tokio::test]
    async fn test_retrieval_is_deterministic() {
        let (retriever, _) = sample_retriever().await;

        let first = retriever.retrieve("breathing ocean", 3).await.unwrap();
        let second = retriever.retrieve("breathing ocean", 3).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.sources[0].title, "Ujjayi Breathing");
    }

    #[tokio::test]
    async fn test_k_larger_than_index() {
        let (retriever, _) = sample_retriever().await;
        let total = retriever.index().len();

        let result = retriever.retrieve("pose", 100).await.unwrap();
        assert_eq!(result.sources.len(), total);
    }

    #[tokio::test]
    async fn test_zero_k_skips_embedding() {
        let (retriever, embedder) = sample_retriever().await;
        let before = embedder.calls();

        let result = retriever.retrieve("Downward Dog", 0).await.unwrap();
        assert!(result.is_empty());
        assert!(result.sources.is_empty());
        assert_eq!(embedder.calls(), before);
    }

    #[tokio::test]
    async fn test_empty_index_skips_embedding() {
        let embedder = Arc::new(yoga_embedder());
        let index = Arc::new(VectorIndex::empty(embedder.dimension()));
        let retriever = Retriever::new(index, embedder.clone());

        let result = retriever.retrieve("anything", 4).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_retrieval_error() {
        let embedder = yoga_embedder();
        let index = index_from(&sample_entries(), &embedder).await;
        let retriever = Retriever::new(
            Arc::new(index),
            Arc::new(FailingEmbedder::new(embedder.dimension())),
        );

        let err = retriever.retrieve("Downward Dog", 2).await.unwrap_err();
        assert!(matches!(err, RagError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_retrieval_error() {
        let index = index_from(&sample_entries(), &yoga_embedder()).await;
        let narrow = VocabularyEmbedder::new(vec!["downward", "dog"]);
        let retriever = Retriever::new(Arc::new(index), Arc::new(narrow));

        let err = retriever.retrieve("Downward Dog", 2).await.unwrap_err();
        assert!(matches!(err, RagError::Retrieval(_)));
    }
}
