//! QA 파이프라인 - 검색 → (컨텍스트 없으면 고정 응답) → 합성

use crate::error::RagError;

use super::retriever::{RetrievalResult, Retriever};
use super::synthesizer::Synthesizer;

/// 관련 컨텍스트가 없을 때의 고정 응답
pub const NO_CONTEXT_ANSWER: &str = "I don't have specific information about that in my \
knowledge base. Please ask about yoga poses, breathing techniques, or general yoga practices.";

/// 파이프라인 출력
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub answer: String,
    /// 출처 제목 (순위 순, 중복 유지)
    pub sources: Vec<String>,
}

/// 질문 응답 파이프라인
#[derive(Clone)]
pub struct QaPipeline {
    retriever: Retriever,
    synthesizer: Synthesizer,
    top_k: usize,
}

impl QaPipeline {
    pub fn new(retriever: Retriever, synthesizer: Synthesizer, top_k: usize) -> Self {
        Self {
            retriever,
            synthesizer,
            top_k,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// 검색만 수행 (설정된 top_k)
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalResult, RagError> {
        self.retriever.retrieve(question, self.top_k).await
    }

    /// 질문에 답변
    ///
    /// 컨텍스트가 비면 생성 모델을 호출하지 않습니다.
    pub async fn answer_question(&self, question: &str, is_unsafe: bool) -> Result<Answer, RagError> {
        let retrieved = self.retrieve(question).await?;

        if retrieved.is_empty() {
            tracing::debug!("No context retrieved, returning fallback answer");
            return Ok(Answer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: vec![],
            });
        }

        let answer = self
            .synthesizer
            .synthesize(question, &retrieved.context, is_unsafe)
            .await?;

        Ok(Answer {
            answer,
            sources: retrieved.titles(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
