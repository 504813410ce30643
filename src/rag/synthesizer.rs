//! 답변 합성기 - 근거 기반 프롬프트 구성 + 생성 호출
//!
//! 프롬프트에는 입력과 무관하게 네 가지 제약이 항상 포함됩니다.
//! 1. 제공된 컨텍스트로만 답변
//! 2. 컨텍스트에 답이 없으면 고정 문장으로 응답
//! 3. 정보 지어내기 금지
//! 4. 의학적 진단/치료 조언 금지

use std::sync::Arc;

use crate::error::RagError;
use crate::generation::CompletionProvider;

/// 컨텍스트에 답이 없을 때 모델이 출력해야 하는 문장
pub const NOT_IN_KNOWLEDGE_BASE: &str =
    "I don't have specific information about that in my knowledge base.";

/// 민감 질문일 때 추가되는 지시문
const SAFETY_DIRECTIVE: &str = "IMPORTANT: This question involves medical contraindications. \
Do not provide medical advice. Only suggest gentle, safe practices if available in context, \
and recommend consulting a qualified yoga instructor or healthcare professional.";

/// 근거 기반 프롬프트 생성
pub fn build_prompt(question: &str, context: &str, is_unsafe: bool) -> String {
    let safety_note = if is_unsafe {
        format!("\n\n{}", SAFETY_DIRECTIVE)
    } else {
        String::new()
    };

    format!(
        "You are a knowledgeable yoga instructor. Answer the question based ONLY on the \
         provided context. If the answer is not in the context, say \"{fallback}\"\n\
         \n\
         Do not make up information. Do not provide medical diagnoses or treatment advice.\
         {safety_note}\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {question}\n\
         \n\
         Answer:",
        fallback = NOT_IN_KNOWLEDGE_BASE,
    )
}

/// 답변 합성기
#[derive(Clone)]
pub struct Synthesizer {
    generator: Arc<dyn CompletionProvider>,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn CompletionProvider>) -> Self {
        Self { generator }
    }

    /// 프롬프트를 만들어 생성 호출 후 앞뒤 공백 제거
    ///
    /// 실패 시 재시도하지 않습니다.
    pub async fn synthesize(
        &self,
        question: &str,
        context: &str,
        is_unsafe: bool,
    ) -> Result<String, RagError> {
        let prompt = build_prompt(question, context, is_unsafe);

        let output = self
            .generator
            .complete(&prompt)
            .await
            .map_err(RagError::Generation)?;

        Ok(output.trim().to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingCompletion, RecordingCompletion};

    #[test]
    fn test_prompt_always_has_constraints() {
        for is_unsafe in [false, true] {
            let prompt = build_prompt("What is tree pose?", "Tree Pose\n\nBalance.", is_unsafe);
            assert!(prompt.contains("based ONLY on the provided context"));
            assert!(prompt.contains(NOT_IN_KNOWLEDGE_BASE));
            assert!(prompt.contains("Do not make up information."));
            assert!(prompt.contains("Do not provide medical diagnoses or treatment advice."));
            assert!(prompt.contains("Context:\nTree Pose\n\nBalance.\n\nQuestion: What is tree pose?"));
            assert!(prompt.ends_with("Answer:"));
        }
    }

    #[test]
    fn test_unsafe_adds_directive() {
        let safe = build_prompt("q", "c", false);
        let unsafe_prompt = build_prompt("q", "c", true);

        assert!(!safe.contains("IMPORTANT"));
        assert!(unsafe_prompt.contains("IMPORTANT: This question involves medical contraindications."));
        assert!(unsafe_prompt.contains("healthcare professional"));
        // 지시문은 컨텍스트 앞에 위치
        let directive = unsafe_prompt.find("IMPORTANT").unwrap();
        let context = unsafe_prompt.find("Context:").unwrap();
        assert!(directive < context);
    }

    #[tokio::test]
    async fn test_synthesize_trims_output() {
        let generator = Arc::new(RecordingCompletion::new("\n  Stretch gently.  \n"));
        let synthesizer = Synthesizer::new(generator.clone());

        let answer = synthesizer.synthesize("q?", "ctx", false).await.unwrap();
        assert_eq!(answer, "Stretch gently.");

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0], build_prompt("q?", "ctx", false));
    }

    #[tokio::test]
    async fn test_synthesize_propagates_failure() {
        let synthesizer = Synthesizer::new(Arc::new(FailingCompletion));
        let err = synthesizer.synthesize("q", "c", false).await.unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
    }
}
