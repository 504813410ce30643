//! 안전 분류기 - 의료적 금기 주제 질문 감지
//!
//! 키워드 기반의 거친 휴리스틱입니다. 누락(false negative)이 없다는 보장은 하지 않으며,
//! 안전 판정이 아니라 주의 표시용입니다.

/// 기본 민감 키워드
pub const DEFAULT_UNSAFE_TERMS: &[&str] = &[
    "pregnancy",
    "pregnant",
    "surgery",
    "hernia",
    "glaucoma",
    "blood pressure",
    "heart",
];

/// 질문이 감지되었을 때 사용자에게 보여줄 안내문
pub const SAFETY_NOTICE: &str = "This question may contain sensitive medical content. \
     This flag comes from a simple keyword check and is not a medical safety assessment; \
     please consult a qualified yoga instructor or healthcare professional.";

/// 안전 분류기 트레이트 (교체 가능)
pub trait SafetyClassifier: Send + Sync {
    /// 민감 주제 여부
    fn is_unsafe(&self, question: &str) -> bool;

    /// 분류기 이름
    fn name(&self) -> &'static str;
}

/// 키워드 포함 여부로 판정하는 분류기 (대소문자 무시)
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    terms: Vec<String>,
}

impl KeywordClassifier {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// 질문에 포함된 키워드 목록
    pub fn matched_terms(&self, question: &str) -> Vec<&str> {
        let lowered = question.to_lowercase();
        self.terms
            .iter()
            .filter(|term| lowered.contains(term.as_str()))
            .map(String::as_str)
            .collect()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_UNSAFE_TERMS)
    }
}

impl SafetyClassifier for KeywordClassifier {
    fn is_unsafe(&self, question: &str) -> bool {
        let lowered = question.to_lowercase();
        self.terms.iter().any(|term| lowered.contains(term.as_str()))
    }

    fn name(&self) -> &'static str {
        "KeywordClassifier"
    }
}

// ============================================================================
// Tests
// ============================================================================
