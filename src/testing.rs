//! 테스트용 가짜 프로바이더

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::generation::CompletionProvider;
use crate::knowledge::{build_index, Chunker, FacetChunker, KnowledgeEntry, VectorIndex};

/// 고정 어휘 단어 빈도 임베딩 (결정적, 충돌 없음)
pub struct VocabularyEmbedder {
    vocabulary: Vec<&'static str>,
    calls: AtomicUsize,
}

impl VocabularyEmbedder {
    pub fn new(vocabulary: Vec<&'static str>) -> Self {
        Self {
            vocabulary,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for VocabularyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut vector = vec![0.0; self.vocabulary.len()];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            if let Some(pos) = self.vocabulary.iter().position(|w| *w == token) {
                vector[pos] += 1.0;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.vocabulary.len()
    }

    fn name(&self) -> &str {
        "vocabulary-test"
    }
}

/// 요가 테스트 데이터용 어휘
pub fn yoga_embedder() -> VocabularyEmbedder {
    VocabularyEmbedder::new(vec![
        "downward",
        "dog",
        "benefits",
        "spine",
        "foundational",
        "pose",
        "wrist",
        "injury",
        "avoid",
        "contraindications",
        "safety",
        "child",
        "resting",
        "calms",
        "breath",
        "breathing",
        "ujjayi",
        "ocean",
        "tree",
        "balance",
    ])
}

/// 항상 실패하는 임베딩
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("embedding service unavailable")
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "failing-test"
    }
}

/// 고정 답변을 반환하고 받은 프롬프트를 기록
pub struct RecordingCompletion {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl RecordingCompletion {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionProvider for RecordingCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "recording-test"
    }
}

/// 항상 실패하는 생성
pub struct FailingCompletion;

#[async_trait]
impl CompletionProvider for FailingCompletion {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        anyhow::bail!("completion service returned 503")
    }

    fn name(&self) -> &str {
        "failing-test"
    }
}

/// 테스트용 지식 엔트리 (Downward Dog, Child's Pose, Ujjayi Breathing)
pub fn sample_entries() -> Vec<KnowledgeEntry> {
    vec![
        KnowledgeEntry {
            id: "1".to_string(),
            title: "Downward Dog".to_string(),
            category: Some("pose".to_string()),
            level: Some("beginner".to_string()),
            content: "A foundational pose.".to_string(),
            benefits: Some("Stretches the spine".to_string()),
            contraindications: Some("Avoid with wrist injury".to_string()),
        },
        KnowledgeEntry {
            id: "2".to_string(),
            title: "Child's Pose".to_string(),
            category: Some("pose".to_string()),
            level: Some("beginner".to_string()),
            content: "A resting pose.".to_string(),
            benefits: Some("Calms the breath".to_string()),
            contraindications: None,
        },
        KnowledgeEntry {
            id: "3".to_string(),
            title: "Ujjayi Breathing".to_string(),
            category: Some("breathing".to_string()),
            level: None,
            content: "Ocean breath.".to_string(),
            benefits: None,
            contraindications: None,
        },
    ]
}

/// 엔트리 → 메모리 인덱스 (저장 없이)
pub async fn index_from(entries: &[KnowledgeEntry], embedder: &dyn EmbeddingProvider) -> VectorIndex {
    let chunks = FacetChunker.chunk_all(entries).unwrap();
    build_index(chunks, embedder, 16).await.unwrap()
}
