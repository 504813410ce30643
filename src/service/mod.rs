//! QA 서비스 - 준비 상태 관리 + 질의 처리 + 기록
//!
//! 상태: Starting → Ready(pipeline) → Stopped
//! - 인덱스 로드가 끝나기 전에는 질문을 받지 않습니다.
//! - 파이프라인 에러는 로그만 남기고 사용자에게는 고정 사과 문구를 반환합니다.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::RagConfig;
use crate::embedding::{EmbeddingProvider, OpenAiEmbedding};
use crate::error::{IndexLoadError, RagError};
use crate::generation::{CompletionProvider, OpenAiCompletion};
use crate::history::{Feedback, InteractionLog, NewInteraction};
use crate::knowledge::{IndexManifest, IndexStorage, LanceIndexStore, VectorIndex};
use crate::rag::{KeywordClassifier, QaPipeline, Retriever, SafetyClassifier, Synthesizer};

/// 파이프라인 실패 시 응답
pub const APOLOGY_ANSWER: &str = "I apologize, but I encountered an error. Please try again.";

/// 질의 응답 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskResponse {
    /// 기록된 경우 피드백용 ID
    pub interaction_id: Option<String>,
    pub answer: String,
    pub sources: Vec<String>,
    pub is_unsafe: bool,
}

/// 서비스 상태
enum ServiceState {
    Starting,
    Ready(Arc<QaPipeline>),
    Stopped,
}

/// QA 서비스
pub struct QaService {
    state: RwLock<ServiceState>,
    classifier: Arc<dyn SafetyClassifier>,
    history: Option<InteractionLog>,
}

impl Default for QaService {
    fn default() -> Self {
        Self::new()
    }
}

impl QaService {
    /// Starting 상태 서비스 생성 (기록 비활성)
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ServiceState::Starting),
            classifier: Arc::new(KeywordClassifier::default()),
            history: None,
        }
    }

    pub fn with_history(mut self, history: InteractionLog) -> Self {
        self.history = Some(history);
        self
    }

    /// 설정으로 서비스 시작 (OpenAI 프로바이더)
    ///
    /// 인덱스 로드 실패는 치명적입니다.
    pub async fn start(config: &RagConfig, record_history: bool) -> anyhow::Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            OpenAiEmbedding::from_config(config).context("Failed to create embedding provider")?,
        );
        let generator: Arc<dyn CompletionProvider> = Arc::new(
            OpenAiCompletion::from_config(config).context("Failed to create completion provider")?,
        );

        Self::start_with(config, embedder, generator, record_history).await
    }

    /// 지정한 프로바이더로 시작
    ///
    /// 인덱스 로드 → 모델 일치 확인 → (선택) 기록 DB 열기 → Ready
    pub async fn start_with(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn CompletionProvider>,
        record_history: bool,
    ) -> anyhow::Result<Self> {
        let store = LanceIndexStore::new(&config.index_dir());
        let (index, manifest) = store.load().await?;
        let pipeline = assemble_pipeline(
            index,
            &manifest,
            embedder,
            generator,
            config.retrieval.top_k,
        )?;

        let mut service = Self::new();
        if record_history {
            let history = InteractionLog::open(&config.history_path())
                .context("Failed to open interaction history")?;
            service = service.with_history(history);
        }

        service.initialize(pipeline).await;
        Ok(service)
    }

    /// 파이프라인 설치 → Ready
    pub async fn initialize(&self, pipeline: QaPipeline) {
        let mut state = self.state.write().await;
        tracing::info!(
            "QA service ready ({} chunks, top_k={})",
            pipeline.retriever().index().len(),
            pipeline.top_k()
        );
        *state = ServiceState::Ready(Arc::new(pipeline));
    }

    /// 파이프라인 해제 → Stopped
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        *state = ServiceState::Stopped;
        tracing::info!("QA service stopped");
    }

    pub async fn is_ready(&self) -> bool {
        matches!(*self.state.read().await, ServiceState::Ready(_))
    }

    /// 현재 파이프라인 (준비 전/종료 후에는 NotReady)
    pub async fn pipeline(&self) -> Result<Arc<QaPipeline>, RagError> {
        match &*self.state.read().await {
            ServiceState::Ready(pipeline) => Ok(Arc::clone(pipeline)),
            ServiceState::Starting | ServiceState::Stopped => Err(RagError::NotReady),
        }
    }

    /// 질문 처리
    pub async fn ask(&self, question: &str) -> Result<AskResponse, RagError> {
        let pipeline = self.pipeline().await?;

        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::EmptyQuestion);
        }

        let is_unsafe = self.classifier.is_unsafe(question);
        if is_unsafe {
            tracing::warn!("Question flagged as potentially unsafe ({})", self.classifier.name());
        }

        let answer = match pipeline.answer_question(question, is_unsafe).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("Error processing question: {:#}", anyhow::Error::new(e));
                return Ok(AskResponse {
                    interaction_id: None,
                    answer: APOLOGY_ANSWER.to_string(),
                    sources: vec![],
                    is_unsafe: false,
                });
            }
        };

        let interaction_id = self
            .record(NewInteraction {
                question: question.to_string(),
                answer: answer.answer.clone(),
                sources: answer.sources.clone(),
                is_unsafe,
            })
            .await;

        Ok(AskResponse {
            interaction_id,
            answer: answer.answer,
            sources: answer.sources,
            is_unsafe,
        })
    }

    /// 기록된 질의에 피드백 저장 (해당 id가 있으면 true)
    pub async fn feedback(&self, interaction_id: &str, feedback: Feedback) -> anyhow::Result<bool> {
        let history = self
            .history
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Interaction history is disabled"))?;
        let id = interaction_id.to_string();

        tokio::task::spawn_blocking(move || history.set_feedback(&id, feedback)).await?
    }

    /// 기록 (실패해도 응답에는 영향 없음)
    async fn record(&self, interaction: NewInteraction) -> Option<String> {
        let history = self.history.clone()?;

        match tokio::task::spawn_blocking(move || history.record(&interaction)).await {
            Ok(Ok(id)) => Some(id),
            Ok(Err(e)) => {
                tracing::warn!("Failed to record interaction: {:#}", e);
                None
            }
            Err(e) => {
                tracing::warn!("Interaction logging task failed: {}", e);
                None
            }
        }
    }
}

// ============================================================================
// Pipeline Assembly
// ============================================================================

/// 인덱스 매니페스트와 임베딩 프로바이더 일치 확인
pub fn verify_index(
    manifest: &IndexManifest,
    embedder: &dyn EmbeddingProvider,
) -> Result<(), IndexLoadError> {
    if manifest.embedding_model != embedder.name() || manifest.dimension != embedder.dimension() {
        return Err(IndexLoadError::ModelMismatch {
            index_model: manifest.embedding_model.clone(),
            index_dimension: manifest.dimension,
            configured_model: embedder.name().to_string(),
            configured_dimension: embedder.dimension(),
        });
    }
    Ok(())
}

/// 로드된 인덱스 + 프로바이더로 파이프라인 조립
pub fn assemble_pipeline(
    index: VectorIndex,
    manifest: &IndexManifest,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn CompletionProvider>,
    top_k: usize,
) -> Result<QaPipeline, IndexLoadError> {
    verify_index(manifest, embedder.as_ref())?;

    let retriever = Retriever::new(Arc::new(index), embedder);
    Ok(QaPipeline::new(retriever, Synthesizer::new(generator), top_k))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{ingest_entries, FacetChunker, INDEX_FORMAT_VERSION};
    use crate::rag::NO_CONTEXT_ANSWER;
    use crate::testing::{
        index_from, sample_entries, yoga_embedder, FailingCompletion, RecordingCompletion,
        VocabularyEmbedder,
    };
    use chrono::Utc;
    use tempfile::TempDir;

    fn manifest_for(embedder: &dyn EmbeddingProvider, chunk_count: usize) -> IndexManifest {
        IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            embedding_model: embedder.name().to_string(),
            dimension: embedder.dimension(),
            entry_count: 3,
            chunk_count,
            source_sha256: "test".to_string(),
            built_at: Utc::now(),
        }
    }

    async fn sample_pipeline(generator: Arc<dyn CompletionProvider>) -> QaPipeline {
        let embedder = Arc::new(yoga_embedder());
        let index = index_from(&sample_entries(), embedder.as_ref()).await;
        let manifest = manifest_for(embedder.as_ref(), index.len());
        assemble_pipeline(index, &manifest, embedder, generator, 2).unwrap()
    }

    #[tokio::test]
    async fn test_not_ready_before_initialize_and_after_shutdown() {
        let service = QaService::new();
        assert!(!service.is_ready().await);
        assert!(matches!(service.ask("What is tree pose?").await, Err(RagError::NotReady)));

        service
            .initialize(sample_pipeline(Arc::new(RecordingCompletion::new("ok"))).await)
            .await;
        assert!(service.is_ready().await);

        service.shutdown().await;
        assert!(!service.is_ready().await);
        assert!(matches!(service.ask("What is tree pose?").await, Err(RagError::NotReady)));
    }

    #[tokio::test]
    async fn test_blank_question_rejected() {
        let service = QaService::new();
        service
            .initialize(sample_pipeline(Arc::new(RecordingCompletion::new("ok"))).await)
            .await;

        assert!(matches!(service.ask("   ").await, Err(RagError::EmptyQuestion)));
    }

    #[tokio::test]
    async fn test_ask_records_interaction() {
        let dir = TempDir::new().unwrap();
        let history = InteractionLog::open(&dir.path().join("history.db")).unwrap();
        let service = QaService::new().with_history(history.clone());
        service
            .initialize(sample_pipeline(Arc::new(RecordingCompletion::new("It stretches the spine."))).await)
            .await;

        let response = service
            .ask("What are the benefits of Downward Dog?")
            .await
            .unwrap();

        assert_eq!(response.answer, "It stretches the spine.");
        assert_eq!(response.sources, vec!["Downward Dog", "Downward Dog"]);
        assert!(!response.is_unsafe);

        let id = response.interaction_id.unwrap();
        let stored = history.get(&id).unwrap().unwrap();
        assert_eq!(stored.answer, "It stretches the spine.");

        assert!(service.feedback(&id, Feedback::Positive).await.unwrap());
        assert_eq!(history.get(&id).unwrap().unwrap().feedback, Some(Feedback::Positive));
        assert!(!service.feedback("nope", Feedback::Negative).await.unwrap());
    }

    #[tokio::test]
    async fn test_unsafe_question_flagged() {
        let generator = Arc::new(RecordingCompletion::new("Consult a professional."));
        let service = QaService::new();
        service.initialize(sample_pipeline(generator.clone()).await).await;

        let response = service
            .ask("Can I do downward dog during pregnancy?")
            .await
            .unwrap();

        assert!(response.is_unsafe);
        assert!(response.interaction_id.is_none());
        assert!(generator.prompts()[0].contains("IMPORTANT"));
    }

    #[tokio::test]
    async fn test_generation_failure_returns_apology() {
        let service = QaService::new();
        service
            .initialize(sample_pipeline(Arc::new(FailingCompletion)).await)
            .await;

        // 민감 질문이어도 실패 응답은 is_unsafe=false
        let response = service.ask("Downward dog after heart surgery?").await.unwrap();

        assert_eq!(response.answer, APOLOGY_ANSWER);
        assert!(response.sources.is_empty());
        assert!(!response.is_unsafe);
        assert!(!response.answer.contains("503"));
    }

    #[tokio::test]
    async fn test_empty_index_fallback() {
        let embedder = Arc::new(yoga_embedder());
        let generator = Arc::new(RecordingCompletion::new("unused"));
        let manifest = manifest_for(embedder.as_ref(), 0);
        let pipeline = assemble_pipeline(
            VectorIndex::empty(embedder.dimension()),
            &manifest,
            embedder,
            generator.clone(),
            4,
        )
        .unwrap();

        let service = QaService::new();
        service.initialize(pipeline).await;

        let response = service.ask("What is tree pose?").await.unwrap();
        assert_eq!(response.answer, NO_CONTEXT_ANSWER);
        assert!(response.sources.is_empty());
        assert!(generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_model_mismatch_rejected() {
        let built_with = yoga_embedder();
        let index = index_from(&sample_entries(), &built_with).await;
        let manifest = manifest_for(&built_with, index.len());

        let other = Arc::new(VocabularyEmbedder::new(vec!["downward", "dog"]));
        let err = assemble_pipeline(
            index,
            &manifest,
            other,
            Arc::new(RecordingCompletion::new("unused")),
            2,
        )
        .err()
        .unwrap();

        assert!(matches!(err, IndexLoadError::ModelMismatch { index_dimension: 20, configured_dimension: 2, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_asks_share_pipeline() {
        let service = Arc::new(QaService::new());
        service
            .initialize(sample_pipeline(Arc::new(RecordingCompletion::new("answer"))).await)
            .await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service.ask(&format!("Downward Dog question {}", i)).await
            }));
        }

        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.answer, "answer");
        }
    }

    fn config_in(dir: &TempDir) -> RagConfig {
        let mut config = RagConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.retrieval.top_k = 2;
        config
    }

    #[tokio::test]
    async fn test_start_after_ingest() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let embedder = Arc::new(yoga_embedder());

        let store = LanceIndexStore::new(&config.index_dir());
        ingest_entries(&sample_entries(), "test".into(), &FacetChunker, embedder.as_ref(), &store, 4)
            .await
            .unwrap();

        let generator = Arc::new(RecordingCompletion::new("  It stretches the spine.  "));
        let service = QaService::start_with(&config, embedder.clone(), generator.clone(), true)
            .await
            .unwrap();
        assert!(service.is_ready().await);

        let response = service
            .ask("What are the benefits of Downward Dog?")
            .await
            .unwrap();
        assert_eq!(response.answer, "It stretches the spine.");
        assert_eq!(response.sources, vec!["Downward Dog", "Downward Dog"]);

        let id = response.interaction_id.unwrap();
        let history = InteractionLog::open(&config.history_path()).unwrap();
        assert_eq!(history.get(&id).unwrap().unwrap().question, "What are the benefits of Downward Dog?");

        // --no-history 에 해당
        let quiet = QaService::start_with(&config, embedder, generator, false)
            .await
            .unwrap();
        let response = quiet.ask("What is Child's Pose?").await.unwrap();
        assert!(response.interaction_id.is_none());
        assert_eq!(history.list(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_without_index_fails() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        let err = QaService::start_with(
            &config,
            Arc::new(yoga_embedder()),
            Arc::new(RecordingCompletion::new("unused")),
            true,
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(
            err.downcast_ref::<IndexLoadError>(),
            Some(IndexLoadError::Missing(_))
        ));
        assert!(!config.history_path().exists());
    }

    #[tokio::test]
    async fn test_start_rejects_other_embedding_model() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let store = LanceIndexStore::new(&config.index_dir());
        ingest_entries(&sample_entries(), "test".into(), &FacetChunker, &yoga_embedder(), &store, 4)
            .await
            .unwrap();

        let err = QaService::start_with(
            &config,
            Arc::new(VocabularyEmbedder::new(vec!["downward", "dog"])),
            Arc::new(RecordingCompletion::new("unused")),
            false,
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(
            err.downcast_ref::<IndexLoadError>(),
            Some(IndexLoadError::ModelMismatch { .. })
        ));
    }
}
