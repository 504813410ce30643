//! CLI 모듈
//!
//! yoga-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{get_data_dir, RagConfig};
use crate::embedding::{has_api_key, EmbeddingProvider, OpenAiEmbedding};
use crate::error::IngestionError;
use crate::history::{Feedback, InteractionLog};
use crate::knowledge::{default_chunker, ingest_file, IndexStorage, LanceIndexStore};
use crate::rag::{Retriever, SAFETY_NOTICE};
use crate::service::{verify_index, QaService};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "yoga-rag")]
#[command(version, about = "요가 지식베이스 RAG 질의응답", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (기본: ~/.local/share/.yoga-rag 또는 YOGA_RAG_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 지식 파일(JSON)로 벡터 인덱스 빌드
    Ingest {
        /// 지식 파일 경로 (KnowledgeEntry 배열)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// 질문에 답변
    Ask {
        /// 질문
        question: String,

        /// 검색할 청크 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 질의 기록 남기지 않기
        #[arg(long)]
        no_history: bool,
    },

    /// 검색만 수행 (답변 생성 없음)
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// 답변에 피드백 남기기
    Feedback {
        /// 질의 ID (ask 출력 참조)
        id: String,

        /// positive | negative
        value: Feedback,
    },

    /// 최근 질의 기록
    History {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir.unwrap_or_else(get_data_dir);

    match cli.command {
        Commands::Ingest { file } => cmd_ingest(&data_dir, &file).await,
        Commands::Ask {
            question,
            top_k,
            no_history,
        } => cmd_ask(&data_dir, &question, top_k, no_history).await,
        Commands::Search { query, top_k } => cmd_search(&data_dir, &query, top_k).await,
        Commands::Feedback { id, value } => cmd_feedback(&data_dir, &id, value).await,
        Commands::History { limit } => cmd_history(&data_dir, limit).await,
        Commands::Status => cmd_status(&data_dir).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 설정 로드 + CLI 플래그 적용
fn load_config(data_dir: &Path, top_k: Option<usize>) -> Result<RagConfig> {
    apply_top_k(RagConfig::load(data_dir)?, top_k)
}

/// --top-k 플래그 적용 (설정 파일/환경변수보다 우선)
fn apply_top_k(mut config: RagConfig, top_k: Option<usize>) -> Result<RagConfig> {
    if let Some(top_k) = top_k {
        config.retrieval.top_k = top_k;
        config.validate().context("Invalid --top-k")?;
    }
    Ok(config)
}

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export OPENAI_API_KEY=your-api-key"
        );
    }
    Ok(())
}

/// 수집 명령어 (ingest)
///
/// 지식 파일을 청킹/임베딩하여 인덱스를 통째로 교체합니다.
async fn cmd_ingest(data_dir: &Path, file: &Path) -> Result<()> {
    require_api_key()?;
    let config = load_config(data_dir, None)?;

    let embedder = OpenAiEmbedding::from_config(&config).context("임베딩 프로바이더 생성 실패")?;
    let store = LanceIndexStore::new(&config.index_dir());
    let chunker = default_chunker();

    println!("[*] 지식 파일 수집 중: {}", file.display());

    let result = ingest_file(
        file,
        chunker.as_ref(),
        &embedder,
        &store,
        config.embedding.batch_size,
    )
    .await;

    let report = match result {
        Ok(report) => report,
        Err(IngestionError::InvalidEntries(failures)) => {
            println!("[!] 유효하지 않은 엔트리 {} 건:", failures.len());
            for failure in &failures {
                println!("    - {}", failure);
            }
            bail!("인덱스를 저장하지 않았습니다");
        }
        Err(e) => return Err(e).context("수집 실패"),
    };

    println!("[OK] 인덱스 빌드 완료");
    println!("     엔트리: {}", report.entry_count);
    println!("     청크: {}", report.chunk_count);
    println!("     모델: {} ({}d)", report.embedding_model, report.dimension);
    println!("     저장 위치: {}", store.path().display());

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    data_dir: &Path,
    question: &str,
    top_k: Option<usize>,
    no_history: bool,
) -> Result<()> {
    require_api_key()?;
    let config = load_config(data_dir, top_k)?;

    let service = QaService::start(&config, !no_history)
        .await
        .context("QA 서비스 시작 실패")?;

    let response = service.ask(question).await?;
    service.shutdown().await;

    if response.is_unsafe {
        println!("[!] {}", SAFETY_NOTICE);
        println!();
    }

    println!("{}", response.answer);
    println!();

    if !response.sources.is_empty() {
        println!("출처:");
        for (i, source) in response.sources.iter().enumerate() {
            println!("  {}. {}", i + 1, source);
        }
    }

    if let Some(id) = response.interaction_id {
        println!();
        println!("[*] 질의 ID: {}", id);
        println!("    피드백: yoga-rag feedback {} positive|negative", id);
    }

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(data_dir: &Path, query: &str, top_k: Option<usize>) -> Result<()> {
    require_api_key()?;
    let config = load_config(data_dir, top_k)?;

    let store = LanceIndexStore::new(&config.index_dir());
    let (index, manifest) = store.load().await.context("인덱스 로드 실패")?;

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(OpenAiEmbedding::from_config(&config).context("임베딩 프로바이더 생성 실패")?);
    verify_index(&manifest, embedder.as_ref())?;

    println!("[*] 검색 중: \"{}\"", query);

    let retriever = Retriever::new(Arc::new(index), embedder);
    let result = retriever
        .retrieve(query, config.retrieval.top_k)
        .await
        .context("검색 실패")?;

    if result.sources.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", result.sources.len());

    for (i, source) in result.sources.iter().enumerate() {
        println!(
            "{}. [{}] [점수: {:.4}] {} (#{})",
            i + 1,
            source.chunk_type,
            source.score,
            source.title,
            source.id
        );
        if let Some(ref category) = source.category {
            println!("   분류: {}", category);
        }
        println!();
    }

    println!("컨텍스트:\n{}", truncate_text(&result.context, 400));

    Ok(())
}

/// 피드백 명령어 (feedback)
async fn cmd_feedback(data_dir: &Path, id: &str, value: Feedback) -> Result<()> {
    let config = load_config(data_dir, None)?;
    let history = InteractionLog::open(&config.history_path()).context("질의 기록 DB 열기 실패")?;

    let service = QaService::new().with_history(history);
    if service.feedback(id, value).await? {
        println!("[OK] 피드백 저장: {} → {}", id, value);
    } else {
        bail!("ID '{}'인 질의를 찾을 수 없습니다", id);
    }

    Ok(())
}

/// 기록 명령어 (history)
async fn cmd_history(data_dir: &Path, limit: usize) -> Result<()> {
    let config = load_config(data_dir, None)?;
    let history = InteractionLog::open(&config.history_path()).context("질의 기록 DB 열기 실패")?;

    let interactions = history.list(limit).context("질의 기록 조회 실패")?;

    if interactions.is_empty() {
        println!("[!] 질의 기록이 없습니다.");
        return Ok(());
    }

    println!("[OK] 최근 질의 ({} 건):\n", interactions.len());

    for interaction in interactions {
        let flag = if interaction.is_unsafe { " [민감]" } else { "" };
        let feedback = interaction
            .feedback
            .map(|f| f.to_string())
            .unwrap_or_else(|| "-".to_string());

        println!("  {}{}", interaction.id, flag);
        println!("        Q: {}", truncate_text(&interaction.question, 80));
        println!("        A: {}", truncate_text(&interaction.answer, 80));
        println!(
            "        {} | 출처 {} | 피드백 {}",
            interaction.created_at.format("%Y-%m-%d %H:%M"),
            interaction.sources.len(),
            feedback
        );
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(data_dir: &Path) -> Result<()> {
    println!("yoga-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    let config = match RagConfig::load(data_dir) {
        Ok(config) => config,
        Err(e) => {
            println!("[!] 설정 오류: {:#}", e);
            return Ok(());
        }
    };
    println!(
        "[*] 모델: 임베딩 {} / 생성 {} (top_k={})",
        config.embedding.model, config.generation.model, config.retrieval.top_k
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }

    let store = LanceIndexStore::new(&config.index_dir());
    match store.manifest().await {
        Ok(Some(manifest)) => {
            println!(
                "[OK] 벡터 인덱스: {} 청크 / {} 엔트리",
                manifest.chunk_count, manifest.entry_count
            );
            println!(
                "     {} ({}d), 빌드 {}",
                manifest.embedding_model,
                manifest.dimension,
                manifest.built_at.format("%Y-%m-%d %H:%M")
            );
            println!("     원본 SHA-256: {}", truncate_text(&manifest.source_sha256, 16));
        }
        Ok(None) => println!("[!] 벡터 인덱스: 없음 (yoga-rag ingest --file <json>)"),
        Err(e) => println!("[!] 인덱스 매니페스트 읽기 실패: {:#}", e),
    }

    let history_path = config.history_path();
    if history_path.exists() {
        match InteractionLog::open(&history_path).and_then(|log| log.stats()) {
            Ok(stats) => {
                let size = std::fs::metadata(&stats.db_path)
                    .map(|m| m.len() as usize)
                    .unwrap_or(0);
                println!(
                    "[OK] 질의 기록: {} 건 (민감 {}, 긍정 {}, 부정 {}) {}",
                    stats.total,
                    stats.unsafe_count,
                    stats.positive,
                    stats.negative,
                    format_bytes(size)
                );
            }
            Err(e) => println!("[!] 질의 기록 통계 조회 실패: {}", e),
        }
    } else {
        println!("[*] 질의 기록: 없음");
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask_flags() {
        let cli = Cli::parse_from([
            "yoga-rag",
            "--data-dir",
            "/tmp/yoga",
            "ask",
            "What is tree pose?",
            "--top-k",
            "2",
            "--no-history",
        ]);

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/yoga")));
        match cli.command {
            Commands::Ask {
                question,
                top_k,
                no_history,
            } => {
                assert_eq!(question, "What is tree pose?");
                assert_eq!(top_k, Some(2));
                assert!(no_history);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_parse_feedback_value() {
        let cli = Cli::parse_from(["yoga-rag", "feedback", "abc", "negative"]);
        assert!(matches!(
            cli.command,
            Commands::Feedback { value: Feedback::Negative, .. }
        ));

        assert!(Cli::try_parse_from(["yoga-rag", "feedback", "abc", "meh"]).is_err());
    }

    #[test]
    fn test_top_k_flag_validated() {
        let dir = TempDir::new().unwrap();
        let loaded = || RagConfig::load_with(dir.path(), |_| None).unwrap();

        assert!(apply_top_k(loaded(), Some(51)).is_err());
        assert_eq!(apply_top_k(loaded(), Some(7)).unwrap().retrieval.top_k, 7);
        assert_eq!(apply_top_k(loaded(), None).unwrap().retrieval.top_k, 4);
    }

    #[tokio::test]
    async fn test_feedback_unknown_id_fails() {
        let dir = TempDir::new().unwrap();
        assert!(cmd_feedback(dir.path(), "missing", Feedback::Positive).await.is_err());
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }
}
