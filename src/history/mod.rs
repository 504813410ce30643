//! Interaction History - rusqlite 기반 질의 기록 + 피드백 저장소
//!
//! 답변된 질문마다 한 행을 기록하고, 사용자가 나중에 긍정/부정 피드백을 남길 수 있습니다.
//! 저장 위치: {data_dir}/history.db

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Types
// ============================================================================

/// 사용자 피드백
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::Positive => "positive",
            Feedback::Negative => "negative",
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feedback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "positive" | "up" | "+" => Ok(Feedback::Positive),
            "negative" | "down" | "-" => Ok(Feedback::Negative),
            other => Err(format!(
                "invalid feedback '{}': expected 'positive' or 'negative'",
                other
            )),
        }
    }
}

/// 기록된 질의
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub is_unsafe: bool,
    pub feedback: Option<Feedback>,
    pub created_at: DateTime<Utc>,
}

/// 새 질의 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewInteraction {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub is_unsafe: bool,
}

/// 기록 통계
#[derive(Debug, Clone, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub unsafe_count: usize,
    pub positive: usize,
    pub negative: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// InteractionLog
// ============================================================================

const SELECT_COLUMNS: &str =
    "SELECT id, question, answer, sources, is_unsafe, feedback, created_at FROM interactions";

/// 질의 기록 저장소
///
/// 커넥션은 `Arc<Mutex<_>>`로 공유되므로 복제해서 블로킹 태스크로 넘길 수 있습니다.
#[derive(Clone)]
pub struct InteractionLog {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl InteractionLog {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let log = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        log.initialize()?;
        Ok(log)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS interactions (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                sources TEXT NOT NULL,
                is_unsafe INTEGER NOT NULL DEFAULT 0,
                feedback TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create interactions table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_interactions_created_at ON interactions(created_at)",
            [],
        )
        .context("Failed to create created_at index")?;

        tracing::debug!("Interaction history initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 질의 기록 (생성된 UUID 반환)
    pub fn record(&self, interaction: &NewInteraction) -> Result<String> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let id = Uuid::new_v4().to_string();
        let sources = serde_json::to_string(&interaction.sources)
            .context("Failed to serialize sources")?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        conn.execute(
            "INSERT INTO interactions (id, question, answer, sources, is_unsafe, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                interaction.question,
                interaction.answer,
                sources,
                interaction.is_unsafe,
                now
            ],
        )
        .context("Failed to insert interaction")?;

        tracing::debug!("Recorded interaction {}", id);
        Ok(id)
    }

    /// 피드백 기록 (해당 id가 있으면 true)
    pub fn set_feedback(&self, id: &str, feedback: Feedback) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let rows = conn
            .execute(
                "UPDATE interactions SET feedback = ?1 WHERE id = ?2",
                params![feedback.as_str(), id],
            )
            .context("Failed to update feedback")?;

        Ok(rows > 0)
    }

    /// ID로 조회
    pub fn get(&self, id: &str) -> Result<Option<Interaction>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;
        let interaction = stmt
            .query_row(params![id], row_to_interaction)
            .optional()
            .context("Failed to query interaction")?;

        Ok(interaction)
    }

    /// 최근 기록 목록 (최신순)
    pub fn list(&self, limit: usize) -> Result<Vec<Interaction>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            SELECT_COLUMNS
        ))?;

        let mut interactions = Vec::new();
        for row in stmt.query_map(params![limit as i64], row_to_interaction)? {
            match row {
                Ok(interaction) => interactions.push(interaction),
                Err(e) => tracing::warn!("Skipping unreadable interaction row: {}", e),
            }
        }

        Ok(interactions)
    }

    /// 기록 통계
    pub fn stats(&self) -> Result<HistoryStats> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let (total, unsafe_count, positive, negative): (i64, i64, i64, i64) = conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(is_unsafe), 0),
                    COALESCE(SUM(feedback = 'positive'), 0),
                    COALESCE(SUM(feedback = 'negative'), 0)
                 FROM interactions",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .context("Failed to compute history stats")?;

        Ok(HistoryStats {
            total: total as usize,
            unsafe_count: unsafe_count as usize,
            positive: positive as usize,
            negative: negative as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_interaction(row: &Row<'_>) -> rusqlite::Result<Interaction> {
    let id: String = row.get(0)?;
    let sources: String = row.get(3)?;
    let feedback: Option<String> = row.get(5)?;

    let sources = match serde_json::from_str(&sources) {
        Ok(sources) => sources,
        Err(e) => {
            tracing::warn!("Interaction {} has unreadable sources ({}), showing none", id, e);
            Vec::new()
        }
    };

    Ok(Interaction {
        id,
        question: row.get(1)?,
        answer: row.get(2)?,
        sources,
        is_unsafe: row.get(4)?,
        feedback: feedback.and_then(|f| f.parse().ok()),
        created_at: parse_datetime(row.get::<_, String>(6)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
