//! Entry Chunking Module
//!
//! 지식 엔트리 하나를 독립적으로 검색 가능한 청크 1~3개로 나눕니다.
//! - main: 제목 + 본문 (항상)
//! - benefits: 효능 (있을 때만)
//! - safety: 금기사항 (있을 때만)
//!
//! 각 청크 텍스트 앞에는 제목 헤딩을 붙여 자세 이름으로도 매칭되게 합니다.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{EntryError, EntryProblem, IngestionError};

use super::entry::KnowledgeEntry;

// ============================================================================
// Types
// ============================================================================

/// 청크 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    Main,
    Benefits,
    Safety,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Main => "main",
            ChunkType::Benefits => "benefits",
            ChunkType::Safety => "safety",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(ChunkType::Main),
            "benefits" => Ok(ChunkType::Benefits),
            "safety" => Ok(ChunkType::Safety),
            other => Err(format!("unknown chunk type: {}", other)),
        }
    }
}

/// 청크 출처 메타데이터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub id: String,
    pub title: String,
    pub category: Option<String>,
    pub level: Option<String>,
    pub chunk_type: ChunkType,
}

/// 검색 단위 청크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 엔트리 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 엔트리 하나를 청크로 분할
    ///
    /// 반환되는 `EntryError::index`는 0이며, 위치는 `chunk_all`이 채웁니다.
    fn chunk(&self, entry: &KnowledgeEntry) -> Result<Vec<Chunk>, EntryError>;

    /// 청커 이름
    fn name(&self) -> &'static str;

    /// 전체 엔트리 청킹
    ///
    /// 실패한 엔트리를 건너뛰지 않고 모두 모아 한 번에 보고합니다.
    /// (id, chunk_type) 중복도 임베딩 전에 여기서 걸러내며, 양쪽 엔트리를 모두 보고합니다.
    fn chunk_all(&self, entries: &[KnowledgeEntry]) -> Result<Vec<Chunk>, IngestionError> {
        let mut chunks = Vec::with_capacity(entries.len() * 3);
        let mut failures: Vec<EntryError> = Vec::new();
        // (id, chunk_type) → 처음 등장한 엔트리 위치
        let mut seen: HashMap<(String, ChunkType), usize> = HashMap::new();

        for (index, entry) in entries.iter().enumerate() {
            let entry_chunks = match self.chunk(entry) {
                Ok(entry_chunks) => entry_chunks,
                Err(e) => {
                    failures.push(EntryError { index, ..e });
                    continue;
                }
            };

            let clash = entry_chunks.iter().find_map(|c| {
                seen.get(&(c.metadata.id.clone(), c.metadata.chunk_type))
                    .map(|first| (*first, c.metadata.id.clone()))
            });

            if let Some((first, id)) = clash {
                if !failures.iter().any(|f| f.index == first) {
                    failures.push(EntryError::new(
                        first,
                        Some(id.clone()),
                        EntryProblem::DuplicateId { other: index },
                    ));
                }
                failures.push(EntryError::new(
                    index,
                    Some(id),
                    EntryProblem::DuplicateId { other: first },
                ));
                continue;
            }

            for c in &entry_chunks {
                seen.insert((c.metadata.id.clone(), c.metadata.chunk_type), index);
            }
            chunks.extend(entry_chunks);
        }

        if !failures.is_empty() {
            failures.sort_by_key(|f| f.index);
            return Err(IngestionError::InvalidEntries(failures));
        }

        Ok(chunks)
    }
}

// ============================================================================
// FacetChunker
// ============================================================================

/// 항목(facet)별 청커
///
/// main → benefits → safety 순서로 생성합니다.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacetChunker;

impl FacetChunker {
    fn make_chunk(entry: &KnowledgeEntry, chunk_type: ChunkType, heading: String, body: &str) -> Chunk {
        Chunk {
            text: format!("{}\n\n{}", heading, body),
            metadata: ChunkMetadata {
                id: entry.id.clone(),
                title: entry.title.clone(),
                category: entry.category.clone(),
                level: entry.level.clone(),
                chunk_type,
            },
        }
    }
}

impl Chunker for FacetChunker {
    fn chunk(&self, entry: &KnowledgeEntry) -> Result<Vec<Chunk>, EntryError> {
        if let Some(field) = entry.missing_field() {
            let id = Some(entry.id.trim())
                .filter(|id| !id.is_empty())
                .map(str::to_string);
            return Err(EntryError::new(0, id, EntryProblem::MissingField(field)));
        }

        let mut chunks = Vec::with_capacity(3);

        chunks.push(Self::make_chunk(
            entry,
            ChunkType::Main,
            entry.title.clone(),
            &entry.content,
        ));

        if let Some(benefits) = entry.benefits_text() {
            chunks.push(Self::make_chunk(
                entry,
                ChunkType::Benefits,
                format!("{} - Benefits", entry.title),
                benefits,
            ));
        }

        if let Some(contraindications) = entry.contraindications_text() {
            chunks.push(Self::make_chunk(
                entry,
                ChunkType::Safety,
                format!("{} - Contraindications and Safety", entry.title),
                contraindications,
            ));
        }

        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "FacetChunker"
    }
}

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(FacetChunker)
}

// ============================================================================
// Tests
// ============================================================================
