//! Knowledge Entry - 지식 파일 레코드
//!
//! 지식 파일은 `KnowledgeEntry` 객체의 JSON 배열입니다.
//!
//! ```json
//! [
//!   {
//!     "id": "1",
//!     "title": "Downward Dog",
//!     "category": "pose",
//!     "level": "beginner",
//!     "content": "A foundational pose...",
//!     "benefits": "Stretches the spine",
//!     "contraindications": "Avoid with wrist injury"
//!   }
//! ]
//! ```

use anyhow::{Context, Result};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EntryError, EntryProblem};

/// 문자열 또는 숫자를 허용하는 필드
const SCALAR_FIELDS: [&str; 3] = ["id", "title", "content"];
/// 문자열만 허용하는 선택 필드
const OPTIONAL_TEXT_FIELDS: [&str; 4] = ["category", "level", "benefits", "contraindications"];

/// 지식 엔트리 (수집 후 불변)
///
/// 필수 필드(`id`, `title`, `content`)가 빠져도 변환은 성공하며,
/// 누락 검증은 청커가 엔트리 단위로 수행합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub content: String,
    #[serde(default)]
    pub benefits: Option<String>,
    #[serde(default)]
    pub contraindications: Option<String>,
}

impl KnowledgeEntry {
    /// 배열 원소 하나를 엔트리로 변환
    ///
    /// 필드 타입이 틀리면 파일 전체가 아니라 해당 엔트리만 실패합니다.
    pub fn from_value(index: usize, value: Value) -> Result<Self, EntryError> {
        let map = match &value {
            Value::Object(map) => map,
            _ => return Err(EntryError::new(index, None, EntryProblem::NotAnObject)),
        };
        let id = map.get("id").and_then(scalar_text);

        let invalid = SCALAR_FIELDS
            .iter()
            .copied()
            .find(|field| {
                !matches!(
                    map.get(*field),
                    None | Some(Value::Null | Value::String(_) | Value::Number(_))
                )
            })
            .or_else(|| {
                OPTIONAL_TEXT_FIELDS
                    .iter()
                    .copied()
                    .find(|field| !matches!(map.get(*field), None | Some(Value::Null | Value::String(_))))
            });
        if let Some(field) = invalid {
            return Err(EntryError::new(index, id, EntryProblem::InvalidType(field)));
        }

        serde_json::from_value(value).map_err(|e| {
            tracing::debug!("Entry #{} rejected: {}", index, e);
            EntryError::new(index, id, EntryProblem::NotAnObject)
        })
    }

    /// 비어있지 않은 효능 텍스트
    pub fn benefits_text(&self) -> Option<&str> {
        non_blank(self.benefits.as_deref())
    }

    /// 비어있지 않은 금기사항 텍스트
    pub fn contraindications_text(&self) -> Option<&str> {
        non_blank(self.contraindications.as_deref())
    }

    /// 누락된 필수 필드 이름 (없으면 None)
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.id.trim().is_empty() {
            Some("id")
        } else if self.title.trim().is_empty() {
            Some("title")
        } else if self.content.trim().is_empty() {
            Some("content")
        } else {
            None
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// 에러 메시지용 ID (문자열/숫자일 때만)
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(Some(s)).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 문자열 또는 숫자를 문자열로 (null/누락은 빈 문자열)
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(String::new()),
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// 지식 파일(JSON 배열) 파싱
///
/// 배열이 아니거나 JSON 문법 오류면 전체 실패, 원소별 변환 결과는 순서대로 반환합니다.
pub fn parse_entries(json: &str) -> Result<Vec<Result<KnowledgeEntry, EntryError>>> {
    let values: Vec<Value> =
        serde_json::from_str(json).context("Knowledge file must be a JSON array of entries")?;

    Ok(values
        .into_iter()
        .enumerate()
        .map(|(index, value)| KnowledgeEntry::from_value(index, value))
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
