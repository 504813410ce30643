//! LanceDB Index Storage - 벡터 인덱스 영구 저장
//!
//! 저장 위치: `{index_dir}/v{INDEX_FORMAT_VERSION}/`
//! - `manifest.json`: 모델/차원/청크 수/원본 해시
//! - `chunks.lance`: 청크 + 임베딩 테이블
//!
//! 저장은 항상 전체 교체이며, 매니페스트를 마지막에 기록합니다.
//! 중간에 실패하면 매니페스트가 없으므로 로드 시 "인덱스 없음"이 됩니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::error::IndexLoadError;

use super::chunker::{Chunk, ChunkMetadata, ChunkType};
use super::vector::{EmbeddedChunk, IndexManifest, IndexStorage, VectorIndex, INDEX_FORMAT_VERSION};

/// 청크 테이블 이름
const TABLE_NAME: &str = "chunks";
const MANIFEST_FILE: &str = "manifest.json";
const LANCE_DIR: &str = "chunks.lance";

// ============================================================================
// LanceIndexStore
// ============================================================================

/// LanceDB 기반 인덱스 저장소
pub struct LanceIndexStore {
    root: PathBuf,
}

impl LanceIndexStore {
    /// 인덱스 루트 디렉토리 아래 현재 형식 버전 경로 사용
    ///
    /// # Arguments
    /// * `index_dir` - 인덱스 루트 (예: ~/.yoga-rag/index)
    pub fn new(index_dir: &Path) -> Self {
        Self {
            root: index_dir.join(format!("v{}", INDEX_FORMAT_VERSION)),
        }
    }

    /// 버전 디렉토리 경로
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    async fn connect(&self) -> Result<Connection> {
        let lance_path = self.root.join(LANCE_DIR);
        let path_str = lance_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")
    }

    /// 청크 테이블 스키마
    fn create_schema(dimension: usize) -> Result<Schema> {
        let dimension = i32::try_from(dimension).context("Embedding dimension too large")?;
        Ok(Schema::new(vec![
            Field::new("position", DataType::Int64, false),
            Field::new("entry_id", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, true),
            Field::new("level", DataType::Utf8, true),
            Field::new("chunk_type", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ]))
    }

    /// 인덱스를 Arrow RecordBatch로 변환
    fn index_to_batch(index: &VectorIndex) -> Result<RecordBatch> {
        let chunks = index.chunks();
        let dimension = i32::try_from(index.dimension()).context("Embedding dimension too large")?;

        let positions: Vec<i64> = (0..chunks.len() as i64).collect();
        let entry_ids: Vec<&str> = chunks.iter().map(|c| c.chunk.metadata.id.as_str()).collect();
        let titles: Vec<&str> = chunks.iter().map(|c| c.chunk.metadata.title.as_str()).collect();
        let categories: Vec<Option<&str>> = chunks
            .iter()
            .map(|c| c.chunk.metadata.category.as_deref())
            .collect();
        let levels: Vec<Option<&str>> = chunks
            .iter()
            .map(|c| c.chunk.metadata.level.as_deref())
            .collect();
        let chunk_types: Vec<&str> = chunks
            .iter()
            .map(|c| c.chunk.metadata.chunk_type.as_str())
            .collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.chunk.text.as_str()).collect();

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = chunks
            .iter()
            .flat_map(|c| c.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(index.dimension())?),
            vec![
                Arc::new(Int64Array::from(positions)),
                Arc::new(StringArray::from(entry_ids)),
                Arc::new(StringArray::from(titles)),
                Arc::new(StringArray::from(categories)),
                Arc::new(StringArray::from(levels)),
                Arc::new(StringArray::from(chunk_types)),
                Arc::new(StringArray::from(texts)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// RecordBatch에서 (position, 청크) 추출
    fn batch_to_chunks(batch: &RecordBatch, dimension: usize) -> Result<Vec<(i64, EmbeddedChunk)>> {
        let positions = column::<Int64Array>(batch, "position")?;
        let entry_ids = column::<StringArray>(batch, "entry_id")?;
        let titles = column::<StringArray>(batch, "title")?;
        let categories = column::<StringArray>(batch, "category")?;
        let levels = column::<StringArray>(batch, "level")?;
        let chunk_types = column::<StringArray>(batch, "chunk_type")?;
        let texts = column::<StringArray>(batch, "text")?;
        let embeddings = column::<FixedSizeListArray>(batch, "embedding")?;

        if embeddings.value_length() as usize != dimension {
            anyhow::bail!(
                "Stored embedding dimension {} does not match manifest dimension {}",
                embeddings.value_length(),
                dimension
            );
        }

        let mut rows = Vec::with_capacity(batch.num_rows());

        for i in 0..batch.num_rows() {
            let chunk_type: ChunkType = chunk_types
                .value(i)
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;

            let vector = embeddings.value(i);
            let vector = vector
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| anyhow::anyhow!("Embedding values are not Float32"))?;

            rows.push((
                positions.value(i),
                EmbeddedChunk {
                    chunk: Chunk {
                        text: texts.value(i).to_string(),
                        metadata: ChunkMetadata {
                            id: entry_ids.value(i).to_string(),
                            title: titles.value(i).to_string(),
                            category: optional_value(categories, i),
                            level: optional_value(levels, i),
                            chunk_type,
                        },
                    },
                    embedding: vector.values().to_vec(),
                },
            ));
        }

        Ok(rows)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(db: &Connection) -> bool {
        db.table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }

    /// 테이블에서 청크 전체 읽기 (삽입 순서로 정렬)
    async fn read_chunks(&self, manifest: &IndexManifest) -> Result<Vec<EmbeddedChunk>, IndexLoadError> {
        let db = self.connect().await.map_err(IndexLoadError::Storage)?;

        if !Self::table_exists(&db).await {
            return Err(IndexLoadError::Corrupt(format!(
                "manifest lists {} chunks but the chunk table is missing",
                manifest.chunk_count
            )));
        }

        let table = db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open chunk table")
            .map_err(IndexLoadError::Storage)?;

        let row_count = table
            .count_rows(None)
            .await
            .context("Failed to count rows")
            .map_err(IndexLoadError::Storage)?;

        if row_count != manifest.chunk_count {
            return Err(IndexLoadError::Corrupt(format!(
                "manifest lists {} chunks but the table holds {}",
                manifest.chunk_count, row_count
            )));
        }

        let stream = table
            .query()
            .limit(row_count)
            .execute()
            .await
            .context("Failed to scan chunk table")
            .map_err(IndexLoadError::Storage)?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .context("Failed to read chunk table")
            .map_err(IndexLoadError::Storage)?;

        let mut rows = Vec::with_capacity(row_count);
        for batch in &batches {
            let parsed = Self::batch_to_chunks(batch, manifest.dimension)
                .map_err(|e| IndexLoadError::Corrupt(format!("{:#}", e)))?;
            rows.extend(parsed);
        }

        rows.sort_by_key(|(position, _)| *position);
        Ok(rows.into_iter().map(|(_, chunk)| chunk).collect())
    }
}

#[async_trait]
impl IndexStorage for LanceIndexStore {
    async fn save(&self, index: &VectorIndex, manifest: &IndexManifest) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .context("Failed to create index directory")?;

        // 기존 매니페스트부터 제거 (중간 실패 시 반쪽 인덱스를 읽지 않도록)
        let manifest_path = self.manifest_path();
        if manifest_path.exists() {
            tokio::fs::remove_file(&manifest_path)
                .await
                .context("Failed to remove previous manifest")?;
        }

        let db = self.connect().await?;
        if Self::table_exists(&db).await {
            db.drop_table(TABLE_NAME)
                .await
                .context("Failed to drop previous chunk table")?;
        }

        if !index.is_empty() {
            let batch = Self::index_to_batch(index)?;
            let schema = batch.schema();
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            db.create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create chunk table")?;
        }

        let json = serde_json::to_string_pretty(manifest).context("Failed to serialize manifest")?;
        tokio::fs::write(&manifest_path, json)
            .await
            .context("Failed to write manifest")?;

        tracing::info!(
            "Saved index: {} chunks ({}d, {}) at {:?}",
            index.len(),
            index.dimension(),
            manifest.embedding_model,
            self.root
        );

        Ok(())
    }

    async fn load(&self) -> Result<(VectorIndex, IndexManifest), IndexLoadError> {
        let manifest = match self.manifest().await {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return Err(IndexLoadError::Missing(self.root.clone())),
            Err(e) => return Err(IndexLoadError::Corrupt(format!("{:#}", e))),
        };

        if manifest.format_version != INDEX_FORMAT_VERSION {
            return Err(IndexLoadError::Version {
                found: manifest.format_version,
                expected: INDEX_FORMAT_VERSION,
            });
        }

        if manifest.chunk_count == 0 {
            tracing::warn!("Loaded an empty index; every question will get the fallback answer");
            return Ok((VectorIndex::empty(manifest.dimension), manifest));
        }

        let chunks = self.read_chunks(&manifest).await?;
        let index = VectorIndex::new(manifest.dimension, chunks)
            .map_err(|e| IndexLoadError::Corrupt(e.to_string()))?;

        tracing::info!(
            "Loaded index: {} chunks from {} entries ({})",
            index.len(),
            manifest.entry_count,
            manifest.embedding_model
        );

        Ok((index, manifest))
    }

    async fn manifest(&self) -> Result<Option<IndexManifest>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .context("Failed to read manifest")?;
        let manifest = serde_json::from_str(&content).context("Failed to parse manifest")?;
        Ok(Some(manifest))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 이름으로 컬럼을 찾아 타입 변환
fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| anyhow::anyhow!("Missing or mistyped {} column", name))
}

fn optional_value(array: &StringArray, i: usize) -> Option<String> {
    if array.is_null(i) {
        None
    } else {
        Some(array.value(i).to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
