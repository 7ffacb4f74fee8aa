#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use docket::config::{ChatConfig, ChunkingConfig, Config, DbConfig, EmbeddingConfig, LimitsConfig, RetrievalConfig, StorageConfig};
use docket::embedding::{vec_to_blob, Embedder};
use docket::migrate;
use docket::storage::ArtifactStore;

/// Deterministic embedder for tests. Returns the fixed vector when one is
/// set, otherwise a vector derived from the text bytes.
pub struct FakeEmbedder {
    pub dims: usize,
    pub fixed: Option<Vec<f32>>,
}

impl FakeEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims, fixed: None }
    }

    pub fn returning(vector: Vec<f32>) -> Self {
        Self {
            dims: vector.len(),
            fixed: Some(vector),
        }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }
        let bytes = text.as_bytes();
        Ok((0..self.dims)
            .map(|i| {
                let b = bytes.get(i % bytes.len().max(1)).copied().unwrap_or(0);
                (b as f32 + i as f32) / 255.0
            })
            .collect())
    }
}

pub struct TestEnv {
    pub pool: SqlitePool,
    pub store: ArtifactStore,
    pub config: Config,
    _tmp: tempfile::TempDir,
}

pub async fn setup() -> TestEnv {
    let tmp = tempfile::TempDir::new().unwrap();
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let store = ArtifactStore::new(tmp.path());
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("docket.sqlite"),
        },
        storage: StorageConfig {
            root: tmp.path().to_path_buf(),
        },
        chunking: ChunkingConfig::default(),
        embedding: EmbeddingConfig::default(),
        limits: LimitsConfig::default(),
        retrieval: RetrievalConfig::default(),
        chat: ChatConfig::default(),
    };
    TestEnv {
        pool,
        store,
        config,
        _tmp: tmp,
    }
}

pub async fn insert_artifact(
    pool: &SqlitePool,
    file_name: &str,
    file_path: &str,
    size_bytes: i64,
) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO artifacts (id, file_name, file_path, content_type, size_bytes,
                               status, created_at, updated_at)
        VALUES (?, ?, ?, 'application/octet-stream', ?, 'pending', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(file_name)
    .bind(file_path)
    .bind(size_bytes)
    .bind(chrono::Utc::now().timestamp())
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await
    .unwrap();
    id
}

pub async fn insert_artifact_chunk(
    pool: &SqlitePool,
    artifact_id: &str,
    index: i64,
    text: &str,
    embedding: &[f32],
) {
    sqlx::query(
        "INSERT INTO artifact_chunks (id, artifact_id, chunk_index, text, hash, embedding) VALUES (?, ?, ?, ?, '', ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(artifact_id)
    .bind(index)
    .bind(text)
    .bind(vec_to_blob(embedding))
    .execute(pool)
    .await
    .unwrap();
}

pub fn arc_embedder(embedder: FakeEmbedder) -> Arc<dyn Embedder> {
    Arc::new(embedder)
}
