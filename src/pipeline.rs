//! Ingestion pipeline: extract, buffer, chunk, embed, store.
//!
//! Three record kinds share one lifecycle: uploaded artifacts, parsed email
//! bodies, and email attachments. Each moves PENDING → PROCESSING →
//! COMPLETED or FAILED; terminal states only re-enter PROCESSING on a
//! forced run. The PROCESSING claim is a single conditional UPDATE, so two
//! concurrent runs over the same record resolve by `rows_affected`: exactly
//! one wins, the loser gets a guard error and mutates nothing.
//!
//! Failures after the claim are written back as FAILED plus the error
//! message. Chunks inserted before the failure stay in place; the forced
//! re-run that retries the record clears them first.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::{chunk_hash, RollingBuffer, TextChunker};
use crate::config::Config;
use crate::embedding::{vec_to_blob, Embedder};
use crate::error::PipelineError;
use crate::extract::{self, FileFormat};
use crate::models::Status;
use crate::storage::ArtifactStore;

/// The three record kinds that own embedded chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTarget {
    Artifact,
    Email,
    Attachment,
}

impl EmbedTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            EmbedTarget::Artifact => "artifact",
            EmbedTarget::Email => "email",
            EmbedTarget::Attachment => "attachment",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            EmbedTarget::Artifact => "artifacts",
            EmbedTarget::Email => "parsed_emails",
            EmbedTarget::Attachment => "email_attachments",
        }
    }

    fn status_column(&self) -> &'static str {
        match self {
            EmbedTarget::Artifact => "status",
            _ => "embedding_status",
        }
    }

    fn error_column(&self) -> &'static str {
        match self {
            EmbedTarget::Artifact => "error_message",
            _ => "embedding_error",
        }
    }

    pub(crate) fn chunk_table(&self) -> &'static str {
        match self {
            EmbedTarget::Artifact => "artifact_chunks",
            EmbedTarget::Email => "email_chunks",
            EmbedTarget::Attachment => "attachment_chunks",
        }
    }

    pub(crate) fn chunk_owner_column(&self) -> &'static str {
        match self {
            EmbedTarget::Artifact => "artifact_id",
            EmbedTarget::Email => "parsed_email_id",
            EmbedTarget::Attachment => "attachment_id",
        }
    }
}

#[derive(Debug)]
pub struct ProcessSummary {
    pub chunk_count: usize,
}

/// Claims the PROCESSING state for a record, or explains why not.
///
/// Without `force`, only PENDING records are claimable; COMPLETED and
/// FAILED both count as already processed. With `force`, terminal records
/// are claimable too; a record mid-PROCESSING is never claimable. One
/// conditional UPDATE decides the winner under concurrency.
pub async fn claim_processing(
    pool: &SqlitePool,
    target: EmbedTarget,
    id: &str,
    force: bool,
) -> Result<(), PipelineError> {
    let allowed = if force {
        "('pending', 'failed', 'completed')"
    } else {
        "('pending')"
    };
    let mut sql = format!(
        "UPDATE {table} SET {status} = 'processing', {error} = NULL",
        table = target.table(),
        status = target.status_column(),
        error = target.error_column(),
    );
    if target == EmbedTarget::Artifact {
        sql.push_str(", updated_at = ?");
    }
    sql.push_str(&format!(
        " WHERE id = ? AND {status} IN {allowed}",
        status = target.status_column(),
    ));

    let mut query = sqlx::query(&sql);
    if target == EmbedTarget::Artifact {
        query = query.bind(chrono::Utc::now().timestamp());
    }
    let result = query.bind(id).execute(pool).await?;
    if result.rows_affected() == 1 {
        return Ok(());
    }

    let status_sql = format!(
        "SELECT {} FROM {} WHERE id = ?",
        target.status_column(),
        target.table()
    );
    let current: Option<(String,)> = sqlx::query_as(&status_sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match current.and_then(|(s,)| Status::parse(&s)) {
        Some(Status::Processing) => Err(PipelineError::ConcurrentProcessing {
            kind: target.kind(),
            id: id.to_string(),
        }),
        Some(s) if s.is_terminal() => Err(PipelineError::AlreadyProcessed {
            kind: target.kind(),
            id: id.to_string(),
        }),
        Some(_) => Err(PipelineError::ConcurrentProcessing {
            kind: target.kind(),
            id: id.to_string(),
        }),
        None => Err(PipelineError::NotFound(format!(
            "{} {} not found",
            target.kind(),
            id
        ))),
    }
}

pub async fn mark_completed(
    pool: &SqlitePool,
    target: EmbedTarget,
    id: &str,
) -> Result<(), PipelineError> {
    set_terminal(pool, target, id, Status::Completed, None).await
}

pub async fn mark_failed(
    pool: &SqlitePool,
    target: EmbedTarget,
    id: &str,
    message: &str,
) -> Result<(), PipelineError> {
    set_terminal(pool, target, id, Status::Failed, Some(message)).await
}

async fn set_terminal(
    pool: &SqlitePool,
    target: EmbedTarget,
    id: &str,
    status: Status,
    message: Option<&str>,
) -> Result<(), PipelineError> {
    let mut sql = format!(
        "UPDATE {table} SET {status_col} = ?, {error} = ?",
        table = target.table(),
        status_col = target.status_column(),
        error = target.error_column(),
    );
    if target == EmbedTarget::Artifact {
        sql.push_str(", updated_at = ?");
    }
    sql.push_str(" WHERE id = ?");

    let mut query = sqlx::query(&sql).bind(status.as_str()).bind(message);
    if target == EmbedTarget::Artifact {
        query = query.bind(chrono::Utc::now().timestamp());
    }
    query.bind(id).execute(pool).await?;
    Ok(())
}

async fn delete_chunks(
    pool: &SqlitePool,
    target: EmbedTarget,
    owner_id: &str,
) -> Result<(), PipelineError> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?",
        target.chunk_table(),
        target.chunk_owner_column()
    );
    sqlx::query(&sql).bind(owner_id).execute(pool).await?;
    Ok(())
}

async fn insert_chunk(
    pool: &SqlitePool,
    target: EmbedTarget,
    owner_id: &str,
    index: i64,
    text: &str,
    embedding: &[f32],
) -> Result<(), PipelineError> {
    let sql = format!(
        "INSERT INTO {} (id, {}, chunk_index, text, hash, embedding) VALUES (?, ?, ?, ?, ?, ?)",
        target.chunk_table(),
        target.chunk_owner_column()
    );
    sqlx::query(&sql)
        .bind(Uuid::new_v4().to_string())
        .bind(owner_id)
        .bind(index)
        .bind(text)
        .bind(chunk_hash(text))
        .bind(vec_to_blob(embedding))
        .execute(pool)
        .await?;
    Ok(())
}

/// Embeds every window and stores the chunks with a contiguous index.
async fn embed_windows(
    pool: &SqlitePool,
    target: EmbedTarget,
    owner_id: &str,
    chunker: &TextChunker,
    embedder: &dyn Embedder,
    windows: Vec<String>,
) -> Result<usize, PipelineError> {
    let mut index: i64 = 0;
    for window in windows {
        index = embed_window_chunks(pool, target, owner_id, chunker, embedder, &window, index)
            .await?;
    }
    Ok(index as usize)
}

/// Full artifact ingestion: validate, claim, extract, chunk, embed, store.
///
/// Validation failures (oversized file, unsupported extension) are recorded
/// as FAILED without the record ever entering PROCESSING.
pub async fn process_artifact(
    pool: &SqlitePool,
    store: &ArtifactStore,
    chunker: &TextChunker,
    embedder: &dyn Embedder,
    config: &Config,
    artifact_id: &str,
    force: bool,
) -> Result<ProcessSummary, PipelineError> {
    let row: Option<(String, String, i64)> = sqlx::query_as(
        "SELECT file_name, file_path, size_bytes FROM artifacts WHERE id = ? AND is_deleted = 0",
    )
    .bind(artifact_id)
    .fetch_optional(pool)
    .await?;
    let Some((file_name, file_path, size_bytes)) = row else {
        return Err(PipelineError::NotFound(format!(
            "artifact {} not found",
            artifact_id
        )));
    };

    if size_bytes as u64 > config.limits.max_file_size_bytes() {
        let message = format!(
            "File exceeds the size limit of {} MB.",
            config.limits.max_file_size_mb
        );
        mark_failed(pool, EmbedTarget::Artifact, artifact_id, &message).await?;
        return Err(PipelineError::Validation(message));
    }

    let Some(format) = FileFormat::from_file_name(&file_name) else {
        let err = PipelineError::UnsupportedFormat;
        mark_failed(pool, EmbedTarget::Artifact, artifact_id, &err.to_string()).await?;
        return Err(err);
    };

    claim_processing(pool, EmbedTarget::Artifact, artifact_id, force).await?;
    delete_chunks(pool, EmbedTarget::Artifact, artifact_id).await?;

    let outcome = ingest_stored_file(
        pool,
        store,
        chunker,
        embedder,
        config,
        EmbedTarget::Artifact,
        artifact_id,
        &file_path,
        format,
    )
    .await;
    finish(pool, EmbedTarget::Artifact, artifact_id, outcome).await
}

/// Chunks and embeds an attachment's stored payload, same lifecycle as an
/// uploaded artifact.
pub async fn embed_attachment(
    pool: &SqlitePool,
    store: &ArtifactStore,
    chunker: &TextChunker,
    embedder: &dyn Embedder,
    config: &Config,
    attachment_id: &str,
    force: bool,
) -> Result<ProcessSummary, PipelineError> {
    let row: Option<(String, String, i64)> = sqlx::query_as(
        "SELECT file_name, file_path, size_bytes FROM email_attachments WHERE id = ?",
    )
    .bind(attachment_id)
    .fetch_optional(pool)
    .await?;
    let Some((file_name, file_path, size_bytes)) = row else {
        return Err(PipelineError::NotFound(format!(
            "attachment {} not found",
            attachment_id
        )));
    };

    if size_bytes as u64 > config.limits.max_file_size_bytes() {
        let message = format!(
            "File exceeds the size limit of {} MB.",
            config.limits.max_file_size_mb
        );
        mark_failed(pool, EmbedTarget::Attachment, attachment_id, &message).await?;
        return Err(PipelineError::Validation(message));
    }

    let Some(format) = FileFormat::from_file_name(&file_name) else {
        let err = PipelineError::UnsupportedFormat;
        mark_failed(pool, EmbedTarget::Attachment, attachment_id, &err.to_string()).await?;
        return Err(err);
    };

    claim_processing(pool, EmbedTarget::Attachment, attachment_id, force).await?;
    delete_chunks(pool, EmbedTarget::Attachment, attachment_id).await?;

    let outcome = ingest_stored_file(
        pool,
        store,
        chunker,
        embedder,
        config,
        EmbedTarget::Attachment,
        attachment_id,
        &file_path,
        format,
    )
    .await;
    finish(pool, EmbedTarget::Attachment, attachment_id, outcome).await
}

/// Chunks and embeds a parsed email's cleaned body.
///
/// The cleaned body is already in memory, so no rolling buffer is involved;
/// the chunker sees the whole text at once. An empty cleaned body completes
/// with zero chunks.
pub async fn embed_email(
    pool: &SqlitePool,
    chunker: &TextChunker,
    embedder: &dyn Embedder,
    email_id: &str,
    force: bool,
) -> Result<ProcessSummary, PipelineError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT cleaned_body FROM parsed_emails WHERE id = ?")
            .bind(email_id)
            .fetch_optional(pool)
            .await?;
    let Some((cleaned_body,)) = row else {
        return Err(PipelineError::NotFound(format!(
            "email {} not found",
            email_id
        )));
    };

    claim_processing(pool, EmbedTarget::Email, email_id, force).await?;
    delete_chunks(pool, EmbedTarget::Email, email_id).await?;

    let outcome = embed_windows(
        pool,
        EmbedTarget::Email,
        email_id,
        chunker,
        embedder,
        if cleaned_body.trim().is_empty() {
            Vec::new()
        } else {
            vec![cleaned_body]
        },
    )
    .await;
    finish(pool, EmbedTarget::Email, email_id, outcome).await
}

/// Embeds up to `limit` parsed emails still PENDING, oldest first.
/// Per-email failures are recorded on their rows and do not stop the batch.
pub async fn embed_pending_emails(
    pool: &SqlitePool,
    chunker: &TextChunker,
    embedder: &dyn Embedder,
    limit: i64,
) -> Result<usize> {
    let ids: Vec<(String,)> = sqlx::query_as(
        "SELECT id FROM parsed_emails WHERE embedding_status = 'pending' ORDER BY created_at LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut embedded = 0usize;
    for (id,) in ids {
        match embed_email(pool, chunker, embedder, &id, false).await {
            Ok(summary) => {
                embedded += 1;
                info!(email_id = %id, chunks = summary.chunk_count, "embedded email");
            }
            Err(e) => warn!(email_id = %id, error = %e, "email embedding failed"),
        }
    }
    Ok(embedded)
}

#[allow(clippy::too_many_arguments)]
async fn ingest_stored_file(
    pool: &SqlitePool,
    store: &ArtifactStore,
    chunker: &TextChunker,
    embedder: &dyn Embedder,
    config: &Config,
    target: EmbedTarget,
    owner_id: &str,
    file_path: &str,
    format: FileFormat,
) -> Result<usize, PipelineError> {
    if !store.exists(file_path) {
        return Err(PipelineError::NotFound("File not found.".to_string()));
    }
    let absolute = store.absolute_path(file_path);
    let fragments = extract::extract_fragments(format, &absolute)
        .map_err(|e| PipelineError::Extraction(e.to_string()))?;

    // stream fragments through the rolling buffer so large documents never
    // sit fully in memory
    let (size, overlap) = buffer_params(&config.chunking, format);
    let mut buffer = RollingBuffer::new(size, overlap, format.is_line_aligned());
    let mut index: i64 = 0;
    for fragment in fragments {
        let fragment = fragment.map_err(|e| PipelineError::Extraction(e.to_string()))?;
        for window in buffer.push(&fragment) {
            index =
                embed_window_chunks(pool, target, owner_id, chunker, embedder, &window, index)
                    .await?;
        }
    }
    if let Some(rest) = buffer.finish() {
        index = embed_window_chunks(pool, target, owner_id, chunker, embedder, &rest, index).await?;
    }
    Ok(index as usize)
}

async fn embed_window_chunks(
    pool: &SqlitePool,
    target: EmbedTarget,
    owner_id: &str,
    chunker: &TextChunker,
    embedder: &dyn Embedder,
    window: &str,
    mut index: i64,
) -> Result<i64, PipelineError> {
    let chunks = chunker
        .chunk(window)
        .map_err(|e| PipelineError::Extraction(e.to_string()))?;
    for text in chunks {
        let vector = embedder
            .embed(&text)
            .await
            .map_err(|e| PipelineError::EmbeddingProvider(e.to_string()))?;
        insert_chunk(pool, target, owner_id, index, &text, &vector).await?;
        index += 1;
    }
    Ok(index)
}

/// Rolling-buffer size and overlap. Line-aligned formats take the full
/// window with no overlap so rows are emitted exactly once.
fn buffer_params(chunking: &crate::config::ChunkingConfig, format: FileFormat) -> (usize, usize) {
    if format.is_line_aligned() {
        (chunking.buffer_size + chunking.buffer_overlap, 0)
    } else {
        (chunking.buffer_size, chunking.buffer_overlap)
    }
}

async fn finish(
    pool: &SqlitePool,
    target: EmbedTarget,
    id: &str,
    outcome: Result<usize, PipelineError>,
) -> Result<ProcessSummary, PipelineError> {
    match outcome {
        Ok(chunk_count) => {
            mark_completed(pool, target, id).await?;
            info!(kind = target.kind(), id, chunk_count, "processing completed");
            Ok(ProcessSummary { chunk_count })
        }
        Err(e) => {
            if e.marks_failed() {
                mark_failed(pool, target, id, &e.to_string()).await?;
            }
            warn!(kind = target.kind(), id, error = %e, "processing failed");
            Err(e)
        }
    }
}
