//! Background processing queue.
//!
//! Each submitted task runs on its own tokio task; the database status
//! machine (see [`crate::pipeline`]) is what serializes competing runs over
//! the same record, not the queue. Ingesting a raw `.eml` artifact is
//! routed to the email path: parse, embed the body, then embed each
//! attachment.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::chunk::TextChunker;
use crate::config::Config;
use crate::email;
use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::pipeline::{self, EmbedTarget};
use crate::storage::ArtifactStore;

#[derive(Debug, Clone)]
pub enum Task {
    IngestArtifact { artifact_id: String, force: bool },
    ParseEmail { artifact_id: String, force: bool },
    EmbedEmail { email_id: String, force: bool },
    EmbedAttachment { attachment_id: String, force: bool },
}

#[derive(Clone)]
pub struct TaskQueue {
    pool: SqlitePool,
    store: ArtifactStore,
    config: Config,
    chunker: Arc<TextChunker>,
    embedder: Arc<dyn Embedder>,
}

impl TaskQueue {
    pub fn new(
        pool: SqlitePool,
        store: ArtifactStore,
        config: Config,
        chunker: Arc<TextChunker>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            pool,
            store,
            config,
            chunker,
            embedder,
        }
    }

    /// Fire-and-forget execution. Failures are already recorded on the
    /// owning row by the pipeline; here they are only logged.
    pub fn submit(&self, task: Task) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.run(task.clone()).await {
                warn!(?task, error = %e, "background task failed");
            }
        })
    }

    /// Runs a task to completion on the current task.
    pub async fn run(&self, task: Task) -> Result<()> {
        match task {
            Task::IngestArtifact { artifact_id, force } => {
                if self.is_email_artifact(&artifact_id).await? {
                    return self.parse_and_embed_email(&artifact_id, force).await;
                }
                let summary = pipeline::process_artifact(
                    &self.pool,
                    &self.store,
                    &self.chunker,
                    self.embedder.as_ref(),
                    &self.config,
                    &artifact_id,
                    force,
                )
                .await?;
                info!(artifact_id, chunks = summary.chunk_count, "artifact ingested");
                Ok(())
            }
            Task::ParseEmail { artifact_id, force } => {
                self.parse_and_embed_email(&artifact_id, force).await
            }
            Task::EmbedEmail { email_id, force } => {
                pipeline::embed_email(
                    &self.pool,
                    &self.chunker,
                    self.embedder.as_ref(),
                    &email_id,
                    force,
                )
                .await?;
                Ok(())
            }
            Task::EmbedAttachment {
                attachment_id,
                force,
            } => {
                pipeline::embed_attachment(
                    &self.pool,
                    &self.store,
                    &self.chunker,
                    self.embedder.as_ref(),
                    &self.config,
                    &attachment_id,
                    force,
                )
                .await?;
                Ok(())
            }
        }
    }

    async fn is_email_artifact(&self, artifact_id: &str) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT file_name FROM artifacts WHERE id = ? AND is_deleted = 0")
                .bind(artifact_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((name,)) => Ok(name.to_ascii_lowercase().ends_with(".eml")),
            None => Err(PipelineError::NotFound(format!(
                "artifact {} not found",
                artifact_id
            ))
            .into()),
        }
    }

    /// The `.eml` ingestion path. The artifact row tracks the parse; the
    /// email and attachment rows track their own embedding lifecycles, and
    /// a failing attachment does not fail the email.
    async fn parse_and_embed_email(&self, artifact_id: &str, force: bool) -> Result<()> {
        pipeline::claim_processing(&self.pool, EmbedTarget::Artifact, artifact_id, force).await?;

        let outcome = match email::parse_email_artifact(&self.pool, &self.store, artifact_id).await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.marks_failed() {
                    pipeline::mark_failed(&self.pool, EmbedTarget::Artifact, artifact_id, &e.to_string())
                        .await?;
                }
                return Err(e.into());
            }
        };
        pipeline::mark_completed(&self.pool, EmbedTarget::Artifact, artifact_id).await?;

        if let Err(e) = pipeline::embed_email(
            &self.pool,
            &self.chunker,
            self.embedder.as_ref(),
            &outcome.email.id,
            force,
        )
        .await
        {
            warn!(email_id = %outcome.email.id, error = %e, "email body embedding failed");
        }

        for attachment in &outcome.attachments {
            if let Err(e) = pipeline::embed_attachment(
                &self.pool,
                &self.store,
                &self.chunker,
                self.embedder.as_ref(),
                &self.config,
                &attachment.id,
                force,
            )
            .await
            {
                warn!(attachment_id = %attachment.id, error = %e, "attachment embedding failed");
            }
        }
        Ok(())
    }
}
