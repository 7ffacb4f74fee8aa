//! Retrieval: brute-force vector search plus metadata lookups.
//!
//! Semantic search embeds the query once, scans the chunk tables, scores
//! cosine distance in Rust, and keeps the `top_k` closest chunks. Those
//! chunks are then deduplicated to their owning records in order of first
//! appearance, so the owner whose chunk ranked closest comes back first
//! even when a later owner contributed more chunks. Each result carries the
//! owner's full extracted text (all chunks, in order) and a citation.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::embedding::{blob_to_vec, cosine_distance, Embedder};
use crate::models::{Citation, ToolResult};
use crate::pipeline::EmbedTarget;

/// One scored chunk from a vector scan.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub target: EmbedTarget,
    pub owner_id: String,
    pub distance: f32,
}

/// Scans one chunk table and returns every chunk scored against `query`.
async fn scan_chunks(
    pool: &SqlitePool,
    target: EmbedTarget,
    query: &[f32],
) -> Result<Vec<ChunkHit>> {
    let sql = format!(
        "SELECT {}, embedding FROM {}",
        target.chunk_owner_column(),
        target.chunk_table()
    );
    let rows: Vec<(String, Vec<u8>)> = sqlx::query_as(&sql).fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|(owner_id, blob)| ChunkHit {
            target,
            owner_id,
            distance: cosine_distance(query, &blob_to_vec(&blob)),
        })
        .collect())
}

/// Keeps the `top_k` closest hits, then deduplicates to owners preserving
/// first-appearance order.
pub fn rank_and_dedupe(mut hits: Vec<ChunkHit>, top_k: i64) -> Vec<ChunkHit> {
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits.truncate(top_k.max(0) as usize);

    let mut seen: Vec<(EmbedTarget, String)> = Vec::new();
    let mut owners = Vec::new();
    for hit in hits {
        let key = (hit.target, hit.owner_id.clone());
        if !seen.contains(&key) {
            seen.push(key);
            owners.push(hit);
        }
    }
    owners
}

/// All of an owner's chunk texts in index order, newline-joined.
async fn owner_text(pool: &SqlitePool, target: EmbedTarget, owner_id: &str) -> Result<String> {
    let sql = format!(
        "SELECT text FROM {} WHERE {} = ? ORDER BY chunk_index",
        target.chunk_table(),
        target.chunk_owner_column()
    );
    let rows: Vec<(String,)> = sqlx::query_as(&sql).bind(owner_id).fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|(t,)| t)
        .collect::<Vec<_>>()
        .join("\n"))
}

fn format_sent_on(sent_on: Option<i64>) -> Option<String> {
    sent_on
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Semantic search over uploaded files and email attachments together.
/// Attachment hits are cited through their parent email.
pub async fn semantic_file_search(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    query: &str,
    top_k: i64,
) -> Result<Vec<ToolResult>> {
    let query_vec = embedder.embed(query).await?;
    let mut hits = scan_chunks(pool, EmbedTarget::Artifact, &query_vec).await?;
    hits.extend(scan_chunks(pool, EmbedTarget::Attachment, &query_vec).await?);
    let owners = rank_and_dedupe(hits, top_k);

    let mut results = Vec::new();
    for hit in owners {
        match hit.target {
            EmbedTarget::Artifact => {
                let row: Option<(String, String)> = sqlx::query_as(
                    "SELECT file_name, file_path FROM artifacts WHERE id = ? AND is_deleted = 0",
                )
                .bind(&hit.owner_id)
                .fetch_optional(pool)
                .await?;
                if let Some((file_name, file_path)) = row {
                    let content = owner_text(pool, hit.target, &hit.owner_id).await?;
                    results.push(ToolResult {
                        content,
                        source: Citation::UploadedFile {
                            file_name,
                            file_path,
                        },
                    });
                }
            }
            EmbedTarget::Attachment => {
                let row: Option<(String, String, String, Option<i64>)> = sqlx::query_as(
                    r#"
                    SELECT a.file_name, e.subject, e.sender, e.sent_on
                    FROM email_attachments a
                    JOIN parsed_emails e ON e.id = a.parsed_email_id
                    WHERE a.id = ?
                    "#,
                )
                .bind(&hit.owner_id)
                .fetch_optional(pool)
                .await?;
                if let Some((file_name, subject, sender, sent_on)) = row {
                    let content = owner_text(pool, hit.target, &hit.owner_id).await?;
                    results.push(ToolResult {
                        content,
                        source: Citation::EmailAttachment {
                            file_name,
                            email_subject: subject,
                            email_sender: sender,
                            email_sent_on: format_sent_on(sent_on),
                        },
                    });
                }
            }
            EmbedTarget::Email => {}
        }
    }
    Ok(results)
}

/// Semantic search over parsed email bodies.
pub async fn semantic_email_search(
    pool: &SqlitePool,
    embedder: &dyn Embedder,
    query: &str,
    top_k: i64,
) -> Result<Vec<ToolResult>> {
    let query_vec = embedder.embed(query).await?;
    let hits = scan_chunks(pool, EmbedTarget::Email, &query_vec).await?;
    let owners = rank_and_dedupe(hits, top_k);

    let mut results = Vec::new();
    for hit in owners {
        if let Some(result) = email_result(pool, &hit.owner_id).await? {
            results.push(result);
        }
    }
    Ok(results)
}

type EmailRow = (
    String,
    Option<i64>,
    String,
    String,
    Option<String>,
    String,
    String,
);

const EMAIL_COLUMNS: &str =
    "id, sent_on, sender, to_recipients, cc_recipients, subject, cleaned_body";

async fn email_result(pool: &SqlitePool, email_id: &str) -> Result<Option<ToolResult>> {
    let sql = format!("SELECT {} FROM parsed_emails WHERE id = ?", EMAIL_COLUMNS);
    let row: Option<EmailRow> = sqlx::query_as(&sql).bind(email_id).fetch_optional(pool).await?;
    Ok(row.map(email_row_to_result))
}

fn email_row_to_result(row: EmailRow) -> ToolResult {
    let (_, sent_on, sender, to_recipients, cc_recipients, subject, cleaned_body) = row;
    ToolResult {
        content: cleaned_body,
        source: Citation::Email {
            subject,
            sender,
            to_recipients,
            cc_recipients,
            sent_on: format_sent_on(sent_on),
        },
    }
}

/// Uploaded files whose name matches any of `patterns` (SQL LIKE), newest
/// first, each with its full extracted text.
async fn artifacts_matching(pool: &SqlitePool, patterns: &[String]) -> Result<Vec<ToolResult>> {
    let clause = patterns
        .iter()
        .map(|_| "file_name LIKE ?")
        .collect::<Vec<_>>()
        .join(" OR ");
    let sql = format!(
        "SELECT id, file_name, file_path FROM artifacts WHERE is_deleted = 0 AND ({}) ORDER BY created_at DESC",
        clause
    );
    let mut q = sqlx::query_as::<_, (String, String, String)>(&sql);
    for pattern in patterns {
        q = q.bind(pattern);
    }
    let rows = q.fetch_all(pool).await?;

    let mut results = Vec::new();
    for (id, file_name, file_path) in rows {
        let content = owner_text(pool, EmbedTarget::Artifact, &id).await?;
        results.push(ToolResult {
            content,
            source: Citation::UploadedFile {
                file_name,
                file_path,
            },
        });
    }
    Ok(results)
}

/// Email attachments whose name matches any of `patterns`, newest first,
/// cited through their parent email.
async fn attachments_matching(pool: &SqlitePool, patterns: &[String]) -> Result<Vec<ToolResult>> {
    let clause = patterns
        .iter()
        .map(|_| "a.file_name LIKE ?")
        .collect::<Vec<_>>()
        .join(" OR ");
    let sql = format!(
        r#"
        SELECT a.id, a.file_name, e.subject, e.sender, e.sent_on
        FROM email_attachments a
        JOIN parsed_emails e ON e.id = a.parsed_email_id
        WHERE {}
        ORDER BY a.created_at DESC
        "#,
        clause
    );
    let mut q = sqlx::query_as::<_, (String, String, String, String, Option<i64>)>(&sql);
    for pattern in patterns {
        q = q.bind(pattern);
    }
    let rows = q.fetch_all(pool).await?;

    let mut results = Vec::new();
    for (id, file_name, subject, sender, sent_on) in rows {
        let content = owner_text(pool, EmbedTarget::Attachment, &id).await?;
        results.push(ToolResult {
            content,
            source: Citation::EmailAttachment {
                file_name,
                email_subject: subject,
                email_sender: sender,
                email_sent_on: format_sent_on(sent_on),
            },
        });
    }
    Ok(results)
}

/// Case-insensitive file-name lookup over uploaded files and email
/// attachments. The query is split on whitespace and a file matches if its
/// name contains ANY of the words.
pub async fn search_files_by_name(pool: &SqlitePool, query: &str) -> Result<Vec<ToolResult>> {
    let patterns: Vec<String> = query
        .split_whitespace()
        .map(|word| format!("%{}%", word))
        .collect();
    if patterns.is_empty() {
        return Ok(Vec::new());
    }
    let mut results = artifacts_matching(pool, &patterns).await?;
    results.extend(attachments_matching(pool, &patterns).await?);
    Ok(results)
}

/// Maps a logical file category to the extensions it covers. The category
/// set is closed (document, spreadsheet, presentation, email); anything
/// else matches nothing.
fn extensions_for_category(category: &str) -> &'static [&'static str] {
    match category.to_ascii_lowercase().as_str() {
        "document" => &["pdf", "doc", "docx", "txt"],
        "spreadsheet" => &["xls", "xlsx", "csv"],
        "presentation" => &["ppt", "pptx"],
        "email" => &["eml"],
        _ => &[],
    }
}

/// Uploaded files and email attachments of one logical category, matched by
/// file-name extension.
pub async fn search_files_by_type(pool: &SqlitePool, category: &str) -> Result<Vec<ToolResult>> {
    let patterns: Vec<String> = extensions_for_category(category)
        .iter()
        .map(|ext| format!("%.{}", ext))
        .collect();
    if patterns.is_empty() {
        return Ok(Vec::new());
    }
    let mut results = artifacts_matching(pool, &patterns).await?;
    results.extend(attachments_matching(pool, &patterns).await?);
    Ok(results)
}

/// Emails sent within `[start, end]`, inclusive, newest first. Dates are
/// `YYYY-MM-DD`; malformed input yields an empty result rather than an
/// error, since the caller is an agent that may produce odd arguments.
pub async fn search_emails_by_date(
    pool: &SqlitePool,
    start: &str,
    end: &str,
) -> Result<Vec<ToolResult>> {
    let Some((start_ts, end_ts)) = parse_date_range(start, end) else {
        return Ok(Vec::new());
    };
    let sql = format!(
        "SELECT {} FROM parsed_emails WHERE sent_on >= ? AND sent_on <= ? ORDER BY sent_on DESC",
        EMAIL_COLUMNS
    );
    let rows: Vec<EmailRow> = sqlx::query_as(&sql)
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(email_row_to_result).collect())
}

fn parse_date_range(start: &str, end: &str) -> Option<(i64, i64)> {
    let start_date = chrono::NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d").ok()?;
    let end_date = chrono::NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d").ok()?;
    let start_ts = start_date.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    let end_ts = end_date.and_hms_opt(23, 59, 59)?.and_utc().timestamp();
    Some((start_ts, end_ts))
}

pub async fn search_emails_by_sender(pool: &SqlitePool, sender: &str) -> Result<Vec<ToolResult>> {
    let sql = format!(
        "SELECT {} FROM parsed_emails WHERE sender LIKE ? ORDER BY sent_on DESC",
        EMAIL_COLUMNS
    );
    let rows: Vec<EmailRow> = sqlx::query_as(&sql)
        .bind(format!("%{}%", sender))
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(email_row_to_result).collect())
}

/// Matches against both To and Cc recipient lists.
pub async fn search_emails_by_recipient(
    pool: &SqlitePool,
    recipient: &str,
) -> Result<Vec<ToolResult>> {
    let sql = format!(
        "SELECT {} FROM parsed_emails WHERE to_recipients LIKE ? OR cc_recipients LIKE ? ORDER BY sent_on DESC",
        EMAIL_COLUMNS
    );
    let pattern = format!("%{}%", recipient);
    let rows: Vec<EmailRow> = sqlx::query_as(&sql)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(email_row_to_result).collect())
}

pub async fn search_emails_by_subject(
    pool: &SqlitePool,
    subject: &str,
) -> Result<Vec<ToolResult>> {
    let sql = format!(
        "SELECT {} FROM parsed_emails WHERE subject LIKE ? ORDER BY sent_on DESC",
        EMAIL_COLUMNS
    );
    let rows: Vec<EmailRow> = sqlx::query_as(&sql)
        .bind(format!("%{}%", subject))
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(email_row_to_result).collect())
}
