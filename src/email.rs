//! Raw email (`.eml`) parsing.
//!
//! An email artifact is decoded into a structured `parsed_emails` row plus
//! one `email_attachments` row per attachment payload, with the payloads
//! stored alongside uploaded files. Re-parsing is idempotent on the email
//! row (update in place, keyed by artifact) and replaces the attachment set
//! wholesale, so a corrected source file never leaves stale attachments
//! behind.
//!
//! The `cleaned_body` is the text body with quoted reply history and
//! signature blocks stripped; that is the text the embedding pass indexes.

use anyhow::Result;
use mail_parser::{MessageParser, MimeHeaders};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::extract;
use crate::models::{EmailAttachment, ParsedEmail, Status};
use crate::storage::ArtifactStore;

/// Storage prefix for attachment payloads.
const ATTACHMENT_PREFIX: &str = "uploaded_files/attachments";

#[derive(Debug)]
pub struct EmailParseOutcome {
    pub email: ParsedEmail,
    pub attachments: Vec<EmailAttachment>,
}

/// Parses the `.eml` artifact and upserts its structured form.
///
/// The email row is keyed by `artifact_id`: a second parse updates fields
/// in place and resets the embedding lifecycle to PENDING, since the text
/// may have changed. Attachments are replaced as a set, payload files
/// included.
pub async fn parse_email_artifact(
    pool: &SqlitePool,
    store: &ArtifactStore,
    artifact_id: &str,
) -> Result<EmailParseOutcome, PipelineError> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT file_name, file_path FROM artifacts WHERE id = ? AND is_deleted = 0")
            .bind(artifact_id)
            .fetch_optional(pool)
            .await?;
    let Some((file_name, file_path)) = row else {
        return Err(PipelineError::NotFound(format!(
            "artifact {} not found",
            artifact_id
        )));
    };
    if !file_name.to_ascii_lowercase().ends_with(".eml") {
        return Err(PipelineError::UnsupportedFormat);
    }

    let bytes = store.read(&file_path)?;
    let message = MessageParser::default()
        .parse(&bytes)
        .ok_or_else(|| PipelineError::Extraction("failed to parse email message".to_string()))?;

    let sender = message
        .from()
        .map(format_address_list)
        .unwrap_or_default();
    let to_recipients = message.to().map(format_address_list).unwrap_or_default();
    let cc_recipients = message
        .cc()
        .map(format_address_list)
        .filter(|s| !s.is_empty());
    let subject = message.subject().unwrap_or_default().to_string();
    let sent_on = message.date().map(|d| d.to_timestamp());
    let body = message
        .body_text(0)
        .map(|b| b.into_owned())
        .unwrap_or_default();
    let cleaned_body = strip_reply(&body);

    let now = chrono::Utc::now().timestamp();
    let email_id = upsert_parsed_email(
        pool,
        artifact_id,
        sent_on,
        &sender,
        &to_recipients,
        cc_recipients.as_deref(),
        &subject,
        &body,
        &cleaned_body,
        now,
    )
    .await?;

    let attachments =
        replace_attachments(pool, store, &email_id, message.attachments(), now).await?;

    info!(
        artifact_id,
        email_id,
        attachments = attachments.len(),
        "parsed email artifact"
    );

    let email = ParsedEmail {
        id: email_id,
        artifact_id: artifact_id.to_string(),
        sent_on,
        sender,
        to_recipients,
        cc_recipients,
        subject,
        body,
        cleaned_body,
        embedding_status: Status::Pending,
        embedding_error: None,
        created_at: now,
    };
    Ok(EmailParseOutcome { email, attachments })
}

#[allow(clippy::too_many_arguments)]
async fn upsert_parsed_email(
    pool: &SqlitePool,
    artifact_id: &str,
    sent_on: Option<i64>,
    sender: &str,
    to_recipients: &str,
    cc_recipients: Option<&str>,
    subject: &str,
    body: &str,
    cleaned_body: &str,
    now: i64,
) -> Result<String, PipelineError> {
    let existing: Option<(String,)> =
        sqlx::query_as("SELECT id FROM parsed_emails WHERE artifact_id = ?")
            .bind(artifact_id)
            .fetch_optional(pool)
            .await?;

    if let Some((id,)) = existing {
        sqlx::query(
            r#"
            UPDATE parsed_emails
            SET sent_on = ?, sender = ?, to_recipients = ?, cc_recipients = ?,
                subject = ?, body = ?, cleaned_body = ?,
                embedding_status = 'pending', embedding_error = NULL
            WHERE id = ?
            "#,
        )
        .bind(sent_on)
        .bind(sender)
        .bind(to_recipients)
        .bind(cc_recipients)
        .bind(subject)
        .bind(body)
        .bind(cleaned_body)
        .bind(&id)
        .execute(pool)
        .await?;
        // stale body chunks would otherwise survive the re-parse
        sqlx::query("DELETE FROM email_chunks WHERE parsed_email_id = ?")
            .bind(&id)
            .execute(pool)
            .await?;
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO parsed_emails
            (id, artifact_id, sent_on, sender, to_recipients, cc_recipients,
             subject, body, cleaned_body, embedding_status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)
        "#,
    )
    .bind(&id)
    .bind(artifact_id)
    .bind(sent_on)
    .bind(sender)
    .bind(to_recipients)
    .bind(cc_recipients)
    .bind(subject)
    .bind(body)
    .bind(cleaned_body)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

async fn replace_attachments<'a>(
    pool: &SqlitePool,
    store: &ArtifactStore,
    email_id: &str,
    parts: impl Iterator<Item = &'a mail_parser::MessagePart<'a>>,
    now: i64,
) -> Result<Vec<EmailAttachment>, PipelineError> {
    let old_paths: Vec<(String,)> =
        sqlx::query_as("SELECT file_path FROM email_attachments WHERE parsed_email_id = ?")
            .bind(email_id)
            .fetch_all(pool)
            .await?;
    sqlx::query(
        r#"
        DELETE FROM attachment_chunks
        WHERE attachment_id IN (SELECT id FROM email_attachments WHERE parsed_email_id = ?)
        "#,
    )
    .bind(email_id)
    .execute(pool)
    .await?;
    sqlx::query("DELETE FROM email_attachments WHERE parsed_email_id = ?")
        .bind(email_id)
        .execute(pool)
        .await?;
    for (path,) in old_paths {
        store
            .delete(&path)
            .map_err(|e| PipelineError::Extraction(e.to_string()))?;
    }

    let mut attachments = Vec::new();
    for part in parts {
        let file_name = part
            .attachment_name()
            .unwrap_or("attachment.bin")
            .to_string();
        let contents = part.contents();
        let content_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| {
                extract::content_type_for_extension(
                    file_name.rsplit('.').next().unwrap_or_default(),
                )
                .to_string()
            });

        let key = store
            .save(&format!("{}/{}", ATTACHMENT_PREFIX, file_name), contents)
            .map_err(|e| PipelineError::Extraction(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO email_attachments
                (id, parsed_email_id, file_name, file_path, content_type,
                 size_bytes, embedding_status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(&id)
        .bind(email_id)
        .bind(&file_name)
        .bind(&key)
        .bind(&content_type)
        .bind(contents.len() as i64)
        .bind(now)
        .execute(pool)
        .await?;

        attachments.push(EmailAttachment {
            id,
            parsed_email_id: email_id.to_string(),
            file_name,
            file_path: key,
            content_type,
            size_bytes: contents.len() as i64,
            embedding_status: Status::Pending,
            embedding_error: None,
            created_at: now,
        });
    }
    Ok(attachments)
}

/// `Name <addr>` for named addresses, bare address otherwise; lists are
/// comma-joined.
fn format_address_list(address: &mail_parser::Address<'_>) -> String {
    address
        .iter()
        .filter_map(|addr| {
            let email = addr.address()?;
            Some(match addr.name() {
                Some(name) if !name.trim().is_empty() => format!("{} <{}>", name.trim(), email),
                _ => email.to_string(),
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Strips quoted reply history and signatures from a plain-text body.
///
/// The body is cut at the first reply marker: a quoted line (`>`), an
/// attribution line (`On ... wrote:`), a forwarded-message separator, or a
/// signature delimiter. Everything before the cut is kept verbatim apart
/// from trailing whitespace.
pub fn strip_reply(body: &str) -> String {
    let mut kept = Vec::new();
    for line in body.lines() {
        if is_reply_marker(line) {
            break;
        }
        kept.push(line);
    }
    // a wrapped "On ... wrote:" attribution leaves its tail lines in `kept`;
    // walk back to the "On " line that started it (at most three lines)
    if kept
        .last()
        .is_some_and(|l| l.trim_end().ends_with("wrote:"))
    {
        let mut removed = 0;
        while let Some(last) = kept.pop() {
            removed += 1;
            if last.trim_start().starts_with("On ") || removed == 3 {
                break;
            }
        }
    }
    kept.join("\n").trim_end().to_string()
}

fn is_reply_marker(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with('>') {
        return true;
    }
    if trimmed.starts_with("On ") && trimmed.trim_end().ends_with("wrote:") {
        return true;
    }
    if trimmed.starts_with("-----Original Message-----")
        || trimmed.starts_with("---------- Forwarded message")
    {
        return true;
    }
    if trimmed == "--" || trimmed == "-- " {
        return true;
    }
    if trimmed.starts_with("Sent from my ") {
        return true;
    }
    // reply header block pasted inline
    trimmed.starts_with("From: ") && line == trimmed
}
