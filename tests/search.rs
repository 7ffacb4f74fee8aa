mod common;

use common::{arc_embedder, insert_artifact, insert_artifact_chunk, setup, FakeEmbedder};
use docket::models::Citation;
use docket::retrieve;
use docket::tools::{ToolContext, ToolRegistry};
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

async fn insert_email(
    pool: &SqlitePool,
    sender: &str,
    to: &str,
    cc: Option<&str>,
    subject: &str,
    sent_on: i64,
) -> String {
    // each email hangs off its own source artifact
    let artifact_id = insert_artifact(pool, "source.eml", "uploaded_files/source.eml", 1).await;
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO parsed_emails (id, artifact_id, sent_on, sender, to_recipients,
                                   cc_recipients, subject, body, cleaned_body, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
        "#,
    )
    .bind(&id)
    .bind(&artifact_id)
    .bind(sent_on)
    .bind(sender)
    .bind(to)
    .bind(cc)
    .bind(subject)
    .bind(format!("body of {}", subject))
    .bind(format!("body of {}", subject))
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn insert_email_chunk(pool: &SqlitePool, email_id: &str, index: i64, embedding: &[f32]) {
    sqlx::query(
        "INSERT INTO email_chunks (id, parsed_email_id, chunk_index, text, hash, embedding) VALUES (?, ?, ?, 'chunk', '', ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(email_id)
    .bind(index)
    .bind(docket::embedding::vec_to_blob(embedding))
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn semantic_search_dedupes_owners_in_distance_order() {
    let env = setup().await;
    // artifact B owns the closest chunk, A the next two, C the farthest
    let a = insert_artifact(&env.pool, "a.txt", "uploaded_files/a.txt", 1).await;
    let b = insert_artifact(&env.pool, "b.txt", "uploaded_files/b.txt", 1).await;
    let c = insert_artifact(&env.pool, "c.txt", "uploaded_files/c.txt", 1).await;
    insert_artifact_chunk(&env.pool, &b, 0, "b0", &[1.0, 0.0]).await;
    insert_artifact_chunk(&env.pool, &a, 0, "a0", &[0.9, 0.1]).await;
    insert_artifact_chunk(&env.pool, &a, 1, "a1", &[0.8, 0.2]).await;
    insert_artifact_chunk(&env.pool, &c, 0, "c0", &[0.0, 1.0]).await;

    let embedder = FakeEmbedder::returning(vec![1.0, 0.0]);
    let results = retrieve::semantic_file_search(&env.pool, &embedder, "query", 3)
        .await
        .unwrap();

    // top 3 chunks are b0, a0, a1; dedup keeps b then a, c never appears
    let names: Vec<&str> = results
        .iter()
        .map(|r| match &r.source {
            Citation::UploadedFile { file_name, .. } => file_name.as_str(),
            _ => panic!("expected uploaded file citation"),
        })
        .collect();
    assert_eq!(names, vec!["b.txt", "a.txt"]);
    // content aggregates every chunk of the owner, in index order
    assert_eq!(results[1].content, "a0\na1");
}

#[tokio::test]
async fn semantic_file_search_includes_attachments_with_email_citation() {
    let env = setup().await;
    let email = insert_email(
        &env.pool,
        "Alice <alice@firm.example>",
        "bob@client.example",
        None,
        "Terms",
        1_740_000_000,
    )
    .await;
    let attachment_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO email_attachments (id, parsed_email_id, file_name, file_path,
                                       size_bytes, created_at)
        VALUES (?, ?, 'terms.pdf', 'uploaded_files/attachments/terms.pdf', 1, 0)
        "#,
    )
    .bind(&attachment_id)
    .bind(&email)
    .execute(&env.pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO attachment_chunks (id, attachment_id, chunk_index, text, hash, embedding) VALUES (?, ?, 0, 'clause text', '', ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&attachment_id)
    .bind(docket::embedding::vec_to_blob(&[1.0, 0.0]))
    .execute(&env.pool)
    .await
    .unwrap();

    let embedder = FakeEmbedder::returning(vec![1.0, 0.0]);
    let results = retrieve::semantic_file_search(&env.pool, &embedder, "clause", 5)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "clause text");
    match &results[0].source {
        Citation::EmailAttachment {
            file_name,
            email_subject,
            email_sender,
            email_sent_on,
        } => {
            assert_eq!(file_name, "terms.pdf");
            assert_eq!(email_subject, "Terms");
            assert_eq!(email_sender, "Alice <alice@firm.example>");
            assert!(email_sent_on.is_some());
        }
        other => panic!("expected attachment citation, got {:?}", other),
    }
}

#[tokio::test]
async fn semantic_email_search_returns_cited_emails() {
    let env = setup().await;
    let near = insert_email(
        &env.pool,
        "alice@firm.example",
        "bob@client.example",
        Some("cc@firm.example"),
        "Schedule",
        1_740_000_000,
    )
    .await;
    let far = insert_email(
        &env.pool,
        "eve@other.example",
        "bob@client.example",
        None,
        "Unrelated",
        1_740_000_100,
    )
    .await;
    insert_email_chunk(&env.pool, &near, 0, &[1.0, 0.0]).await;
    insert_email_chunk(&env.pool, &far, 0, &[0.0, 1.0]).await;

    let embedder = FakeEmbedder::returning(vec![1.0, 0.0]);
    let results = retrieve::semantic_email_search(&env.pool, &embedder, "schedule", 1)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    match &results[0].source {
        Citation::Email {
            subject,
            cc_recipients,
            ..
        } => {
            assert_eq!(subject, "Schedule");
            assert_eq!(cc_recipients.as_deref(), Some("cc@firm.example"));
        }
        other => panic!("expected email citation, got {:?}", other),
    }
}

#[tokio::test]
async fn file_name_search_matches_any_word() {
    let env = setup().await;
    insert_artifact(&env.pool, "merger_agreement.pdf", "uploaded_files/m.pdf", 1).await;
    insert_artifact(&env.pool, "invoice_2024.xlsx", "uploaded_files/i.xlsx", 1).await;
    insert_artifact(&env.pool, "notes.txt", "uploaded_files/n.txt", 1).await;

    let results = retrieve::search_files_by_name(&env.pool, "merger invoice")
        .await
        .unwrap();
    assert_eq!(results.len(), 2);

    let none = retrieve::search_files_by_name(&env.pool, "   ").await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn file_type_search_uses_category_extensions() {
    let env = setup().await;
    insert_artifact(&env.pool, "ledger.xlsx", "uploaded_files/l.xlsx", 1).await;
    insert_artifact(&env.pool, "parties.csv", "uploaded_files/p.csv", 1).await;
    insert_artifact(&env.pool, "brief.pdf", "uploaded_files/b.pdf", 1).await;
    insert_artifact(&env.pool, "notes.txt", "uploaded_files/n.txt", 1).await;

    let spreadsheets = retrieve::search_files_by_type(&env.pool, "spreadsheet")
        .await
        .unwrap();
    assert_eq!(spreadsheets.len(), 2);

    // the document category spans pdf, doc, docx and txt
    let documents = retrieve::search_files_by_type(&env.pool, "document")
        .await
        .unwrap();
    assert_eq!(documents.len(), 2);

    let unknown = retrieve::search_files_by_type(&env.pool, "archive")
        .await
        .unwrap();
    assert!(unknown.is_empty());
}

#[tokio::test]
async fn name_and_type_searches_cover_attachments() {
    let env = setup().await;
    let email = insert_email(
        &env.pool,
        "Alice <alice@firm.example>",
        "bob@client.example",
        None,
        "Discovery",
        1_740_000_000,
    )
    .await;
    let attachment_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO email_attachments (id, parsed_email_id, file_name, file_path,
                                       size_bytes, created_at)
        VALUES (?, ?, 'schedule.pdf', 'uploaded_files/attachments/schedule.pdf', 1, 0)
        "#,
    )
    .bind(&attachment_id)
    .bind(&email)
    .execute(&env.pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO attachment_chunks (id, attachment_id, chunk_index, text, hash, embedding) VALUES (?, ?, 0, 'deposition dates', '', ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&attachment_id)
    .bind(docket::embedding::vec_to_blob(&[1.0, 0.0]))
    .execute(&env.pool)
    .await
    .unwrap();

    let by_name = retrieve::search_files_by_name(&env.pool, "schedule")
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].content, "deposition dates");
    match &by_name[0].source {
        Citation::EmailAttachment {
            file_name,
            email_subject,
            ..
        } => {
            assert_eq!(file_name, "schedule.pdf");
            assert_eq!(email_subject, "Discovery");
        }
        other => panic!("expected attachment citation, got {:?}", other),
    }

    // the type search reaches attachments too, alongside uploaded files
    insert_artifact(&env.pool, "brief.pdf", "uploaded_files/brief.pdf", 1).await;
    let documents = retrieve::search_files_by_type(&env.pool, "document")
        .await
        .unwrap();
    assert_eq!(documents.len(), 2);
    assert!(documents.iter().any(|r| matches!(
        &r.source,
        Citation::EmailAttachment { file_name, .. } if file_name == "schedule.pdf"
    )));
}

#[tokio::test]
async fn email_date_search_is_inclusive_and_newest_first() {
    let env = setup().await;
    // 2025-03-10 and 2025-03-20, one outside the range
    insert_email(&env.pool, "a@x.example", "b@x.example", None, "early", 1_741_600_000).await;
    insert_email(&env.pool, "a@x.example", "b@x.example", None, "late", 1_742_460_000).await;
    insert_email(&env.pool, "a@x.example", "b@x.example", None, "outside", 1_735_000_000).await;

    let results = retrieve::search_emails_by_date(&env.pool, "2025-03-01", "2025-03-31")
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    match (&results[0].source, &results[1].source) {
        (Citation::Email { subject: s0, .. }, Citation::Email { subject: s1, .. }) => {
            assert_eq!(s0, "late");
            assert_eq!(s1, "early");
        }
        _ => panic!("expected email citations"),
    }

    let malformed = retrieve::search_emails_by_date(&env.pool, "soon", "later")
        .await
        .unwrap();
    assert!(malformed.is_empty());
}

#[tokio::test]
async fn email_sender_recipient_subject_searches_match_substrings() {
    let env = setup().await;
    insert_email(
        &env.pool,
        "Alice Counsel <alice@firm.example>",
        "Bob Client <bob@client.example>",
        Some("dan@firm.example"),
        "Settlement draft v2",
        1_740_000_000,
    )
    .await;

    let by_sender = retrieve::search_emails_by_sender(&env.pool, "alice")
        .await
        .unwrap();
    assert_eq!(by_sender.len(), 1);

    // recipient search covers both To and Cc
    let by_to = retrieve::search_emails_by_recipient(&env.pool, "bob@client.example")
        .await
        .unwrap();
    assert_eq!(by_to.len(), 1);
    let by_cc = retrieve::search_emails_by_recipient(&env.pool, "dan@firm")
        .await
        .unwrap();
    assert_eq!(by_cc.len(), 1);

    let by_subject = retrieve::search_emails_by_subject(&env.pool, "settlement")
        .await
        .unwrap();
    assert_eq!(by_subject.len(), 1);

    let miss = retrieve::search_emails_by_subject(&env.pool, "zoning")
        .await
        .unwrap();
    assert!(miss.is_empty());
}

#[tokio::test]
async fn tools_run_the_searches_end_to_end() {
    let env = setup().await;
    let artifact = insert_artifact(&env.pool, "contract.pdf", "uploaded_files/c.pdf", 1).await;
    insert_artifact_chunk(&env.pool, &artifact, 0, "indemnification clause", &[1.0, 0.0]).await;

    let ctx = ToolContext {
        pool: env.pool.clone(),
        embedder: arc_embedder(FakeEmbedder::returning(vec![1.0, 0.0])),
        config: env.config.clone(),
    };
    let registry = ToolRegistry::with_default_tools();

    let results = registry
        .get("semantic_file_search")
        .unwrap()
        .execute(json!({"query": "who indemnifies whom"}), &ctx)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "indemnification clause");

    let by_name = registry
        .get("search_file_by_name")
        .unwrap()
        .execute(json!({"filename": "contract"}), &ctx)
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);
}

#[tokio::test]
async fn deleted_artifacts_never_surface() {
    let env = setup().await;
    let id = insert_artifact(&env.pool, "gone.txt", "uploaded_files/g.txt", 1).await;
    insert_artifact_chunk(&env.pool, &id, 0, "ghost text", &[1.0, 0.0]).await;
    sqlx::query("UPDATE artifacts SET is_deleted = 1 WHERE id = ?")
        .bind(&id)
        .execute(&env.pool)
        .await
        .unwrap();

    let embedder = FakeEmbedder::returning(vec![1.0, 0.0]);
    let semantic = retrieve::semantic_file_search(&env.pool, &embedder, "ghost", 5)
        .await
        .unwrap();
    assert!(semantic.is_empty());

    let by_name = retrieve::search_files_by_name(&env.pool, "gone").await.unwrap();
    assert!(by_name.is_empty());
}
