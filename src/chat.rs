//! Chat threads over the case corpus.
//!
//! The orchestrator keeps the conversation in SQLite and hands the agent a
//! bounded history window: the most recent `2 * max_turns` messages, in
//! chronological order. Sending a message is append, agent call, append;
//! the steps are deliberately not one transaction, so a crashed agent call
//! leaves the user's message in the thread for the next attempt.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{ChatMessage, Role, ToolResult};
use crate::tools::{ToolContext, ToolRegistry};

/// The reply-producing seam. Implementations decide how (and whether) to
/// use the retrieval tools.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn reply(
        &self,
        history: &[ChatMessage],
        input: &str,
        registry: &ToolRegistry,
        ctx: &ToolContext,
    ) -> Result<String>;
}

/// Agent that answers by running both semantic searches over the corpus and
/// quoting the best-matching sources. No model behind it; useful on the CLI
/// and as the default until a model-backed agent is wired in.
pub struct RetrievalAgent;

#[async_trait]
impl Agent for RetrievalAgent {
    async fn reply(
        &self,
        _history: &[ChatMessage],
        input: &str,
        registry: &ToolRegistry,
        ctx: &ToolContext,
    ) -> Result<String> {
        let mut results: Vec<ToolResult> = Vec::new();
        for tool_name in ["semantic_file_search", "semantic_email_search"] {
            if let Some(tool) = registry.get(tool_name) {
                let params = serde_json::json!({ "query": input });
                results.extend(tool.execute(params, ctx).await?);
            }
        }
        if results.is_empty() {
            return Ok("No matching documents or emails were found.".to_string());
        }

        let mut reply = String::from("Relevant material:\n");
        for result in results.iter().take(5) {
            let excerpt: String = result.content.chars().take(500).collect();
            reply.push_str(&format!(
                "\n---\nSource: {}\n{}\n",
                serde_json::to_string(&result.source)?,
                excerpt.trim()
            ));
        }
        Ok(reply)
    }
}

pub async fn create_thread(
    pool: &SqlitePool,
    case_id: Option<&str>,
    title: &str,
) -> Result<String, PipelineError> {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO chat_threads (id, case_id, title, created_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(case_id)
        .bind(title)
        .bind(chrono::Utc::now().timestamp())
        .execute(pool)
        .await?;
    Ok(id)
}

/// The last `2 * max_turns` messages of a thread, oldest first. Ties on
/// `created_at` (same-second inserts) break on insertion order.
pub async fn load_history(
    pool: &SqlitePool,
    thread_id: &str,
    max_turns: usize,
) -> Result<Vec<ChatMessage>, PipelineError> {
    let limit = (max_turns * 2) as i64;
    let rows: Vec<(String, String, String, String, i64)> = sqlx::query_as(
        r#"
        SELECT id, thread_id, role, content, created_at FROM chat_messages
        WHERE thread_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(thread_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut messages: Vec<ChatMessage> = rows
        .into_iter()
        .filter_map(|(id, thread_id, role, content, created_at)| {
            Role::parse(&role).map(|role| ChatMessage {
                id,
                thread_id,
                role,
                content,
                created_at,
            })
        })
        .collect();
    messages.reverse();
    Ok(messages)
}

async fn append_message(
    pool: &SqlitePool,
    thread_id: &str,
    role: Role,
    content: &str,
) -> Result<ChatMessage, PipelineError> {
    let message = ChatMessage {
        id: Uuid::new_v4().to_string(),
        thread_id: thread_id.to_string(),
        role,
        content: content.to_string(),
        created_at: chrono::Utc::now().timestamp(),
    };
    sqlx::query(
        "INSERT INTO chat_messages (id, thread_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&message.id)
    .bind(thread_id)
    .bind(role.as_str())
    .bind(content)
    .bind(message.created_at)
    .execute(pool)
    .await?;
    Ok(message)
}

/// Appends the user's message, asks the agent, appends the reply. Returns
/// both stored messages.
pub async fn send_message(
    pool: &SqlitePool,
    agent: &dyn Agent,
    registry: &ToolRegistry,
    ctx: &ToolContext,
    thread_id: &str,
    input: &str,
    max_turns: usize,
) -> Result<(ChatMessage, ChatMessage)> {
    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM chat_threads WHERE id = ?")
        .bind(thread_id)
        .fetch_optional(pool)
        .await
        .map_err(PipelineError::Database)?;
    if exists.is_none() {
        return Err(PipelineError::NotFound(format!("thread {} not found", thread_id)).into());
    }

    let history = load_history(pool, thread_id, max_turns).await?;
    let user_message = append_message(pool, thread_id, Role::User, input).await?;
    let reply = agent.reply(&history, input, registry, ctx).await?;
    let ai_message = append_message(pool, thread_id, Role::Ai, &reply).await?;
    Ok((user_message, ai_message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::DisabledEmbedder;
    use std::sync::Arc;

    struct UppercaseAgent;

    #[async_trait]
    impl Agent for UppercaseAgent {
        async fn reply(
            &self,
            history: &[ChatMessage],
            input: &str,
            _registry: &ToolRegistry,
            _ctx: &ToolContext,
        ) -> Result<String> {
            Ok(format!("{} [{} prior]", input.to_uppercase(), history.len()))
        }
    }

    async fn setup() -> (SqlitePool, ToolContext) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let ctx = ToolContext {
            pool: pool.clone(),
            embedder: Arc::new(DisabledEmbedder),
            config: Config {
                db: crate::config::DbConfig { path: "/tmp/t.sqlite".into() },
                storage: crate::config::StorageConfig { root: "/tmp/t-store".into() },
                chunking: Default::default(),
                embedding: Default::default(),
                limits: Default::default(),
                retrieval: Default::default(),
                chat: Default::default(),
            },
        };
        (pool, ctx)
    }

    #[tokio::test]
    async fn send_message_appends_both_sides() {
        let (pool, ctx) = setup().await;
        let registry = ToolRegistry::with_default_tools();
        let thread = create_thread(&pool, None, "test").await.unwrap();

        let (user, ai) = send_message(
            &pool,
            &UppercaseAgent,
            &registry,
            &ctx,
            &thread,
            "hello",
            10,
        )
        .await
        .unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.content, "hello");
        assert_eq!(ai.role, Role::Ai);
        assert!(ai.content.starts_with("HELLO"));

        let history = load_history(&pool, &thread, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Ai);
    }

    #[tokio::test]
    async fn history_window_is_twice_max_turns() {
        let (pool, ctx) = setup().await;
        let registry = ToolRegistry::with_default_tools();
        let thread = create_thread(&pool, None, "test").await.unwrap();

        for i in 0..5 {
            send_message(
                &pool,
                &UppercaseAgent,
                &registry,
                &ctx,
                &thread,
                &format!("msg {}", i),
                10,
            )
            .await
            .unwrap();
        }

        let history = load_history(&pool, &thread, 2).await.unwrap();
        assert_eq!(history.len(), 4);
        // the newest messages survive, oldest first
        assert_eq!(history[2].content, "msg 4");
        assert!(history[3].content.starts_with("MSG 4"));
    }

    #[tokio::test]
    async fn unknown_thread_is_rejected_without_writes() {
        let (pool, ctx) = setup().await;
        let registry = ToolRegistry::with_default_tools();
        let err = send_message(&pool, &UppercaseAgent, &registry, &ctx, "ghost", "hi", 10)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<PipelineError>().is_some());

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_messages")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn agent_sees_history_before_the_new_message() {
        let (pool, ctx) = setup().await;
        let registry = ToolRegistry::with_default_tools();
        let thread = create_thread(&pool, None, "test").await.unwrap();

        let (_, first) = send_message(&pool, &UppercaseAgent, &registry, &ctx, &thread, "a", 10)
            .await
            .unwrap();
        assert!(first.content.ends_with("[0 prior]"));

        let (_, second) = send_message(&pool, &UppercaseAgent, &registry, &ctx, &thread, "b", 10)
            .await
            .unwrap();
        assert!(second.content.ends_with("[2 prior]"));
    }
}
