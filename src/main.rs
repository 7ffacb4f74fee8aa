use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use uuid::Uuid;

use docket::chat::{self, RetrievalAgent};
use docket::chunk::TextChunker;
use docket::config::{load_config, Config};
use docket::db;
use docket::embedding::build_embedder;
use docket::extract;
use docket::migrate;
use docket::pipeline;
use docket::storage::ArtifactStore;
use docket::tasks::{Task, TaskQueue};
use docket::tools::{ToolContext, ToolRegistry};

#[derive(Parser)]
#[command(name = "dkt", about = "Ingest, search, and chat over case artifacts", version)]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true, default_value = "docket.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and storage directories
    Init,
    /// Register a file as a case artifact
    Add {
        /// File to register
        path: PathBuf,
        /// Case the artifact belongs to
        #[arg(long)]
        case: Option<String>,
        /// Ingest immediately after registering
        #[arg(long)]
        ingest: bool,
    },
    /// Extract, chunk, and embed a registered artifact
    Ingest {
        artifact_id: String,
        /// Re-run even if the artifact already completed or failed
        #[arg(long)]
        force: bool,
    },
    /// Email parsing and embedding
    #[command(subcommand)]
    Email(EmailCommands),
    /// Attachment embedding
    #[command(subcommand)]
    Attachment(AttachmentCommands),
    /// Run a retrieval tool directly
    Tool {
        /// Tool name; omit to list available tools
        name: Option<String>,
        /// Tool parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Chat threads over the corpus
    #[command(subcommand)]
    Chat(ChatCommands),
    /// Processing status, overall or for one artifact
    Status {
        /// Show one artifact's status, error, and chunk count
        artifact_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum EmailCommands {
    /// Parse a raw .eml artifact into its structured form
    Parse {
        artifact_id: String,
        #[arg(long)]
        force: bool,
    },
    /// Embed a parsed email's cleaned body, or all pending emails
    Embed {
        /// Specific email to embed; omit to sweep pending emails
        email_id: Option<String>,
        #[arg(long)]
        force: bool,
        /// Maximum pending emails to embed in one sweep
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum AttachmentCommands {
    /// Extract, chunk, and embed an email attachment
    Embed {
        attachment_id: String,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ChatCommands {
    /// Start a new chat thread
    New {
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long)]
        case: Option<String>,
    },
    /// Send a message to a thread and print the reply
    Send { thread_id: String, message: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docket=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let pool = db::connect(&config).await?;
    migrate::run_migrations(&pool).await?;
    let store = ArtifactStore::new(&config.storage.root);

    match cli.command {
        Commands::Init => {
            std::fs::create_dir_all(config.storage.root.join("uploaded_files"))
                .context("failed to create storage directories")?;
            std::fs::create_dir_all(config.storage.root.join("uploaded_files/attachments"))
                .context("failed to create storage directories")?;
            println!("Initialized database and storage at {}", config.storage.root.display());
        }
        Commands::Add { path, case, ingest } => {
            let id = add_artifact(&pool, &store, &path, case.as_deref()).await?;
            println!("Registered artifact {}", id);
            if ingest {
                let queue = task_queue(&pool, &store, &config)?;
                queue
                    .run(Task::IngestArtifact {
                        artifact_id: id.clone(),
                        force: false,
                    })
                    .await?;
                println!("Ingested artifact {}", id);
            }
        }
        Commands::Ingest { artifact_id, force } => {
            let queue = task_queue(&pool, &store, &config)?;
            queue
                .run(Task::IngestArtifact {
                    artifact_id: artifact_id.clone(),
                    force,
                })
                .await?;
            println!("Ingested artifact {}", artifact_id);
        }
        Commands::Email(EmailCommands::Parse { artifact_id, force }) => {
            let queue = task_queue(&pool, &store, &config)?;
            queue
                .run(Task::ParseEmail {
                    artifact_id: artifact_id.clone(),
                    force,
                })
                .await?;
            println!("Parsed email artifact {}", artifact_id);
        }
        Commands::Email(EmailCommands::Embed {
            email_id,
            force,
            limit,
        }) => {
            let chunker = build_chunker(&config)?;
            let embedder = build_embedder(&config.embedding)?;
            match email_id {
                Some(id) => {
                    let summary =
                        pipeline::embed_email(&pool, &chunker, embedder.as_ref(), &id, force)
                            .await?;
                    println!("Embedded email {} ({} chunks)", id, summary.chunk_count);
                }
                None => {
                    let embedded =
                        pipeline::embed_pending_emails(&pool, &chunker, embedder.as_ref(), limit)
                            .await?;
                    println!("Embedded {} pending emails", embedded);
                }
            }
        }
        Commands::Attachment(AttachmentCommands::Embed {
            attachment_id,
            force,
        }) => {
            let queue = task_queue(&pool, &store, &config)?;
            queue
                .run(Task::EmbedAttachment {
                    attachment_id: attachment_id.clone(),
                    force,
                })
                .await?;
            println!("Embedded attachment {}", attachment_id);
        }
        Commands::Tool { name, params } => {
            let registry = ToolRegistry::with_default_tools();
            let Some(name) = name else {
                for tool in registry.iter() {
                    println!("{}\n    {}", tool.name(), tool.description());
                }
                return Ok(());
            };
            let Some(tool) = registry.get(&name) else {
                anyhow::bail!("unknown tool: {}", name);
            };
            let params: serde_json::Value =
                serde_json::from_str(&params).context("--params must be a JSON object")?;
            let ctx = tool_context(&pool, &config)?;
            let results = tool.execute(params, &ctx).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Chat(ChatCommands::New { title, case }) => {
            let thread_id = chat::create_thread(&pool, case.as_deref(), &title).await?;
            println!("Created thread {}", thread_id);
        }
        Commands::Chat(ChatCommands::Send { thread_id, message }) => {
            let registry = ToolRegistry::with_default_tools();
            let ctx = tool_context(&pool, &config)?;
            let (_, reply) = chat::send_message(
                &pool,
                &RetrievalAgent,
                &registry,
                &ctx,
                &thread_id,
                &message,
                config.chat.max_turns,
            )
            .await?;
            println!("{}", reply.content);
        }
        Commands::Status { artifact_id } => match artifact_id {
            Some(id) => print_artifact_status(&pool, &id).await?,
            None => print_status(&pool).await?,
        },
    }

    Ok(())
}

fn build_chunker(config: &Config) -> Result<TextChunker> {
    TextChunker::new(config.chunking.max_tokens, config.chunking.overlap_tokens)
}

fn task_queue(pool: &SqlitePool, store: &ArtifactStore, config: &Config) -> Result<TaskQueue> {
    Ok(TaskQueue::new(
        pool.clone(),
        store.clone(),
        config.clone(),
        Arc::new(build_chunker(config)?),
        Arc::from(build_embedder(&config.embedding)?),
    ))
}

fn tool_context(pool: &SqlitePool, config: &Config) -> Result<ToolContext> {
    Ok(ToolContext {
        pool: pool.clone(),
        embedder: Arc::from(build_embedder(&config.embedding)?),
        config: config.clone(),
    })
}

async fn add_artifact(
    pool: &SqlitePool,
    store: &ArtifactStore,
    path: &PathBuf,
    case_id: Option<&str>,
) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("path has no file name")?
        .to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let content_type = extract::content_type_for_extension(extension);

    let key = store.save(&format!("uploaded_files/{}", file_name), &bytes)?;
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO artifacts (id, case_id, file_name, file_path, content_type,
                               size_bytes, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(case_id)
    .bind(&file_name)
    .bind(&key)
    .bind(content_type)
    .bind(bytes.len() as i64)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

async fn print_artifact_status(pool: &SqlitePool, artifact_id: &str) -> Result<()> {
    let row: Option<(String, String, Option<String>)> =
        sqlx::query_as("SELECT file_name, status, error_message FROM artifacts WHERE id = ?")
            .bind(artifact_id)
            .fetch_optional(pool)
            .await?;
    let Some((file_name, status, error)) = row else {
        anyhow::bail!("artifact {} not found", artifact_id);
    };
    let (chunks,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM artifact_chunks WHERE artifact_id = ?")
            .bind(artifact_id)
            .fetch_one(pool)
            .await?;

    println!("File:     {}", file_name);
    println!("Status:   {}", status);
    println!("Chunks:   {}", chunks);
    if let Some(error) = error {
        println!("Error:    {}", error);
    }
    Ok(())
}

async fn print_status(pool: &SqlitePool) -> Result<()> {
    let sections: [(&str, &str, &str); 3] = [
        ("Artifacts", "artifacts", "status"),
        ("Emails", "parsed_emails", "embedding_status"),
        ("Attachments", "email_attachments", "embedding_status"),
    ];
    for (label, table, column) in sections {
        let sql = format!(
            "SELECT {col}, COUNT(*) FROM {table} GROUP BY {col} ORDER BY {col}",
            col = column,
            table = table
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql).fetch_all(pool).await?;
        println!("{}:", label);
        if rows.is_empty() {
            println!("    (none)");
        }
        for (status, count) in rows {
            println!("    {:<12} {}", status, count);
        }
    }
    Ok(())
}
