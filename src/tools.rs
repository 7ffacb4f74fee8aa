//! Retrieval tools exposed to the chat agent.
//!
//! Every tool takes JSON parameters (described by a JSON Schema for the
//! model) and returns a uniform list of `{content, source}` records. Tools
//! never error on "nothing matched"; an empty list is the answer.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::models::ToolResult;
use crate::retrieve;

pub struct ToolContext {
    pub pool: SqlitePool,
    pub embedder: Arc<dyn Embedder>,
    pub config: Config,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Vec<ToolResult>>;
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn with_default_tools() -> Self {
        Self {
            tools: vec![
                Box::new(SemanticFileSearch),
                Box::new(SearchFileByName),
                Box::new(SearchFileByType),
                Box::new(SemanticEmailSearch),
                Box::new(SearchEmailByDate),
                Box::new(SearchEmailBySender),
                Box::new(SearchEmailByRecipient),
                Box::new(SearchEmailBySubject),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Tool> {
        self.tools.iter().map(|t| t.as_ref())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_default_tools()
    }
}

fn str_param(params: &Value, key: &str) -> Result<String> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => bail!("missing required parameter: {}", key),
    }
}

fn top_k_param(params: &Value, ctx: &ToolContext) -> i64 {
    params
        .get("top_k")
        .and_then(|v| v.as_i64())
        .filter(|k| *k > 0)
        .unwrap_or(ctx.config.retrieval.top_k)
}

fn query_schema(description: &str, with_top_k: bool) -> Value {
    let mut properties = json!({
        "query": { "type": "string", "description": description }
    });
    if with_top_k {
        properties["top_k"] = json!({
            "type": "integer",
            "description": "Number of closest chunks to consider"
        });
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["query"]
    })
}

struct SemanticFileSearch;

#[async_trait]
impl Tool for SemanticFileSearch {
    fn name(&self) -> &str {
        "semantic_file_search"
    }

    fn description(&self) -> &str {
        "Search uploaded files and email attachments by meaning. Returns the \
         full extracted text of the closest-matching documents with citations."
    }

    fn parameters_schema(&self) -> Value {
        query_schema("What to look for in the case documents", true)
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Vec<ToolResult>> {
        let query = str_param(&params, "query")?;
        let top_k = top_k_param(&params, ctx);
        retrieve::semantic_file_search(&ctx.pool, ctx.embedder.as_ref(), &query, top_k).await
    }
}

struct SearchFileByName;

#[async_trait]
impl Tool for SearchFileByName {
    fn name(&self) -> &str {
        "search_file_by_name"
    }

    fn description(&self) -> &str {
        "Find uploaded files and email attachments whose name contains any \
         word of the query."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": { "type": "string", "description": "File name or part of it" }
            },
            "required": ["filename"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Vec<ToolResult>> {
        let filename = str_param(&params, "filename")?;
        retrieve::search_files_by_name(&ctx.pool, &filename).await
    }
}

struct SearchFileByType;

#[async_trait]
impl Tool for SearchFileByType {
    fn name(&self) -> &str {
        "search_file_by_type"
    }

    fn description(&self) -> &str {
        "List uploaded files and email attachments of a given kind: \
         document, spreadsheet, presentation, or email."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_type": {
                    "type": "string",
                    "enum": ["document", "spreadsheet", "presentation", "email"],
                    "description": "Kind of file to list"
                }
            },
            "required": ["file_type"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Vec<ToolResult>> {
        let file_type = str_param(&params, "file_type")?;
        retrieve::search_files_by_type(&ctx.pool, &file_type).await
    }
}

struct SemanticEmailSearch;

#[async_trait]
impl Tool for SemanticEmailSearch {
    fn name(&self) -> &str {
        "semantic_email_search"
    }

    fn description(&self) -> &str {
        "Search parsed email bodies by meaning. Returns matching emails with \
         sender, recipients, subject and date."
    }

    fn parameters_schema(&self) -> Value {
        query_schema("What to look for in the email correspondence", true)
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Vec<ToolResult>> {
        let query = str_param(&params, "query")?;
        let top_k = top_k_param(&params, ctx);
        retrieve::semantic_email_search(&ctx.pool, ctx.embedder.as_ref(), &query, top_k).await
    }
}

struct SearchEmailByDate;

#[async_trait]
impl Tool for SearchEmailByDate {
    fn name(&self) -> &str {
        "search_email_by_date"
    }

    fn description(&self) -> &str {
        "List emails sent between two dates (inclusive), newest first. Dates \
         are YYYY-MM-DD."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "from_date": { "type": "string", "description": "Range start, YYYY-MM-DD" },
                "to_date": { "type": "string", "description": "Range end, YYYY-MM-DD" }
            },
            "required": ["from_date", "to_date"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Vec<ToolResult>> {
        let from = str_param(&params, "from_date")?;
        let to = str_param(&params, "to_date")?;
        retrieve::search_emails_by_date(&ctx.pool, &from, &to).await
    }
}

struct SearchEmailBySender;

#[async_trait]
impl Tool for SearchEmailBySender {
    fn name(&self) -> &str {
        "search_email_by_sender"
    }

    fn description(&self) -> &str {
        "List emails whose sender matches the given name or address, newest first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sender": { "type": "string", "description": "Sender name or email address" }
            },
            "required": ["sender"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Vec<ToolResult>> {
        let sender = str_param(&params, "sender")?;
        retrieve::search_emails_by_sender(&ctx.pool, &sender).await
    }
}

struct SearchEmailByRecipient;

#[async_trait]
impl Tool for SearchEmailByRecipient {
    fn name(&self) -> &str {
        "search_email_by_recipient"
    }

    fn description(&self) -> &str {
        "List emails addressed (To or Cc) to the given name or address, newest first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "recipient": { "type": "string", "description": "Recipient name or email address" }
            },
            "required": ["recipient"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Vec<ToolResult>> {
        let recipient = str_param(&params, "recipient")?;
        retrieve::search_emails_by_recipient(&ctx.pool, &recipient).await
    }
}

struct SearchEmailBySubject;

#[async_trait]
impl Tool for SearchEmailBySubject {
    fn name(&self) -> &str {
        "search_email_by_subject"
    }

    fn description(&self) -> &str {
        "List emails whose subject contains the given text, newest first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subject_keywords": {
                    "type": "string",
                    "description": "Text to match in the subject line"
                }
            },
            "required": ["subject_keywords"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Vec<ToolResult>> {
        let keywords = str_param(&params, "subject_keywords")?;
        retrieve::search_emails_by_subject(&ctx.pool, &keywords).await
    }
}
