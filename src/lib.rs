//! Local-first ingestion and retrieval over legal case artifacts.
//!
//! Uploaded files and raw emails are extracted, chunked in token space,
//! embedded, and stored in SQLite next to their vectors. Retrieval tools
//! search the corpus semantically or by metadata and return citable
//! results; a chat layer threads conversations over them.

pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod email;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod retrieve;
pub mod storage;
pub mod tasks;
pub mod tools;
