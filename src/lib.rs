//! # authrag
//!
//! A retrieval-augmented generation backend that gates what each user can
//! see by an integer access level.
//!
//! Documents are extracted, split, embedded and stored in a persisted
//! vector index. Every ingested file is registered in SQLite with an access
//! level; a chat request only feeds the model passages from files the caller
//! may read, and names a colleague who can read the rest.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Upload   │──▶│ Extract+Split │──▶│ VectorIndex  │
//! │ file/text │   │    +Embed     │   │ (JSON store) │
//! └───────────┘   └──────────────┘   └──────┬───────┘
//!                                            │
//!      ┌──────────────┐   ┌────────────┐     │
//!      │ users/files  │◀─▶│ ChatService │◀────┘
//!      │   (SQLite)   │   │  + LLM      │
//!      └──────────────┘   └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`users`] / [`files`] | Credential store |
//! | [`access`] | Access-level checks |
//! | [`extract`] / [`chunk`] | Text extraction and splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persisted vector index |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieval`] | Chunk retrieval and source curation |
//! | [`llm`] | Language-model provider abstraction |
//! | [`chat`] | Access-aware chat orchestration |
//! | [`auth`] | Passwords, tokens and the request extractor |
//! | [`error`] | HTTP error contract |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |

pub mod access;
pub mod auth;
pub mod chat;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod files;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod server;
pub mod users;
