#![doc = "gemini-context-core: ingestion pipeline for gemini-context."]

//! This crate holds everything between a directory on disk and a set of files
//! admitted into a context-limited remote model: discovery, truncation,
//! retrying uploads, token-budget admission and guaranteed cleanup.
//! Transport lives behind [`contract::RemoteClient`]; the concrete HTTP client
//! and the CLI live in the `gemini-context` crate.
//!
//! # Usage
//! Discover files with [`discover::discover`], run them through
//! [`ingest::ingest`] inside [`cleanup::guarded`], and use the admitted handles
//! from the returned [`ingest::IngestReport`].

pub mod admission;
pub mod cleanup;
pub mod config;
pub mod contract;
pub mod discover;
pub mod ingest;
pub mod prepare;
pub mod registry;
pub mod retry;
