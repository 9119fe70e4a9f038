//! # odoo-rag core
//!
//! Structure-aware indexing and filtered retrieval for Odoo codebases:
//! data models, manifest parsing, structural extractors, inheritance
//! graphs, the document builder, the index store abstraction, retrieval,
//! intent classification, prompt templates, and the answering session.
//!
//! This crate performs no filesystem, network, or database I/O. Scanning,
//! persistence, and the embedding/generation service clients live in the
//! `odoo-rag` app crate.

pub mod builder;
pub mod classify;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod graph;
pub mod manifest;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod session;
pub mod store;
