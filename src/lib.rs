//! # odoo-rag
//!
//! Command-line application around [`odoo_rag_core`]: scans an Odoo module
//! tree from disk, persists documents and vectors in SQLite, and talks to
//! embedding and generation services.
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────┐   ┌──────────┐
//! │   scan   │──▶│  extract + │──▶│  embed   │──▶│  SQLite  │
//! │ modules  │   │   build    │   │ (batched)│   │  index   │
//! └──────────┘   └────────────┘   └──────────┘   └────┬─────┘
//!                                                     │
//!                          ┌──────────────────────────┘
//!                          ▼
//!        classify ─▶ retrieve (+ ancestors) ─▶ prompt ─▶ generate
//! ```
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`scan`] | Module discovery and file classification |
//! | [`index_cmd`] | Parallel indexing pipeline |
//! | [`sqlite_store`] | Persistent `IndexStore` |
//! | [`embedding`] | Hash, OpenAI and Ollama embedders |
//! | [`generation`] | Anthropic and offline generators |
//! | [`ask`] | query, diagram, modules, interactive |
//! | [`get`] / [`stats`] | Metadata reads |

pub mod ask;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod get;
pub mod index_cmd;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod scan;
pub mod sqlite_store;
pub mod stats;
