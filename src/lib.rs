//! # apidoc-rag
//!
//! Retrieval-augmented lookup over a reference-API document.
//!
//! An API document (generated markdown, or a Python module chunked with
//! tree-sitter) is split into class and method chunks, embedded, and stored
//! as one flat L2 index per category. A query is embedded, recalled from
//! both indexes, methods are reranked toward the recalled classes, and the
//! survivors of a size filter come back as a prompt-ready snippet block.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ API doc    │──▶│ Chunk+Embed  │──▶│ kb_<Cat>.idx  │
//! │ .md / .py  │   │ (build)      │   │ + chunks.jsonl│
//! └────────────┘   └──────────────┘   └──────┬────────┘
//!                                            │
//!                        ┌───────────────────┤
//!                        ▼                   ▼
//!                   ┌──────────┐       ┌──────────┐
//!                   │   CLI    │       │   HTTP   │
//!                   │ (apidoc) │       │  tools   │
//!                   └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! apidoc build docs/api.md                 # chunk, embed, write ./data
//! apidoc query "move the actor to a point"
//! apidoc serve                             # POST /tools/api_doc_query
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`embedding`] | OpenAI / Ollama / disabled providers, token counting |
//! | [`source_chunk`] | Input format detection and Python module chunking |
//! | [`store`] | Persisted index pair per category |
//! | [`build_cmd`] | Offline indexing phase |
//! | [`progress`] | Build progress reporting |
//! | [`service`] | Query service and response envelope |
//! | [`traits`] | `Tool` trait and registry |
//! | [`server`] | HTTP JSON tool server |

pub mod build_cmd;
pub mod config;
pub mod embedding;
pub mod progress;
pub mod query_cmd;
pub mod server;
pub mod service;
pub mod source_chunk;
pub mod stats;
pub mod store;
pub mod traits;
