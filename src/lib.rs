//! # Compliance Atlas
//!
//! A compliance knowledge-graph ingestion, maintenance, and retrieval engine.
//!
//! Compliance Atlas ingests heterogeneous compliance documents (ISO 27001,
//! NIST 800-53, PCI DSS, SOC 2, plain prose), extracts control-aligned
//! structure, and maintains a knowledge graph plus vector index that answers
//! questions with graceful degradation: the LLM-backed primary path falls
//! back to plain vector retrieval, and retrieval failures fall back to an
//! explicit low-confidence answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────┐   ┌───────────┐
//! │ Uploads  │──▶│  Ingestion pipeline        │──▶│  SQLite    │
//! │ txt/pdf  │   │ classify→extract→chunk    │   │ graph+vec │
//! └──────────┘   └───────────────────────────┘   └─────┬─────┘
//!                                                      │
//!                 ┌───────────────┐                    │
//!                 │   Gardener    │◀───────────────────┤
//!                 │ repair+link   │                    ▼
//!                 └───────────────┘              ┌───────────┐
//!                      CLI (atlas) / HTTP ◀──────│  Query     │
//!                                                │  fallback  │
//!                                                └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! atlas init                           # create database
//! atlas ingest ./iso27001.pdf          # run the pipeline on a file
//! atlas query "password rotation?"     # ask a question
//! atlas garden                         # one maintenance cycle
//! atlas stats                          # store overview
//! atlas serve                          # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`errors`] | Failure taxonomy |
//! | [`loader`] | File loading and text extraction |
//! | [`classify`] | Document type classification |
//! | [`extractor`] | Structured control extraction |
//! | [`chunker`] | Strategy-selecting chunking |
//! | [`pipeline`] | Staged ingestion pipeline |
//! | [`tasks`] | Task status tracking |
//! | [`gardener`] | Background graph maintenance |
//! | [`query`] | Query answering with fallback |
//! | [`graph`] | Graph and vector store primitives |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | LLM client |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod classify;
pub mod config;
pub mod db;
pub mod embedding;
pub mod errors;
pub mod extractor;
pub mod gardener;
pub mod graph;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod server;
pub mod stats;
pub mod tasks;
