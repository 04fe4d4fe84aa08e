//! # docshift
//!
//! One-shot migration of a schemaless document store into a relational
//! database.
//!
//! docshift reads every document of the configured MongoDB collections (or
//! of a `mongoexport` JSONL dump), maps each one through a declarative rule
//! into rows, and writes the rows as a single `BEGIN TRANSACTION; … COMMIT;`
//! load script, or applies them to a SQLite database inside one transaction.
//! Any error aborts the whole run: either everything lands or nothing does.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────┐   ┌─────────┐   ┌──────────────┐
//! │   Source    │──▶│  Mapper  │──▶│ Emitter │──▶│ Writer task  │
//! │ Mongo/JSONL │   │ rules +  │   │ typed   │   │ script file  │
//! └─────────────┘   │ FK keys  │   │ inserts │   │ or SQLite tx │
//!                   └──────────┘   └─────────┘   └──────────────┘
//!          ▲                                              ▲
//!          └──────────────── Coordinator ─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docshift mongodb://localhost:27017/observatory            # writes importer.sql
//! docshift file:///srv/export --target ./observ.db          # live apply
//! docshift mongodb://localhost/observatory --dry-run
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`rules`] | Declarative mapping rules |
//! | [`models`] | Core data types |
//! | [`fieldpath`] | Dotted paths into documents |
//! | [`coerce`] | Value coercion per column type |
//! | [`mapper`] | Document → rows |
//! | [`translation`] | Source id → surrogate key bookkeeping |
//! | [`plan`] | Dependency ordering of rules |
//! | [`emitter`] | Rows → statements, schema statements |
//! | [`render`] | SQL text rendering |
//! | [`writer`] | Transaction writer and its task |
//! | [`coordinator`] | Run state machine |
//! | [`sources`] | Connection strings and readers |
//! | [`db`] | Live target database |
//! | [`progress`] | Progress reporting |

pub mod coerce;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod emitter;
pub mod error;
pub mod fieldpath;
pub mod mapper;
pub mod migrate;
pub mod models;
pub mod plan;
pub mod progress;
pub mod render;
pub mod rules;
pub mod sink_file;
pub mod sink_memory;
pub mod sink_sqlite;
pub mod source_jsonl;
pub mod source_memory;
#[cfg(feature = "mongo")]
pub mod source_mongo;
pub mod sources;
pub mod traits;
pub mod translation;
pub mod writer;
