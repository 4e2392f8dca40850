//! # wg-radar
//!
//! **Working-group intelligence reports for open-source communities.**
//!
//! wg-radar ingests the periodic activity of a set of working groups —
//! meeting notes kept in long-lived shared documents, meeting recordings
//! with auto-generated transcripts, and chat-channel history — caches
//! everything in SQLite, runs a staged LLM analysis over each time window,
//! and emits a curated digest ranking topics by relevance.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐    ┌──────────────┐    ┌───────────┐
//! │   Adapters    │──▶ │   Pipeline   │──▶ │  SQLite   │
//! │ notes/video/  │    │ fetch phase  │    │  records  │
//! │ chat/catalog  │    │              │    │  + cache  │
//! └───────────────┘    └──────────────┘    └─────┬─────┘
//!                                                │
//!                      ┌──────────────┐          │
//!                      │   Pipeline   │◀─────────┘
//!                      │ analyze phase│
//!                      │ summarize →  │    ┌───────────┐
//!                      │ synthesize → │──▶ │  Reports  │
//!                      │ score        │    │  md/json  │
//!                      └──────────────┘    └───────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. The **catalog parser** ([`catalog`]) turns the community catalog
//!    markdown into [`store::Group`] descriptors.
//! 2. The **fetch phase** ([`pipeline`]) runs the three source adapters
//!    ([`notes`], [`recordings`] + [`transcripts`], [`chat`]) per group
//!    under a bounded worker pool, upserting windowed records into the
//!    [`store`].
//! 3. The **analyze phase** drives the three-stage chain — [`summarize`],
//!    [`synthesize`], [`relevance`] — memoizing every LLM call in the
//!    analysis cache keyed by (group, stage, window, input hash).
//! 4. The **report emitter** ([`report`]) renders the digest to markdown
//!    or JSON with deterministic file names.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + env + flag configuration, lookback recognizer |
//! | [`db`] / [`migrate`] | SQLite pool (WAL) and numbered schema migrations |
//! | [`store`] | Typed entities and idempotent upsert/get operations |
//! | [`catalog`] | Catalog markdown parser, slugging, recording-name mapping |
//! | [`notes`] | Notes-document download and date-heading windowing |
//! | [`recordings`] | Recording-index CSV download and filtering |
//! | [`transcripts`] | Share-page transcript extraction and VTT parsing |
//! | [`browser`] | Headless-browser pool for page-state extraction |
//! | [`chat`] | Channel-history paging and thread assembly |
//! | [`chat_auth`] | Chat credentials and interactive login |
//! | [`ratelimit`] | Token-bucket limiter with cancellation-aware waits |
//! | [`llm`] | Provider-agnostic completion client (Anthropic, OpenAI) |
//! | [`analysis`] | Transient report types, hashing, cache keys |
//! | [`summarize`] / [`synthesize`] / [`relevance`] | The three memoized stages |
//! | [`context`] | Custom-context file management |
//! | [`pipeline`] | Phase orchestration, worker pools, run stats |
//! | [`report`] | Markdown/JSON digest and per-group report rendering |

pub mod analysis;
pub mod browser;
pub mod catalog;
pub mod chat;
pub mod chat_auth;
pub mod config;
pub mod context;
pub mod db;
pub mod llm;
pub mod migrate;
pub mod notes;
pub mod pipeline;
pub mod ratelimit;
pub mod recordings;
pub mod relevance;
pub mod report;
pub mod store;
pub mod summarize;
pub mod synthesize;
pub mod transcripts;
