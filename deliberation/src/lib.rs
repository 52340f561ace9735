//! Multi-Model Deliberation Library
//!
//! This library runs a council of LLMs through a three-stage
//! deliberation over a single user query:
//! - Stage 1: every council member answers the query independently
//! - Stage 2: members rank each other's answers blind, under
//!   anonymized labels
//! - Stage 3: a chairman model synthesizes the final answer of record
//!
//! # Features
//!
//! ## Pipeline
//! - `council`: the three stages, label anonymization, and Borda-style
//!   aggregate scoring
//! - `orchestrator`: one-call turn execution with event reporting and
//!   persistence
//! - `events`: tagged progress events, renderable as SSE frames
//!
//! ## Clarification-first mode
//! - `clarification`: analyst-driven question/answer dialogue that ends
//!   in a confirmed briefing before the council convenes
//!
//! ## Supporting services
//! - `gateway`: OpenRouter-backed model calls behind the
//!   [`gateway::ModelBackend`] trait, plus the cached model catalog
//! - `selector`: heuristic council composition from the live catalog
//! - `storage`: JSON persistence for conversations, contexts, roles,
//!   and settings
//! - `title`: auxiliary conversation-title generation

pub mod clarification;
pub mod config;
pub mod council;
pub mod error;
pub mod events;
pub mod gateway;
pub mod orchestrator;
pub mod prompts;
pub mod selector;
pub mod storage;
pub mod title;

pub use clarification::{AnalystOutcome, Briefing, ClarificationQuestion, ClarificationState};
pub use config::{CouncilConfig, DataLayout};
pub use council::{AggregateRanking, LabelMap, Ranking, SynthesisResult};
pub use error::{DeliberationError, DeliberationResult};
pub use events::{DeliberationEvent, Stage2Metadata};
pub use gateway::{ChatMessage, ModelBackend, ModelCatalog, ModelResponse, OpenRouterGateway};
pub use orchestrator::TurnOrchestrator;
pub use selector::{ModelSelection, SelectionStrategy};
