//! finx-core: retrieval and plan-synthesis pipeline for the finx
//! personal-finance orchestrator.
//!
//! The crate turns a structured financial profile into a structured
//! plan by combining embedding-based retrieval over a card-knowledge
//! store with a generative-text backend, then repairing and
//! post-processing the backend's output so the caller always receives
//! a valid plan.
//!
//! Control flow: profile -> [`retrieval::Retriever`] ->
//! [`prompt::build_prompt`] -> [`llm::PlanSynthesizer`] ->
//! [`coerce::coerce_plan`] -> [`rules::apply`] -> [`store::PlanStore`].

pub mod coerce;
pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod retrieval;
pub mod rules;
pub mod store;

pub use error::{OrchestratorError, Result};
pub use models::{AnalyzeRequest, AnalyzeResponse, Plan};
pub use pipeline::PlanningPipeline;
