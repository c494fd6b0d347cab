//! The analyze pipeline: validate, retrieve, prompt, synthesize,
//! coerce, apply rules, persist.
//!
//! One pipeline instance is constructed at startup and shared across
//! concurrent requests; it holds no per-request state. Within one
//! request the stages run strictly in order, and nothing is persisted
//! if any earlier stage aborts.

use tracing::{info, instrument};

use crate::coerce::coerce_plan;
use crate::error::Result;
use crate::llm::SharedSynthesizer;
use crate::models::{AnalyzeRequest, AnalyzeResponse, PersistedPlanRecord, SourceDoc};
use crate::prompt::build_prompt;
use crate::retrieval::Retriever;
use crate::rules;
use crate::store::SharedPlanStore;

/// Fixed lead-in for the retrieval query; the profile's spending
/// categories and goals are appended per request.
const RETRIEVAL_QUERY_BASE: &str = "optimize rewards cash back categories which card for";

pub struct PlanningPipeline {
    retriever: Retriever,
    synthesizer: SharedSynthesizer,
    plans: SharedPlanStore,
    top_k: usize,
}

impl PlanningPipeline {
    pub fn new(
        retriever: Retriever,
        synthesizer: SharedSynthesizer,
        plans: SharedPlanStore,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            synthesizer,
            plans,
            top_k,
        }
    }

    /// Run the full pipeline for one profile.
    #[instrument(skip_all, fields(cards = request.credit_cards.len()))]
    pub async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalyzeResponse> {
        // Rejected before any retrieval or generation call is made.
        request.validate()?;

        let query = retrieval_query(&request);
        let hits = self.retriever.retrieve(&query, self.top_k).await?;
        info!(hits = hits.len(), "retrieved knowledge documents");

        let prompt = build_prompt(&request, &hits);
        let raw = self.synthesizer.synthesize(&prompt).await?;

        // Coercion is total: from here on a valid plan exists no
        // matter what the backend produced.
        let plan = coerce_plan(&raw);
        if plan.is_degraded() {
            info!("plan degraded to safe default");
        }
        let plan = rules::apply(&request, plan);

        let sources: Vec<SourceDoc> = hits
            .iter()
            .map(|hit| SourceDoc {
                title: hit.document.card.clone(),
                url: hit.document.url.clone(),
                score: hit.score,
            })
            .collect();

        let record = PersistedPlanRecord::new(request, plan.clone());
        self.plans.save(&record).await?;
        info!(plan_id = %record.id, "plan persisted");

        Ok(AnalyzeResponse {
            plan_id: record.id,
            plan,
            sources,
        })
    }
}

fn retrieval_query(request: &AnalyzeRequest) -> String {
    let mut parts = vec![RETRIEVAL_QUERY_BASE.to_string()];
    parts.extend(request.spending.keys().cloned());
    parts.extend(request.financial_goals.iter().cloned());
    parts.join(" ")
}
