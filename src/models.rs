//! Request, plan and knowledge-store data model.
//!
//! Mappings that feed the prompt use `BTreeMap` so rendering order is
//! deterministic for identical input.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// A credit card the user already holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditCard {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// Inbound financial profile. Immutable once validated. Unknown
/// fields are rejected at deserialization so a typoed field name
/// fails loudly instead of silently falling back to a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeRequest {
    pub salary: f64,
    #[serde(default)]
    pub spending: BTreeMap<String, f64>,
    #[serde(default)]
    pub credit_cards: Vec<CreditCard>,
    #[serde(default)]
    pub financial_goals: Vec<String>,
}

impl AnalyzeRequest {
    /// Boundary validation. Runs once, before any retrieval or
    /// generation call; downstream code may assume these hold.
    pub fn validate(&self) -> Result<()> {
        if !(self.salary > 0.0) || !self.salary.is_finite() {
            return Err(OrchestratorError::InvalidInput(
                "salary must be a positive number".to_string(),
            ));
        }
        for (category, amount) in &self.spending {
            if *amount < 0.0 || !amount.is_finite() {
                return Err(OrchestratorError::InvalidInput(format!(
                    "spending for '{category}' must be a non-negative number"
                )));
            }
        }
        for card in &self.credit_cards {
            if card.name.trim().len() < 2 {
                return Err(OrchestratorError::InvalidInput(format!(
                    "credit card name '{}' is too short",
                    card.name
                )));
            }
        }
        Ok(())
    }
}

/// A knowledge-store document describing one card's perks. Owned by
/// the store; read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeDocument {
    pub id: i64,
    pub card: String,
    pub issuer: String,
    pub url: String,
    pub text: String,
    /// Absent when ingestion has not embedded the document yet; such
    /// documents never participate in ranking.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// One ranked retrieval result. Ephemeral, created per query.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub document: KnowledgeDocument,
    /// Higher is more relevant; comparable across hits of one query.
    pub score: f64,
}

/// The structured plan returned to the caller and persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    /// Bucket -> fraction of net income. Sums to 1.0 after the rule
    /// engine runs.
    pub budget: BTreeMap<String, f64>,
    /// Spend category -> name of a card the user owns.
    pub cards: BTreeMap<String, String>,
    pub actions: Vec<String>,
    pub explain: String,
}

/// Marker prefix for plans whose generation output was unusable.
pub const DEGRADED_EXPLAIN_PREFIX: &str = "Degraded output:";

impl Plan {
    /// The hard-coded fallback plan used when generation output is
    /// unusable, and the per-field donor for partially parsed output.
    pub fn safe_default() -> Self {
        let mut budget = BTreeMap::new();
        budget.insert("essentials".to_string(), 0.5);
        budget.insert("wants".to_string(), 0.2);
        budget.insert("savings".to_string(), 0.3);
        Plan {
            budget,
            cards: BTreeMap::new(),
            actions: vec![
                "Track monthly spending against the budget buckets".to_string(),
                "Pay card balances in full to avoid interest".to_string(),
                "Automate a fixed monthly transfer into savings".to_string(),
            ],
            explain: String::new(),
        }
    }

    /// True when the plan was synthesized from the fallback path.
    pub fn is_degraded(&self) -> bool {
        self.explain.starts_with(DEGRADED_EXPLAIN_PREFIX)
    }
}

/// Source descriptor echoed back to the caller, one per hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDoc {
    pub title: String,
    pub url: String,
    pub score: f64,
}

/// Outbound response for one analyze call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub plan_id: Uuid,
    pub plan: Plan,
    pub sources: Vec<SourceDoc>,
}

/// Audit-trail snapshot written once per request, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedPlanRecord {
    pub id: Uuid,
    pub request: AnalyzeRequest,
    pub plan: Plan,
    pub created_at: DateTime<Utc>,
}

impl PersistedPlanRecord {
    pub fn new(request: AnalyzeRequest, plan: Plan) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            plan,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> AnalyzeRequest {
        AnalyzeRequest {
            salary: 60_000.0,
            spending: BTreeMap::from([("groceries".to_string(), 400.0)]),
            credit_cards: vec![CreditCard {
                name: "Amex Gold".to_string(),
                issuer: None,
            }],
            financial_goals: vec!["save".to_string()],
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(valid_request().validate().is_ok());
    }

    #[test]
    fn zero_salary_rejected() {
        let mut req = valid_request();
        req.salary = 0.0;
        assert!(matches!(
            req.validate(),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }

    #[test]
    fn negative_spending_rejected() {
        let mut req = valid_request();
        req.spending.insert("dining".to_string(), -5.0);
        assert!(matches!(
            req.validate(),
            Err(OrchestratorError::InvalidInput(_))
        ));
    }

    #[test]
    fn short_card_name_rejected() {
        let mut req = valid_request();
        req.credit_cards.push(CreditCard {
            name: "x".to_string(),
            issuer: None,
        });
        assert!(req.validate().is_err());
    }

    #[test]
    fn unknown_request_fields_are_rejected() {
        let result = serde_json::from_str::<AnalyzeRequest>(
            r#"{"salary": 60000, "sallary": 1, "spending": {}, "credit_cards": [], "financial_goals": []}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn known_request_fields_deserialize() {
        let request: AnalyzeRequest = serde_json::from_str(
            r#"{"salary": 60000, "spending": {"groceries": 400.0}, "credit_cards": [{"name": "Amex Gold"}], "financial_goals": ["save"]}"#,
        )
        .unwrap();
        assert_eq!(request.salary, 60_000.0);
        assert_eq!(request.credit_cards[0].name, "Amex Gold");
    }

    #[test]
    fn safe_default_budget_sums_to_one() {
        let plan = Plan::safe_default();
        let total: f64 = plan.budget.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(plan.cards.is_empty());
        assert!(!plan.actions.is_empty());
    }
}
