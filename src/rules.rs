//! Rule-based post-processing of coerced plans.
//!
//! The generation backend cannot be trusted to satisfy the domain
//! invariants, so this pass enforces them: every spending category
//! gets a card the user actually owns where possible, and the budget
//! fractions are renormalized to sum to 1.0.

use tracing::debug;

use crate::models::{AnalyzeRequest, Plan};

/// Static card-priority table per spend category. First candidate
/// that matches an owned card wins.
const CATEGORY_CARD_HINTS: &[(&str, &[&str])] = &[
    ("groceries", &["Amex Gold", "Chase Freedom", "Citi Custom Cash"]),
    ("dining", &["Amex Gold", "SavorOne"]),
    ("travel", &["Chase Sapphire Preferred", "Amex Gold"]),
    ("gas", &["Citi Custom Cash", "Costco Visa"]),
];

/// Apply the domain rules. Pure and deterministic.
pub fn apply(request: &AnalyzeRequest, mut plan: Plan) -> Plan {
    // Card back-fill: only categories the model left unassigned, and
    // only cards the user holds (case-insensitive substring match on
    // owned card names).
    for category in request.spending.keys() {
        if plan.cards.contains_key(category) {
            continue;
        }
        let Some(candidates) = hint_candidates(category) else {
            continue;
        };
        for candidate in candidates {
            if owns_card(request, candidate) {
                debug!(%category, card = %candidate, "back-filled card assignment");
                plan.cards.insert(category.clone(), candidate.to_string());
                break;
            }
        }
    }

    // Budget normalization: v / sum, denominator 1.0 only when the
    // sum is exactly zero or the map is empty, rounded to two
    // decimals. Negative sums still normalize so the fractions sum
    // to 1.0 whenever any bucket is non-zero.
    let total: f64 = plan.budget.values().sum();
    let denominator = if total != 0.0 { total } else { 1.0 };
    for value in plan.budget.values_mut() {
        *value = (*value / denominator * 100.0).round() / 100.0;
    }

    plan
}

fn hint_candidates(category: &str) -> Option<&'static [&'static str]> {
    CATEGORY_CARD_HINTS
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, candidates)| *candidates)
}

fn owns_card(request: &AnalyzeRequest, candidate: &str) -> bool {
    let needle = candidate.to_lowercase();
    request
        .credit_cards
        .iter()
        .any(|card| card.name.to_lowercase().contains(&needle))
}
