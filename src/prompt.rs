//! Deterministic prompt assembly.
//!
//! Pure string rendering, no I/O. Identical profile and hits always
//! produce an identical prompt, which is what makes caching and the
//! coercion tests possible.

use std::fmt::Write;

use crate::models::{AnalyzeRequest, RetrievalHit};

/// System message sent with every generation request.
pub const SYSTEM_PROMPT: &str =
    "You are a concise, helpful personal finance planner. Return only valid JSON.";

/// Hard cap on the knowledge excerpt rendered per retrieval hit.
pub const EXCERPT_MAX_CHARS: usize = 400;

/// Render the user profile and ranked documents into a single
/// instruction payload enumerating the exact output schema.
pub fn build_prompt(request: &AnalyzeRequest, hits: &[RetrievalHit]) -> String {
    let mut prompt = String::new();

    let _ = writeln!(prompt, "User salary (annual): {}", request.salary);

    prompt.push_str("\nUser monthly spend (usd):\n");
    if request.spending.is_empty() {
        prompt.push_str("(none reported)\n");
    }
    for (category, amount) in &request.spending {
        let _ = writeln!(prompt, "- {category}: {amount}");
    }

    prompt.push_str("\nUser credit cards on hand:\n");
    if request.credit_cards.is_empty() {
        prompt.push_str("(none)\n");
    }
    for card in &request.credit_cards {
        match &card.issuer {
            Some(issuer) => {
                let _ = writeln!(prompt, "- {} ({issuer})", card.name);
            }
            None => {
                let _ = writeln!(prompt, "- {}", card.name);
            }
        }
    }

    prompt.push_str("\nUser financial goals:\n");
    if request.financial_goals.is_empty() {
        prompt.push_str("(none stated)\n");
    }
    for goal in &request.financial_goals {
        let _ = writeln!(prompt, "- {goal}");
    }

    prompt.push_str("\nReference info about card perks:\n");
    if hits.is_empty() {
        prompt.push_str("(no reference documents)\n");
    }
    for hit in hits {
        let _ = writeln!(
            prompt,
            "- {} ({}): {}",
            hit.document.card,
            hit.document.issuer,
            excerpt(&hit.document.text)
        );
    }

    prompt.push_str(
        "\nTASK:\n\
         1. Provide a 3-bucket monthly budget as fractions of net income.\n\
         2. Recommend which existing card to use for each spend category.\n\
         3. Give 3-5 concrete action steps.\n\
         Return JSON with exactly these keys:\n\
         - budget: object mapping bucket name (essentials, wants, savings) to a number\n\
         - cards: object mapping spend category to the name of one of the user's cards\n\
         - actions: array of short strings\n\
         - explain: string\n\
         Respond with valid JSON only. No markdown, no text outside the JSON.\n",
    );

    prompt
}

/// Bounded, char-boundary-safe excerpt of a document's text.
fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(EXCERPT_MAX_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
