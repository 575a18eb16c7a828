//! Intent router
//!
//! Classifies the user query into the fixed intent vocabulary via a
//! structured-output LLM call, retrying with forced JSON formatting, and
//! finally falling back to an ordered keyword heuristic. The LLM saying
//! out-of-domain is overridden when the in-domain cue list clearly
//! matches.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use recipe_chat_config::prompts::{route_schema, router_user, ROUTER_SYSTEM};
use recipe_chat_core::{ChatMessage, Intent, LlmOptions, LlmProvider, Route};

static HEURISTIC_PATTERNS: Lazy<Vec<(Regex, Intent)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"보관|온도|포장|냉동|보존|storage|shelf life|expire").unwrap(),
            Intent::Storage,
        ),
        (
            Regex::new(r"대체|치환|없\s*이|substitut|replace|allerg").unwrap(),
            Intent::Substitution,
        ),
        (
            Regex::new(r"칼로리|영양|영양소|탄수|단백|지방|nutrition|calorie|macro|kcal").unwrap(),
            Intent::Nutrition,
        ),
        (
            Regex::new(r"도구|장비|에어\s*프라이어|팬|오븐|equipment|tool|pan|oven|air fryer")
                .unwrap(),
            Intent::Equipment,
        ),
        (
            Regex::new(r"구매|쇼핑|살까|사기|shopping|buy|purchase").unwrap(),
            Intent::Shopping,
        ),
        (
            Regex::new(r"무엇|뭐야|기원|유래|특징|overview|about").unwrap(),
            Intent::DishOverview,
        ),
        (
            Regex::new(r"레시피|만드|어떻게|방법|steps|how to|make|cook").unwrap(),
            Intent::Recipe,
        ),
    ]
});

const IN_DOMAIN_CUES: &[&str] = &[
    // Korean
    "요리", "레시피", "만드는", "방법", "재료", "보관", "영양", "조리", "메뉴", "추천",
    "카레", "소스", "치킨", "수프", "찌개", "스튜", "볶음", "구이",
    // English
    "recipe", "cook", "cooking", "ingredients", "storage", "nutrition", "substitute", "dish",
];

/// Quick cue check: does the text look like a cooking question at all?
pub fn looks_in_domain(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let t = text.to_lowercase();
    IN_DOMAIN_CUES.iter().any(|cue| t.contains(cue))
}

/// Keyword-cue intent guess used when the LLM is unavailable or returns
/// something outside the vocabulary.
fn heuristic_route(query: &str) -> Route {
    let t = query.to_lowercase();
    for (pattern, intent) in HEURISTIC_PATTERNS.iter() {
        if pattern.is_match(&t) {
            return Route::new(*intent, true, "semantic_fallback");
        }
    }
    if looks_in_domain(query) {
        Route::new(Intent::Recipe, true, "semantic_default")
    } else {
        Route::new(Intent::OutOfDomain, false, "semantic_default")
    }
}

/// LLM-backed intent classifier with layered fallbacks.
pub struct IntentRouter {
    llm: Arc<dyn LlmProvider>,
    model: Option<String>,
}

impl IntentRouter {
    pub fn new(llm: Arc<dyn LlmProvider>, model: Option<String>) -> Self {
        Self { llm, model }
    }

    fn opts(&self) -> LlmOptions {
        match &self.model {
            Some(model) => LlmOptions::with_model(model.clone()).temperature(0.0),
            None => LlmOptions::default().temperature(0.0),
        }
    }

    /// Classify a query. Never fails; the heuristic decides when both LLM
    /// attempts do not produce a usable route.
    pub async fn route(&self, query: &str) -> Route {
        let messages = [
            ChatMessage::system(ROUTER_SYSTEM),
            ChatMessage::user(router_user(query)),
        ];

        // 1) Structured output, 2) forced JSON object formatting.
        let data = match self
            .llm
            .complete_with_schema(&route_schema(), &messages, &self.opts())
            .await
        {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(error = %e, "structured routing failed, retrying as JSON");
                match self.llm.complete_text(&messages, &self.opts()).await {
                    Ok(raw) => serde_json::from_str::<serde_json::Value>(raw.trim()).ok(),
                    Err(e) => {
                        tracing::debug!(error = %e, "JSON routing retry failed");
                        None
                    }
                }
            }
        };

        let data = match data {
            Some(value) => value,
            None => return heuristic_route(query),
        };

        let label = data
            .get("intent")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let llm_notes = data
            .get("notes")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        let intent = match Intent::from_label(&label) {
            Some(intent) => intent,
            None => {
                let fallback = heuristic_route(query);
                let notes = if llm_notes.is_empty() {
                    fallback.notes.clone()
                } else {
                    format!("{} | {}", llm_notes, fallback.notes)
                };
                return Route::new(fallback.intent, fallback.needs_retrieval, notes);
            }
        };

        let needs_retrieval = data
            .get("needs_retrieval")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        // The cue list beats a spurious out_of_domain classification.
        if intent == Intent::OutOfDomain && looks_in_domain(query) {
            let fallback = heuristic_route(query);
            let intent = if fallback.intent == Intent::OutOfDomain {
                Intent::Recipe
            } else {
                fallback.intent
            };
            let notes = format!("{} | overridden_from_ood_by_heuristic", llm_notes)
                .trim_start_matches(" | ")
                .to_string();
            return Route::new(intent, fallback.needs_retrieval, notes);
        }

        Route::new(intent, needs_retrieval, llm_notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recipe_chat_llm::StaticLlm;

    #[tokio::test]
    async fn test_structured_route() {
        let router = IntentRouter::new(
            Arc::new(StaticLlm::new("x").with_route("storage", true)),
            None,
        );
        let route = router.route("김치 보관법").await;
        assert_eq!(route.intent, Intent::Storage);
        assert!(route.needs_retrieval);
    }

    #[tokio::test]
    async fn test_json_retry_path() {
        // Structured call fails; plain-text call returns the route JSON.
        let router = IntentRouter::new(
            Arc::new(StaticLlm::new("x").with_route("nutrition", true).failing_schema()),
            None,
        );
        let route = router.route("비빔밥 칼로리").await;
        assert_eq!(route.intent, Intent::Nutrition);
    }

    #[tokio::test]
    async fn test_heuristic_fallback_when_llm_down() {
        let router = IntentRouter::new(Arc::new(StaticLlm::new("x").failing()), None);

        let route = router.route("계란 대체 재료 뭐가 있을까").await;
        assert_eq!(route.intent, Intent::Substitution);
        assert!(route.needs_retrieval);

        let route = router.route("오늘 주가 어때?").await;
        assert_eq!(route.intent, Intent::OutOfDomain);
        assert!(!route.needs_retrieval);
    }

    #[tokio::test]
    async fn test_ood_overridden_by_cues() {
        let router = IntentRouter::new(
            Arc::new(StaticLlm::new("x").with_route("out_of_domain", false)),
            None,
        );
        let route = router.route("김치찌개 레시피 알려줘").await;
        assert_ne!(route.intent, Intent::OutOfDomain);
        assert!(route.notes.contains("overridden_from_ood_by_heuristic"));
    }

    #[tokio::test]
    async fn test_invalid_intent_label_falls_back() {
        let router = IntentRouter::new(
            Arc::new(StaticLlm::new("x").with_route("banter", true)),
            None,
        );
        let route = router.route("된장찌개 어떻게 끓여?").await;
        assert_eq!(route.intent, Intent::Recipe);
    }

    #[test]
    fn test_heuristic_priority_order() {
        // Storage cue wins over the recipe cue appearing later in the text.
        let route = heuristic_route("보관 방법 알려줘");
        assert_eq!(route.intent, Intent::Storage);
    }
}
