//! Query rewriter
//!
//! Produces a retrieval-optimized reformulation of the user query. When
//! the query (or the recent conversation) expresses an allergy, exclusion
//! or substitution intent, the canonical allergens are extracted via a
//! synonym map and a short constraint clause is appended to the rewrite
//! prompt. LLM failure returns the original query unchanged, with the
//! constraint still attached when applicable.

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use recipe_chat_config::prompts::rewrite_prompt;
use recipe_chat_core::{ChatMessage, LlmOptions, LlmProvider};

/// Allergy / exclusion / substitution trigger phrases (Korean + English).
static TRIGGER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(알레르|알러지|알레르겐|알러젠|과민|민감|불내증|못\s*먹|먹지\s*못|금기|피하|제외|빼(고|줘)?|제거|대체|대신|치환|substitut\w*|allerg\w*|intoleran\w*|avoid|can'?t\s*eat|without)",
    )
    .unwrap()
});

/// Canonical allergen key → synonyms (Korean + English).
const ALLERGEN_SYNONYMS: &[(&str, &[&str])] = &[
    ("pork", &["돼지고기", "돼지", "pork"]),
    ("beef", &["소고기", "소", "beef"]),
    ("chicken", &["닭고기", "닭", "chicken"]),
    ("egg", &["계란", "달걀", "egg", "eggs"]),
    (
        "milk",
        &["우유", "유제품", "치즈", "버터", "milk", "dairy", "cheese", "butter", "lactose"],
    ),
    ("soy", &["대두", "콩", "두부", "soy", "soybean", "tofu"]),
    ("wheat_gluten", &["밀", "밀가루", "글루텐", "wheat", "flour", "gluten"]),
    ("peanut", &["땅콩", "peanut", "peanuts"]),
    (
        "tree_nut",
        &[
            "견과", "아몬드", "호두", "캐슈", "피칸", "헤이즐넛", "nut", "nuts", "almond",
            "walnut", "cashew", "pecan", "hazelnut",
        ],
    ),
    ("sesame", &["참깨", "들깨", "깨", "sesame", "perilla"]),
    (
        "crustacean",
        &["갑각류", "새우", "게", "랍스터", "가재", "crustacean", "shrimp", "prawn", "crab", "lobster"],
    ),
    (
        "shellfish",
        &["조개류", "홍합", "바지락", "조개", "굴", "전복", "가리비", "shellfish", "clam", "mussel", "oyster", "scallop"],
    ),
    (
        "fish",
        &["생선", "참치", "연어", "대구", "고등어", "fish", "salmon", "tuna", "cod", "mackerel"],
    ),
    ("celery", &["셀러리", "celery"]),
    ("mustard", &["겨자", "머스타드", "mustard"]),
    ("tomato", &["토마토", "tomato"]),
];

/// Does the text express allergy/exclusion/substitution intent?
pub fn detect_triggers(text: &str) -> bool {
    !text.is_empty() && TRIGGER_RE.is_match(text)
}

/// Canonical allergen keys present in the text via substring match.
/// Deliberately recall-oriented; ordered for determinism.
pub fn extract_allergens(text: &str) -> BTreeSet<&'static str> {
    let mut found = BTreeSet::new();
    if text.is_empty() {
        return found;
    }
    let t = text.to_lowercase();
    for (canonical, synonyms) in ALLERGEN_SYNONYMS {
        if synonyms.iter().any(|s| t.contains(&s.to_lowercase())) {
            found.insert(*canonical);
        }
    }
    found
}

/// Short constraint clause appended to the rewrite prompt.
pub fn build_constraint_text(allergens: &BTreeSet<&'static str>) -> String {
    if allergens.is_empty() {
        return String::new();
    }
    let readable = allergens.iter().copied().collect::<Vec<_>>().join(", ");
    format!(
        "제약: 알레르기/제외 대상 [{}] 제외, 적절한 대체재를 반영해 검색 최적화.",
        readable
    )
}

/// LLM-backed rewriter with constraint augmentation.
pub struct QueryRewriter {
    llm: Arc<dyn LlmProvider>,
    model: Option<String>,
    temperature: f32,
}

impl QueryRewriter {
    pub fn new(llm: Arc<dyn LlmProvider>, model: Option<String>, temperature: f32) -> Self {
        Self {
            llm,
            model,
            temperature,
        }
    }

    /// Rewrite a query for retrieval, considering recent context for
    /// allergy constraints.
    pub async fn rewrite(&self, query: &str, recent_context: &str) -> String {
        let augment = self.constraint_for(query, recent_context);
        let final_query = if augment.is_empty() {
            query.to_string()
        } else {
            format!("{}\n\n{}", query, augment)
        };

        let opts = match &self.model {
            Some(model) => LlmOptions::with_model(model.clone()).temperature(self.temperature),
            None => LlmOptions::default().temperature(self.temperature),
        };
        let messages = [ChatMessage::user(rewrite_prompt(&final_query))];

        match self.llm.complete_text(&messages, &opts).await {
            Ok(rewritten) => {
                let rewritten = rewritten.trim();
                if rewritten.is_empty() {
                    final_query
                } else {
                    rewritten.to_string()
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "rewrite failed, using original query");
                final_query
            }
        }
    }

    fn constraint_for(&self, query: &str, recent_context: &str) -> String {
        let combined = recent_context.trim();
        let scan_text = if combined.is_empty() {
            query.to_string()
        } else {
            format!("{}\n{}", query, combined)
        };
        if !detect_triggers(&scan_text) {
            return String::new();
        }
        build_constraint_text(&extract_allergens(&scan_text))
    }
}
