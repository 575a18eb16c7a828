//! Grounded answer generation
//!
//! Selects the intent-specific template (which carries the faithfulness
//! rules), attaches the most recent conversation turns and produces a
//! single-turn answer. With no context and no-context answering
//! disabled, a fixed refusal is returned without calling the model.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use recipe_chat_config::constants::memory as memory_consts;
use recipe_chat_config::prompts::{canned, generation_system, generation_user};
use recipe_chat_core::{ChatMessage, Intent, LlmOptions, LlmProvider, Result};
use recipe_chat_rag::context::clean_newlines;

use crate::memory::{Message, MessageRole};

/// Cues whose left-hand side usually names the target dish.
const TARGET_CUES: &[&str] = &[
    "레시피",
    "만드는 법",
    "만드는 방법",
    "칼로리",
    "영양",
    "요약",
    "무엇",
    "뭐야",
];

static TRAILING_PARTICLES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[은는이가\s]+$").unwrap());
static QUESTION_TAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(.+?)(?:\?|\s*무엇|\s*뭐야)$").unwrap());

/// Extract a likely target dish/item from a query or answer.
///
/// Empty result means no clear target; clarify-first and image gating
/// treat that as "ambiguous".
pub fn extract_target_dish(text: &str) -> String {
    let q = text.trim();
    if q.is_empty() {
        return String::new();
    }
    for cue in TARGET_CUES {
        if let Some(pos) = q.find(cue) {
            let left = q[..pos].trim();
            let left = TRAILING_PARTICLES_RE.replace(left, "");
            if left.chars().count() >= 2 {
                return left.into_owned();
            }
        }
    }
    if let Some(caps) = QUESTION_TAIL_RE.captures(q) {
        let cand = TRAILING_PARTICLES_RE.replace(caps[1].trim(), "");
        if cand.chars().count() >= 2 {
            return cand.into_owned();
        }
    }
    String::new()
}

/// Intent-templated generator.
pub struct AnswerGenerator {
    llm: Arc<dyn LlmProvider>,
    default_model: Option<String>,
    temperature: f32,
    allow_no_context: bool,
}

impl AnswerGenerator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        default_model: Option<String>,
        temperature: f32,
        allow_no_context: bool,
    ) -> Self {
        Self {
            llm,
            default_model,
            temperature,
            allow_no_context,
        }
    }

    /// Generate a grounded answer for `(query, intent, context)` with the
    /// most recent 3 user/assistant pairs of history attached.
    pub async fn generate(
        &self,
        query: &str,
        intent: Intent,
        context: &str,
        history: &[Message],
        model_hint: Option<&str>,
    ) -> Result<String> {
        if context.is_empty() && !self.allow_no_context {
            return Ok(canned::NO_CONTEXT_REFUSAL.to_string());
        }
        let context = if context.is_empty() {
            "컨텍스트가 비어 있으므로 보편적인 요리 지식으로 보완합니다."
        } else {
            context
        };

        let mut messages = vec![ChatMessage::system(generation_system(intent))];
        let window = memory_consts::HISTORY_PAIRS_FOR_GENERATION * 2;
        let start = history.len().saturating_sub(window);
        for message in &history[start..] {
            messages.push(match message.role {
                MessageRole::User => ChatMessage::user(message.content.clone()),
                MessageRole::Assistant => ChatMessage::assistant(message.content.clone()),
            });
        }
        messages.push(ChatMessage::user(generation_user(context, query)));

        let model = model_hint
            .map(str::to_string)
            .or_else(|| self.default_model.clone());
        let opts = LlmOptions {
            model,
            temperature: Some(self.temperature),
        };

        let raw = self.llm.complete_text(&messages, &opts).await?;
        Ok(clean_newlines(raw.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recipe_chat_llm::StaticLlm;

    #[test]
    fn test_extract_target_dish_from_cue() {
        assert_eq!(extract_target_dish("김치찌개 레시피 알려줘"), "김치찌개");
        assert_eq!(extract_target_dish("된장찌개는 만드는 법이 뭐야"), "된장찌개");
        assert_eq!(extract_target_dish("비빔밥 칼로리"), "비빔밥");
    }

    #[test]
    fn test_extract_target_dish_question_tail() {
        assert_eq!(extract_target_dish("불고기?"), "불고기");
    }

    #[test]
    fn test_extract_target_dish_none() {
        assert_eq!(extract_target_dish("뭐"), "");
        assert_eq!(extract_target_dish(""), "");
        assert_eq!(extract_target_dish("레시피"), "");
    }

    #[tokio::test]
    async fn test_no_context_refusal() {
        let generator =
            AnswerGenerator::new(Arc::new(StaticLlm::new("answer")), None, 0.0, false);
        let answer = generator
            .generate("김치찌개", Intent::Recipe, "", &[], None)
            .await
            .unwrap();
        assert_eq!(answer, canned::NO_CONTEXT_REFUSAL);
    }

    #[tokio::test]
    async fn test_no_context_allowed_calls_model() {
        let generator =
            AnswerGenerator::new(Arc::new(StaticLlm::new("일반 지식 답변")), None, 0.0, true);
        let answer = generator
            .generate("김치찌개", Intent::Recipe, "", &[], None)
            .await
            .unwrap();
        assert_eq!(answer, "일반 지식 답변");
    }

    #[tokio::test]
    async fn test_generate_collapses_newlines() {
        let generator = AnswerGenerator::new(
            Arc::new(StaticLlm::new("첫 줄\n\n\n\n둘째 줄")),
            None,
            0.0,
            false,
        );
        let answer = generator
            .generate("김치찌개", Intent::Recipe, "컨텍스트 본문", &[], None)
            .await
            .unwrap();
        assert_eq!(answer, "첫 줄\n\n둘째 줄");
    }

    #[tokio::test]
    async fn test_history_window_is_three_pairs() {
        let llm = Arc::new(StaticLlm::new("ok"));
        let generator = AnswerGenerator::new(llm.clone(), None, 0.0, false);
        let history: Vec<Message> = (0..10)
            .map(|i| {
                Message::new(
                    if i % 2 == 0 {
                        MessageRole::User
                    } else {
                        MessageRole::Assistant
                    },
                    format!("turn-{}", i),
                )
            })
            .collect();
        generator
            .generate("질문", Intent::Recipe, "컨텍스트", &history, None)
            .await
            .unwrap();
        let prompt = llm.recorded_calls().pop().unwrap();
        assert!(!prompt.contains("turn-3"));
        assert!(prompt.contains("turn-4"));
        assert!(prompt.contains("turn-9"));
    }
}
