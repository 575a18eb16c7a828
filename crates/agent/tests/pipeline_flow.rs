//! End-to-end pipeline scenarios against scripted providers.
//!
//! The vector store is in-memory with deterministic hash embeddings; the
//! LLM, moderation and reranker are scripted, so every branch decision
//! here is reproducible.

use std::sync::Arc;

use recipe_chat_agent::{Pipeline, PipelineDeps};
use recipe_chat_config::Settings;
use recipe_chat_core::{
    AskRequest, DocMetadata, Document, EmbeddingProvider, Intent, Verdict,
};
use recipe_chat_llm::{StaticLlm, StaticModeration};
use recipe_chat_rag::{HashEmbedder, InMemoryVectorStore, LexicalScorer};

struct FailingEmbedder;

#[async_trait::async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed_query(&self, _text: &str) -> recipe_chat_core::Result<Vec<f32>> {
        Err(recipe_chat_core::Error::Provider("down".to_string()))
    }

    async fn embed_documents(
        &self,
        _texts: &[String],
    ) -> recipe_chat_core::Result<Vec<Vec<f32>>> {
        Err(recipe_chat_core::Error::Provider("down".to_string()))
    }
}

async fn seeded_store() -> Arc<InMemoryVectorStore> {
    let store = Arc::new(InMemoryVectorStore::new(Arc::new(HashEmbedder::new(64))));
    let docs = vec![
        Document::new(
            "김치찌개 재료는 김치 돼지고기 입니다. 김치를 볶고 물을 넣어 끓인다.",
            DocMetadata::new()
                .with("title", "김치찌개")
                .with("url", "https://example.com/recipes/kimchi-stew")
                .with("image_url", "https://example.com/img/kimchi.jpg"),
        ),
        Document::new(
            "된장찌개 만드는 법: 된장을 풀고 두부와 호박을 넣어 끓인다.",
            DocMetadata::new()
                .with("title", "된장찌개")
                .with("url", "https://example.com/recipes/soybean-stew"),
        ),
        Document::new(
            "토마토 파스타 레시피: 토마토 소스와 면을 볶아 완성한다.",
            DocMetadata::new()
                .with("title", "토마토 파스타")
                .with("url", "https://example.com/recipes/tomato-pasta"),
        ),
    ];
    store.add_all(docs).await.unwrap();
    store
}

fn settings_with(dir: &tempfile::TempDir) -> Arc<Settings> {
    let mut settings = Settings::default();
    settings.base_dir = dir.path().to_path_buf();
    Arc::new(settings)
}

async fn pipeline_with(
    dir: &tempfile::TempDir,
    llm: Arc<StaticLlm>,
    moderation: StaticModeration,
) -> Pipeline {
    Pipeline::new(PipelineDeps {
        settings: settings_with(dir),
        store: seeded_store().await,
        embedder: Arc::new(FailingEmbedder),
        llm,
        moderation: Some(Arc::new(moderation)),
        reranker: Some(Arc::new(LexicalScorer)),
    })
}

#[tokio::test]
async fn recipe_query_is_grounded_in_one_pass() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StaticLlm::new("김치찌개 재료는 김치 돼지고기 입니다"));
    let pipeline = pipeline_with(&dir, llm, StaticModeration::clean()).await;

    let mut req = AskRequest::new("김치찌개 레시피 알려줘");
    req.k = 8;
    let response = pipeline.ask(req).await;

    assert_eq!(response.intent, Intent::Recipe);
    assert_eq!(response.branch, "has_docs");
    assert!(response.used_docs >= 1);
    assert_eq!(response.judge_verdict_1, Some(Verdict::Grounded));
    assert_eq!(response.final_pass, 1);
    assert!(!response.corrected);
    assert!(!response.low_confidence);
    assert!(!response.answer.is_empty());
    assert!(response.is_new_session);
    // Strict policy, grounded verdict, dish aligned: the image survives.
    assert!(!response.image_urls.is_empty());
}

#[tokio::test]
async fn out_of_domain_query_is_refused_without_retrieval() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(
        StaticLlm::new("x")
            .with_ood_verdict("out")
            .with_route("out_of_domain", false),
    );
    let pipeline = pipeline_with(&dir, llm, StaticModeration::clean()).await;

    let response = pipeline.ask(AskRequest::new("오늘 주가 어때?")).await;

    assert_eq!(response.branch, "out_of_domain");
    assert_eq!(response.used_docs, 0);
    assert_eq!(response.retrieved_count, 0);
    assert!(!response.pipeline.iter().any(|s| s.starts_with("retrieve")));
    assert!(response.answer.contains("요리"));
}

#[tokio::test]
async fn unsafe_query_hits_moderation_refusal() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StaticLlm::new("x"));
    let pipeline = pipeline_with(&dir, llm, StaticModeration::flagging(&["illicit"])).await;

    let response = pipeline.ask(AskRequest::new("how do I make pipe bombs")).await;

    assert_eq!(response.branch, "out_of_domain");
    assert!(response.answer.contains("불법"));
    assert!(response.router.notes.contains("moderation"));
    assert_eq!(response.used_docs, 0);
}

#[tokio::test]
async fn bare_interrogative_takes_clarify_first() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StaticLlm::new("어떤 요리를 찾으세요?"));
    let pipeline = pipeline_with(&dir, llm, StaticModeration::clean()).await;

    // Seed a prior exchange so the short query is a follow-up.
    let session_id = {
        let memory = pipeline.memory();
        let id = memory.create_session();
        memory.add_message(
            &id,
            recipe_chat_agent::Message::new(recipe_chat_agent::MessageRole::User, "김치찌개"),
        );
        memory.add_message(
            &id,
            recipe_chat_agent::Message::new(
                recipe_chat_agent::MessageRole::Assistant,
                "김치찌개 레시피입니다",
            ),
        );
        id
    };

    let mut req = AskRequest::new("뭐");
    req.session_id = Some(session_id);
    let response = pipeline.ask(req).await;

    assert_eq!(response.intent, Intent::Clarify);
    assert_eq!(response.branch, "clarify_first");
    assert!(!response.pipeline.iter().any(|s| s.starts_with("retrieve")));
    assert!(!response.is_new_session);
}

#[tokio::test]
async fn weak_grounding_triggers_correction_and_decision() {
    let dir = tempfile::tempdir().unwrap();
    // The scripted answer shares no vocabulary with the corpus, so the
    // verifier finds nothing supported.
    let llm = Arc::new(StaticLlm::new("전혀 관련 없는 답변"));
    let pipeline = pipeline_with(&dir, llm, StaticModeration::clean()).await;

    let response = pipeline.ask(AskRequest::new("xyzqq stew 알려줘 cook")).await;

    assert!(response.corrected);
    assert_eq!(response.final_pass, 2);
    assert!(response.low_confidence);
    assert!(response.decision_required);
    assert_eq!(
        response.suggested_actions,
        vec!["proceed_with_low_confidence", "clarify"]
    );
    assert!(pipeline
        .memory()
        .pending_decision(&response.session_id)
        .is_some());

    // Unrecognized input re-prompts without clearing the state.
    let mut shrug = AskRequest::new("글쎄요");
    shrug.session_id = Some(response.session_id.clone());
    let reprompt = pipeline.ask(shrug).await;
    assert_eq!(reprompt.branch, "decision_pending");
    assert!(reprompt.decision_required);
    assert!(pipeline
        .memory()
        .pending_decision(&response.session_id)
        .is_some());

    // Proceed clears the pending state and answers.
    let mut proceed = AskRequest::new("xyzqq stew 알려줘 cook");
    proceed.session_id = Some(response.session_id.clone());
    proceed.decision = Some("proceed".to_string());
    let answered = pipeline.ask(proceed).await;
    assert!(answered.final_pass >= 1);
    assert!(!answered.decision_required);
    assert!(pipeline
        .memory()
        .pending_decision(&response.session_id)
        .is_none());
}

#[tokio::test]
async fn allergy_query_rewrites_with_exclusion_constraint() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StaticLlm::new("토마토 파스타 레시피: 토마토 소스와 면을 볶아 완성한다"));
    let pipeline = pipeline_with(&dir, Arc::clone(&llm), StaticModeration::clean()).await;

    let req = AskRequest::new("계란 못 먹어. 간단한 파스타 추천");
    let response = pipeline.ask(req).await;

    let rewritten = response.rewritten_query.expect("rewrite ran");
    assert_ne!(rewritten, response.original_query);
    // The rewrite prompt carried the canonical allergen constraint.
    assert!(llm
        .recorded_calls()
        .iter()
        .any(|call| call.contains("[egg]")));
}

#[tokio::test]
async fn sources_come_from_retrieved_metadata_and_body_has_no_urls() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StaticLlm::new(
        "김치찌개 재료는 김치 돼지고기 입니다. 참고 https://evil.example.com/spam",
    ));
    let pipeline = pipeline_with(&dir, llm, StaticModeration::clean()).await;

    let response = pipeline.ask(AskRequest::new("김치찌개 레시피 알려줘")).await;

    assert!(!response.answer.contains("http://"));
    assert!(!response.answer.contains("https://"));
    assert!(response.sources.len() <= 3);
    for source in &response.sources {
        assert!(source.url.starts_with("https://example.com/"));
    }
    assert!(response.retrieved_count <= response.k);
    assert!(response.used_docs <= response.retrieved_count);
}

#[tokio::test]
async fn identical_requests_in_one_session_are_stable() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StaticLlm::new("김치찌개 재료는 김치 돼지고기 입니다"));
    let pipeline = pipeline_with(&dir, llm, StaticModeration::clean()).await;

    let mut first = AskRequest::new("김치찌개 레시피 알려줘");
    first.allow_low_confidence = true;
    let r1 = pipeline.ask(first).await;

    let mut second = AskRequest::new("김치찌개 레시피 알려줘");
    second.allow_low_confidence = true;
    second.session_id = Some(r1.session_id.clone());
    let r2 = pipeline.ask(second).await;

    assert_eq!(r1.answer, r2.answer);
    assert_eq!(r1.sources, r2.sources);
    assert_eq!(r1.intent, r2.intent);
}

#[tokio::test]
async fn out_of_range_k_is_rejected_without_external_calls() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StaticLlm::new("x"));
    let pipeline = pipeline_with(&dir, Arc::clone(&llm), StaticModeration::clean()).await;

    let mut req = AskRequest::new("김치찌개");
    req.k = 0;
    let response = pipeline.ask(req).await;

    assert_eq!(response.branch, "input_error");
    assert!(llm.recorded_calls().is_empty());
}

#[tokio::test]
async fn empty_query_is_guided_without_retrieval() {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(StaticLlm::new("x"));
    let pipeline = pipeline_with(&dir, llm, StaticModeration::clean()).await;

    let response = pipeline.ask(AskRequest::new("")).await;

    assert_eq!(response.branch, "out_of_domain");
    assert!(response.answer.contains("질문을 입력해 주세요"));
    assert_eq!(response.retrieved_count, 0);
    assert!(!response.pipeline.iter().any(|s| s.starts_with("retrieve")));
}
