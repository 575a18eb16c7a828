//! Pipeline orchestrator
//!
//! Runs one request through the staged pipeline with conditional
//! corrective re-execution:
//!
//! ```text
//! START → check_pending → ood_guard → router → clarify_first?
//!       → rewrite? → retrieve → filter → rerank?
//!       → build_context → generate → verify1
//!       → (rewrite2 → retrieve2 → generate2 → verify2)?
//!       → low_confidence_gate → sanitize_links → RESPOND
//! ```
//!
//! No partial state leaks between requests: the session log gains an
//! assistant turn only for the answer actually returned.

use std::collections::HashMap;
use std::sync::Arc;

use recipe_chat_config::prompts::canned;
use recipe_chat_config::{LowConfMode, Settings};
use recipe_chat_core::{
    AskRequest, AskResponse, ConfidenceLevel, EmbeddingProvider, Error, ImagePolicy, Intent,
    LlmProvider, ModerationProvider, Reranker, ResponseMode, Result, RetrievalMetrics, Route,
    ScoreMode, ScoresSummary, SourceRef, VectorStore, Verdict, VerifierReport,
};
use recipe_chat_rag::context::{build_context_with_images, BuiltContext, ContextConfig};
use recipe_chat_rag::filter::{FilterConfig, PostRetrievalFilter, RetrievedSet};
use recipe_chat_rag::retriever::{HybridConfig, HybridRetriever};
use recipe_chat_rag::sparse::SparseIndexHandle;
use recipe_chat_rag::tokenizer::Tokenizer;
use recipe_chat_rag::verifier::{GroundingVerifier, VerifierConfig};
use recipe_chat_rag::CrossEncoderRerank;

use crate::generate::{extract_target_dish, AnswerGenerator};
use crate::memory::{ConversationMemory, Message, MessageRole, PendingDecision};
use crate::ood::{is_short_followup, OodGuard, OodOutcome};
use crate::rewrite::QueryRewriter;
use crate::router::IntentRouter;
use crate::sanitize::{remove_links_in_body, sanitize_answer_links, strip_sources_section};

/// Injected collaborators.
pub struct PipelineDeps {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub moderation: Option<Arc<dyn ModerationProvider>>,
    pub reranker: Option<Arc<dyn Reranker>>,
}

/// Intents for which images may be attached under strict/lenient policy.
const IMAGE_INTENTS: &[Intent] = &[
    Intent::Recipe,
    Intent::DishOverview,
    Intent::Substitution,
    Intent::Storage,
];

/// Bare interrogatives that always need clarification.
const BARE_INTERROGATIVES: &[&str] = &["어떻게", "방법", "뭐", "뭘", "어디", "언제"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Proceed,
    Clarify,
}

/// Outcome of one retrieval + generation + verification pass.
struct PassOutcome {
    retrieved: RetrievedSet,
    built: BuiltContext,
    answer: String,
    report: Option<VerifierReport>,
}

/// The request orchestrator.
pub struct Pipeline {
    settings: Arc<Settings>,
    memory: Arc<ConversationMemory>,
    store: Arc<dyn VectorStore>,
    retriever: HybridRetriever,
    filter: PostRetrievalFilter,
    rerank: CrossEncoderRerank,
    verifier: GroundingVerifier,
    ood: OodGuard,
    router: IntentRouter,
    rewriter: QueryRewriter,
    generator: AnswerGenerator,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        let settings = deps.settings;
        let tokenizer = Tokenizer::default();
        let sparse = Arc::new(SparseIndexHandle::new(
            settings.bm25_snapshot_path(),
            tokenizer,
        ));
        let retriever = HybridRetriever::new(
            Arc::clone(&deps.store),
            sparse,
            HybridConfig {
                alpha: settings.hybrid_alpha,
                k_rrf: settings.hybrid_k_rrf,
                fetch_k: settings.hybrid_fetch_k,
            },
        );
        let filter = PostRetrievalFilter::new(
            Arc::clone(&deps.store),
            FilterConfig {
                min_doc_len: settings.min_doc_len,
                similarity_threshold: settings.similarity_threshold,
                domain_cap: settings.domain_cap,
                mmr_fetch: settings.mmr_fetch,
            },
        );
        let rerank = CrossEncoderRerank::new(
            if settings.use_ce_rerank {
                deps.reranker.clone()
            } else {
                None
            },
            settings.ce_topn,
        );
        let verifier = GroundingVerifier::new(
            if settings.enable_crag {
                deps.reranker.clone()
            } else {
                None
            },
            VerifierConfig {
                sent_t: settings.ce_sent_t,
                support_p: settings.ce_support_p,
                max_docs: settings.ce_max_docs,
                snippets_per_doc: settings.ce_snippets_per_doc,
            },
        );
        let ood = OodGuard::new(
            Arc::clone(&deps.llm),
            Arc::clone(&deps.embedder),
            if settings.enable_moderation {
                deps.moderation.clone()
            } else {
                None
            },
            settings.ood_prototypes_path.clone(),
            settings.ood_cos_threshold,
            settings.ood_cos_margin,
            Some(settings.ood_model.clone()),
        );
        let router = IntentRouter::new(Arc::clone(&deps.llm), Some(settings.router_model.clone()));
        let rewriter = QueryRewriter::new(
            Arc::clone(&deps.llm),
            Some(settings.rewrite_model.clone()),
            settings.rewrite_temperature,
        );
        let generator = AnswerGenerator::new(
            Arc::clone(&deps.llm),
            Some(settings.generation_model.clone()),
            settings.generation_temperature,
            settings.allow_no_context_answer,
        );
        let memory = Arc::new(ConversationMemory::new(
            settings.memory_max_turns,
            settings.session_ttl_minutes,
        ));

        Self {
            settings,
            memory,
            store: deps.store,
            retriever,
            filter,
            rerank,
            verifier,
            ood,
            router,
            rewriter,
            generator,
        }
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    /// Run one request end to end. Unexpected failures become a terse
    /// apology with `branch = internal_error`; this never panics the
    /// serving task.
    pub async fn ask(&self, req: AskRequest) -> AskResponse {
        let fut = self.run(&req);
        let outcome = tokio::time::timeout(self.settings.request_timeout, fut).await;
        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "pipeline failed");
                self.internal_error_response(&req)
            }
            Err(_) => {
                tracing::error!("request deadline exceeded");
                self.internal_error_response(&req)
            }
        }
    }

    async fn run(&self, req: &AskRequest) -> Result<AskResponse> {
        let original_query = req.query.clone();
        let mut steps: Vec<String> = Vec::new();

        // Input bounds: a user-facing clarification, no external calls.
        if let Err(problem) = req.validate() {
            let mut response = self.empty_response(
                req,
                String::new(),
                true,
                0,
                Route::new(Intent::Clarify, false, "input_error"),
                Intent::Clarify,
                "input_error",
                vec!["input_error".to_string()],
                format!("요청 값을 확인해 주세요: {}", problem),
            );
            response.mode = ResponseMode::Clarify;
            return Ok(response);
        }

        // Session intake; an expired or unknown id gets a fresh session.
        let (session_id, is_new_session) = match &req.session_id {
            Some(id) if self.memory.get_session(id).is_some() => (id.clone(), false),
            _ => (self.memory.create_session(), true),
        };
        let history = self.memory.get_history(&session_id);
        let history_used = !history.is_empty();
        let conversation_turns = history.len() / 2;

        // Pending low-confidence decision protocol.
        let mut allow_low_override = false;
        if let Some(pending) = self.memory.pending_decision(&session_id) {
            match parse_decision(req.decision.as_deref(), &req.query) {
                Some(Decision::Proceed) => {
                    allow_low_override = true;
                    self.memory.clear_pending_decision(&session_id);
                }
                Some(Decision::Clarify) => {
                    let clarify = self
                        .clarify_answer(&req.query, &history, req.model.as_deref())
                        .await;
                    self.memory.clear_pending_decision(&session_id);
                    let mut response = self.empty_response(
                        req,
                        session_id,
                        is_new_session,
                        conversation_turns,
                        Route::new(Intent::Clarify, false, "pending_decision"),
                        Intent::Clarify,
                        "decision_clarify",
                        vec!["decision_clarify".to_string()],
                        clarify,
                    );
                    response.mode = ResponseMode::Clarify;
                    response.history_used = history_used;
                    response.low_confidence = true;
                    response.warning =
                        Some("사용자 선택에 따라 질문 다듬기 제안 제공".to_string());
                    return Ok(response);
                }
                None => {
                    tracing::debug!(original = %pending.original_query, "re-prompting decision");
                    let mut response = self.empty_response(
                        req,
                        session_id,
                        is_new_session,
                        conversation_turns,
                        Route::new(Intent::Clarify, false, "pending_decision"),
                        Intent::Clarify,
                        "decision_pending",
                        vec!["decision_pending".to_string()],
                        canned::DECISION_PROMPT.to_string(),
                    );
                    response.mode = ResponseMode::Clarify;
                    response.history_used = history_used;
                    response.low_confidence = true;
                    response.warning = Some(canned::DECISION_PROMPT.to_string());
                    response.decision_required = true;
                    response.suggested_actions = suggested_actions();
                    return Ok(response);
                }
            }
        }

        // Out-of-domain gate; a very short follow-up with prior history
        // bypasses the block to keep the conversation flowing.
        let ood_outcome = self.ood.check(&original_query).await;
        steps.push("ood_guard".to_string());
        if !is_short_followup(&original_query, history_used) {
            if let OodOutcome::Out { answer, method, .. } = &ood_outcome {
                tracing::info!(method = %method, "query blocked as out-of-domain");
                let mut response = self.empty_response(
                    req,
                    session_id.clone(),
                    is_new_session,
                    conversation_turns,
                    Route::out_of_domain(format!("pre_ood_guard:{}", method)),
                    Intent::OutOfDomain,
                    "out_of_domain",
                    steps,
                    answer.clone(),
                );
                response.mode = ResponseMode::OodBlock;
                response.history_used = history_used;
                self.log_turns(&session_id, &original_query, &response.answer, |meta| {
                    meta.insert("intent".to_string(), "out_of_domain".to_string());
                });
                return Ok(response);
            }
        }

        // Intent routing.
        let route = self.router.route(&original_query).await;
        steps.push("router".to_string());
        let intent = route.intent;
        let needs_retrieval = route.needs_retrieval;

        // Clarify-first for short or ambiguous queries.
        if needs_clarify_first(&original_query, intent) {
            let clarify = self
                .clarify_answer(&original_query, &history, req.model.as_deref())
                .await;
            steps.push("clarify_first".to_string());
            let mut response = self.empty_response(
                req,
                session_id.clone(),
                is_new_session,
                conversation_turns,
                route,
                Intent::Clarify,
                "clarify_first",
                steps,
                clarify,
            );
            response.mode = ResponseMode::Clarify;
            response.history_used = history_used;
            self.log_turns(&session_id, &original_query, &response.answer, |meta| {
                meta.insert("intent".to_string(), "clarify".to_string());
                meta.insert("clarify_stage".to_string(), "first".to_string());
            });
            return Ok(response);
        }

        // Router-level out-of-domain.
        if intent == Intent::OutOfDomain {
            let mut response = self.empty_response(
                req,
                session_id.clone(),
                is_new_session,
                conversation_turns,
                route,
                Intent::OutOfDomain,
                "out_of_domain",
                steps,
                canned::ROUTER_OOD_REFUSAL.to_string(),
            );
            response.mode = ResponseMode::OodBlock;
            response.history_used = history_used;
            self.log_turns(&session_id, &original_query, &response.answer, |meta| {
                meta.insert("intent".to_string(), "out_of_domain".to_string());
            });
            return Ok(response);
        }

        // Optional retrieval-oriented rewrite.
        let mut query_for_search = original_query.clone();
        let mut rewritten_query = None;
        if req.enable_rewrite && self.settings.enable_query_rewrite && needs_retrieval {
            query_for_search = self.rewriter.rewrite(&original_query, "").await;
            steps.push("rewrite".to_string());
            rewritten_query = Some(query_for_search.clone());
        }

        // Retrieve + filter (+ optional cross-encoder rerank).
        let mut retrieved = RetrievedSet::default();
        if needs_retrieval {
            match self.retrieve(&query_for_search, req.k).await {
                Ok(set) => {
                    retrieved = set;
                    steps.push("retrieve".to_string());
                }
                Err(Error::RetrievalUnavailable(reason)) => {
                    tracing::warn!(%reason, "retrieval unavailable");
                    steps.push("retrieve_error".to_string());
                }
                Err(e) => return Err(e),
            }
            if self.rerank.apply(&original_query, &mut retrieved.docs).await {
                steps.push("rerank_ce".to_string());
            }
        }

        // No documents: ask the user to refine instead of guessing.
        if needs_retrieval && retrieved.is_empty() {
            let clarify = self
                .clarify_answer(&original_query, &history, req.model.as_deref())
                .await;
            steps.push("clarify".to_string());
            let mut response = self.empty_response(
                req,
                session_id.clone(),
                is_new_session,
                conversation_turns,
                route,
                Intent::Clarify,
                "no_docs",
                steps,
                clarify,
            );
            response.mode = ResponseMode::Clarify;
            response.history_used = history_used;
            response.rewritten_query = rewritten_query;
            self.log_turns(&session_id, &original_query, &response.answer, |meta| {
                meta.insert("intent".to_string(), "clarify".to_string());
                meta.insert("context_found".to_string(), "false".to_string());
            });
            return Ok(response);
        }

        // Pass 1: context → generate → verify.
        let pass1 = self
            .run_pass(
                &original_query,
                intent,
                retrieved,
                &history,
                req.model.as_deref(),
                &mut steps,
                1,
            )
            .await?;

        let mut corrected = false;
        let mut final_pass: u8 = 1;
        let report1 = pass1.report.clone();
        let mut current = pass1;
        let mut report2: Option<VerifierReport> = None;

        // Corrective second pass on a weak first verdict.
        if self.settings.enable_crag && should_correct(report1.as_ref()) {
            let rewritten2 = self
                .rewriter
                .rewrite(&original_query, &current.built.context_text)
                .await;
            steps.push("rewrite2".to_string());

            let retrieved2 = match self.retrieve(&rewritten2, req.k).await {
                Ok(set) => {
                    steps.push("retrieve2".to_string());
                    set
                }
                Err(_) => {
                    steps.push("retrieve2_error".to_string());
                    RetrievedSet::default()
                }
            };

            let pass2 = self
                .run_pass(
                    &original_query,
                    intent,
                    retrieved2,
                    &history,
                    req.model.as_deref(),
                    &mut steps,
                    2,
                )
                .await?;
            report2 = pass2.report.clone();
            current = pass2;
            corrected = true;
            final_pass = 2;
        }

        let final_report = report2.as_ref().or(report1.as_ref());
        let final_verdict = final_report.map(|r| r.verdict);

        // Source references aligned to the docs the context was built from.
        let sources = align_sources(&current.retrieved, &current.built);

        // Image gating.
        let image_urls = self.gate_images(req, intent, &current, final_verdict, &original_query);

        // Low-confidence detection over the final pass.
        let low_confidence = self.detect_low_confidence(&current.retrieved, final_report);

        let mut answer = current.answer.clone();
        let mut decision_required = false;
        if low_confidence && !(req.allow_low_confidence || allow_low_override) {
            let clarify = self
                .clarify_answer(&original_query, &history, req.model.as_deref())
                .await;
            steps.push("low_confidence_clarify".to_string());
            answer = format!(
                "{}\n{}\n질문 다듬기 제안:\n{}",
                canned::LOW_CONFIDENCE_WARNING,
                canned::DECISION_PROMPT,
                clarify
            );
            self.memory.set_pending_decision(
                &session_id,
                PendingDecision {
                    original_query: original_query.clone(),
                },
            );
            decision_required = true;
        }

        // Link hygiene: mask unknown URLs, strip the rest, drop any
        // trailing sources section.
        let (sanitized, _) = sanitize_answer_links(&answer, &sources);
        let (sanitized, _) = remove_links_in_body(&sanitized);
        let (sanitized, _) = strip_sources_section(&sanitized);
        let answer = sanitized;

        self.log_turns(&session_id, &original_query, &answer, |meta| {
            meta.insert("intent".to_string(), intent.as_str().to_string());
            meta.insert(
                "context_found".to_string(),
                (!current.retrieved.is_empty()).to_string(),
            );
            meta.insert(
                "used_docs".to_string(),
                current.built.selected_doc_texts.len().to_string(),
            );
        });

        let known_scores = current.retrieved.known_scores();
        let doc_count = current.retrieved.docs.len();
        let branch = if doc_count > 0 { "has_docs" } else { "no_docs" };
        let mode = if doc_count > 0 {
            ResponseMode::ContextBased
        } else if self.settings.allow_no_context_answer {
            ResponseMode::GeneralKnowledge
        } else {
            ResponseMode::NoContextRefusal
        };

        let retrieval_metrics = RetrievalMetrics {
            score_mode: current
                .retrieved
                .score_mode
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| ScoreMode::Distance.as_str().to_string()),
            k: req.k,
            mmr_enabled: self.settings.rerank_mmr,
            mmr_fetch: self.settings.mmr_fetch,
            mmr_lambda: self.settings.mmr_lambda,
            similarity_threshold: self.settings.similarity_threshold,
            domain_cap: self.settings.domain_cap,
            have_scores: !known_scores.is_empty(),
            scores_summary: ScoresSummary::from_values(&known_scores),
            unique_domains: current.retrieved.unique_domains(),
            verifier_metrics_1: report1.clone(),
            verifier_metrics_2: report2.clone(),
        };

        Ok(AskResponse {
            answer,
            router: route,
            intent,
            original_query,
            rewritten_query,
            context_text: current.built.context_text.clone(),
            context_len: current.built.context_text.chars().count(),
            used_docs: current.built.selected_doc_texts.len(),
            context_found: doc_count > 0,
            retrieved_count: doc_count,
            retrieved_scores: known_scores.into_iter().take(5).collect(),
            image_urls,
            k: req.k,
            mode,
            branch: branch.to_string(),
            pipeline: steps,
            session_id,
            is_new_session,
            history_used,
            conversation_turns,
            judge_verdict_1: report1.map(|r| r.verdict),
            judge_verdict_2: report2.map(|r| r.verdict),
            corrected,
            final_pass,
            sources,
            low_confidence,
            warning: low_confidence.then(|| canned::LOW_CONFIDENCE_WARNING.to_string()),
            decision_required,
            suggested_actions: if low_confidence {
                suggested_actions()
            } else {
                Vec::new()
            },
            retrieval_metrics,
        })
    }

    /// One retrieval-result pass: context build, generation, verification.
    async fn run_pass(
        &self,
        query: &str,
        intent: Intent,
        retrieved: RetrievedSet,
        history: &[Message],
        model_hint: Option<&str>,
        steps: &mut Vec<String>,
        pass: u8,
    ) -> Result<PassOutcome> {
        let suffix = if pass == 1 { "" } else { "2" };

        let built = if retrieved.is_empty() {
            BuiltContext::default()
        } else {
            let built = build_context_with_images(&retrieved.docs, &ContextConfig::default());
            steps.push(format!("context_builder{}", suffix));
            built
        };

        let answer = self
            .generator
            .generate(query, intent, &built.context_text, history, model_hint)
            .await?;
        steps.push(format!("generate{}", suffix));

        let report = if self.settings.enable_crag && !retrieved.is_empty() {
            let judge_inputs: Vec<String> = if built.selected_doc_texts.is_empty() {
                retrieved.docs.iter().map(|d| d.text.clone()).collect()
            } else {
                built.selected_doc_texts.clone()
            };
            let report = self.verifier.verify(&answer, &judge_inputs).await;
            steps.push(format!("judge{}", if pass == 1 { "1" } else { "2" }));
            Some(report)
        } else {
            None
        };

        Ok(PassOutcome {
            retrieved,
            built,
            answer,
            report,
        })
    }

    /// Retrieve documents: hybrid fusion by default, pure vector search
    /// (MMR or scored) when hybrid is disabled.
    async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievedSet> {
        if self.settings.use_hybrid_search {
            let (hits, mode) = self.retriever.search(query, k).await?;
            let raw: Vec<_> = hits
                .into_iter()
                .map(|hit| (hit.text, hit.meta, Some(hit.score)))
                .collect();
            return Ok(self.filter.apply(query, k, raw, mode).await);
        }

        if self.settings.rerank_mmr {
            let docs = self
                .store
                .max_marginal_relevance_search(
                    query,
                    k,
                    k.max(self.settings.mmr_fetch),
                    self.settings.mmr_lambda,
                )
                .await
                .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?;
            let raw: Vec<_> = docs
                .into_iter()
                .map(|doc| (doc.text, doc.metadata, None))
                .collect();
            Ok(self.filter.apply(query, k, raw, ScoreMode::Mmr).await)
        } else {
            let scored = self
                .store
                .similarity_search_with_score(query, k)
                .await
                .map_err(|e| Error::RetrievalUnavailable(e.to_string()))?;
            let raw: Vec<_> = scored
                .into_iter()
                .map(|(doc, distance)| (doc.text, doc.metadata, Some(1.0 - distance)))
                .collect();
            Ok(self.filter.apply(query, k, raw, ScoreMode::Distance).await)
        }
    }

    /// Image gating per request policy.
    fn gate_images(
        &self,
        req: &AskRequest,
        intent: Intent,
        outcome: &PassOutcome,
        final_verdict: Option<Verdict>,
        original_query: &str,
    ) -> Vec<String> {
        if !req.include_images || req.max_images == 0 {
            return Vec::new();
        }

        let mut images: Vec<String> = outcome
            .built
            .selected_images
            .iter()
            .filter(|u| !u.is_empty())
            .cloned()
            .collect();

        match req.image_policy {
            ImagePolicy::Always => {}
            ImagePolicy::Lenient => {
                if !IMAGE_INTENTS.contains(&intent) {
                    return Vec::new();
                }
            }
            ImagePolicy::Strict => {
                if !IMAGE_INTENTS.contains(&intent) {
                    return Vec::new();
                }
                let dish = {
                    let from_answer = extract_target_dish(&outcome.answer);
                    if from_answer.is_empty() {
                        extract_target_dish(original_query)
                    } else {
                        from_answer
                    }
                };
                if !dish.is_empty() && !images.is_empty() {
                    // Keep images whose source doc actually mentions the dish.
                    let image_by_doc: HashMap<&str, &str> = outcome
                        .retrieved
                        .docs
                        .iter()
                        .filter_map(|d| {
                            d.image_url.as_deref().map(|u| (d.text.as_str(), u))
                        })
                        .collect();
                    let filtered: Vec<String> = outcome
                        .built
                        .selected_doc_texts
                        .iter()
                        .filter(|text| text.contains(&dish))
                        .filter_map(|text| image_by_doc.get(text.as_str()))
                        .map(|u| u.to_string())
                        .collect();
                    if !filtered.is_empty() {
                        images = filtered;
                    }
                }
                if self.settings.enable_crag
                    && final_verdict.map_or(false, |v| v != Verdict::Grounded)
                {
                    return Vec::new();
                }
                if dish.is_empty() {
                    return Vec::new();
                }
            }
        }

        images.truncate(req.max_images);
        images
    }

    /// Low-confidence predicate for the configured mode.
    fn detect_low_confidence(
        &self,
        retrieved: &RetrievedSet,
        report: Option<&VerifierReport>,
    ) -> bool {
        let threshold = self.settings.similarity_threshold;
        let max_sim = retrieved.max_similarity();
        let doc_count = retrieved.docs.len();

        let low_sim = threshold > 0.0 && max_sim.map_or(true, |s| s < threshold);
        let low_sim_slight = threshold > 0.0
            && max_sim.map_or(true, |s| {
                s < threshold + recipe_chat_config::constants::lowconf::SIM_SLACK
            });

        let verdict = report.map(|r| r.verdict);
        let support_rate = report.map(|r| r.support_rate).unwrap_or(0.0);
        let confidence = report
            .map(|r| r.confidence_level)
            .unwrap_or(ConfidenceLevel::Unknown);
        let is_not_grounded = verdict == Some(Verdict::NotGrounded);
        let is_not_sure = verdict == Some(Verdict::NotSure);
        let crag = self.settings.enable_crag;
        let min_conf_docs = self.settings.min_conf_docs;

        match self.settings.lowconf_mode {
            LowConfMode::Strict => {
                let crag_fail = crag && verdict.map_or(false, |v| v != Verdict::Grounded);
                low_sim || crag_fail
            }
            LowConfMode::Lenient => doc_count < 1,
            LowConfMode::Balanced => {
                let floor = recipe_chat_config::constants::lowconf::NOTSURE_SUPPORT_FLOOR;
                let thin_docs = low_sim && doc_count < min_conf_docs.max(1);
                let crag_fail = crag && is_not_grounded && low_sim_slight;
                let notsure_weak =
                    crag && is_not_sure && (support_rate < floor || confidence.is_weak());
                let notsure_borderline =
                    crag && is_not_sure && low_sim_slight && doc_count < min_conf_docs.max(2);
                thin_docs || crag_fail || notsure_weak || notsure_borderline
            }
        }
    }

    /// Clarify-style answer; a fixed fallback keeps the branch usable when
    /// the model is down.
    async fn clarify_answer(
        &self,
        query: &str,
        history: &[Message],
        model_hint: Option<&str>,
    ) -> String {
        match self
            .generator
            .generate(query, Intent::Clarify, "clarify_mode", history, model_hint)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::debug!(error = %e, "clarify generation failed, using fallback");
                canned::CLARIFY_FALLBACK.to_string()
            }
        }
    }

    fn log_turns<F>(&self, session_id: &str, query: &str, answer: &str, annotate: F)
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        self.memory
            .add_message(session_id, Message::new(MessageRole::User, query));
        let mut message = Message::new(MessageRole::Assistant, answer);
        annotate(&mut message.metadata);
        self.memory.add_message(session_id, message);
    }

    #[allow(clippy::too_many_arguments)]
    fn empty_response(
        &self,
        req: &AskRequest,
        session_id: String,
        is_new_session: bool,
        conversation_turns: usize,
        route: Route,
        intent: Intent,
        branch: &str,
        pipeline: Vec<String>,
        answer: String,
    ) -> AskResponse {
        AskResponse {
            answer,
            router: route,
            intent,
            original_query: req.query.clone(),
            rewritten_query: None,
            context_text: String::new(),
            context_len: 0,
            used_docs: 0,
            context_found: false,
            retrieved_count: 0,
            retrieved_scores: Vec::new(),
            image_urls: Vec::new(),
            k: req.k,
            mode: ResponseMode::Clarify,
            branch: branch.to_string(),
            pipeline,
            session_id,
            is_new_session,
            history_used: false,
            conversation_turns,
            judge_verdict_1: None,
            judge_verdict_2: None,
            corrected: false,
            final_pass: 1,
            sources: Vec::new(),
            low_confidence: false,
            warning: None,
            decision_required: false,
            suggested_actions: Vec::new(),
            retrieval_metrics: RetrievalMetrics {
                k: req.k,
                mmr_enabled: self.settings.rerank_mmr,
                mmr_fetch: self.settings.mmr_fetch,
                mmr_lambda: self.settings.mmr_lambda,
                similarity_threshold: self.settings.similarity_threshold,
                domain_cap: self.settings.domain_cap,
                score_mode: ScoreMode::Distance.as_str().to_string(),
                ..RetrievalMetrics::default()
            },
        }
    }

    fn internal_error_response(&self, req: &AskRequest) -> AskResponse {
        let session_id = req.session_id.clone().unwrap_or_default();
        let mut response = self.empty_response(
            req,
            session_id,
            false,
            0,
            Route::new(Intent::Unknown, false, "internal_error"),
            Intent::Unknown,
            "internal_error",
            vec!["internal_error".to_string()],
            canned::INTERNAL_ERROR.to_string(),
        );
        response.mode = ResponseMode::NoContextRefusal;
        response
    }
}

/// Decide whether a second corrective pass is warranted.
fn should_correct(report: Option<&VerifierReport>) -> bool {
    let report = match report {
        Some(r) => r,
        None => return false,
    };
    match report.verdict {
        Verdict::NotGrounded => true,
        Verdict::NotSure => {
            report.confidence_level.is_weak()
                || report.support_rate
                    < recipe_chat_config::constants::lowconf::NOTSURE_SUPPORT_FLOOR
        }
        Verdict::Grounded => false,
    }
}

/// Clarify-first predicate: empty, very short without an extractable
/// dish, or a bare interrogative. Storage/substitution/nutrition intents
/// are usually answerable without clarification.
fn needs_clarify_first(query: &str, intent: Intent) -> bool {
    if matches!(
        intent,
        Intent::Storage | Intent::Substitution | Intent::Nutrition
    ) {
        return false;
    }
    let qn = query.trim();
    if qn.is_empty() {
        return true;
    }
    if qn.chars().count() <= 4 || qn.split_whitespace().count() <= 1 {
        return extract_target_dish(qn).is_empty();
    }
    BARE_INTERROGATIVES.contains(&qn)
}

/// Parse the decision for a pending low-confidence state: the explicit
/// field first, then canonical tokens in the raw query.
fn parse_decision(decision: Option<&str>, fallback_query: &str) -> Option<Decision> {
    const PROCEED: &[&str] = &["proceed", "1", "진행", "그대로 진행", "계속", "예"];
    const CLARIFY: &[&str] = &["clarify", "2", "질문 다듬기", "다듬기", "수정", "아니오"];

    let explicit = decision.map(|d| d.trim().to_lowercase()).unwrap_or_default();
    if PROCEED.contains(&explicit.as_str()) {
        return Some(Decision::Proceed);
    }
    if CLARIFY.contains(&explicit.as_str()) {
        return Some(Decision::Clarify);
    }

    let q = fallback_query.trim().to_lowercase();
    if PROCEED.contains(&q.as_str()) {
        return Some(Decision::Proceed);
    }
    if CLARIFY.contains(&q.as_str()) {
        return Some(Decision::Clarify);
    }
    None
}

fn suggested_actions() -> Vec<String> {
    vec![
        "proceed_with_low_confidence".to_string(),
        "clarify".to_string(),
    ]
}

/// Up to 3 `{title, url}` source entries aligned to the context docs.
fn align_sources(retrieved: &RetrievedSet, built: &BuiltContext) -> Vec<SourceRef> {
    let mut index_by_text: HashMap<&str, usize> = HashMap::new();
    for (idx, doc) in retrieved.docs.iter().enumerate() {
        index_by_text.entry(doc.text.as_str()).or_insert(idx);
    }

    let mut sources = Vec::new();
    for text in &built.selected_doc_texts {
        let Some(&idx) = index_by_text.get(text.as_str()) else {
            continue;
        };
        let doc = &retrieved.docs[idx];
        if !doc.title.is_empty() || !doc.url.is_empty() {
            sources.push(SourceRef {
                title: doc.title.clone(),
                url: doc.url.clone(),
            });
        }
        if sources.len() >= 3 {
            break;
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decision_tokens() {
        assert_eq!(
            parse_decision(Some("proceed"), ""),
            Some(Decision::Proceed)
        );
        assert_eq!(parse_decision(Some("2"), ""), Some(Decision::Clarify));
        assert_eq!(parse_decision(None, "진행"), Some(Decision::Proceed));
        assert_eq!(parse_decision(None, "다듬기"), Some(Decision::Clarify));
        assert_eq!(parse_decision(None, "글쎄요"), None);
    }

    #[test]
    fn test_needs_clarify_first() {
        assert!(needs_clarify_first("뭐", Intent::Recipe));
        assert!(needs_clarify_first("어떻게", Intent::Recipe));
        assert!(!needs_clarify_first("김치찌개 레시피 알려줘", Intent::Recipe));
        // Short but with an extractable dish.
        assert!(!needs_clarify_first("불고기?", Intent::Recipe));
        // Exempt intents skip clarification even for short queries.
        assert!(!needs_clarify_first("뭐", Intent::Storage));
    }

    #[test]
    fn test_should_correct_policy() {
        let report = |verdict, confidence_level, support_rate| VerifierReport {
            verdict,
            confidence_level,
            support_rate,
            avg: 0.0,
            median: 0.0,
            supported: 0,
            total: 1,
        };
        assert!(should_correct(Some(&report(
            Verdict::NotGrounded,
            ConfidenceLevel::None,
            0.0
        ))));
        assert!(should_correct(Some(&report(
            Verdict::NotSure,
            ConfidenceLevel::Weak,
            0.25
        ))));
        assert!(should_correct(Some(&report(
            Verdict::NotSure,
            ConfidenceLevel::Borderline,
            0.1
        ))));
        assert!(!should_correct(Some(&report(
            Verdict::NotSure,
            ConfidenceLevel::Borderline,
            0.45
        ))));
        assert!(!should_correct(Some(&report(
            Verdict::Grounded,
            ConfidenceLevel::High,
            0.9
        ))));
        assert!(!should_correct(None));
    }
}
