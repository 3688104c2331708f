/// manager.rs
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::models::chat::{ChatStreamEvent, RetrievedFragment, SessionId};
use crate::utils::error::{ApiError, ModelError, RetrievalError};

use super::cache::SessionStore;
use super::composer::AnswerComposer;
use super::fallback::{format_citations, FallbackDecision, FallbackPolicy, FallbackReason, PrimaryOutcome};
use super::providers::{WebSearchEvent, WebSearchProvider};
use super::reformulator::QueryReformulator;
use super::relay::Relay;
use super::types::{AnswerMode, ExchangeStage, Turn};

const DEFAULT_STREAM_CAPACITY: usize = 64;
const MODEL_INTERRUPTED_NOTICE: &str = "\n\n[Answer generation was interrupted.]";
const WEB_SEARCH_UNAVAILABLE_NOTICE: &str = "\n\n[Web search is unavailable.]";

/// Outcome of one committed exchange.
#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub session_id: SessionId,
    /// Exactly the text appended to the session as the assistant turn
    pub answer: String,
    pub fallback_reason: Option<FallbackReason>,
    pub sources: Vec<RetrievedFragment>,
    pub stages: Vec<ExchangeStage>,
}

impl AnswerResult {
    pub fn fallback_used(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// A streaming exchange in flight. Dropping `events` does not cancel it;
/// `completion` resolves once the exchange is committed.
#[derive(Debug)]
pub struct AnswerStream {
    pub session_id: SessionId,
    pub events: mpsc::Receiver<ChatStreamEvent>,
    pub completion: JoinHandle<AnswerResult>,
}

/// Runs one conversational exchange end to end: reformulate, retrieve,
/// compose, decide on fallback, relay, commit.
pub struct ConversationManager {
    store: Arc<dyn SessionStore>,
    reformulator: QueryReformulator,
    composer: AnswerComposer,
    fallback: FallbackPolicy,
    web_search: Arc<dyn WebSearchProvider>,
    stream_capacity: usize,
}

impl ConversationManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        reformulator: QueryReformulator,
        composer: AnswerComposer,
        fallback: FallbackPolicy,
        web_search: Arc<dyn WebSearchProvider>,
    ) -> Self {
        Self {
            store,
            reformulator,
            composer,
            fallback,
            web_search,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Answers and returns once the exchange is committed.
    pub async fn answer(
        &self,
        session_id: Option<SessionId>,
        message: &str,
        mode: AnswerMode,
    ) -> Result<AnswerResult, ApiError> {
        let (session_id, message) = self.prepare(session_id, message)?;
        let mut relay = Relay::buffered();
        Ok(self.run_exchange(&session_id, &message, mode, &mut relay).await)
    }

    /// Starts a streaming exchange. Validation errors surface here, before
    /// anything is emitted.
    pub fn answer_stream(
        self: Arc<Self>,
        session_id: Option<SessionId>,
        message: &str,
    ) -> Result<AnswerStream, ApiError> {
        let (session_id, message) = self.prepare(session_id, message)?;
        let (tx, rx) = mpsc::channel(self.stream_capacity);

        let task_session_id = session_id.clone();
        let completion = tokio::spawn(async move {
            let mut relay = Relay::streaming(tx);
            relay
                .emit(ChatStreamEvent::Session {
                    session_id: task_session_id.clone(),
                })
                .await;

            let result = self
                .run_exchange(&task_session_id, &message, AnswerMode::Streaming, &mut relay)
                .await;

            relay
                .emit(ChatStreamEvent::Done {
                    session_id: task_session_id,
                    fallback_used: result.fallback_used(),
                })
                .await;

            if !relay.is_attached() {
                info!(
                    "Session {} exchange completed after caller disconnected",
                    result.session_id
                );
            }
            result
        });

        Ok(AnswerStream {
            session_id,
            events: rx,
            completion,
        })
    }

    /// Clears the session once any exchange in flight on it has committed.
    pub async fn reset(&self, session_id: &str) {
        let _guard = self.store.lock(session_id).await;
        self.store.reset(session_id);
    }

    /// Committed turns of the session. Unknown ids read as empty and are not created.
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        if !self.store.contains(session_id) {
            return Vec::new();
        }
        self.store.get(session_id)
    }

    /// Validates input without touching any session.
    fn prepare(
        &self,
        session_id: Option<SessionId>,
        message: &str,
    ) -> Result<(SessionId, String), ApiError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ApiError::BadRequest("message must not be empty".to_string()));
        }

        let session_id = match session_id.map(|id| id.trim().to_string()) {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = uuid::Uuid::new_v4().to_string();
                debug!("Generated session id {}", id);
                id
            }
        };

        if !self.store.contains(&session_id) && !self.store.can_create_new_session() {
            return Err(ApiError::Unavailable(
                "session capacity reached, try again later".to_string(),
            ));
        }

        Ok((session_id, message.to_string()))
    }

    async fn run_exchange(
        &self,
        session_id: &str,
        message: &str,
        mode: AnswerMode,
        relay: &mut Relay,
    ) -> AnswerResult {
        let start_time = Instant::now();
        let mut stages = Vec::with_capacity(6);
        Self::enter(session_id, &mut stages, ExchangeStage::Start);

        let _guard = self.store.lock(session_id).await;
        let history = self.store.get(session_id);
        info!(
            "Session {} exchange started ({} prior turns, {:?})",
            session_id,
            history.len(),
            mode
        );

        let query = self.reformulator.reformulate(&history, message).await;

        Self::enter(session_id, &mut stages, ExchangeStage::Retrieving);
        let mut sources = Vec::new();
        let mut retrieval_error: Option<RetrievalError> = None;
        let mut model_error: Option<ModelError> = None;

        match self.composer.retrieve(&query).await {
            Ok(fragments) => {
                Self::enter(session_id, &mut stages, ExchangeStage::Composing);
                let (messages, _) = self.composer.build_messages(&fragments, &history, message);

                if let Err(e) = self.composer.compose(&messages, mode, relay).await {
                    warn!("Session {} answer generation failed: {}", session_id, e);
                    relay
                        .emit(ChatStreamEvent::Error {
                            code: "model_error".to_string(),
                            message: MODEL_INTERRUPTED_NOTICE.to_string(),
                            terminal: false,
                        })
                        .await;
                    model_error = Some(e);
                }
                sources = fragments;
            }
            Err(e) => {
                warn!("Session {} retrieval failed: {}", session_id, e);
                retrieval_error = Some(e);
            }
        }

        let primary_text = relay.text().to_string();
        let decision = self.fallback.evaluate(&PrimaryOutcome {
            answer: &primary_text,
            retrieval_error: retrieval_error.as_ref(),
            model_error: model_error.as_ref(),
        });

        let fallback_reason = match decision {
            FallbackDecision::Keep => None,
            FallbackDecision::Trigger(reason) => {
                Self::enter(session_id, &mut stages, ExchangeStage::FallbackTriggered);
                relay
                    .emit(ChatStreamEvent::Fallback {
                        reason: reason.to_string(),
                        marker: self.fallback.marker().to_string(),
                    })
                    .await;

                Self::enter(session_id, &mut stages, ExchangeStage::WebSearching);
                self.run_web_search(session_id, message, relay).await;
                Some(reason)
            }
        };

        Self::enter(session_id, &mut stages, ExchangeStage::Done);
        let answer = relay.text().trim().to_string();
        self.store.append(session_id, message, &answer);
        if fallback_reason.is_some() {
            self.store.record_fallback(session_id);
        }

        info!(
            "Session {} exchange committed in {} ms ({} chars, fallback: {})",
            session_id,
            start_time.elapsed().as_millis(),
            answer.chars().count(),
            fallback_reason.is_some()
        );

        AnswerResult {
            session_id: session_id.to_string(),
            answer,
            fallback_reason,
            sources,
            stages,
        }
    }

    /// Relays the web-sourced answer after the marker. Failures end the
    /// exchange with a terminal diagnostic.
    async fn run_web_search(&self, session_id: &str, message: &str, relay: &mut Relay) {
        let mut stream = match self.web_search.search_and_answer(message).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Session {} web search failed: {}", session_id, e);
                Self::emit_search_failure(relay).await;
                return;
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(WebSearchEvent::Token(delta)) => {
                    if !delta.is_empty() {
                        relay.token(delta).await;
                    }
                }
                Ok(WebSearchEvent::Citations(citations)) => {
                    if citations.is_empty() {
                        continue;
                    }
                    let lines = format_citations(&citations);
                    relay.emit(ChatStreamEvent::Citations { citations }).await;
                    relay.token(lines).await;
                }
                Ok(WebSearchEvent::Done) => break,
                Err(e) => {
                    error!("Session {} web search stream failed: {}", session_id, e);
                    Self::emit_search_failure(relay).await;
                    return;
                }
            }
        }
    }

    async fn emit_search_failure(relay: &mut Relay) {
        relay
            .emit(ChatStreamEvent::Error {
                code: "web_search_failed".to_string(),
                message: WEB_SEARCH_UNAVAILABLE_NOTICE.to_string(),
                terminal: true,
            })
            .await;
    }

    fn enter(session_id: &str, stages: &mut Vec<ExchangeStage>, stage: ExchangeStage) {
        debug!("Session {} -> {}", session_id, stage);
        stages.push(stage);
    }
}
