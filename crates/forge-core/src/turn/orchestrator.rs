//! Turn orchestrator: runs one chat turn end to end.
//!
//! ```text
//! Idle -> CreditChecked -> UserMessageSaved -> Streaming -> Finalized
//!                                                        \-> Discarded
//! ```
//!
//! Everything up to `UserMessageSaved` happens on the caller's task and
//! errors are returned directly. Streaming and finalize run on a spawned
//! task that owns the provider stream and forwards [`TurnEvent`]s over a
//! bounded channel. No database transaction or lock is held while the
//! provider is streaming; the debit happens in the short finalize unit of
//! work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use forge_types::chat::{title_from_prompt, ChatMessage};
use forge_types::config::ForgeConfig;
use forge_types::error::{FinalizeError, TurnError};
use forge_types::llm::{GenerationError, GenerationRequest, Message, StreamEvent, Usage};
use forge_types::turn::{ConversationTarget, DiscardReason, TurnCompletion, TurnEvent, TurnOutcome};
use forge_types::user::{User, UserId};

use crate::conversation::repository::ConversationRepository;
use crate::ledger::repository::CreditLedger;
use crate::llm::provider::{GenerationProvider, GenerationStream};
use crate::turn::store::{BeginTurn, FinalizeTurn, TurnStore};

/// Events buffered between the turn task and a slow client.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Per-process settings applied to every turn.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub model: String,
    pub default_system_prompt: String,
    pub history_limit: u32,
    pub title_max_chars: usize,
    pub max_output_tokens: u32,
    pub temperature: Option<f64>,
    pub generation_timeout: Duration,
}

impl TurnSettings {
    pub fn from_config(config: &ForgeConfig) -> Self {
        Self {
            model: config.generation.model.clone(),
            default_system_prompt: config.chat.default_system_prompt.clone(),
            history_limit: config.chat.history_limit,
            title_max_chars: config.chat.title_max_chars,
            max_output_tokens: config.generation.max_output_tokens,
            temperature: config.generation.temperature,
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
        }
    }
}

/// A turn submission.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub target: ConversationTarget,
    pub message: String,
}

/// A turn whose user message is committed and whose stream is running.
pub struct TurnHandle {
    pub conversation_id: Uuid,
    pub user_message_id: Uuid,
    /// Fragments, then exactly one `Completed` or `Failed`.
    pub events: mpsc::Receiver<TurnEvent>,
    /// Resolves once the turn is finalized or discarded.
    pub outcome: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    /// Drain every event and wait for the outcome.
    pub async fn collect(mut self) -> (Vec<TurnEvent>, TurnOutcome) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let outcome = match self.outcome.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Turn task did not complete");
                TurnOutcome::Discarded(DiscardReason::Cancelled)
            }
        };
        (events, outcome)
    }
}

/// Coordinates the conversation store, the credit ledger and the
/// generation provider for chat turns.
///
/// Generic over the storage ports so forge-core never depends on forge-infra.
pub struct TurnOrchestrator<S, C, L>
where
    S: TurnStore + 'static,
    C: ConversationRepository,
    L: CreditLedger,
{
    store: Arc<S>,
    conversations: C,
    ledger: L,
    provider: Arc<dyn GenerationProvider>,
    settings: TurnSettings,
    shutdown: CancellationToken,
}

impl<S, C, L> TurnOrchestrator<S, C, L>
where
    S: TurnStore + 'static,
    C: ConversationRepository,
    L: CreditLedger,
{
    pub fn new(
        store: S,
        conversations: C,
        ledger: L,
        provider: Arc<dyn GenerationProvider>,
        settings: TurnSettings,
    ) -> Self {
        Self {
            store: Arc::new(store),
            conversations,
            ledger,
            provider,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    /// Cancel every in-flight turn. Cancelled turns are discarded.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Validate, persist the user message and start streaming.
    ///
    /// Errors returned here happen before the provider is called:
    /// `InvalidRequest`, `InsufficientCredit` and `ConversationNotFound`
    /// leave no trace in storage; `PersistenceError` means the user
    /// message may or may not have been committed.
    pub async fn start_turn(
        &self,
        user: &User,
        request: TurnRequest,
    ) -> Result<TurnHandle, TurnError> {
        let prompt = request.message.trim();
        if prompt.is_empty() {
            return Err(TurnError::InvalidRequest(
                "message must not be empty".to_string(),
            ));
        }

        // CreditChecked
        let check = self.ledger.has_credit(&user.id).await?;
        if !check.allowed {
            info!(user_id = %user.id, balance = check.balance, "Turn rejected: no credit");
            return Err(TurnError::InsufficientCredit);
        }

        // UserMessageSaved
        let begun = self
            .store
            .begin_turn(&BeginTurn {
                user_id: user.id,
                target: request.target,
                prompt: request.message.clone(),
                new_title: title_from_prompt(prompt, self.settings.title_max_chars),
            })
            .await?;
        let conversation_id = begun.conversation.id;
        let user_message_id = begun.user_message.id;

        let history = self
            .load_history(&conversation_id, &user_message_id)
            .await?;
        let system = begun
            .conversation
            .effective_system_instructions(&self.settings.default_system_prompt)
            .to_string();

        let generation = GenerationRequest {
            model: self.settings.model.clone(),
            system,
            history: history.iter().map(Message::from).collect(),
            prompt: begun.user_message.content.clone(),
            max_output_tokens: self.settings.max_output_tokens,
            temperature: self.settings.temperature,
        };

        // Streaming
        let span = info_span!(
            "chat_turn",
            user_id = %user.id,
            conversation_id = %conversation_id,
            user_message_id = %user_message_id,
            gen_ai.system = %self.provider.name(),
            gen_ai.request.model = %generation.model,
            history_len = generation.history.len(),
        );
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let task = TurnTask {
            store: Arc::clone(&self.store),
            user_id: user.id,
            conversation_id,
            user_message_id,
            timeout: self.settings.generation_timeout,
            cancel: self.shutdown.child_token(),
            tx,
        };
        let stream = self.provider.stream(generation);
        let outcome = tokio::spawn(task.run(stream).instrument(span));

        Ok(TurnHandle {
            conversation_id,
            user_message_id,
            events: rx,
            outcome,
        })
    }

    /// The most recent `history_limit` active messages before the new one.
    async fn load_history(
        &self,
        conversation_id: &Uuid,
        new_message_id: &Uuid,
    ) -> Result<Vec<ChatMessage>, TurnError> {
        let limit = self.settings.history_limit;
        let mut history = self
            .conversations
            .list_history(conversation_id, Some(limit.saturating_add(1)))
            .await?;
        history.retain(|m| m.id != *new_message_id);
        let excess = history.len().saturating_sub(limit as usize);
        history.drain(..excess);
        Ok(history)
    }
}

/// How the provider stream stopped when it did not complete normally.
enum StreamEnd {
    Failed(GenerationError),
    TimedOut,
    Cancelled,
}

#[derive(Default)]
struct Collected {
    text: String,
    usage: Option<Usage>,
    fragments: usize,
    client_gone: bool,
}

/// State moved into the spawned task that drives one turn.
struct TurnTask<S: TurnStore> {
    store: Arc<S>,
    user_id: UserId,
    conversation_id: Uuid,
    user_message_id: Uuid,
    timeout: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<TurnEvent>,
}

impl<S: TurnStore> TurnTask<S> {
    async fn run(self, mut stream: GenerationStream) -> TurnOutcome {
        let started = Instant::now();
        let mut collected = Collected::default();

        let ended = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StreamEnd::Cancelled),
            pumped = self.pump(&mut stream, &mut collected) => pumped,
        };
        drop(stream);

        let outcome = match ended {
            Ok(()) => self.finalize(&mut collected).await,
            Err(end) => self.discard_stream(end, &mut collected).await,
        };

        let outcome_label = match &outcome {
            TurnOutcome::Finalized(_) => "finalized".to_string(),
            TurnOutcome::Discarded(reason) => format!("discarded:{reason}"),
        };
        info!(
            outcome = %outcome_label,
            fragments = collected.fragments,
            bytes = collected.text.len(),
            client_connected = !collected.client_gone,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Turn ended"
        );
        outcome
    }

    /// Forward provider fragments until the stream completes or fails.
    ///
    /// The generation timeout is a budget for waiting on the provider.
    /// Time spent blocked on a slow client is not charged against it.
    /// A stream that ends without `Done` is a failed generation.
    async fn pump(
        &self,
        stream: &mut GenerationStream,
        collected: &mut Collected,
    ) -> Result<(), StreamEnd> {
        let mut remaining = self.timeout;
        loop {
            let waiting = Instant::now();
            let item = match tokio::time::timeout(remaining, stream.next()).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    return Err(StreamEnd::Failed(GenerationError::Stream(
                        "stream ended before completion".to_string(),
                    )));
                }
                Err(_) => return Err(StreamEnd::TimedOut),
            };
            remaining = remaining.saturating_sub(waiting.elapsed());

            match item {
                Ok(StreamEvent::TextDelta { text }) => {
                    if text.is_empty() {
                        continue;
                    }
                    collected.text.push_str(&text);
                    collected.fragments += 1;
                    self.forward(collected, TurnEvent::Fragment { text }).await;
                }
                Ok(StreamEvent::Usage(usage)) => collected.usage = Some(usage),
                Ok(StreamEvent::Done) => return Ok(()),
                Err(e) => return Err(StreamEnd::Failed(e)),
            }
        }
    }

    /// Send to the client unless it already went away.
    ///
    /// A disconnected client does not stop the turn: generation keeps
    /// draining so a completed answer is still persisted.
    async fn forward(&self, collected: &mut Collected, event: TurnEvent) {
        if collected.client_gone {
            return;
        }
        if self.tx.send(event).await.is_err() {
            collected.client_gone = true;
            info!("Client disconnected; draining generation");
        }
    }

    async fn discard_stream(&self, end: StreamEnd, collected: &mut Collected) -> TurnOutcome {
        let (reason, err) = match end {
            StreamEnd::Failed(e) => {
                warn!(error = %e, "Generation stream failed");
                (DiscardReason::ProviderError, TurnError::ProviderError(e.to_string()))
            }
            StreamEnd::TimedOut => {
                warn!(timeout_secs = self.timeout.as_secs(), "Generation timed out");
                (
                    DiscardReason::Timeout,
                    TurnError::ProviderError(format!(
                        "generation timed out after {}s",
                        self.timeout.as_secs()
                    )),
                )
            }
            StreamEnd::Cancelled => {
                warn!("Generation cancelled by shutdown");
                (
                    DiscardReason::Cancelled,
                    TurnError::ProviderError("generation cancelled".to_string()),
                )
            }
        };
        self.forward(collected, TurnEvent::failed(&err)).await;
        TurnOutcome::Discarded(reason)
    }

    async fn finalize(&self, collected: &mut Collected) -> TurnOutcome {
        let content = collected.text.trim().to_string();
        if content.is_empty() {
            warn!("Generation completed without content");
            self.forward(collected, TurnEvent::failed(&TurnError::EmptyGeneration))
                .await;
            return TurnOutcome::Discarded(DiscardReason::EmptyGeneration);
        }

        let result = self
            .store
            .finalize_turn(&FinalizeTurn {
                user_id: self.user_id,
                conversation_id: self.conversation_id,
                user_message_id: self.user_message_id,
                content,
                usage: collected.usage,
            })
            .await;

        match result {
            Ok(finalized) => {
                let completion = TurnCompletion {
                    conversation_id: self.conversation_id,
                    user_message_id: self.user_message_id,
                    assistant_message_id: finalized.assistant_message.id,
                    credits_remaining: finalized.credits_remaining,
                };
                self.forward(collected, TurnEvent::Completed(completion.clone()))
                    .await;
                TurnOutcome::Finalized(completion)
            }
            Err(FinalizeError::Superseded) => {
                warn!(
                    user_id = %self.user_id,
                    conversation_id = %self.conversation_id,
                    bytes = collected.text.len(),
                    "Turn was rewound or its conversation deleted while generating; reply not recorded"
                );
                self.forward(collected, TurnEvent::failed(&TurnError::Superseded))
                    .await;
                TurnOutcome::Discarded(DiscardReason::Superseded)
            }
            Err(FinalizeError::InsufficientCredit) => {
                error!(
                    anomaly = "finalize_credit_race",
                    user_id = %self.user_id,
                    conversation_id = %self.conversation_id,
                    bytes = collected.text.len(),
                    "Generated content was streamed but the balance was exhausted at finalize; reply not recorded"
                );
                self.forward(collected, TurnEvent::failed(&TurnError::InsufficientCredit))
                    .await;
                TurnOutcome::Discarded(DiscardReason::InsufficientCredit)
            }
            Err(e) => {
                error!(
                    anomaly = "content_credit_inconsistency",
                    user_id = %self.user_id,
                    conversation_id = %self.conversation_id,
                    error = %e,
                    "Generated content was streamed but could not be recorded"
                );
                self.forward(
                    collected,
                    TurnEvent::failed(&TurnError::PersistenceError(e.to_string())),
                )
                .await;
                TurnOutcome::Discarded(DiscardReason::PersistenceError)
            }
        }
    }
}
