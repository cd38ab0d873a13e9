//! End-to-end turn pipeline tests: orchestrator, SQLite stores and a
//! scripted provider.

use std::sync::Arc;
use std::time::Duration;

use forge_core::conversation::repository::ConversationRepository;
use forge_core::conversation::service::ConversationService;
use forge_core::ledger::repository::CreditLedger;
use forge_core::llm::provider::GenerationProvider;
use forge_core::llm::scripted::{text_steps, ScriptStep, ScriptedProvider};
use forge_core::turn::orchestrator::{TurnHandle, TurnOrchestrator, TurnRequest, TurnSettings};
use forge_types::chat::{ConversationSetup, MessageRole};
use forge_types::config::ForgeConfig;
use forge_types::error::TurnError;
use forge_types::llm::Usage;
use forge_types::turn::{ConversationTarget, DiscardReason, TurnEvent, TurnOutcome};
use forge_types::user::{Principal, User};

use crate::sqlite::conversation::SqliteConversationRepository;
use crate::sqlite::ledger::SqliteCreditLedger;
use crate::sqlite::pool::test_pool;
use crate::sqlite::turn::SqliteTurnStore;

type Orchestrator = TurnOrchestrator<SqliteTurnStore, SqliteConversationRepository, SqliteCreditLedger>;

struct Harness {
    orchestrator: Orchestrator,
    conversations: ConversationService<SqliteConversationRepository>,
    ledger: SqliteCreditLedger,
    provider: Arc<ScriptedProvider>,
    user: User,
}

async fn harness_with(credits: i64, settings: TurnSettings) -> Harness {
    let pool = test_pool().await;
    let ledger = SqliteCreditLedger::new(pool.clone());
    let user = ledger
        .get_or_create_user(&Principal::new("gm-1").with_email("gm@example.com"))
        .await
        .unwrap();
    if credits > 0 {
        ledger.increment(&user.id, credits).await.unwrap();
    }

    let provider = Arc::new(ScriptedProvider::from_text(
        "A low-beamed tavern smelling of woodsmoke and spilled ale.",
    ));
    let orchestrator = TurnOrchestrator::new(
        SqliteTurnStore::new(pool.clone()),
        SqliteConversationRepository::new(pool.clone()),
        ledger.clone(),
        Arc::clone(&provider) as Arc<dyn GenerationProvider>,
        settings,
    );

    Harness {
        orchestrator,
        conversations: ConversationService::new(SqliteConversationRepository::new(pool)),
        ledger,
        provider,
        user,
    }
}

async fn harness(credits: i64) -> Harness {
    harness_with(credits, TurnSettings::from_config(&ForgeConfig::default())).await
}

fn new_turn(message: &str) -> TurnRequest {
    TurnRequest {
        target: ConversationTarget::New,
        message: message.to_string(),
    }
}

fn existing_turn(conversation_id: uuid::Uuid, message: &str) -> TurnRequest {
    TurnRequest {
        target: ConversationTarget::Existing(conversation_id),
        message: message.to_string(),
    }
}

fn fragments(events: &[TurnEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Fragment { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn failure_code(events: &[TurnEvent]) -> Option<&str> {
    match events.last() {
        Some(TurnEvent::Failed { code, .. }) => Some(code.as_str()),
        _ => None,
    }
}

/// A turn driven to its end.
struct Finished {
    conversation_id: uuid::Uuid,
    user_message_id: uuid::Uuid,
}

async fn run(h: &Harness, request: TurnRequest) -> (Finished, Vec<TurnEvent>, TurnOutcome) {
    let handle = h.orchestrator.start_turn(&h.user, request).await.unwrap();
    let finished = Finished {
        conversation_id: handle.conversation_id,
        user_message_id: handle.user_message_id,
    };
    let (events, outcome) = handle.collect().await;
    (finished, events, outcome)
}

#[tokio::test]
async fn tavern_turn_streams_and_persists() {
    let h = harness(5).await;

    let (handle, events, outcome) = run(&h, new_turn("Describe a tavern")).await;

    assert_eq!(
        fragments(&events),
        "A low-beamed tavern smelling of woodsmoke and spilled ale."
    );
    let Some(TurnEvent::Completed(completion)) = events.last() else {
        panic!("expected completion, got {events:?}");
    };
    assert_eq!(completion.credits_remaining, 4);
    assert_eq!(completion.conversation_id, handle.conversation_id);
    assert_eq!(outcome, TurnOutcome::Finalized(completion.clone()));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let detail = h
        .conversations
        .detail(&h.user.id, &handle.conversation_id)
        .await
        .unwrap();
    assert_eq!(detail.conversation.title, "Describe a tavern");
    let roles: Vec<MessageRole> = detail.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);
    assert_eq!(detail.messages[1].id, completion.assistant_message_id);
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 4);
}

#[tokio::test]
async fn zero_balance_is_rejected_without_side_effects() {
    let h = harness(0).await;

    let result = h
        .orchestrator
        .start_turn(&h.user, new_turn("Describe a tavern"))
        .await;

    assert!(matches!(result, Err(TurnError::InsufficientCredit)));
    assert!(h.conversations.list(&h.user.id).await.unwrap().is_empty());
    assert!(h.provider.requests().is_empty());
}

#[tokio::test]
async fn blank_message_is_invalid() {
    let h = harness(1).await;
    let result = h.orchestrator.start_turn(&h.user, new_turn("   ")).await;
    assert!(matches!(result, Err(TurnError::InvalidRequest(_))));
}

#[tokio::test]
async fn most_recent_without_conversation_is_not_found() {
    let h = harness(1).await;
    let result = h
        .orchestrator
        .start_turn(
            &h.user,
            TurnRequest {
                target: ConversationTarget::MostRecent,
                message: "hello".to_string(),
            },
        )
        .await;
    assert!(matches!(result, Err(TurnError::ConversationNotFound)));
}

#[tokio::test]
async fn foreign_conversation_is_not_found() {
    let h = harness(1).await;
    let stranger = h
        .ledger
        .get_or_create_user(&Principal::new("gm-2"))
        .await
        .unwrap();
    let theirs = h
        .conversations
        .create(stranger.id, Some("Private"), ConversationSetup::default())
        .await
        .unwrap();

    let result = h
        .orchestrator
        .start_turn(&h.user, existing_turn(theirs.id, "let me in"))
        .await;
    assert!(matches!(result, Err(TurnError::ConversationNotFound)));
}

#[tokio::test]
async fn provider_failure_keeps_user_message_and_credit() {
    let h = harness(2).await;
    h.provider.push_script(vec![
        ScriptStep::Text("The door creaks ".to_string()),
        ScriptStep::Fail("upstream reset".to_string()),
    ]);

    let (handle, events, outcome) = run(&h, new_turn("Open the door")).await;

    assert_eq!(fragments(&events), "The door creaks ");
    assert_eq!(failure_code(&events), Some("PROVIDER_ERROR"));
    assert_eq!(outcome, TurnOutcome::Discarded(DiscardReason::ProviderError));
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 2);

    let history = h
        .conversations
        .repo()
        .list_history(&handle.conversation_id, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, MessageRole::User);

    // Resubmitting adds a second user message and then the reply.
    let (_, events, outcome) = run(&h, existing_turn(handle.conversation_id, "Open the door")).await;
    assert!(matches!(outcome, TurnOutcome::Finalized(_)));
    assert!(matches!(events.last(), Some(TurnEvent::Completed(c)) if c.credits_remaining == 1));

    let history = h
        .conversations
        .repo()
        .list_history(&handle.conversation_id, None)
        .await
        .unwrap();
    let roles: Vec<MessageRole> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::User, MessageRole::User, MessageRole::Assistant]
    );
    // The failed turn's user message is part of the resubmitted turn's context.
    let request = &h.provider.requests()[1];
    assert_eq!(request.history.len(), 1);
    assert_eq!(request.history[0].content, "Open the door");
}

#[tokio::test]
async fn content_filter_discards_turn() {
    let h = harness(1).await;
    h.provider
        .push_script(vec![ScriptStep::Filtered("SAFETY".to_string())]);

    let (_, events, outcome) = run(&h, new_turn("Something grim")).await;

    assert_eq!(failure_code(&events), Some("PROVIDER_ERROR"));
    assert_eq!(outcome, TurnOutcome::Discarded(DiscardReason::ProviderError));
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 1);
}

#[tokio::test]
async fn whitespace_generation_is_not_persisted() {
    let h = harness(1).await;
    h.provider
        .push_script(vec![ScriptStep::Text("   \n ".to_string())]);

    let (handle, events, outcome) = run(&h, new_turn("Say nothing")).await;

    assert_eq!(failure_code(&events), Some("EMPTY_GENERATION"));
    assert_eq!(outcome, TurnOutcome::Discarded(DiscardReason::EmptyGeneration));
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 1);
    let history = h
        .conversations
        .repo()
        .list_history(&handle.conversation_id, None)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn usage_is_recorded_on_assistant_message() {
    let h = harness(1).await;
    let mut steps = text_steps("Three goblins ambush the party.");
    steps.push(ScriptStep::Usage(Usage {
        prompt_tokens: 40,
        completion_tokens: 8,
        total_tokens: 48,
    }));
    h.provider.push_script(steps);

    let (handle, _, outcome) = run(&h, new_turn("Start an encounter")).await;
    assert!(matches!(outcome, TurnOutcome::Finalized(_)));

    let history = h
        .conversations
        .repo()
        .list_history(&handle.conversation_id, None)
        .await
        .unwrap();
    assert_eq!(history[1].total_tokens, Some(48));
    assert_eq!(history[0].total_tokens, None);
}

#[tokio::test]
async fn last_credit_race_finalizes_exactly_one_turn() {
    let h = harness(1).await;
    for _ in 0..2 {
        let mut steps = vec![ScriptStep::Delay(Duration::from_millis(100))];
        steps.extend(text_steps("A reply."));
        h.provider.push_script(steps);
    }

    // Both pass the advisory pre-check before either finalizes.
    let first = h
        .orchestrator
        .start_turn(&h.user, new_turn("First"))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .start_turn(&h.user, new_turn("Second"))
        .await
        .unwrap();

    let ((events_a, outcome_a), (events_b, outcome_b)) =
        tokio::join!(first.collect(), second.collect());

    let finalized = [&outcome_a, &outcome_b]
        .iter()
        .filter(|o| matches!(o, TurnOutcome::Finalized(_)))
        .count();
    assert_eq!(finalized, 1);

    let codes: Vec<Option<&str>> = vec![failure_code(&events_a), failure_code(&events_b)];
    assert!(codes.contains(&Some("INSUFFICIENT_CREDIT")));
    assert!(
        [&outcome_a, &outcome_b]
            .contains(&&TurnOutcome::Discarded(DiscardReason::InsufficientCredit))
    );
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 0);
}

#[tokio::test]
async fn many_concurrent_turns_never_overdraw() {
    let h = harness(3).await;
    for i in 0..8u64 {
        let mut steps = vec![ScriptStep::Delay(Duration::from_millis(10 * (i % 4)))];
        steps.extend(text_steps("Onward."));
        h.provider.push_script(steps);
    }

    let mut handles = Vec::new();
    for i in 0..8 {
        match h
            .orchestrator
            .start_turn(&h.user, new_turn(&format!("Turn {i}")))
            .await
        {
            Ok(handle) => handles.push(handle),
            Err(TurnError::InsufficientCredit) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let results = futures_util::future::join_all(handles.into_iter().map(TurnHandle::collect)).await;
    let finalized = results
        .iter()
        .filter(|(_, outcome)| matches!(outcome, TurnOutcome::Finalized(_)))
        .count();

    assert_eq!(finalized, 3);
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 0);
}

#[tokio::test]
async fn disconnected_client_still_finalizes() {
    let h = harness(2).await;
    let mut steps = vec![ScriptStep::Delay(Duration::from_millis(20))];
    steps.extend(text_steps("The dragon wakes and the hoard shifts beneath it."));
    h.provider.push_script(steps);

    let TurnHandle {
        conversation_id,
        events,
        outcome,
        ..
    } = h
        .orchestrator
        .start_turn(&h.user, new_turn("Wake the dragon"))
        .await
        .unwrap();
    drop(events);

    let outcome = outcome.await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Finalized(_)));
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 1);

    let history = h
        .conversations
        .repo()
        .list_history(&conversation_id, None)
        .await
        .unwrap();
    assert_eq!(
        history[1].content,
        "The dragon wakes and the hoard shifts beneath it."
    );
}

#[tokio::test]
async fn stalled_generation_times_out() {
    let mut settings = TurnSettings::from_config(&ForgeConfig::default());
    settings.generation_timeout = Duration::from_millis(100);
    let h = harness_with(1, settings).await;
    h.provider.push_script(vec![
        ScriptStep::Text("The fog ".to_string()),
        ScriptStep::Hang,
    ]);

    let (_, events, outcome) = run(&h, new_turn("Enter the fog")).await;

    assert_eq!(fragments(&events), "The fog ");
    assert_eq!(failure_code(&events), Some("PROVIDER_ERROR"));
    assert_eq!(outcome, TurnOutcome::Discarded(DiscardReason::Timeout));
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 1);
}

#[tokio::test]
async fn shutdown_cancels_in_flight_turns() {
    let h = harness(1).await;
    h.provider.push_script(vec![ScriptStep::Hang]);

    let handle = h
        .orchestrator
        .start_turn(&h.user, new_turn("Wait forever"))
        .await
        .unwrap();
    h.orchestrator.shutdown();

    let (events, outcome) = handle.collect().await;
    assert_eq!(failure_code(&events), Some("PROVIDER_ERROR"));
    assert_eq!(outcome, TurnOutcome::Discarded(DiscardReason::Cancelled));
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 1);
}

#[tokio::test]
async fn slow_reader_does_not_trip_generation_timeout() {
    let mut settings = TurnSettings::from_config(&ForgeConfig::default());
    settings.generation_timeout = Duration::from_millis(100);
    let h = harness_with(1, settings).await;
    let steps: Vec<ScriptStep> = (0..100)
        .map(|i| ScriptStep::Text(format!("step{i} ")))
        .collect();
    h.provider.push_script(steps);

    let handle = h
        .orchestrator
        .start_turn(&h.user, new_turn("March the long road"))
        .await
        .unwrap();
    // The provider is done at once; the turn then waits on the full channel.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let (events, outcome) = handle.collect().await;

    assert!(matches!(outcome, TurnOutcome::Finalized(_)), "{outcome:?}");
    assert_eq!(events.iter().filter(|e| !e.is_terminal()).count(), 100);
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 0);
}

#[tokio::test]
async fn rewind_during_generation_discards_turn() {
    let h = harness(2).await;
    let mut steps = vec![ScriptStep::Delay(Duration::from_millis(200))];
    steps.extend(text_steps("The ogre raises his club."));
    h.provider.push_script(steps);

    let handle = h
        .orchestrator
        .start_turn(&h.user, new_turn("Fight the ogre"))
        .await
        .unwrap();
    let conversation_id = handle.conversation_id;
    let rewound = h
        .conversations
        .rewind(&h.user.id, &conversation_id, &handle.user_message_id)
        .await
        .unwrap();
    assert_eq!(rewound, 1);

    let (events, outcome) = handle.collect().await;
    assert_eq!(failure_code(&events), Some("TURN_SUPERSEDED"));
    assert_eq!(outcome, TurnOutcome::Discarded(DiscardReason::Superseded));
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 2);

    let history = h
        .conversations
        .repo()
        .list_history(&conversation_id, None)
        .await
        .unwrap();
    assert!(history.is_empty(), "no active message may remain: {history:?}");
}

#[tokio::test]
async fn delete_during_generation_discards_turn() {
    let h = harness(2).await;
    let mut steps = vec![ScriptStep::Delay(Duration::from_millis(200))];
    steps.extend(text_steps("The ogre raises his club."));
    h.provider.push_script(steps);

    let handle = h
        .orchestrator
        .start_turn(&h.user, new_turn("Fight the ogre"))
        .await
        .unwrap();
    h.conversations
        .delete(&h.user.id, &handle.conversation_id)
        .await
        .unwrap();

    let (events, outcome) = handle.collect().await;
    assert_eq!(failure_code(&events), Some("TURN_SUPERSEDED"));
    assert_eq!(outcome, TurnOutcome::Discarded(DiscardReason::Superseded));
    assert_eq!(h.ledger.balance(&h.user.id).await.unwrap(), 2);
    assert!(h.conversations.list(&h.user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn conversation_system_override_and_history_reach_provider() {
    let h = harness(3).await;
    let conversation = h
        .conversations
        .create(
            h.user.id,
            Some("Pirate Cove"),
            ConversationSetup {
                context: None,
                system_override: Some("Speak like a pirate.".to_string()),
            },
        )
        .await
        .unwrap();

    run(&h, existing_turn(conversation.id, "Who runs this port?")).await;
    run(&h, existing_turn(conversation.id, "And the harbor master?")).await;

    let requests = h.provider.requests();
    assert_eq!(requests[0].system, "Speak like a pirate.");
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[0].prompt, "Who runs this port?");

    let second = &requests[1];
    assert_eq!(second.history.len(), 2);
    assert_eq!(second.history[0].content, "Who runs this port?");
    assert_eq!(second.history[1].role, MessageRole::Assistant);
    assert_eq!(second.prompt, "And the harbor master?");
}

#[tokio::test]
async fn history_is_capped_to_most_recent_messages() {
    let mut settings = TurnSettings::from_config(&ForgeConfig::default());
    settings.history_limit = 2;
    let h = harness_with(3, settings).await;

    let (handle, _, _) = run(&h, new_turn("one")).await;
    run(&h, existing_turn(handle.conversation_id, "two")).await;
    run(&h, existing_turn(handle.conversation_id, "three")).await;

    let third = &h.provider.requests()[2];
    assert_eq!(third.history.len(), 2);
    assert_eq!(third.history[0].content, "two");
    assert_eq!(third.history[1].role, MessageRole::Assistant);
    assert_eq!(third.prompt, "three");
}

#[tokio::test]
async fn most_recent_target_continues_latest_conversation() {
    let h = harness(2).await;
    let (handle, _, _) = run(&h, new_turn("Begin")).await;

    let (next, _, outcome) = run(
        &h,
        TurnRequest {
            target: ConversationTarget::MostRecent,
            message: "Continue".to_string(),
        },
    )
    .await;

    assert!(matches!(outcome, TurnOutcome::Finalized(_)));
    assert_eq!(next.conversation_id, handle.conversation_id);
}

#[tokio::test]
async fn rewind_then_continue() {
    let h = harness(2).await;
    let (handle, _, _) = run(&h, new_turn("Enter the crypt")).await;

    let deleted = h
        .conversations
        .rewind(&h.user.id, &handle.conversation_id, &handle.user_message_id)
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    let again = h
        .conversations
        .rewind(&h.user.id, &handle.conversation_id, &handle.user_message_id)
        .await
        .unwrap();
    assert_eq!(again, 0);

    run(&h, existing_turn(handle.conversation_id, "Leave the crypt")).await;
    let detail = h
        .conversations
        .detail(&h.user.id, &handle.conversation_id)
        .await
        .unwrap();
    let contents: Vec<&str> = detail.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents[0], "Leave the crypt");
    assert_eq!(contents.len(), 2);
    assert!(h.provider.requests()[1].history.is_empty());
}
