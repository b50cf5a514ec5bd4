//! End-to-end synchronization scenarios
//!
//! Two sessions, one per participant, run against the same in-memory ledger. Push events
//! are delivered by hand so each test controls ordering, duplication and loss.

use std::sync::Arc;
use std::time::Duration;

use chat_core::{
    DeleteScope, DomainError, Message, MessagePayload, MessageStatus, MessageStatusChangedEvent,
    PushEvent, Snowflake, SyncBackend, TOMBSTONE_BODY,
};
use chat_sync::{RetryPolicy, SyncError, SyncReducer, SyncSession};
use integration_tests::{Ledger, Op};

const ALICE: Snowflake = Snowflake::new(1001);
const BOB: Snowflake = Snowflake::new(1002);

// ============================================================================
// Helpers
// ============================================================================

fn session(ledger: &Ledger, user: Snowflake) -> SyncSession {
    let backend: Arc<dyn SyncBackend> = ledger.backend(user);
    SyncSession::with_parts(
        SyncReducer::new(user, 256, 80),
        backend,
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4)),
    )
}

/// Deliver every queued push event for the session's viewer, in order
async fn deliver(ledger: &Ledger, session: &SyncSession) {
    for event in ledger.drain(session.viewer()) {
        session
            .handle_push(event)
            .await
            .expect("push follow-up failed");
    }
}

/// The fields both sides must agree on
fn fingerprint(messages: &[Message]) -> Vec<(Snowflake, MessageStatus, String, bool, usize)> {
    messages
        .iter()
        .map(|m| {
            (
                m.id,
                m.status,
                m.payload.body.clone(),
                m.deleted_for_everyone,
                m.reactions.len(),
            )
        })
        .collect()
}

fn unread(session: &SyncSession, conversation_id: Snowflake) -> u32 {
    session
        .conversations()
        .into_iter()
        .find(|c| c.id == conversation_id)
        .map_or(0, |c| c.unread_count)
}

/// Two sessions with a snapshotted, empty conversation between them
async fn pair() -> (Ledger, Snowflake, SyncSession, SyncSession) {
    let ledger = Ledger::new();
    let conversation = ledger.open_conversation(ALICE, BOB);
    let alice = session(&ledger, ALICE);
    let bob = session(&ledger, BOB);
    alice.refresh_conversations().await.unwrap();
    bob.refresh_conversations().await.unwrap();
    alice.open_conversation(conversation).await.unwrap();
    bob.open_conversation(conversation).await.unwrap();
    (ledger, conversation, alice, bob)
}

// ============================================================================
// Messaging
// ============================================================================

#[tokio::test]
async fn test_send_echo_and_read_receipt() {
    let (ledger, conversation, alice, bob) = pair().await;

    let sent = alice
        .send_message(conversation, BOB, MessagePayload::text("hello"))
        .await
        .unwrap();
    assert_eq!(alice.messages(conversation).len(), 1);

    // The echo of our own send replaces nothing and adds nothing
    deliver(&ledger, &alice).await;
    let mine = alice.messages(conversation);
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, sent.id);
    assert_eq!(mine[0].status, MessageStatus::Sent);

    deliver(&ledger, &bob).await;
    assert_eq!(bob.messages(conversation).len(), 1);
    assert_eq!(unread(&bob, conversation), 1);

    bob.mark_read(conversation).await.unwrap();
    assert_eq!(unread(&bob, conversation), 0);
    assert_eq!(bob.message(sent.id).unwrap().status, MessageStatus::Read);

    deliver(&ledger, &alice).await;
    deliver(&ledger, &bob).await;
    assert_eq!(alice.message(sent.id).unwrap().status, MessageStatus::Read);
    assert_eq!(
        fingerprint(&alice.messages(conversation)),
        fingerprint(&ledger.messages(ALICE, conversation))
    );
    assert_eq!(
        fingerprint(&bob.messages(conversation)),
        fingerprint(&ledger.messages(BOB, conversation))
    );
}

#[tokio::test]
async fn test_message_for_unknown_conversation_fetches_summary() {
    let ledger = Ledger::new();
    let conversation = ledger.open_conversation(ALICE, BOB);
    let alice = session(&ledger, ALICE);
    let bob = session(&ledger, BOB);

    alice
        .send_message(conversation, BOB, MessagePayload::text("first contact"))
        .await
        .unwrap();

    // Bob has never listed his conversations
    assert!(bob.conversations().is_empty());
    deliver(&ledger, &bob).await;

    let summaries = bob.conversations();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, conversation);
    assert_eq!(summaries[0].participant_id, ALICE);
    assert_eq!(summaries[0].unread_count, 1);
    assert!(ledger.calls(Op::FetchConversation) >= 1);
}

#[tokio::test]
async fn test_reordered_and_duplicated_events_converge() {
    let (ledger, conversation, alice, bob) = pair().await;

    let first = alice
        .send_message(conversation, BOB, MessagePayload::text("one"))
        .await
        .unwrap();
    let second = alice
        .send_message(conversation, BOB, MessagePayload::text("two"))
        .await
        .unwrap();
    deliver(&ledger, &bob).await;
    assert!(ledger.mark_delivered(first.id));
    assert!(ledger.mark_delivered(second.id));
    bob.mark_read(conversation).await.unwrap();

    // Alice sees everything backwards, twice
    let events = ledger.drain(ALICE);
    assert!(!events.is_empty());
    for event in events.iter().rev().chain(events.iter()) {
        alice.handle_push(event.clone()).await.unwrap();
    }

    let messages = alice.messages(conversation);
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.status == MessageStatus::Read));
    assert_eq!(
        fingerprint(&messages),
        fingerprint(&ledger.messages(ALICE, conversation))
    );
}

#[tokio::test]
async fn test_status_before_message_is_buffered() {
    let ledger = Ledger::new();
    let conversation = ledger.open_conversation(ALICE, BOB);
    let alice = session(&ledger, ALICE);
    let bob = session(&ledger, BOB);
    bob.open_conversation(conversation).await.unwrap();

    let sent = alice
        .send_message(conversation, BOB, MessagePayload::text("ping"))
        .await
        .unwrap();
    deliver(&ledger, &bob).await;
    bob.mark_read(conversation).await.unwrap();

    // A second device of Alice that only hears the tail of the stream first
    let observer = session(&ledger, ALICE);
    let events = ledger.drain(ALICE);
    let (created, rest): (Vec<PushEvent>, Vec<PushEvent>) = events
        .into_iter()
        .partition(|e| matches!(e, PushEvent::MessageCreated(_)));
    for event in rest {
        observer.handle_push(event).await.unwrap();
    }
    assert!(observer.message(sent.id).is_none());

    for event in created {
        observer.handle_push(event).await.unwrap();
    }
    assert_eq!(observer.message(sent.id).unwrap().status, MessageStatus::Read);
}

#[tokio::test]
async fn test_status_never_moves_backwards() {
    let (ledger, conversation, alice, bob) = pair().await;

    let sent = alice
        .send_message(conversation, BOB, MessagePayload::text("are you there"))
        .await
        .unwrap();
    deliver(&ledger, &bob).await;
    bob.mark_read(conversation).await.unwrap();
    deliver(&ledger, &alice).await;
    assert_eq!(alice.message(sent.id).unwrap().status, MessageStatus::Read);

    // A late delivery receipt
    alice
        .handle_push(PushEvent::MessageStatusChanged(MessageStatusChangedEvent {
            message_id: sent.id,
            status: MessageStatus::Delivered,
        }))
        .await
        .unwrap();
    assert_eq!(alice.message(sent.id).unwrap().status, MessageStatus::Read);
}

#[tokio::test]
async fn test_resync_heals_lost_events() {
    let (ledger, conversation, alice, bob) = pair().await;

    for body in ["a", "b", "c"] {
        alice
            .send_message(conversation, BOB, MessagePayload::text(body))
            .await
            .unwrap();
    }
    // Bob's push channel was down
    let lost = ledger.drain(BOB);
    assert_eq!(lost.len(), 3);
    assert!(bob.messages(conversation).is_empty());

    bob.resync_all().await.unwrap();
    assert_eq!(
        fingerprint(&bob.messages(conversation)),
        fingerprint(&ledger.messages(BOB, conversation))
    );
    assert_eq!(unread(&bob, conversation), 3);
}

// ============================================================================
// Failures and rollback
// ============================================================================

#[tokio::test]
async fn test_failed_send_rolls_back() {
    let (ledger, conversation, alice, _bob) = pair().await;
    ledger.fail_next(Op::SendMessage, DomainError::Transport("connection reset".into()));

    let err = alice
        .send_message(conversation, BOB, MessagePayload::text("lost"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::SendFailed { .. }));
    assert!(err.is_rollback());
    assert!(alice.messages(conversation).is_empty());
    assert!(ledger.messages(ALICE, conversation).is_empty());
    // Writes are not retried
    assert_eq!(ledger.calls(Op::SendMessage), 1);
}

#[tokio::test]
async fn test_snapshot_retries_transient_failures() {
    let ledger = Ledger::new();
    let conversation = ledger.open_conversation(ALICE, BOB);
    let alice = session(&ledger, ALICE);
    ledger.fail_next(Op::FetchMessages, DomainError::Transport("timeout".into()));

    let messages = alice.open_conversation(conversation).await.unwrap();
    assert!(messages.is_empty());
    assert_eq!(ledger.calls(Op::FetchMessages), 2);
}

#[tokio::test]
async fn test_snapshot_does_not_retry_not_found() {
    let ledger = Ledger::new();
    let foreign = ledger.open_conversation(BOB, Snowflake::new(1003));
    let alice = session(&ledger, ALICE);

    let err = alice.open_conversation(foreign).await.unwrap_err();
    assert!(err.domain().is_some_and(DomainError::is_not_found));
    assert_eq!(ledger.calls(Op::FetchMessages), 1);
}

#[tokio::test]
async fn test_mark_read_failure_restores_unread() {
    let (ledger, conversation, alice, bob) = pair().await;
    let sent = alice
        .send_message(conversation, BOB, MessagePayload::text("read me"))
        .await
        .unwrap();
    deliver(&ledger, &bob).await;
    assert_eq!(unread(&bob, conversation), 1);

    ledger.fail_next(Op::SetStatus, DomainError::Transport("offline".into()));
    let err = bob.mark_read(conversation).await.unwrap_err();

    assert!(matches!(err, SyncError::MarkReadFailed { message_id, .. } if message_id == sent.id));
    assert_eq!(unread(&bob, conversation), 1);
    assert_eq!(bob.message(sent.id).unwrap().status, MessageStatus::Sent);

    // A later attempt goes through
    bob.mark_read(conversation).await.unwrap();
    assert_eq!(unread(&bob, conversation), 0);
}

// ============================================================================
// Reactions
// ============================================================================

#[tokio::test]
async fn test_reaction_replace_is_mirrored() {
    let (ledger, conversation, alice, bob) = pair().await;
    let sent = alice
        .send_message(conversation, BOB, MessagePayload::text("nice"))
        .await
        .unwrap();
    deliver(&ledger, &bob).await;

    alice.set_reaction(sent.id, "👍").await.unwrap();
    alice.set_reaction(sent.id, "❤️").await.unwrap();
    bob.set_reaction(sent.id, "😂").await.unwrap();
    deliver(&ledger, &alice).await;
    deliver(&ledger, &bob).await;

    for session in [&alice, &bob] {
        let groups = session.reaction_groups(sent.id);
        let emojis: Vec<&str> = groups.iter().map(|g| g.emoji.as_str()).collect();
        assert_eq!(groups.len(), 2);
        assert!(emojis.contains(&"❤️"));
        assert!(emojis.contains(&"😂"));
        assert!(!emojis.contains(&"👍"));
    }

    bob.clear_reaction(sent.id, "😂").await.unwrap();
    deliver(&ledger, &alice).await;
    let groups = alice.reaction_groups(sent.id);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].user_ids, vec![ALICE]);
}

#[tokio::test]
async fn test_reaction_failure_restores_prior_and_resyncs() {
    let (ledger, conversation, alice, bob) = pair().await;
    let sent = alice
        .send_message(conversation, BOB, MessagePayload::text("hmm"))
        .await
        .unwrap();
    deliver(&ledger, &bob).await;
    bob.set_reaction(sent.id, "👍").await.unwrap();
    deliver(&ledger, &bob).await;

    let fetches = ledger.calls(Op::FetchMessages);
    ledger.fail_next(Op::SetReaction, DomainError::Transport("connection reset".into()));
    let err = bob.set_reaction(sent.id, "🔥").await.unwrap_err();

    assert!(matches!(err, SyncError::ReactionRolledBack { .. }));
    let message = bob.message(sent.id).unwrap();
    assert_eq!(message.reaction_of(BOB).map(|r| r.emoji.as_str()), Some("👍"));
    assert!(ledger.calls(Op::FetchMessages) > fetches);
}

#[tokio::test]
async fn test_reaction_type_limit_from_backend() {
    let (ledger, conversation, alice, bob) = pair().await;
    let sent = alice
        .send_message(conversation, BOB, MessagePayload::text("vote"))
        .await
        .unwrap();
    deliver(&ledger, &bob).await;

    ledger.fail_next(
        Op::SetReaction,
        DomainError::ReactionTypeLimitExceeded { message_id: sent.id },
    );
    let err = bob.set_reaction(sent.id, "🎉").await.unwrap_err();

    assert!(err.is_invariant());
    assert!(err.is_rollback());
    assert!(bob.message(sent.id).unwrap().reaction_of(BOB).is_none());
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn test_delete_for_everyone_tombstones_on_peer() {
    let (ledger, conversation, alice, bob) = pair().await;
    let sent = alice
        .send_message(conversation, BOB, MessagePayload::text("oops"))
        .await
        .unwrap();
    deliver(&ledger, &bob).await;
    assert_eq!(unread(&bob, conversation), 1);

    alice
        .delete_message(sent.id, DeleteScope::ForEveryone)
        .await
        .unwrap();
    deliver(&ledger, &bob).await;

    let message = bob.message(sent.id).unwrap();
    assert!(message.deleted_for_everyone);
    assert_eq!(message.payload.body, TOMBSTONE_BODY);
    assert_eq!(unread(&bob, conversation), 0);
    assert_eq!(alice.message(sent.id).unwrap().payload.body, TOMBSTONE_BODY);
}

#[tokio::test]
async fn test_delete_for_me_is_not_resurrected() {
    let (ledger, conversation, alice, bob) = pair().await;
    alice
        .send_message(conversation, BOB, MessagePayload::text("keep"))
        .await
        .unwrap();
    let doomed = alice
        .send_message(conversation, BOB, MessagePayload::text("hide"))
        .await
        .unwrap();
    let inbound = ledger.drain(BOB);
    for event in &inbound {
        bob.handle_push(event.clone()).await.unwrap();
    }

    bob.delete_message(doomed.id, DeleteScope::ForMe).await.unwrap();
    assert!(bob.message(doomed.id).is_none());

    // A redelivered create and a fresh snapshot leave it hidden
    for event in inbound {
        bob.handle_push(event).await.unwrap();
    }
    assert!(bob.message(doomed.id).is_none());
    let snapshot = bob.open_conversation(conversation).await.unwrap();
    assert!(snapshot.iter().all(|m| m.id != doomed.id));
    assert_eq!(bob.messages(conversation).len(), 1);

    // Alice still has both
    assert_eq!(alice.messages(conversation).len(), 2);
}
