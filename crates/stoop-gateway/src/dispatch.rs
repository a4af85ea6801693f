//! Dispatch Engine: the write path. Validates, commits to the Message
//! Store, auto-advances the sender's read marker, then fans the committed
//! message out to live sessions and push-notifies offline participants.
//! Commit-then-notify is mandatory: the send ack returns once the message
//! is durable, independent of fanout completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::warn;

use stoop_db::Database;
use stoop_types::events::GatewayEvent;
use stoop_types::{ChatError, Message, MessageKind, ReadPosition, SurfaceRef};

use crate::membership::MembershipProvider;
use crate::push::{PushPayload, PushProvider};
use crate::registry::Registry;

/// Upper bound on a single push-provider call. Fanout never blocks the
/// sender's acknowledgment either way; this only caps the detached task.
const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct DispatchEngine {
    db: Arc<Database>,
    membership: Arc<dyn MembershipProvider>,
    registry: Registry,
    push: Arc<dyn PushProvider>,
}

impl DispatchEngine {
    pub fn new(
        db: Arc<Database>,
        membership: Arc<dyn MembershipProvider>,
        registry: Registry,
        push: Arc<dyn PushProvider>,
    ) -> Self {
        Self {
            db,
            membership,
            registry,
            push,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Commit and dispatch a message. Validation failures abort before any
    /// durable write; once the append commits, per-recipient delivery
    /// failures are isolated and logged, never rolled back.
    pub async fn send(
        &self,
        sender_id: i64,
        surface: SurfaceRef,
        kind: MessageKind,
        body: String,
        reply_to: Option<i64>,
    ) -> Result<Message, ChatError> {
        if !self.membership.is_participant(sender_id, surface)? {
            return Err(ChatError::Forbidden);
        }

        let created_at = Utc::now().timestamp_millis();
        let message = self
            .db
            .append_message(surface, sender_id, kind, body, reply_to, created_at)?;

        // The sender has implicitly read their own latest message.
        self.db
            .mark_read(sender_id, surface, message.read_position())?;

        let engine = self.clone();
        let committed = message.clone();
        tokio::spawn(async move {
            engine.fan_out(committed).await;
        });

        Ok(message)
    }

    /// Advance a read marker and fan the receipt to other participants.
    /// Returns the unread-to-read transition count for the caller's ack.
    pub async fn mark_read(
        &self,
        user_id: i64,
        surface: SurfaceRef,
        position: ReadPosition,
    ) -> Result<u64, ChatError> {
        if !self.membership.is_participant(user_id, surface)? {
            return Err(ChatError::Forbidden);
        }

        let updated = self.db.mark_read(user_id, surface, position)?;

        if updated > 0 {
            let receipt = GatewayEvent::MessageRead {
                surface,
                user_id,
                position: position.value(),
            };
            match surface {
                SurfaceRef::Private(_) => {
                    for participant in self.membership.participants_of(surface)? {
                        self.registry.send_to_user(participant, &receipt).await;
                    }
                }
                _ => {
                    self.registry.send_to_room(&surface.room_key(), &receipt).await;
                }
            }
        }

        Ok(updated)
    }

    /// Soft-delete with `MessageDeleted` fanout. Store-level policy applies
    /// (author/moderator only, never on private surfaces).
    pub async fn delete(&self, requester: i64, message_id: i64) -> Result<Message, ChatError> {
        let message = self.db.soft_delete(message_id, requester)?;
        let frame = GatewayEvent::MessageDeleted {
            surface: message.surface,
            message_id: message.id,
        };
        self.registry
            .send_to_room(&message.surface.room_key(), &frame)
            .await;
        Ok(message)
    }

    async fn fan_out(&self, message: Message) {
        let surface = message.surface;
        let sender_id = message.sender_id;
        let frame = GatewayEvent::MessageCreate {
            message: message.clone(),
        };

        // Live delivery. Private surfaces deliver through the two personal
        // rooms — exactly one frame per connection, so a user never sees the
        // same logical message twice.
        let participants = match self.membership.participants_of(surface) {
            Ok(p) => p,
            Err(e) => {
                warn!("fanout aborted, participant lookup failed: {e}");
                return;
            }
        };

        match surface {
            SurfaceRef::Private(_) => {
                for &user_id in &participants {
                    self.registry.send_to_user(user_id, &frame).await;
                }
            }
            _ => {
                self.registry.send_to_room(&surface.room_key(), &frame).await;
            }
        }

        // Push path for participants with zero live sessions. At most one
        // push per user per message; a missing token is tolerated silently.
        let payload = PushPayload::new(surface, &message.sender_name, &message.body);
        for &user_id in &participants {
            if user_id == sender_id || self.registry.live_sessions(user_id).await > 0 {
                continue;
            }
            let token = match self.db.push_token(user_id) {
                Ok(Some(token)) => token,
                Ok(None) => continue,
                Err(e) => {
                    warn!("push token lookup failed for user {user_id}: {e}");
                    continue;
                }
            };
            match timeout(PUSH_TIMEOUT, self.push.notify(user_id, &token, &payload)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("push to user {user_id} failed: {e}"),
                Err(_) => warn!("push to user {user_id} timed out"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    struct RecordingPush {
        notified: Mutex<Vec<i64>>,
    }

    impl RecordingPush {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                notified: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PushProvider for RecordingPush {
        async fn notify(
            &self,
            user_id: i64,
            _token: &str,
            _payload: &PushPayload,
        ) -> Result<(), ChatError> {
            self.notified.lock().unwrap().push(user_id);
            Ok(())
        }
    }

    struct Fixture {
        db: Arc<Database>,
        engine: DispatchEngine,
        push: Arc<RecordingPush>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let membership: Arc<dyn MembershipProvider> = db.clone();
        let registry = Registry::new(membership.clone());
        let push = RecordingPush::new();
        let engine = DispatchEngine::new(db.clone(), membership, registry, push.clone());
        Fixture { db, engine, push }
    }

    async fn drain_fanout() {
        // Fanout runs on a detached task; yield until it has had its turn.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn non_participant_send_is_forbidden_and_writes_nothing() {
        let f = fixture();
        let outsider = f.db.create_user("outsider", None).unwrap();
        let event = f.db.create_event("yard sale").unwrap();
        let surface = SurfaceRef::Event(event);

        let err = f
            .engine
            .send(outsider, surface, MessageKind::Chat, "hi".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden));
        assert!(f.db.list_since(surface, None, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn sender_never_sees_their_own_message_as_unread() {
        let f = fixture();
        let alice = f.db.create_user("alice", None).unwrap();
        let event = f.db.create_event("potluck").unwrap();
        f.db.add_event_participant(event, alice, "member").unwrap();
        let surface = SurfaceRef::Event(event);

        f.engine
            .send(alice, surface, MessageKind::Chat, "I'm bringing pie".into(), None)
            .await
            .unwrap();

        let marker = f.db.get_marker(alice, surface).unwrap();
        assert_eq!(
            f.db.count_since(surface, marker, Some(alice)).unwrap(),
            0,
            "sender's own send must leave their unread at zero"
        );
    }

    #[tokio::test]
    async fn cross_surface_reply_creates_no_message() {
        let f = fixture();
        let alice = f.db.create_user("alice", None).unwrap();
        let e1 = f.db.create_event("one").unwrap();
        let e2 = f.db.create_event("two").unwrap();
        f.db.add_event_participant(e1, alice, "member").unwrap();
        f.db.add_event_participant(e2, alice, "member").unwrap();

        let root = f
            .engine
            .send(alice, SurfaceRef::Event(e1), MessageKind::Chat, "root".into(), None)
            .await
            .unwrap();

        let err = f
            .engine
            .send(
                alice,
                SurfaceRef::Event(e2),
                MessageKind::Chat,
                "reply".into(),
                Some(root.id),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidReply));
        assert!(f.db.list_since(SurfaceRef::Event(e2), None, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn committed_message_is_recoverable_without_live_sessions() {
        // Commit-then-notify: nobody is connected, fanout goes nowhere, yet
        // the message is durably listable for the next reconnect.
        let f = fixture();
        let a = f.db.create_user("a", None).unwrap();
        let b = f.db.create_user("b", None).unwrap();
        let conv = f.db.create_conversation(a, b).unwrap();
        let surface = SurfaceRef::Private(conv);

        let sent = f
            .engine
            .send(a, surface, MessageKind::Chat, "hello".into(), None)
            .await
            .unwrap();
        drain_fanout().await;

        let listed = f.db.list_since(surface, None, None).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, sent.id);
    }

    #[tokio::test]
    async fn live_private_delivery_reaches_both_participants_once() {
        let f = fixture();
        let a = f.db.create_user("a", None).unwrap();
        let b = f.db.create_user("b", None).unwrap();
        let conv = f.db.create_conversation(a, b).unwrap();
        let surface = SurfaceRef::Private(conv);

        let mut sess_a = f.engine.registry().authenticate(a).await;
        let mut sess_b = f.engine.registry().authenticate(b).await;

        f.engine
            .send(a, surface, MessageKind::Chat, "ping".into(), None)
            .await
            .unwrap();
        drain_fanout().await;

        assert!(matches!(
            sess_a.frames.recv().await,
            Some(GatewayEvent::MessageCreate { .. })
        ));
        assert!(matches!(
            sess_b.frames.recv().await,
            Some(GatewayEvent::MessageCreate { .. })
        ));
        // Exactly once per connection
        assert!(sess_a.frames.try_recv().is_err());
        assert!(sess_b.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_recipient_gets_exactly_one_push() {
        let f = fixture();
        let a = f.db.create_user("a", None).unwrap();
        let b = f.db.create_user("b", Some("tok-b")).unwrap();
        let conv = f.db.create_conversation(a, b).unwrap();

        f.engine
            .send(a, SurfaceRef::Private(conv), MessageKind::Chat, "psst".into(), None)
            .await
            .unwrap();
        drain_fanout().await;

        assert_eq!(*f.push.notified.lock().unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn missing_push_token_is_tolerated_silently() {
        let f = fixture();
        let a = f.db.create_user("a", None).unwrap();
        let b = f.db.create_user("b", None).unwrap();
        let conv = f.db.create_conversation(a, b).unwrap();

        f.engine
            .send(a, SurfaceRef::Private(conv), MessageKind::Chat, "psst".into(), None)
            .await
            .unwrap();
        drain_fanout().await;

        assert!(f.push.notified.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_recipient_is_not_pushed() {
        let f = fixture();
        let a = f.db.create_user("a", None).unwrap();
        let b = f.db.create_user("b", Some("tok-b")).unwrap();
        let conv = f.db.create_conversation(a, b).unwrap();
        let _session = f.engine.registry().authenticate(b).await;

        f.engine
            .send(a, SurfaceRef::Private(conv), MessageKind::Chat, "hi".into(), None)
            .await
            .unwrap();
        drain_fanout().await;

        assert!(f.push.notified.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_read_fans_a_receipt_to_the_room() {
        let f = fixture();
        let alice = f.db.create_user("alice", None).unwrap();
        let bob = f.db.create_user("bob", None).unwrap();
        let event = f.db.create_event("meetup").unwrap();
        f.db.add_event_participant(event, alice, "member").unwrap();
        f.db.add_event_participant(event, bob, "member").unwrap();
        let surface = SurfaceRef::Event(event);

        let msg = f
            .engine
            .send(alice, surface, MessageKind::Chat, "hello".into(), None)
            .await
            .unwrap();
        drain_fanout().await;

        let mut alice_session = f.engine.registry().authenticate(alice).await;
        f.engine
            .registry()
            .join_room(alice_session.conn_id, surface)
            .await
            .unwrap();

        let updated = f
            .engine
            .mark_read(bob, surface, ReadPosition::Timestamp(msg.created_at))
            .await
            .unwrap();
        assert_eq!(updated, 1);

        assert!(matches!(
            alice_session.frames.recv().await,
            Some(GatewayEvent::MessageRead { user_id, .. }) if user_id == bob
        ));

        // Second call is a no-op and fans nothing
        let updated = f
            .engine
            .mark_read(bob, surface, ReadPosition::Timestamp(msg.created_at))
            .await
            .unwrap();
        assert_eq!(updated, 0);
        assert!(alice_session.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn mark_read_on_one_device_clears_unread_for_all_of_them() {
        // Markers are per user, not per connection: reading on the phone
        // empties the laptop's unread too, and both sessions get the
        // receipt so they can clear local state.
        let f = fixture();
        let a = f.db.create_user("a", None).unwrap();
        let b = f.db.create_user("b", None).unwrap();
        let conv = f.db.create_conversation(a, b).unwrap();
        let surface = SurfaceRef::Private(conv);

        let msg = f
            .engine
            .send(a, surface, MessageKind::Chat, "hey".into(), None)
            .await
            .unwrap();
        drain_fanout().await;

        let mut phone = f.engine.registry().authenticate(b).await;
        let mut laptop = f.engine.registry().authenticate(b).await;

        let updated = f
            .engine
            .mark_read(b, surface, ReadPosition::MessageId(msg.id))
            .await
            .unwrap();
        assert_eq!(updated, 1);

        for session in [&mut phone, &mut laptop] {
            assert!(matches!(
                session.frames.recv().await,
                Some(GatewayEvent::MessageRead { user_id, .. }) if user_id == b
            ));
        }

        let marker = f.db.get_marker(b, surface).unwrap();
        assert_eq!(f.db.count_since(surface, marker, Some(b)).unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_fans_a_deletion_frame() {
        let f = fixture();
        let alice = f.db.create_user("alice", None).unwrap();
        let event = f.db.create_event("cleanup").unwrap();
        f.db.add_event_participant(event, alice, "member").unwrap();
        let surface = SurfaceRef::Event(event);

        let msg = f
            .engine
            .send(alice, surface, MessageKind::Chat, "typo".into(), None)
            .await
            .unwrap();
        drain_fanout().await;

        let mut session = f.engine.registry().authenticate(alice).await;
        f.engine.registry().join_room(session.conn_id, surface).await.unwrap();

        let deleted = f.engine.delete(alice, msg.id).await.unwrap();
        assert!(deleted.deleted);
        assert!(matches!(
            session.frames.recv().await,
            Some(GatewayEvent::MessageDeleted { message_id, .. }) if message_id == msg.id
        ));
    }
}
