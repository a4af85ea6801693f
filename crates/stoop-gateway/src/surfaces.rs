//! Surface adapters: thin translators from inbound gateway commands to
//! Dispatch Engine / Read-Marker calls, one per chat surface. Every command
//! is acknowledged with its structured result — the committed message or
//! the marker transition count — never a bare success flag.

use tracing::warn;

use stoop_types::events::{GatewayCommand, GatewayEvent};
use stoop_types::{ChatError, MessageKind, ReadPosition, SurfaceRef};

use crate::dispatch::DispatchEngine;
use crate::registry::ConnId;
use crate::unread::UnreadAggregator;

pub async fn handle_command(
    engine: &DispatchEngine,
    aggregator: &UnreadAggregator,
    user_id: i64,
    conn_id: ConnId,
    cmd: GatewayCommand,
) {
    use GatewayCommand::*;

    let result = match cmd {
        JoinEvent { .. } | LeaveEvent { .. } | SendEventMessage { .. } | MarkEventRead { .. } => {
            event_command(engine, user_id, conn_id, cmd).await
        }
        JoinCommunity { .. }
        | LeaveCommunity { .. }
        | SendCommunityMessage { .. }
        | MarkCommunityRead { .. } => community_command(engine, user_id, conn_id, cmd).await,
        SendPrivateMessage { .. } | MarkPrivateRead { .. } => {
            private_command(engine, user_id, cmd).await
        }
        QueryUnread => aggregator
            .badge(user_id)
            .map(|badge| GatewayEvent::Unread { badge }),
    };

    match result {
        Ok(ack) => engine.registry().send_to_conn(conn_id, ack).await,
        Err(err) => {
            warn!("user {user_id} command rejected: {err}");
            engine
                .registry()
                .send_to_conn(conn_id, GatewayEvent::error(&err))
                .await;
        }
    }
}

/// Event-thread adapter.
async fn event_command(
    engine: &DispatchEngine,
    user_id: i64,
    conn_id: ConnId,
    cmd: GatewayCommand,
) -> Result<GatewayEvent, ChatError> {
    match cmd {
        GatewayCommand::JoinEvent { event_id } => {
            let surface = SurfaceRef::Event(event_id);
            engine.registry().join_room(conn_id, surface).await?;
            Ok(GatewayEvent::RoomJoined { surface })
        }
        GatewayCommand::LeaveEvent { event_id } => {
            let surface = SurfaceRef::Event(event_id);
            engine.registry().leave_room(conn_id, surface).await?;
            Ok(GatewayEvent::RoomLeft { surface })
        }
        GatewayCommand::SendEventMessage { event_id, body, reply_to } => {
            let message = engine
                .send(user_id, SurfaceRef::Event(event_id), MessageKind::Chat, body, reply_to)
                .await?;
            Ok(GatewayEvent::MessageAck { message })
        }
        GatewayCommand::MarkEventRead { event_id, last_read_at } => {
            let surface = SurfaceRef::Event(event_id);
            let updated = engine
                .mark_read(user_id, surface, ReadPosition::Timestamp(last_read_at))
                .await?;
            Ok(GatewayEvent::ReadAck { surface, updated })
        }
        _ => unreachable!("non-event command routed to event adapter"),
    }
}

/// Community-thread adapter.
async fn community_command(
    engine: &DispatchEngine,
    user_id: i64,
    conn_id: ConnId,
    cmd: GatewayCommand,
) -> Result<GatewayEvent, ChatError> {
    match cmd {
        GatewayCommand::JoinCommunity { community_id } => {
            let surface = SurfaceRef::Community(community_id);
            engine.registry().join_room(conn_id, surface).await?;
            Ok(GatewayEvent::RoomJoined { surface })
        }
        GatewayCommand::LeaveCommunity { community_id } => {
            let surface = SurfaceRef::Community(community_id);
            engine.registry().leave_room(conn_id, surface).await?;
            Ok(GatewayEvent::RoomLeft { surface })
        }
        GatewayCommand::SendCommunityMessage { community_id, body, reply_to } => {
            let message = engine
                .send(
                    user_id,
                    SurfaceRef::Community(community_id),
                    MessageKind::Chat,
                    body,
                    reply_to,
                )
                .await?;
            Ok(GatewayEvent::MessageAck { message })
        }
        GatewayCommand::MarkCommunityRead { community_id, last_read_at } => {
            let surface = SurfaceRef::Community(community_id);
            let updated = engine
                .mark_read(user_id, surface, ReadPosition::Timestamp(last_read_at))
                .await?;
            Ok(GatewayEvent::ReadAck { surface, updated })
        }
        _ => unreachable!("non-community command routed to community adapter"),
    }
}

/// Private-conversation adapter. No explicit room joins: delivery rides the
/// personal rooms both participants were auto-joined to.
async fn private_command(
    engine: &DispatchEngine,
    user_id: i64,
    cmd: GatewayCommand,
) -> Result<GatewayEvent, ChatError> {
    match cmd {
        GatewayCommand::SendPrivateMessage { conversation_id, body, reply_to } => {
            let message = engine
                .send(
                    user_id,
                    SurfaceRef::Private(conversation_id),
                    MessageKind::Chat,
                    body,
                    reply_to,
                )
                .await?;
            Ok(GatewayEvent::MessageAck { message })
        }
        GatewayCommand::MarkPrivateRead { conversation_id, last_read_message_id } => {
            let surface = SurfaceRef::Private(conversation_id);
            let updated = engine
                .mark_read(user_id, surface, ReadPosition::MessageId(last_read_message_id))
                .await?;
            Ok(GatewayEvent::ReadAck { surface, updated })
        }
        _ => unreachable!("non-private command routed to private adapter"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stoop_db::Database;

    use crate::membership::MembershipProvider;
    use crate::push::NoopPushProvider;
    use crate::registry::Registry;

    struct Fixture {
        db: Arc<Database>,
        engine: DispatchEngine,
        aggregator: UnreadAggregator,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let membership: Arc<dyn MembershipProvider> = db.clone();
        let registry = Registry::new(membership.clone());
        let engine = DispatchEngine::new(
            db.clone(),
            membership.clone(),
            registry,
            Arc::new(NoopPushProvider),
        );
        let aggregator = UnreadAggregator::new(db.clone(), membership);
        Fixture { db, engine, aggregator }
    }

    #[tokio::test]
    async fn send_command_acks_with_the_committed_message() {
        let f = fixture();
        let alice = f.db.create_user("alice", None).unwrap();
        let event = f.db.create_event("picnic").unwrap();
        f.db.add_event_participant(event, alice, "member").unwrap();

        let mut session = f.engine.registry().authenticate(alice).await;
        handle_command(
            &f.engine,
            &f.aggregator,
            alice,
            session.conn_id,
            GatewayCommand::SendEventMessage {
                event_id: event,
                body: "who's in?".into(),
                reply_to: None,
            },
        )
        .await;

        match session.frames.recv().await {
            Some(GatewayEvent::MessageAck { message }) => {
                assert_eq!(message.body, "who's in?");
                assert_eq!(message.sender_id, alice);
            }
            other => panic!("expected MessageAck, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mark_read_acks_with_the_transition_count() {
        let f = fixture();
        let a = f.db.create_user("a", None).unwrap();
        let b = f.db.create_user("b", None).unwrap();
        let conv = f.db.create_conversation(a, b).unwrap();
        let surface = SurfaceRef::Private(conv);

        let last = f
            .db
            .append_message(surface, a, MessageKind::Chat, "hi".into(), None, 10)
            .unwrap();

        let mut session = f.engine.registry().authenticate(b).await;
        let cmd = GatewayCommand::MarkPrivateRead {
            conversation_id: conv,
            last_read_message_id: last.id,
        };
        handle_command(&f.engine, &f.aggregator, b, session.conn_id, cmd.clone()).await;

        // First frame may be the receipt fanned to b's own personal room.
        let mut acks = Vec::new();
        while let Ok(frame) = session.frames.try_recv() {
            if let GatewayEvent::ReadAck { updated, .. } = frame {
                acks.push(updated);
            }
        }
        assert_eq!(acks, vec![1]);

        // Idempotent repeat acks zero
        handle_command(&f.engine, &f.aggregator, b, session.conn_id, cmd).await;
        let mut repeat = Vec::new();
        while let Ok(frame) = session.frames.try_recv() {
            if let GatewayEvent::ReadAck { updated, .. } = frame {
                repeat.push(updated);
            }
        }
        assert_eq!(repeat, vec![0]);
    }

    #[tokio::test]
    async fn rejected_commands_come_back_as_error_frames() {
        let f = fixture();
        let outsider = f.db.create_user("outsider", None).unwrap();
        let event = f.db.create_event("members only").unwrap();

        let mut session = f.engine.registry().authenticate(outsider).await;
        handle_command(
            &f.engine,
            &f.aggregator,
            outsider,
            session.conn_id,
            GatewayCommand::JoinEvent { event_id: event },
        )
        .await;

        match session.frames.recv().await {
            Some(GatewayEvent::Error { code, .. }) => assert_eq!(code, "FORBIDDEN"),
            other => panic!("expected Error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unread_query_acks_with_the_badge() {
        let f = fixture();
        let reader = f.db.create_user("reader", None).unwrap();
        let poster = f.db.create_user("poster", None).unwrap();
        let event = f.db.create_event("ev").unwrap();
        f.db.add_event_participant(event, reader, "member").unwrap();
        f.db.add_event_participant(event, poster, "member").unwrap();
        f.db.append_message(SurfaceRef::Event(event), poster, MessageKind::Chat, "m".into(), None, 5)
            .unwrap();

        let mut session = f.engine.registry().authenticate(reader).await;
        handle_command(
            &f.engine,
            &f.aggregator,
            reader,
            session.conn_id,
            GatewayCommand::QueryUnread,
        )
        .await;

        match session.frames.recv().await {
            Some(GatewayEvent::Unread { badge }) => {
                assert_eq!(badge.event, 1);
                assert_eq!(badge.count.get(&format!("event:{event}")), Some(&1));
            }
            other => panic!("expected Unread frame, got {other:?}"),
        }
    }
}
