use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::errors::{ChannelError, PersistenceError};
use parley_types::events::ServerEvent;
use parley_types::models::ChatMessage;

use crate::log::MessageLog;
use crate::notify::{self, NotificationSink};

pub const DEFAULT_HISTORY_LIMIT: u32 = 100;
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4096;

/// Identity bound to a channel once, at open. Every later hub call takes
/// this value instead of re-deriving the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedConnection {
    pub id: Uuid,
    pub username: String,
}

#[derive(Clone)]
pub struct HubConfig {
    pub history_limit: u32,
    pub max_message_len: usize,
    /// When set, every accepted message is also sent to this sink.
    pub mirror: Option<Arc<dyn NotificationSink>>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            mirror: None,
        }
    }
}

struct Registered {
    username: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Owns the live connection set and fans chat and presence events out to it.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    log: Arc<dyn MessageLog>,
    config: HubConfig,

    /// conn_id -> registered connection. Only the hub's own handlers touch this.
    connections: RwLock<HashMap<Uuid, Registered>>,

    /// Held across append-then-broadcast and register-then-replay so every
    /// connection observes log order, and a joiner sees each message exactly once.
    sequencer: Mutex<()>,
}

impl BroadcastHub {
    pub fn new(log: Arc<dyn MessageLog>, config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                log,
                config,
                connections: RwLock::new(HashMap::new()),
                sequencer: Mutex::new(()),
            }),
        }
    }

    /// Register an authenticated channel.
    ///
    /// Queues the history payload on the new connection's receiver, then tells
    /// every other connection that `username` joined. If history cannot be
    /// read the connection is not registered.
    pub async fn on_connect(
        &self,
        username: String,
    ) -> Result<(AuthenticatedConnection, mpsc::UnboundedReceiver<ServerEvent>), PersistenceError>
    {
        let _seq = self.inner.sequencer.lock().await;

        let history = self.inner.log.recent(self.inner.config.history_limit).await?;

        let conn = AuthenticatedConnection {
            id: Uuid::new_v4(),
            username,
        };
        let (tx, rx) = mpsc::unbounded_channel();

        let _ = tx.send(ServerEvent::History(
            history.iter().map(ChatMessage::transcript_line).collect(),
        ));

        let mut connections = self.inner.connections.write().await;
        fan_out(
            &connections,
            &ServerEvent::Joined(conn.username.clone()),
            Some(conn.id),
        );
        connections.insert(
            conn.id,
            Registered {
                username: conn.username.clone(),
                tx,
            },
        );

        info!(
            "{} joined as {} ({} online, {} history lines)",
            conn.username,
            conn.id,
            connections.len(),
            history.len()
        );
        Ok((conn, rx))
    }

    /// Log a message, then broadcast it to every registered connection,
    /// the sender included.
    ///
    /// Errors go to the sender's queue only; nobody else sees anything.
    pub async fn on_message(
        &self,
        conn: &AuthenticatedConnection,
        text: String,
    ) -> Result<ChatMessage, ChannelError> {
        let result = self.accept(conn, text).await;

        if let Err(e) = &result {
            warn!("{} ({}) message refused: {}", conn.username, conn.id, e);
            self.send_to(conn.id, ServerEvent::Error { error: e.kind() }).await;
        }

        result
    }

    async fn accept(
        &self,
        conn: &AuthenticatedConnection,
        text: String,
    ) -> Result<ChatMessage, ChannelError> {
        if text.trim().is_empty() {
            return Err(ChannelError::EmptyMessage);
        }
        let max = self.inner.config.max_message_len;
        if text.chars().count() > max {
            return Err(ChannelError::MessageTooLong(max));
        }
        if !self.is_registered(conn.id).await {
            return Err(ChannelError::NotRegistered);
        }

        let message = {
            let _seq = self.inner.sequencer.lock().await;

            // Already in flight once started; a disconnect meanwhile only
            // removes the connection from the fan-out below.
            let message = self.inner.log.append(&conn.username, &text).await?;

            let connections = self.inner.connections.read().await;
            fan_out(&connections, &ServerEvent::Message(message.clone()), None);
            debug!(
                "Message {} from {} fanned out to {} connections",
                message.seq,
                message.username,
                connections.len()
            );
            message
        };

        if let Some(sink) = &self.inner.config.mirror {
            notify::dispatch(sink.clone(), message.transcript_line());
        }

        Ok(message)
    }

    /// Remove a connection and tell the rest it left. A second call for the
    /// same connection is a no-op.
    pub async fn on_disconnect(&self, conn: &AuthenticatedConnection) {
        let mut connections = self.inner.connections.write().await;
        let Some(removed) = connections.remove(&conn.id) else {
            return;
        };

        fan_out(&connections, &ServerEvent::Left(removed.username.clone()), None);
        info!(
            "{} left ({}), {} online",
            removed.username,
            conn.id,
            connections.len()
        );
    }

    pub async fn is_registered(&self, conn_id: Uuid) -> bool {
        self.inner.connections.read().await.contains_key(&conn_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    async fn send_to(&self, conn_id: Uuid, event: ServerEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(registered) = connections.get(&conn_id) {
            let _ = registered.tx.send(event);
        }
    }
}

/// A send error means the receiver is gone; its writer task has exited and
/// `on_disconnect` is on the way, so it is ignored here.
fn fan_out(connections: &HashMap<Uuid, Registered>, event: &ServerEvent, except: Option<Uuid>) {
    for (id, registered) in connections {
        if Some(*id) == except {
            continue;
        }
        let _ = registered.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use parley_types::errors::{ChannelErrorKind, NotificationError};
    use tokio::sync::Notify;

    use super::*;

    #[derive(Default)]
    struct MemoryLog {
        records: std::sync::Mutex<Vec<ChatMessage>>,
        next_seq: AtomicI64,
        fail_writes: AtomicBool,
        fail_reads: AtomicBool,
        /// When set, `append` signals `entered` and parks until `release`.
        gated: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl MessageLog for MemoryLog {
        async fn append(&self, username: &str, text: &str) -> Result<ChatMessage, PersistenceError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(PersistenceError::WriteFailed("disk full".into()));
            }
            if self.gated.load(Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            // Yield so concurrent senders interleave at the suspension point.
            tokio::task::yield_now().await;
            let message = ChatMessage {
                id: Uuid::new_v4(),
                seq: self.next_seq.fetch_add(1, Ordering::SeqCst) + 1,
                username: username.to_string(),
                text: text.to_string(),
                created_at: Utc::now(),
            };
            self.records.lock().unwrap().push(message.clone());
            Ok(message)
        }

        async fn recent(&self, limit: u32) -> Result<Vec<ChatMessage>, PersistenceError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(PersistenceError::ReadFailed("database locked".into()));
            }
            let records = self.records.lock().unwrap();
            let skip = records.len().saturating_sub(limit as usize);
            Ok(records[skip..].to_vec())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, text: &str) -> Result<(), NotificationError> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn hub_with(log: Arc<MemoryLog>) -> BroadcastHub {
        BroadcastHub::new(log, HubConfig::default())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn messages(events: &[ServerEvent]) -> Vec<i64> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::Message(m) => Some(m.seq),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_join_sends_history_and_notifies_others_only() {
        let hub = hub_with(Arc::new(MemoryLog::default()));

        let (_alice, mut alice_rx) = hub.on_connect("alice".into()).await.unwrap();
        assert_eq!(drain(&mut alice_rx), vec![ServerEvent::History(vec![])]);

        let (_bob, mut bob_rx) = hub.on_connect("bob".into()).await.unwrap();
        assert_eq!(drain(&mut alice_rx), vec![ServerEvent::Joined("bob".into())]);
        // No self-join notice for bob
        assert_eq!(drain(&mut bob_rx), vec![ServerEvent::History(vec![])]);
        assert_eq!(hub.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_message_reaches_everyone_including_sender() {
        let hub = hub_with(Arc::new(MemoryLog::default()));
        let (alice, mut alice_rx) = hub.on_connect("alice".into()).await.unwrap();
        let (_bob, mut bob_rx) = hub.on_connect("bob".into()).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let sent = hub.on_message(&alice, "hello".into()).await.unwrap();
        assert_eq!(sent.username, "alice");
        assert_eq!(sent.text, "hello");

        assert_eq!(drain(&mut alice_rx), vec![ServerEvent::Message(sent.clone())]);
        assert_eq!(drain(&mut bob_rx), vec![ServerEvent::Message(sent)]);
    }

    #[tokio::test]
    async fn test_history_is_capped_and_chronological() {
        let log = Arc::new(MemoryLog::default());
        let hub = hub_with(log.clone());
        let (alice, _alice_rx) = hub.on_connect("alice".into()).await.unwrap();
        for i in 0..120 {
            hub.on_message(&alice, format!("line {}", i)).await.unwrap();
        }

        let (_bob, mut bob_rx) = hub.on_connect("bob".into()).await.unwrap();
        let events = drain(&mut bob_rx);
        let ServerEvent::History(lines) = &events[0] else {
            panic!("expected history first, got {:?}", events);
        };
        assert_eq!(lines.len(), 100);
        assert_eq!(lines.first().unwrap(), "alice: line 20");
        assert_eq!(lines.last().unwrap(), "alice: line 119");
    }

    #[tokio::test]
    async fn test_leave_is_broadcast_to_remaining() {
        let hub = hub_with(Arc::new(MemoryLog::default()));
        let (alice, mut alice_rx) = hub.on_connect("alice".into()).await.unwrap();
        let (bob, mut bob_rx) = hub.on_connect("bob".into()).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        hub.on_disconnect(&bob).await;
        assert_eq!(drain(&mut alice_rx), vec![ServerEvent::Left("bob".into())]);
        assert!(!hub.is_registered(bob.id).await);

        // Idempotent
        hub.on_disconnect(&bob).await;
        assert!(drain(&mut alice_rx).is_empty());

        let err = hub.on_message(&bob, "ghost".into()).await.unwrap_err();
        assert_eq!(err, ChannelError::NotRegistered);
        assert!(drain(&mut alice_rx).is_empty());
        assert!(hub.is_registered(alice.id).await);
    }

    #[tokio::test]
    async fn test_failed_append_is_reported_to_sender_only() {
        let log = Arc::new(MemoryLog::default());
        let hub = hub_with(log.clone());
        let (alice, mut alice_rx) = hub.on_connect("alice".into()).await.unwrap();
        let (_bob, mut bob_rx) = hub.on_connect("bob".into()).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        log.fail_writes.store(true, Ordering::SeqCst);
        let err = hub.on_message(&alice, "lost".into()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Persistence(PersistenceError::WriteFailed(_))));

        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::Error {
                error: ChannelErrorKind::WriteFailed
            }]
        );
        assert!(drain(&mut bob_rx).is_empty());
        assert_eq!(hub.connection_count().await, 2);
        assert!(log.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_messages_never_reach_the_log() {
        let log = Arc::new(MemoryLog::default());
        let hub = BroadcastHub::new(
            log.clone(),
            HubConfig {
                max_message_len: 5,
                ..HubConfig::default()
            },
        );
        let (alice, mut alice_rx) = hub.on_connect("alice".into()).await.unwrap();
        drain(&mut alice_rx);

        assert_eq!(
            hub.on_message(&alice, "   ".into()).await.unwrap_err(),
            ChannelError::EmptyMessage
        );
        assert_eq!(
            hub.on_message(&alice, "toolong".into()).await.unwrap_err(),
            ChannelError::MessageTooLong(5)
        );
        // Five characters, more than five bytes
        hub.on_message(&alice, "héllo".into()).await.unwrap();

        let events = drain(&mut alice_rx);
        assert_eq!(events.len(), 3);
        assert_eq!(log.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_senders_observe_one_order() {
        let log = Arc::new(MemoryLog::default());
        let hub = hub_with(log.clone());
        let (alice, mut alice_rx) = hub.on_connect("alice".into()).await.unwrap();
        let (bob, mut bob_rx) = hub.on_connect("bob".into()).await.unwrap();
        let (_carol, mut carol_rx) = hub.on_connect("carol".into()).await.unwrap();

        let mut tasks = Vec::new();
        for conn in [alice, bob] {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50 {
                    hub.on_message(&conn, format!("{} {}", conn.username, i))
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let log_order: Vec<i64> = log.recent(200).await.unwrap().iter().map(|m| m.seq).collect();
        assert_eq!(log_order.len(), 100);
        for rx in [&mut alice_rx, &mut bob_rx, &mut carol_rx] {
            assert_eq!(messages(&drain(rx)), log_order);
        }
    }

    #[tokio::test]
    async fn test_join_during_traffic_sees_each_message_once() {
        let log = Arc::new(MemoryLog::default());
        let hub = hub_with(log.clone());
        let (alice, _alice_rx) = hub.on_connect("alice".into()).await.unwrap();

        let sender = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for i in 0..60 {
                    hub.on_message(&alice, format!("m{}", i)).await.unwrap();
                }
            })
        };
        tokio::task::yield_now().await;
        let (_bob, mut bob_rx) = hub.on_connect("bob".into()).await.unwrap();
        sender.await.unwrap();

        let events = drain(&mut bob_rx);
        let ServerEvent::History(lines) = &events[0] else {
            panic!("expected history first");
        };
        let live = messages(&events[1..]);
        assert_eq!(lines.len() + live.len(), 60);
        if let Some(first_live) = live.first() {
            assert_eq!(*first_live as usize, lines.len() + 1);
        }
    }

    #[tokio::test]
    async fn test_mirror_receives_accepted_messages() {
        let sink = Arc::new(RecordingSink::default());
        let hub = BroadcastHub::new(
            Arc::new(MemoryLog::default()),
            HubConfig {
                mirror: Some(sink.clone()),
                ..HubConfig::default()
            },
        );
        let (alice, _rx) = hub.on_connect("alice".into()).await.unwrap();
        hub.on_message(&alice, "hello".into()).await.unwrap();

        for _ in 0..50 {
            if !sink.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(*sink.seen.lock().unwrap(), vec!["alice: hello".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_during_append_still_logs_and_skips_departed() {
        let log = Arc::new(MemoryLog::default());
        let hub = hub_with(log.clone());
        let (_alice, mut alice_rx) = hub.on_connect("alice".into()).await.unwrap();
        let (bob, mut bob_rx) = hub.on_connect("bob".into()).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        log.gated.store(true, Ordering::SeqCst);
        let sending = {
            let hub = hub.clone();
            let bob = bob.clone();
            tokio::spawn(async move { hub.on_message(&bob, "last words".into()).await })
        };

        log.entered.notified().await;
        hub.on_disconnect(&bob).await;
        log.release.notify_one();

        let sent = sending.await.unwrap().unwrap();
        assert_eq!(sent.text, "last words");
        assert_eq!(log.recent(10).await.unwrap(), vec![sent.clone()]);

        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::Left("bob".into()), ServerEvent::Message(sent)]
        );
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_history_failure_at_join_registers_nothing() {
        let log = Arc::new(MemoryLog::default());
        let hub = hub_with(log.clone());
        let (_alice, mut alice_rx) = hub.on_connect("alice".into()).await.unwrap();
        drain(&mut alice_rx);

        log.fail_reads.store(true, Ordering::SeqCst);
        let err = hub.on_connect("bob".into()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::ReadFailed(_)));
        assert_eq!(ChannelError::from(err).kind(), ChannelErrorKind::HistoryUnavailable);

        assert_eq!(hub.connection_count().await, 1);
        assert!(drain(&mut alice_rx).is_empty());
    }
}
