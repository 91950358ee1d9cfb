//! Message routing
//!
//! One inbound batch per call, for one conversation: persist the messages,
//! apply the trigger matcher, dispatch through the session state machine and
//! forward the reply (or a user-visible failure notice) to the channel port.

use crate::channel::{ChannelPort, InboundMessage};
use crate::error::Result;
use crate::registry::ConversationRegistry;
use crate::session::SessionCoordinator;
use crate::store::MessageStore;
use crate::trigger;
use std::sync::Arc;

/// Sender address used when storing agent replies
const AGENT_SENDER: &str = "agent";

/// Routes inbound batches between the channel port and worker sessions
pub struct MessageRouter {
    coordinator: Arc<SessionCoordinator>,
    registry: Arc<ConversationRegistry>,
    store: Arc<dyn MessageStore>,
    channel: Arc<dyn ChannelPort>,
    context_limit: usize,
}

impl MessageRouter {
    /// Create a router over the given collaborators.
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        registry: Arc<ConversationRegistry>,
        store: Arc<dyn MessageStore>,
        channel: Arc<dyn ChannelPort>,
        context_limit: usize,
    ) -> Self {
        Self {
            coordinator,
            registry,
            store,
            channel,
            context_limit,
        }
    }

    /// Handle one inbound batch for a conversation.
    ///
    /// Errors from the dispatch path are turned into failure notices; only a
    /// failure of the channel port itself propagates.
    pub async fn on_inbound_batch(
        &self,
        conversation_id: &str,
        batch: Vec<InboundMessage>,
    ) -> Result<()> {
        let Some(conversation) = self.registry.get(conversation_id).await else {
            tracing::debug!(conversation_id, "Batch for unregistered conversation dropped");
            return Ok(());
        };
        if batch.is_empty() {
            return Ok(());
        }

        for message in &batch {
            if let Err(e) = self.store.append_message(conversation_id, message).await {
                tracing::warn!(conversation_id, "Failed to persist inbound message: {}", e);
                return self
                    .channel
                    .send_failure_notice(conversation_id, &e.notice_reason())
                    .await;
            }
        }

        // A batch activates when at least one message matches; only the
        // activated content is forwarded.
        let activated: Vec<InboundMessage> = batch
            .iter()
            .filter_map(|message| {
                trigger::evaluate(&conversation.trigger, &message.content).map(|content| {
                    InboundMessage {
                        sender: message.sender.clone(),
                        content,
                        timestamp: message.timestamp,
                    }
                })
            })
            .collect();
        if activated.is_empty() {
            tracing::debug!(conversation_id, "No trigger match, batch ignored");
            return Ok(());
        }

        let context = match self
            .store
            .load_recent_context(conversation_id, self.context_limit)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!(conversation_id, "Failed to load context: {}", e);
                return self
                    .channel
                    .send_failure_notice(conversation_id, &e.notice_reason())
                    .await;
            }
        };

        match self
            .coordinator
            .dispatch(&conversation, activated, context)
            .await
        {
            Ok(outcome) => {
                let reply = InboundMessage::new(AGENT_SENDER, outcome.reply.clone());
                if let Err(e) = self.store.append_message(conversation_id, &reply).await {
                    tracing::warn!(conversation_id, "Failed to persist reply: {}", e);
                }
                self.channel
                    .send_reply(conversation_id, &outcome.reply)
                    .await
            }
            Err(e) => {
                tracing::warn!(conversation_id, "Dispatch failed: {}", e);
                self.channel
                    .send_failure_notice(conversation_id, &e.notice_reason())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatchConfig, RuntimeConfig};
    use crate::ipc::IpcBridge;
    use crate::registry::Conversation;
    use crate::runtime::mock::MockRuntime;
    use crate::runtime::RuntimeSupervisor;
    use crate::session::GenerationLedger;
    use crate::store::JsonlMessageStore;
    use crate::trigger::TriggerConfig;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Channel port double capturing outbound traffic
    #[derive(Default)]
    struct RecordingChannel {
        replies: Mutex<Vec<(String, String)>>,
        failures: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChannelPort for RecordingChannel {
        async fn send_reply(&self, conversation_id: &str, text: &str) -> Result<()> {
            self.replies
                .lock()
                .await
                .push((conversation_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn send_failure_notice(&self, conversation_id: &str, reason: &str) -> Result<()> {
            self.failures
                .lock()
                .await
                .push((conversation_id.to_string(), reason.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        router: MessageRouter,
        registry: Arc<ConversationRegistry>,
        store: Arc<JsonlMessageStore>,
        channel: Arc<RecordingChannel>,
        mock: Arc<MockRuntime>,
        dir: tempfile::TempDir,
    }

    async fn make_fixture() -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let bridge = Arc::new(IpcBridge::new(
            dir.path().join("ipc"),
            Duration::from_millis(10),
        ));
        let mock = Arc::new(MockRuntime::new(bridge.clone()));
        let supervisor = Arc::new(RuntimeSupervisor::new(
            mock.clone(),
            bridge.clone(),
            RuntimeConfig {
                readiness_probes: 50,
                readiness_interval_ms: 10,
                ..Default::default()
            },
        ));
        let ledger =
            Arc::new(GenerationLedger::load(dir.path().join("generations.json")).unwrap());
        let coordinator = Arc::new(SessionCoordinator::new(
            supervisor,
            bridge,
            DispatchConfig {
                timeout_secs: 1,
                poll_interval_ms: 10,
                ..Default::default()
            },
            ledger,
        ));
        let registry = Arc::new(
            ConversationRegistry::load(dir.path().join("conversations.json")).unwrap(),
        );
        let store = Arc::new(JsonlMessageStore::new(dir.path().join("messages")));
        let channel = Arc::new(RecordingChannel::default());

        let router = MessageRouter::new(
            coordinator,
            registry.clone(),
            store.clone(),
            channel.clone(),
            10,
        );
        Fixture {
            router,
            registry,
            store,
            channel,
            mock,
            dir,
        }
    }

    fn message(content: &str) -> InboundMessage {
        InboundMessage::new("user-1", content)
    }

    #[tokio::test]
    async fn test_reply_flows_back_to_channel() {
        let fixture = make_fixture().await;
        fixture
            .registry
            .register(Conversation::new("c1@c.us", fixture.dir.path().join("ws")))
            .await
            .unwrap();

        fixture
            .router
            .on_inbound_batch("c1@c.us", vec![message("hello")])
            .await
            .unwrap();

        let replies = fixture.channel.replies.lock().await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1, "echo: hello");

        // Inbound and reply both persisted
        let history = fixture
            .store
            .load_recent_context("c1@c.us", 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].sender, "agent");
    }

    #[tokio::test]
    async fn test_unregistered_conversation_is_dropped() {
        let fixture = make_fixture().await;

        fixture
            .router
            .on_inbound_batch("nobody@c.us", vec![message("hello")])
            .await
            .unwrap();

        assert!(fixture.channel.replies.lock().await.is_empty());
        assert!(fixture.channel.failures.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_c_trigger_filtering() {
        let fixture = make_fixture().await;
        let mut conversation =
            Conversation::new("c1@c.us", fixture.dir.path().join("ws"));
        conversation.trigger = TriggerConfig::word("Andy");
        fixture.registry.register(conversation).await.unwrap();

        // "handy task" is not a prefix match: no dispatch at all
        fixture
            .router
            .on_inbound_batch("c1@c.us", vec![message("handy task")])
            .await
            .unwrap();
        assert!(fixture.channel.replies.lock().await.is_empty());

        // "andy, hi" matches case-insensitively, trigger word stripped
        fixture
            .router
            .on_inbound_batch("c1@c.us", vec![message("andy, hi")])
            .await
            .unwrap();
        let replies = fixture.channel.replies.lock().await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1, "echo: hi");
    }

    #[tokio::test]
    async fn test_ignored_messages_still_persisted() {
        let fixture = make_fixture().await;
        let mut conversation =
            Conversation::new("c1@c.us", fixture.dir.path().join("ws"));
        conversation.trigger = TriggerConfig::word("Andy");
        fixture.registry.register(conversation).await.unwrap();

        fixture
            .router
            .on_inbound_batch("c1@c.us", vec![message("just chatting")])
            .await
            .unwrap();

        let history = fixture
            .store
            .load_recent_context("c1@c.us", 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert!(fixture.channel.replies.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_becomes_notice() {
        let fixture = make_fixture().await;
        fixture
            .registry
            .register(Conversation::new("c1@c.us", fixture.dir.path().join("ws")))
            .await
            .unwrap();
        fixture.mock.set_fail_run(true).await;

        fixture
            .router
            .on_inbound_batch("c1@c.us", vec![message("hello")])
            .await
            .unwrap();

        let failures = fixture.channel.failures.lock().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].1, "the agent worker could not be started");
        assert!(fixture.channel.replies.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let fixture = make_fixture().await;
        fixture
            .registry
            .register(Conversation::new("c1@c.us", fixture.dir.path().join("ws")))
            .await
            .unwrap();

        fixture
            .router
            .on_inbound_batch("c1@c.us", vec![])
            .await
            .unwrap();
        assert!(fixture.channel.replies.lock().await.is_empty());
    }
}
