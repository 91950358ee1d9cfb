//! Conversation registry
//!
//! Conversations are created by explicit registration, updated by
//! configuration commands, and never deleted automatically. The registry is
//! persisted to a JSON state file so registrations survive restarts.

use crate::error::{Error, Result};
use crate::trigger::TriggerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Access mode for a mount-allowlist entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MountMode {
    /// Worker may read the path
    ReadOnly,
    /// Worker may read and write the path
    ReadWrite,
}

/// A host path the worker is allowed to access
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountEntry {
    /// Host path, mounted at the same path inside the worker
    pub host_path: PathBuf,

    /// Access mode
    pub mode: MountMode,
}

/// A registered conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Channel-specific address (e.g. "4915551234@c.us")
    pub id: String,

    /// Workspace folder owned by this conversation's worker
    pub workspace: PathBuf,

    /// Trigger configuration
    pub trigger: TriggerConfig,

    /// Mount allowlist
    pub mounts: Vec<MountEntry>,

    /// Registration timestamp, milliseconds since the UNIX epoch
    pub registered_at: i64,
}

impl Conversation {
    /// Create a conversation with defaults for the given address.
    pub fn new(id: impl Into<String>, workspace: PathBuf) -> Self {
        Self {
            id: id.into(),
            workspace,
            trigger: TriggerConfig::default(),
            mounts: Vec::new(),
            registered_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Conversation registry with JSON-file persistence
pub struct ConversationRegistry {
    path: PathBuf,
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl ConversationRegistry {
    /// Load the registry from `path`, starting empty if the file does
    /// not exist yet.
    pub fn load(path: PathBuf) -> Result<Self> {
        let conversations = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<Vec<Conversation>>(&content)
                .map_err(|e| Error::Registry(format!("corrupt registry file: {}", e)))?
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(Error::Registry(format!("read registry file: {}", e))),
        };

        Ok(Self {
            path,
            conversations: RwLock::new(conversations),
        })
    }

    /// Register a conversation. Registering an existing address is an
    /// error; use the update operations instead.
    pub async fn register(&self, conversation: Conversation) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        if conversations.contains_key(&conversation.id) {
            return Err(Error::Registry(format!(
                "conversation already registered: {}",
                conversation.id
            )));
        }

        tracing::info!(
            conversation_id = %conversation.id,
            workspace = %conversation.workspace.display(),
            "Registered conversation"
        );
        conversations.insert(conversation.id.clone(), conversation);
        self.persist(&conversations)
    }

    /// Deregister a conversation, returning its record if present.
    pub async fn deregister(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let mut conversations = self.conversations.write().await;
        let removed = conversations.remove(conversation_id);
        if removed.is_some() {
            tracing::info!(conversation_id, "Deregistered conversation");
            self.persist(&conversations)?;
        }
        Ok(removed)
    }

    /// Look up a conversation by address.
    pub async fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations.read().await.get(conversation_id).cloned()
    }

    /// All registered conversations, unordered.
    pub async fn list(&self) -> Vec<Conversation> {
        self.conversations.read().await.values().cloned().collect()
    }

    /// Replace a conversation's trigger configuration.
    pub async fn set_trigger(&self, conversation_id: &str, trigger: TriggerConfig) -> Result<()> {
        self.update(conversation_id, |c| c.trigger = trigger).await
    }

    /// Add a path to a conversation's mount allowlist.
    pub async fn allow_mount(&self, conversation_id: &str, entry: MountEntry) -> Result<()> {
        self.update(conversation_id, |c| {
            c.mounts.retain(|m| m.host_path != entry.host_path);
            c.mounts.push(entry);
        })
        .await
    }

    async fn update(
        &self,
        conversation_id: &str,
        apply: impl FnOnce(&mut Conversation),
    ) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations.get_mut(conversation_id).ok_or_else(|| {
            Error::Registry(format!("conversation not registered: {}", conversation_id))
        })?;
        apply(conversation);
        self.persist(&conversations)
    }

    fn persist(&self, conversations: &HashMap<String, Conversation>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut records: Vec<&Conversation> = conversations.values().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&records)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Default workspace folder for a conversation address.
pub fn default_workspace(workspaces_dir: &Path, conversation_id: &str) -> PathBuf {
    workspaces_dir.join(crate::slug(conversation_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_registry() -> (ConversationRegistry, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = ConversationRegistry::load(dir.path().join("conversations.json")).unwrap();
        (registry, dir)
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let (registry, dir) = make_registry();
        let conversation =
            Conversation::new("123@c.us", dir.path().join("ws"));
        registry.register(conversation).await.unwrap();

        let found = registry.get("123@c.us").await.unwrap();
        assert_eq!(found.id, "123@c.us");
        assert!(registry.get("456@c.us").await.is_none());
    }

    #[tokio::test]
    async fn test_double_register_fails() {
        let (registry, dir) = make_registry();
        let conversation = Conversation::new("123@c.us", dir.path().join("ws"));
        registry.register(conversation.clone()).await.unwrap();

        let result = registry.register(conversation).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_deregister() {
        let (registry, dir) = make_registry();
        registry
            .register(Conversation::new("123@c.us", dir.path().join("ws")))
            .await
            .unwrap();

        assert!(registry.deregister("123@c.us").await.unwrap().is_some());
        assert!(registry.deregister("123@c.us").await.unwrap().is_none());
        assert!(registry.get("123@c.us").await.is_none());
    }

    #[tokio::test]
    async fn test_set_trigger_and_allow_mount() {
        let (registry, dir) = make_registry();
        registry
            .register(Conversation::new("123@c.us", dir.path().join("ws")))
            .await
            .unwrap();

        registry
            .set_trigger("123@c.us", crate::trigger::TriggerConfig::word("Andy"))
            .await
            .unwrap();
        registry
            .allow_mount(
                "123@c.us",
                MountEntry {
                    host_path: PathBuf::from("/data/notes"),
                    mode: MountMode::ReadOnly,
                },
            )
            .await
            .unwrap();

        let found = registry.get("123@c.us").await.unwrap();
        assert_eq!(found.trigger.word.as_deref(), Some("Andy"));
        assert_eq!(found.mounts.len(), 1);

        // Re-allowing the same path replaces the entry
        registry
            .allow_mount(
                "123@c.us",
                MountEntry {
                    host_path: PathBuf::from("/data/notes"),
                    mode: MountMode::ReadWrite,
                },
            )
            .await
            .unwrap();
        let found = registry.get("123@c.us").await.unwrap();
        assert_eq!(found.mounts.len(), 1);
        assert_eq!(found.mounts[0].mode, MountMode::ReadWrite);
    }

    #[tokio::test]
    async fn test_update_unknown_conversation_fails() {
        let (registry, _dir) = make_registry();
        let result = registry
            .set_trigger("nobody", TriggerConfig::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("conversations.json");

        {
            let registry = ConversationRegistry::load(path.clone()).unwrap();
            let mut conversation = Conversation::new("123@c.us", dir.path().join("ws"));
            conversation.trigger = TriggerConfig::word("Andy");
            registry.register(conversation).await.unwrap();
        }

        let reloaded = ConversationRegistry::load(path).unwrap();
        let found = reloaded.get("123@c.us").await.unwrap();
        assert_eq!(found.trigger.word.as_deref(), Some("Andy"));
    }

    #[test]
    fn test_default_workspace_is_slugged() {
        let ws = default_workspace(Path::new("/var/burrow/workspaces"), "123@c.us");
        assert_eq!(ws, PathBuf::from("/var/burrow/workspaces/123-c.us"));
    }
}
