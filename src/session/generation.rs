//! Generation ledger
//!
//! Generation tokens identify one worker's lifetime for a conversation and
//! must stay monotonic across supervisor restarts, so the counters are
//! persisted to a JSON state file at every mint. A response envelope from a
//! pre-restart worker can therefore never collide with a freshly minted
//! generation.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Persistent per-conversation generation counters
pub struct GenerationLedger {
    path: PathBuf,
    counters: Mutex<HashMap<String, u64>>,
}

impl GenerationLedger {
    /// Load the ledger from `path`, starting empty if the file does not
    /// exist yet.
    pub fn load(path: PathBuf) -> Result<Self> {
        let counters = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::Internal(format!("corrupt generation ledger: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(Error::Internal(format!("read generation ledger: {}", e))),
        };

        Ok(Self {
            path,
            counters: Mutex::new(counters),
        })
    }

    /// Mint the next generation for a conversation and persist the ledger.
    pub fn mint(&self, conversation_id: &str) -> Result<u64> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| Error::Internal("generation ledger poisoned".to_string()))?;
        let counter = counters.entry(conversation_id.to_string()).or_insert(0);
        *counter += 1;
        let minted = *counter;

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&*counters)?)?;
        std::fs::rename(&tmp, &self.path)?;

        Ok(minted)
    }

    /// Latest minted generation for a conversation (0 if none yet).
    pub fn latest(&self, conversation_id: &str) -> u64 {
        self.counters
            .lock()
            .map(|counters| counters.get(conversation_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_is_monotonic() {
        let dir = tempfile::TempDir::new().unwrap();
        let ledger = GenerationLedger::load(dir.path().join("generations.json")).unwrap();

        assert_eq!(ledger.latest("123@c.us"), 0);
        assert_eq!(ledger.mint("123@c.us").unwrap(), 1);
        assert_eq!(ledger.mint("123@c.us").unwrap(), 2);
        assert_eq!(ledger.mint("456@c.us").unwrap(), 1);
        assert_eq!(ledger.latest("123@c.us"), 2);
    }

    #[test]
    fn test_counters_survive_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("generations.json");

        {
            let ledger = GenerationLedger::load(path.clone()).unwrap();
            ledger.mint("123@c.us").unwrap();
            ledger.mint("123@c.us").unwrap();
        }

        let reloaded = GenerationLedger::load(path).unwrap();
        assert_eq!(reloaded.latest("123@c.us"), 2);
        assert_eq!(reloaded.mint("123@c.us").unwrap(), 3);
    }
}
