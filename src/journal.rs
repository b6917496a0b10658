//! Durable audit journal on LMDB

use std::path::Path;

use heed::types::{Str, U64};
use heed::{Database, Env, EnvOpenOptions};
use tracing::warn;

use crate::audit::{AuditEvent, EventSink};
use crate::error::{err, Result};

/// Events keyed by big-endian sequence number, values are JSON
pub type Db = Database<U64<byteorder::BigEndian>, Str>;

/// Append-only event log. Sequence numbers start at 1 and keep increasing
/// across reopen.
#[derive(Clone)]
pub struct Journal {
    env: Env,
    events: Db,
}

impl Journal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(err)?;
        // SAFETY: LMDB requires no other processes access this path concurrently during open.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1 << 28)
                .max_dbs(1)
                .open(path)
                .map_err(err)?
        };
        let mut tx = env.write_txn().map_err(err)?;
        let events: Db = env.create_database(&mut tx, Some("events")).map_err(err)?;
        tx.commit().map_err(err)?;
        Ok(Self { env, events })
    }

    /// Store an event, returning its sequence number
    pub fn append(&self, event: &AuditEvent) -> Result<u64> {
        let json = serde_json::to_string(event).map_err(err)?;
        let mut tx = self.env.write_txn().map_err(err)?;
        let seq = self.events.last(&tx).map_err(err)?.map(|(k, _)| k + 1).unwrap_or(1);
        self.events.put(&mut tx, &seq, &json).map_err(err)?;
        tx.commit().map_err(err)?;
        Ok(seq)
    }

    /// Up to `limit` events with sequence >= `from`, oldest first
    pub fn list(&self, from: u64, limit: usize) -> Result<Vec<(u64, AuditEvent)>> {
        let tx = self.env.read_txn().map_err(err)?;
        let mut r = Vec::new();
        for item in self.events.range(&tx, &(from..)).map_err(err)?.take(limit) {
            let (seq, json) = item.map_err(err)?;
            r.push((seq, serde_json::from_str(json).map_err(err)?));
        }
        Ok(r)
    }

    pub fn len(&self) -> Result<u64> {
        let tx = self.env.read_txn().map_err(err)?;
        self.events.len(&tx).map_err(err)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every event (for testing)
    pub fn clear(&self) -> Result<()> {
        let mut tx = self.env.write_txn().map_err(err)?;
        self.events.clear(&mut tx).map_err(err)?;
        tx.commit().map_err(err)
    }
}

impl EventSink for Journal {
    fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.append(&event) {
            warn!(error = %e, message = %event.message, "audit journal append failed");
        }
    }
}
