//! LMDB audit journal

use std::sync::Arc;

use tempfile::TempDir;
use teamgrant::{
    AuditEvent, AuditLevel, EventSink, Fanout, Journal, MemoryApi, MemorySink, ReconciliationRequest, Reconciler,
    ResourceKind,
};

#[test]
fn test_append_and_list_in_order() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::open(dir.path()).unwrap();
    assert!(journal.is_empty().unwrap());

    let a = journal.append(&AuditEvent::info("one", ResourceKind::Folder, "acme")).unwrap();
    let b = journal.append(&AuditEvent::warn("two", ResourceKind::Team, "g-ro")).unwrap();
    let c = journal.append(&AuditEvent::error("three", ResourceKind::Datasource, "prom").with_error("creation_failed")).unwrap();
    assert_eq!((a, b, c), (1, 2, 3));
    assert_eq!(journal.len().unwrap(), 3);

    let all = journal.list(1, 10).unwrap();
    let messages: Vec<&str> = all.iter().map(|(_, e)| e.message.as_str()).collect();
    assert_eq!(messages, vec!["one", "two", "three"]);
    assert_eq!(all[1].1.level, AuditLevel::Warn);
    assert_eq!(all[2].1.error.as_deref(), Some("creation_failed"));

    let tail = journal.list(2, 1).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].0, 2);
}

#[test]
fn test_sequence_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let journal = Journal::open(dir.path()).unwrap();
        journal.append(&AuditEvent::info("before", ResourceKind::Folder, "acme")).unwrap();
    }
    let journal = Journal::open(dir.path()).unwrap();
    let seq = journal.append(&AuditEvent::info("after", ResourceKind::Folder, "acme")).unwrap();
    assert_eq!(seq, 2);
    assert_eq!(journal.list(0, 100).unwrap()[0].1.message, "before");
}

#[test]
fn test_clear_empties_the_journal() {
    let dir = TempDir::new().unwrap();
    let journal = Journal::open(dir.path()).unwrap();
    journal.emit(AuditEvent::info("x", ResourceKind::Folder, "acme"));
    journal.clear().unwrap();
    assert!(journal.is_empty().unwrap());
}

#[test]
fn test_reconciliation_is_journaled() {
    let dir = TempDir::new().unwrap();
    let journal = Arc::new(Journal::open(dir.path()).unwrap());
    let memory = Arc::new(MemorySink::new());
    let sink = Fanout::new().with(journal.clone()).with(memory.clone());

    let reconciler = Reconciler::new(Arc::new(MemoryApi::new()), Arc::new(sink));
    reconciler.reconcile(&ReconciliationRequest::new("acme", "g-ro", "g-rw", "g-adm")).unwrap();

    let stored: Vec<AuditEvent> = journal.list(1, 100).unwrap().into_iter().map(|(_, e)| e).collect();
    assert_eq!(stored, memory.events());
    assert_eq!(stored.first().map(|e| e.resource.as_str()), Some("folder_name: acme"));
}
