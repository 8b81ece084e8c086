// Tests for ReadLedger: read marks, derived unread counts and notification read state

use futures::future::join_all;
use hangout_store::entities::ReadMarks;
use hangout_store::{
    ChangeRow, ConversationManager, MessageStore, NewMessage, NotificationCenter,
    NotificationKind, ReadLedger, Store, StoreConfig, StoreError,
};
use sea_orm::{EntityTrait, PaginatorTrait};
use tempfile::NamedTempFile;

async fn open_store() -> (Store, NamedTempFile) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let temp_file = NamedTempFile::new().unwrap();
    let store = Store::open(StoreConfig {
        db_path: temp_file.path().to_path_buf(),
        ..Default::default()
    })
    .await
    .expect("Failed to open store");
    (store, temp_file)
}

async fn send(messages: &MessageStore, conversation_id: &str, sender: &str, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let message = messages
            .append(NewMessage::text(conversation_id, sender, &format!("ping {}", i)))
            .await
            .expect("Failed to append message");
        ids.push(message.id);
    }
    ids
}

#[tokio::test]
async fn test_unread_counts_follow_read_marks() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store.clone());
    let ledger = ReadLedger::new(store);

    let conversation_id = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let sent = send(&messages, &conversation_id, "alice", 3).await;

    assert_eq!(ledger.unread_message_count("bob").await.unwrap(), 3);
    // Own messages never count as unread
    assert_eq!(ledger.unread_message_count("alice").await.unwrap(), 0);

    let marked = ledger
        .mark_read("bob", &sent[..2])
        .await
        .expect("Failed to mark read");
    assert_eq!(marked, 2);
    assert_eq!(ledger.unread_message_count("bob").await.unwrap(), 1);

    // Marking again is a no-op, not an error
    assert_eq!(ledger.mark_read("bob", &sent[..2]).await.unwrap(), 0);
    assert_eq!(ledger.unread_message_count("bob").await.unwrap(), 1);

    let per_conversation = ledger.unread_by_conversation("bob").await.unwrap();
    assert_eq!(per_conversation.get(&conversation_id), Some(&1));
}

#[tokio::test]
async fn test_mark_read_skips_own_and_foreign_messages() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store.clone());
    let ledger = ReadLedger::new(store.clone());

    let ours = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let theirs = manager.get_or_create_direct("carol", "dave").await.unwrap();

    let own = send(&messages, &ours, "bob", 1).await;
    let foreign = send(&messages, &theirs, "carol", 1).await;

    let ids = vec![own[0].clone(), foreign[0].clone(), "no-such-message".to_string()];
    assert_eq!(ledger.mark_read("bob", &ids).await.unwrap(), 0);
    assert_eq!(ledger.mark_read("bob", &[]).await.unwrap(), 0);

    let marks = ReadMarks::find().count(store.connection()).await.unwrap();
    assert_eq!(marks, 0);
}

#[tokio::test]
async fn test_concurrent_mark_read_keeps_one_mark_per_message() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store.clone());
    let ledger = ReadLedger::new(store.clone());

    let conversation_id = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let sent = send(&messages, &conversation_id, "alice", 4).await;

    // Two devices of the same user catching up at once
    let devices = (0..2).map(|_| {
        let ledger = ledger.clone();
        let sent = sent.clone();
        async move { ledger.mark_read("bob", &sent).await }
    });

    let inserted: u64 = join_all(devices)
        .await
        .into_iter()
        .map(|r| r.expect("Failed to mark read"))
        .sum();

    assert_eq!(inserted, 4);
    let marks = ReadMarks::find().count(store.connection()).await.unwrap();
    assert_eq!(marks, 4);
    assert_eq!(ledger.unread_message_count("bob").await.unwrap(), 0);
}

#[tokio::test]
async fn test_mark_conversation_read_and_counters() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store.clone());
    let ledger = ReadLedger::new(store);

    let with_alice = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let with_carol = manager.get_or_create_direct("carol", "bob").await.unwrap();
    send(&messages, &with_alice, "alice", 2).await;
    send(&messages, &with_carol, "carol", 3).await;

    let counters = ledger.counts("bob").await.unwrap();
    assert_eq!(counters.unread_messages, 5);
    assert_eq!(counters.unread_conversations, 2);
    assert_eq!(counters.notifications, 0);

    assert_eq!(
        ledger.mark_conversation_read("bob", &with_carol).await.unwrap(),
        3
    );

    let counters = ledger.counts("bob").await.unwrap();
    assert_eq!(counters.unread_messages, 2);
    assert_eq!(counters.unread_conversations, 1);

    let outsider = ledger.mark_conversation_read("dave", &with_carol).await;
    assert!(matches!(outsider, Err(StoreError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_mark_read_publishes_read_marks() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store.clone());
    let ledger = ReadLedger::new(store.clone());

    let conversation_id = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let sent = send(&messages, &conversation_id, "alice", 1).await;

    let mut changes = store.feed().subscribe();
    ledger.mark_read("bob", &sent).await.unwrap();

    let event = changes.recv().await.expect("Failed to receive change");
    match event.row {
        ChangeRow::ReadMarks {
            user_id,
            message_ids,
        } => {
            assert_eq!(user_id, "bob");
            assert_eq!(message_ids, sent);
        }
        other => panic!("unexpected change {:?}", other),
    }
}

#[tokio::test]
async fn test_notification_read_state() {
    let (store, _db) = open_store().await;
    let center = NotificationCenter::new(store.clone());
    let ledger = ReadLedger::new(store);

    let like = center
        .notify_like("bob", "alice", "post-1")
        .await
        .unwrap()
        .expect("missing notification");
    center
        .notify_comment("bob", "alice", "post-1", "nice shot")
        .await
        .unwrap();
    center.notify_follow("bob", "carol").await.unwrap();

    let counts = ledger.notification_counts("bob").await.unwrap();
    assert_eq!(counts.total, 3);
    assert_eq!(counts.by_kind.len(), NotificationKind::ALL.len());
    assert_eq!(counts.by_kind[&NotificationKind::Like], 1);
    assert_eq!(counts.by_kind[&NotificationKind::Message], 0);

    assert!(ledger.mark_notification_read("bob", &like.id).await.unwrap());
    assert!(!ledger.mark_notification_read("bob", &like.id).await.unwrap());

    let stranger = ledger.mark_notification_read("alice", &like.id).await;
    assert!(matches!(stranger, Err(StoreError::NotFound(_))));

    assert_eq!(ledger.mark_all_notifications_read("bob").await.unwrap(), 2);
    assert_eq!(ledger.mark_all_notifications_read("bob").await.unwrap(), 0);

    let counts = ledger.notification_counts("bob").await.unwrap();
    assert_eq!(counts.total, 0);
    assert!(counts.by_kind.values().all(|n| *n == 0));
}

#[tokio::test]
async fn test_mark_all_read_leaves_concurrent_inserts_unread() {
    let (store, _db) = open_store().await;
    let center = NotificationCenter::new(store.clone());
    let ledger = ReadLedger::new(store);

    for i in 0..3 {
        center
            .notify_like("bob", "alice", &format!("early-{}", i))
            .await
            .unwrap();
    }

    let inserts = (0..5).map(|i| {
        let center = center.clone();
        async move {
            center
                .notify_like("bob", "carol", &format!("racing-{}", i))
                .await
                .unwrap()
                .expect("missing notification")
        }
    });
    let (marked, _) = futures::join!(
        ledger.mark_all_notifications_read("bob"),
        join_all(inserts)
    );
    let marked = marked.expect("Failed to mark all read");
    assert!(marked >= 3);

    // Exactly the rows the single update reported are read
    let snapshot = center.list("bob", 50, None).await.unwrap();
    assert_eq!(snapshot.len(), 8);
    let read: Vec<String> = snapshot
        .iter()
        .filter(|n| n.is_read)
        .map(|n| n.id.clone())
        .collect();
    assert_eq!(read.len() as u64, marked);
    assert!(snapshot
        .iter()
        .filter(|n| n.payload.actor_id() == "alice")
        .all(|n| n.is_read));

    let late = center
        .notify_comment("bob", "alice", "late", "after the fact")
        .await
        .unwrap()
        .expect("missing notification");

    let counts = ledger.notification_counts("bob").await.unwrap();
    assert_eq!(counts.total, 9 - marked);

    let after = center.list("bob", 50, None).await.unwrap();
    assert!(after.iter().any(|n| n.id == late.id && !n.is_read));
    assert!(after
        .iter()
        .filter(|n| read.contains(&n.id))
        .all(|n| n.is_read));
}
