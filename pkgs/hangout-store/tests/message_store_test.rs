// Tests for MessageStore: append, keyset pagination, edit and delete

use std::collections::HashSet;

use hangout_store::entities::ReadMarks;
use hangout_store::{
    ConversationManager, Message, MessageKind, MessageStore, NewMessage, ReadLedger, Store,
    StoreConfig, StoreError,
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
        max_page_size: 5,
        ..Default::default()
    })
    .await
    .expect("Failed to open store");
    (store, temp_file)
}

async fn fill(messages: &MessageStore, conversation_id: &str, count: usize) -> Vec<Message> {
    let mut sent = Vec::with_capacity(count);
    for i in 0..count {
        let sender = if i % 2 == 0 { "alice" } else { "bob" };
        let message = messages
            .append(NewMessage::text(conversation_id, sender, &format!("message {}", i)))
            .await
            .expect("Failed to append message");
        sent.push(message);
    }
    sent
}

fn is_ordered(page: &[Message]) -> bool {
    page.windows(2)
        .all(|w| (w[0].created_at, w[0].id.as_str()) < (w[1].created_at, w[1].id.as_str()))
}

#[tokio::test]
async fn test_append_assigns_id_and_bumps_activity() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store);

    let conversation_id = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let before = manager.get(&conversation_id).await.unwrap();

    let message = messages
        .append(NewMessage::text(&conversation_id, "alice", "hi bob"))
        .await
        .expect("Failed to append message");

    assert!(!message.id.is_empty());
    assert!(!message.edited);
    assert_eq!(message.kind, MessageKind::Text);
    assert_eq!(messages.get(&message.id).await.unwrap(), message);

    let after = manager.get(&conversation_id).await.unwrap();
    assert!(after.last_activity_at >= message.created_at);
    assert!(after.last_activity_at >= before.last_activity_at);

    let latest = messages.latest(&conversation_id).await.unwrap();
    assert_eq!(latest.map(|m| m.id), Some(message.id));
}

#[tokio::test]
async fn test_append_requires_participant() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store);

    let conversation_id = manager.get_or_create_direct("alice", "bob").await.unwrap();

    let result = messages
        .append(NewMessage::text(&conversation_id, "mallory", "let me in"))
        .await;
    assert!(matches!(result, Err(StoreError::PermissionDenied(_))));

    // Rejected appends leave nothing behind
    assert!(messages.latest(&conversation_id).await.unwrap().is_none());

    let missing = messages
        .append(NewMessage::text("no-such-conversation", "alice", "hello"))
        .await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_append_validation() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store);

    let conversation_id = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let other_id = manager.get_or_create_direct("alice", "carol").await.unwrap();

    let blank = messages
        .append(NewMessage::text(&conversation_id, "alice", "  "))
        .await;
    assert!(matches!(blank, Err(StoreError::Validation(_))));

    let image = messages
        .append(NewMessage::attachment(
            &conversation_id,
            "alice",
            MessageKind::Image,
            "blobs/cat.png",
            "",
        ))
        .await
        .expect("Failed to append image");
    assert_eq!(image.attachment_ref.as_deref(), Some("blobs/cat.png"));

    let elsewhere = messages
        .append(NewMessage::text(&other_id, "alice", "hi carol"))
        .await
        .unwrap();

    let cross_reply = messages
        .append(NewMessage::text(&conversation_id, "bob", "what?").replying_to(&elsewhere.id))
        .await;
    assert!(matches!(cross_reply, Err(StoreError::Validation(_))));

    let reply = messages
        .append(NewMessage::text(&conversation_id, "bob", "cute").replying_to(&image.id))
        .await
        .expect("Failed to append reply");
    assert_eq!(reply.reply_to.as_deref(), Some(image.id.as_str()));
}

#[tokio::test]
async fn test_pages_walk_history_without_gaps() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store);

    let conversation_id = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let sent = fill(&messages, &conversation_id, 7).await;

    let first = messages
        .page(&conversation_id, "bob", 3, None)
        .await
        .expect("Failed to fetch page");
    assert_eq!(first.messages.len(), 3);
    assert!(first.has_more);
    assert!(is_ordered(&first.messages));

    let second = messages
        .page(&conversation_id, "bob", 3, first.next_cursor())
        .await
        .expect("Failed to fetch page");
    assert_eq!(second.messages.len(), 3);
    assert!(second.has_more);

    let third = messages
        .page(&conversation_id, "bob", 3, second.next_cursor())
        .await
        .expect("Failed to fetch page");
    assert_eq!(third.messages.len(), 1);
    assert!(!third.has_more);
    assert!(third.next_cursor().is_none());

    let walked: Vec<Message> = third
        .messages
        .into_iter()
        .chain(second.messages)
        .chain(first.messages)
        .collect();
    assert!(is_ordered(&walked));

    let walked_ids: HashSet<String> = walked.into_iter().map(|m| m.id).collect();
    let sent_ids: HashSet<String> = sent.into_iter().map(|m| m.id).collect();
    assert_eq!(walked_ids, sent_ids);
}

#[tokio::test]
async fn test_cursor_is_stable_under_concurrent_appends() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store);

    let conversation_id = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let sent = fill(&messages, &conversation_id, 6).await;

    let newest = messages
        .page(&conversation_id, "alice", 2, None)
        .await
        .unwrap();
    let cursor = newest.next_cursor().expect("expected more history").to_string();

    let older = messages
        .page(&conversation_id, "alice", 5, Some(&cursor))
        .await
        .unwrap();

    // New messages arrive while the client is scrolling back
    fill(&messages, &conversation_id, 3).await;

    let again = messages
        .page(&conversation_id, "alice", 5, Some(&cursor))
        .await
        .unwrap();
    assert_eq!(older, again);

    let mut seen: HashSet<String> = newest.messages.iter().map(|m| m.id.clone()).collect();
    for message in &older.messages {
        assert!(seen.insert(message.id.clone()), "duplicate {}", message.id);
    }
    assert_eq!(seen.len(), sent.len());
}

#[tokio::test]
async fn test_page_arguments() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store);

    let conversation_id = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let other_id = manager.get_or_create_direct("alice", "carol").await.unwrap();
    fill(&messages, &conversation_id, 8).await;
    let foreign = messages
        .append(NewMessage::text(&other_id, "carol", "hey"))
        .await
        .unwrap();

    let zero = messages.page(&conversation_id, "alice", 0, None).await;
    assert!(matches!(zero, Err(StoreError::Validation(_))));

    // Clamped to max_page_size
    let clamped = messages
        .page(&conversation_id, "alice", 100, None)
        .await
        .unwrap();
    assert_eq!(clamped.messages.len(), 5);
    assert!(clamped.has_more);

    let unknown = messages
        .page(&conversation_id, "alice", 3, Some("no-such-message"))
        .await;
    assert!(matches!(unknown, Err(StoreError::NotFound(_))));

    let wrong_conversation = messages
        .page(&conversation_id, "alice", 3, Some(&foreign.id))
        .await;
    assert!(matches!(wrong_conversation, Err(StoreError::NotFound(_))));

    let outsider = messages.page(&conversation_id, "carol", 3, None).await;
    assert!(matches!(outsider, Err(StoreError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_only_sender_edits() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store);

    let conversation_id = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let original = messages
        .append(NewMessage::text(&conversation_id, "alice", "helo"))
        .await
        .unwrap();

    let denied = messages.edit(&original.id, "bob", "hijacked").await;
    assert!(matches!(denied, Err(StoreError::PermissionDenied(_))));

    let blank = messages.edit(&original.id, "alice", " ").await;
    assert!(matches!(blank, Err(StoreError::Validation(_))));

    let edited = messages
        .edit(&original.id, "alice", "hello")
        .await
        .expect("Failed to edit message");
    assert!(edited.edited);
    assert_eq!(edited.content, "hello");
    assert!(edited.updated_at > original.updated_at);

    let twice = messages
        .edit(&original.id, "alice", "hello!")
        .await
        .expect("Failed to edit message");
    assert!(twice.updated_at > edited.updated_at);
    assert_eq!(messages.get(&original.id).await.unwrap(), twice);
}

#[tokio::test]
async fn test_delete_removes_message_and_read_marks() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store.clone());
    let ledger = ReadLedger::new(store.clone());

    let conversation_id = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let message = messages
        .append(NewMessage::text(&conversation_id, "alice", "oops"))
        .await
        .unwrap();
    assert_eq!(ledger.mark_read("bob", &[message.id.clone()]).await.unwrap(), 1);

    let denied = messages.delete(&message.id, "bob").await;
    assert!(matches!(denied, Err(StoreError::PermissionDenied(_))));

    messages
        .delete(&message.id, "alice")
        .await
        .expect("Failed to delete message");

    assert!(matches!(
        messages.get(&message.id).await,
        Err(StoreError::NotFound(_))
    ));
    let marks = ReadMarks::find().count(store.connection()).await.unwrap();
    assert_eq!(marks, 0);

    let again = messages.delete(&message.id, "alice").await;
    assert!(matches!(again, Err(StoreError::NotFound(_))));
}
