// Tests for ConversationManager: direct/group creation, rosters and list projection

use std::time::Duration;

use futures::future::join_all;
use hangout_store::{
    ChangeOp, ChangeRow, ConversationKind, ConversationManager, MessageStore, NewMessage,
    ParticipantRole, ProfileDirectory, Store, StoreConfig, StoreError,
};
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

fn ids(users: &[&str]) -> Vec<String> {
    users.iter().map(|u| u.to_string()).collect()
}

#[tokio::test]
async fn test_direct_conversation_is_shared_by_the_pair() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);

    let first = manager
        .get_or_create_direct("alice", "bob")
        .await
        .expect("Failed to create direct conversation");
    let second = manager
        .get_or_create_direct("bob", "alice")
        .await
        .expect("Failed to get direct conversation");

    assert_eq!(first, second);

    let conversation = manager.get(&first).await.expect("Failed to get conversation");
    assert_eq!(conversation.kind, ConversationKind::Direct);
    assert_eq!(manager.participants(&first).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_direct_conversation_with_self_is_rejected() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);

    let result = manager.get_or_create_direct("alice", "alice").await;
    assert!(matches!(result, Err(StoreError::InvalidParticipant(_))));
}

#[tokio::test]
async fn test_concurrent_direct_creation_yields_one_conversation() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);

    let attempts = (0..8).map(|i| {
        let manager = manager.clone();
        async move {
            if i % 2 == 0 {
                manager.get_or_create_direct("alice", "bob").await
            } else {
                manager.get_or_create_direct("bob", "alice").await
            }
        }
    });

    let results: Vec<String> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.expect("Failed to create direct conversation"))
        .collect();

    assert!(results.iter().all(|id| id == &results[0]));
    assert_eq!(manager.conversation_ids_for("alice").await.unwrap().len(), 1);
    assert_eq!(manager.conversation_ids_for("bob").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_group_makes_creator_admin() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);

    let group = manager
        .create_group("alice", "  Weekend  ", &ids(&["bob", "carol", "bob"]))
        .await
        .expect("Failed to create group");

    let roster = manager.participants(&group).await.unwrap();
    assert_eq!(roster.len(), 3);

    let alice = manager.participant(&group, "alice").await.unwrap().unwrap();
    assert_eq!(alice.role, ParticipantRole::Admin);
    let bob = manager.participant(&group, "bob").await.unwrap().unwrap();
    assert_eq!(bob.role, ParticipantRole::Member);

    let summaries = manager.list_for_user("carol").await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].display_name, "Weekend");
    assert_eq!(summaries[0].participant_count, 3);
}

#[tokio::test]
async fn test_create_group_validation() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);

    let blank = manager.create_group("alice", "   ", &ids(&["bob"])).await;
    assert!(matches!(blank, Err(StoreError::Validation(_))));

    let alone = manager.create_group("alice", "Solo", &ids(&["alice"])).await;
    assert!(matches!(alone, Err(StoreError::Validation(_))));

    assert!(manager.conversation_ids_for("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_group_creation_publishes_roster_before_conversation() {
    let (store, _db) = open_store().await;
    let mut changes = store.feed().subscribe();
    let manager = ConversationManager::new(store);

    manager
        .create_group("alice", "Crew", &ids(&["bob"]))
        .await
        .expect("Failed to create group");

    let mut rows = Vec::new();
    for _ in 0..3 {
        let event = changes.recv().await.expect("Failed to receive change");
        assert_eq!(event.op, ChangeOp::Insert);
        rows.push(event.row);
    }

    assert!(matches!(rows[0], ChangeRow::Participant(_)));
    assert!(matches!(rows[1], ChangeRow::Participant(_)));
    assert!(matches!(rows[2], ChangeRow::Conversation(_)));
}

#[tokio::test]
async fn test_only_admins_add_participants() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);
    let group = manager
        .create_group("alice", "Crew", &ids(&["bob"]))
        .await
        .unwrap();

    let denied = manager.add_participant("bob", &group, "carol").await;
    assert!(matches!(denied, Err(StoreError::PermissionDenied(_))));

    assert!(manager.add_participant("alice", &group, "carol").await.unwrap());
    assert!(!manager.add_participant("alice", &group, "carol").await.unwrap());
    assert!(manager.is_participant(&group, "carol").await.unwrap());

    let outsider = manager.add_participant("dave", &group, "erin").await;
    assert!(matches!(outsider, Err(StoreError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_direct_roster_cannot_change() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);
    let direct = manager.get_or_create_direct("alice", "bob").await.unwrap();

    let added = manager.add_participant("alice", &direct, "carol").await;
    assert!(matches!(added, Err(StoreError::InvalidOperation(_))));

    let removed = manager.remove_participant("alice", &direct, "bob").await;
    assert!(matches!(removed, Err(StoreError::InvalidOperation(_))));
}

#[tokio::test]
async fn test_last_admin_leaving_promotes_earliest_member() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);
    let group = manager
        .create_group("alice", "Crew", &ids(&["bob", "carol"]))
        .await
        .unwrap();

    manager
        .remove_participant("alice", &group, "alice")
        .await
        .expect("Failed to leave group");

    assert!(!manager.is_participant(&group, "alice").await.unwrap());
    let bob = manager.participant(&group, "bob").await.unwrap().unwrap();
    assert_eq!(bob.role, ParticipantRole::Admin);
}

#[tokio::test]
async fn test_group_keeps_two_participants() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);
    let group = manager
        .create_group("alice", "Pair", &ids(&["bob"]))
        .await
        .unwrap();

    let result = manager.remove_participant("bob", &group, "bob").await;
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));
    assert_eq!(manager.participants(&group).await.unwrap().len(), 2);

    let kicked = manager.remove_participant("bob", &group, "alice").await;
    assert!(matches!(kicked, Err(StoreError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_last_admin_cannot_be_demoted() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);
    let group = manager
        .create_group("alice", "Crew", &ids(&["bob"]))
        .await
        .unwrap();

    let result = manager
        .set_role("alice", &group, "alice", ParticipantRole::Member)
        .await;
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));

    manager
        .set_role("alice", &group, "bob", ParticipantRole::Admin)
        .await
        .expect("Failed to promote bob");
    manager
        .set_role("bob", &group, "alice", ParticipantRole::Member)
        .await
        .expect("Failed to demote alice");

    let alice = manager.participant(&group, "alice").await.unwrap().unwrap();
    assert_eq!(alice.role, ParticipantRole::Member);
}

#[tokio::test]
async fn test_rename_group() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);
    let group = manager
        .create_group("alice", "Crew", &ids(&["bob"]))
        .await
        .unwrap();

    let denied = manager.rename_group("bob", &group, "Gang").await;
    assert!(matches!(denied, Err(StoreError::PermissionDenied(_))));

    manager
        .rename_group("alice", &group, "Gang")
        .await
        .expect("Failed to rename group");

    let conversation = manager.get(&group).await.unwrap();
    assert_eq!(
        conversation.kind,
        ConversationKind::Group {
            name: "Gang".to_string()
        }
    );
    assert!(conversation.updated_at > conversation.created_at);
}

#[tokio::test]
async fn test_list_orders_by_activity_with_previews_and_unread() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store.clone());
    let profiles = ProfileDirectory::new(store);

    profiles
        .upsert("bob", "Bob", None)
        .await
        .expect("Failed to upsert profile");

    let with_bob = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let with_carol = manager.get_or_create_direct("alice", "carol").await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    messages
        .append(NewMessage::text(&with_bob, "bob", "are you around?"))
        .await
        .expect("Failed to append message");

    let summaries = manager.list_for_user("alice").await.unwrap();
    assert_eq!(summaries.len(), 2);

    assert_eq!(summaries[0].id, with_bob);
    assert_eq!(summaries[0].display_name, "Bob");
    assert_eq!(summaries[0].unread_count, 1);
    let preview = summaries[0].last_message.as_ref().expect("missing preview");
    assert_eq!(preview.text, "are you around?");
    assert_eq!(preview.sender_id, "bob");

    assert_eq!(summaries[1].id, with_carol);
    // No profile: the raw id is shown
    assert_eq!(summaries[1].display_name, "carol");
    assert_eq!(summaries[1].unread_count, 0);
    assert!(summaries[1].last_message.is_none());

    // The sender has nothing unread
    let bob_view = manager.list_for_user("bob").await.unwrap();
    assert_eq!(bob_view[0].unread_count, 0);
}

#[tokio::test]
async fn test_list_previews_newest_message_of_each_conversation() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store.clone());
    let messages = MessageStore::new(store);

    let with_bob = manager.get_or_create_direct("alice", "bob").await.unwrap();
    let with_carol = manager.get_or_create_direct("alice", "carol").await.unwrap();
    let elsewhere = manager.get_or_create_direct("bob", "carol").await.unwrap();

    for (conversation_id, sender, texts) in [
        (&with_bob, "bob", ["b1", "b2", "b3"]),
        (&with_carol, "carol", ["c1", "c2", "c3"]),
        (&elsewhere, "bob", ["x1", "x2", "x3"]),
    ] {
        for text in texts {
            messages
                .append(NewMessage::text(conversation_id, sender, text))
                .await
                .expect("Failed to append message");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    let summaries = manager.list_for_user("alice").await.unwrap();
    assert_eq!(summaries.len(), 2);
    for summary in &summaries {
        let preview = summary.last_message.as_ref().expect("missing preview");
        let expected = if summary.id == with_bob { "b3" } else { "c3" };
        assert_eq!(preview.text, expected);
        assert_eq!(summary.unread_count, 3);
    }
}

#[tokio::test]
async fn test_roster_changes_race_a_demotion_consistently() {
    let (store, _db) = open_store().await;
    let manager = ConversationManager::new(store);

    let group = manager
        .create_group("alice", "Crew", &ids(&["bob", "carol"]))
        .await
        .unwrap();
    manager
        .set_role("alice", &group, "bob", ParticipantRole::Admin)
        .await
        .unwrap();

    let newcomers = ["dave", "erin", "frank", "grace"];
    let adds = newcomers.iter().map(|user| {
        let manager = manager.clone();
        let group = group.clone();
        async move { (*user, manager.add_participant("bob", &group, user).await) }
    });
    let demotion = manager.set_role("alice", &group, "bob", ParticipantRole::Member);

    let (demoted, added) = futures::join!(demotion, join_all(adds));
    demoted.expect("Failed to demote bob");

    let roster = manager.participants(&group).await.unwrap();
    for (user, result) in added {
        let present = roster.iter().any(|p| p.user_id == user);
        match result {
            Ok(inserted) => assert!(inserted && present, "{} was added but is missing", user),
            Err(StoreError::PermissionDenied(_)) => {
                assert!(!present, "{} joined after bob lost admin", user)
            }
            Err(e) => panic!("unexpected error adding {}: {}", user, e),
        }
    }

    // Once the demotion is in, bob can no longer add anyone
    let late = manager.add_participant("bob", &group, "heidi").await;
    assert!(matches!(late, Err(StoreError::PermissionDenied(_))));
    let bob = roster.iter().find(|p| p.user_id == "bob").unwrap();
    assert_eq!(bob.role, ParticipantRole::Member);
}
