//! Integration tests for scope isolation, batches and change events.

use std::sync::Arc;

use serde_json::json;

use datastore_events::{EventBus, StoreEvent};
use datastore_storage::{EntryStore, OwnerRef, Scope, StorageError, StorageService};
use datastore_test::{
    FailingStore, RecordingNotifier, StaticIdentity, init_test_logging, seed_expired,
    test_service,
};

#[tokio::test]
async fn test_scopes_do_not_see_each_other() {
    init_test_logging();
    let (service, _, _) = test_service();
    let alice = service.for_user(&OwnerRef::user(1));
    let bob = service.for_user(&OwnerRef::user(2));
    let team = service.for_team(&OwnerRef::team(1));

    service.set("theme", "light", None).await.unwrap();
    alice.set("theme", "dark", None).await.unwrap();
    alice.in_namespace("prefs").set("theme", "blue", None).await.unwrap();
    team.set("theme", "red", None).await.unwrap();

    assert_eq!(service.get("theme").await.unwrap(), Some(json!("light")));
    assert_eq!(alice.get("theme").await.unwrap(), Some(json!("dark")));
    assert_eq!(
        alice.in_namespace("prefs").get("theme").await.unwrap(),
        Some(json!("blue"))
    );
    assert_eq!(team.get("theme").await.unwrap(), Some(json!("red")));
    assert_eq!(bob.get("theme").await.unwrap(), None);

    // Clearing one scope leaves the others alone.
    assert_eq!(alice.clear().await.unwrap(), 1);
    assert_eq!(
        alice.in_namespace("prefs").get("theme").await.unwrap(),
        Some(json!("blue"))
    );
    assert_eq!(service.keys().await.unwrap(), vec!["theme"]);
}

#[tokio::test]
async fn test_segmented_and_dotted_keys_are_the_same_entry() {
    let (service, _, store) = test_service();
    service.set(["a", "", "b"], 1, None).await.unwrap();
    service.set(vec!["a", "b"], 2, None).await.unwrap();

    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(service.get("a.b").await.unwrap(), Some(json!(2)));
    assert_eq!(service.get(["a", "b"]).await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn test_string_keys_are_not_resegmented() {
    let (service, _, store) = test_service();
    service.set(["a", "", "b"], 1, None).await.unwrap();
    service.set("a..b.", 2, None).await.unwrap();

    assert_eq!(store.len().unwrap(), 2);
    assert_eq!(service.get("a.b").await.unwrap(), Some(json!(1)));
    assert_eq!(service.get("a..b.").await.unwrap(), Some(json!(2)));
}

#[tokio::test]
async fn test_set_then_update_then_delete_events() {
    let (service, events, _) = test_service();
    let scoped = service.for_user_id(5).in_namespace("cart");

    scoped.set("items", 1, None).await.unwrap();
    scoped.set("items", 2, None).await.unwrap();
    assert!(scoped.delete("items").await.unwrap());
    assert!(!scoped.delete("items").await.unwrap());

    assert_eq!(events.event_types(), vec!["set", "updated", "deleted"]);
    match &events.events()[1] {
        StoreEvent::Updated {
            owner_type,
            owner_id,
            namespace,
            old_value,
            new_value,
            ..
        } => {
            assert_eq!(owner_type.as_deref(), Some("user"));
            assert_eq!(*owner_id, Some(5));
            assert_eq!(namespace.as_deref(), Some("cart"));
            assert_eq!(old_value, &json!(1));
            assert_eq!(new_value, &json!(2));
        },
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_overwriting_expired_row_reports_update() {
    let (service, events, store) = test_service();
    seed_expired(&store, service.scope(), "session", json!("old"), 10).unwrap();

    assert_eq!(service.get("session").await.unwrap(), None);
    service.set("session", "new", None).await.unwrap();

    assert_eq!(events.event_types(), vec!["updated"]);
    assert_eq!(service.get("session").await.unwrap(), Some(json!("new")));
}

#[tokio::test]
async fn test_set_many_is_all_or_nothing() {
    let store = Arc::new(FailingStore::new());
    let events = RecordingNotifier::new();
    let service = StorageService::new(Arc::clone(&store) as Arc<dyn EntryStore>)
        .with_notifier(Arc::new(events.clone()));

    store.fail_writes(true);
    let err = service
        .set_many([("a", json!(1)), ("b", json!(2))], None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Internal(_)));
    assert!(store.inner().is_empty().unwrap());
    assert!(events.is_empty());

    store.fail_writes(false);
    service
        .set_many([("a", json!(1)), ("b", json!(2))], None)
        .await
        .unwrap();
    assert_eq!(events.event_types(), vec!["set", "set"]);
}

#[tokio::test]
async fn test_set_many_rejects_empty_key_before_writing() {
    let (service, events, store) = test_service();
    let err = service
        .set_many([("a", json!(1)), ("", json!(2))], None)
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::InvalidKey(_)));
    assert!(store.is_empty().unwrap());
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_batch_events_share_correlation_id() {
    let (service, events, _) = test_service();
    service.set("a", 0, None).await.unwrap();
    events.clear();

    service
        .set_many([("a", json!(1)), ("b", json!(2)), ("b", json!(3))], None)
        .await
        .unwrap();
    assert_eq!(events.event_types(), vec!["updated", "set", "updated"]);

    let ids: Vec<_> = events
        .events()
        .iter()
        .map(|e| e.metadata().correlation_id)
        .collect();
    assert!(ids[0].is_some());
    assert!(ids.iter().all(|id| *id == ids[0]));

    events.clear();
    assert_eq!(service.delete_many(["a", "b", "missing"]).await.unwrap(), 2);
    assert_eq!(events.event_types(), vec!["deleted", "deleted"]);
}

#[tokio::test]
async fn test_current_user_scope() {
    let (service, _, _) = test_service();
    let err = service
        .clone()
        .with_identity(Arc::new(StaticIdentity::anonymous()))
        .for_current_user()
        .unwrap_err();
    assert!(matches!(err, StorageError::MissingIdentity));

    let me = service
        .with_identity(Arc::new(StaticIdentity::user(9)))
        .for_current_user()
        .unwrap();
    assert_eq!(me.owner(), Some(&OwnerRef::user(9)));
    assert_eq!(me.namespace(), None);
}

#[tokio::test]
async fn test_event_bus_receives_changes() {
    let (service, _, _) = test_service();
    let bus = EventBus::new();
    let mut receiver = bus.subscribe();
    let service = service.with_notifier(Arc::new(bus.clone()));

    service.set("k", "v", None).await.unwrap();
    service.clear().await.unwrap();

    let first = receiver.recv().await.unwrap();
    assert_eq!(first.event_type(), "set");
    assert_eq!(first.key(), Some("k"));
    let second = receiver.recv().await.unwrap();
    assert!(matches!(*second, StoreEvent::Cleared { count: 1, .. }));
}

#[tokio::test]
async fn test_query_builder_crosses_namespaces() {
    let (service, _, store) = test_service();
    let user = service.for_user_id(3);
    user.set("a", 1, None).await.unwrap();
    user.in_namespace("x").set("b", 2, None).await.unwrap();
    user.in_namespace("y").set("c", 3, None).await.unwrap();
    seed_expired(
        &store,
        &Scope::new(Some(OwnerRef::user(3)), Some("y".into())),
        "d",
        json!(4),
        5,
    )
    .unwrap();

    let query = service.query().for_owner(&OwnerRef::user(3));
    assert_eq!(query.count().await.unwrap(), 4);
    assert_eq!(query.clone().not_expired().count().await.unwrap(), 3);
    assert_eq!(query.clone().expired().delete().await.unwrap(), 1);
    assert_eq!(
        query.in_namespace("y").pluck().await.unwrap().get("c"),
        Some(&json!(3))
    );
}
