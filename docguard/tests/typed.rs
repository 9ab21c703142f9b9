use bson::doc;
use docguard::{
    memory::{InMemoryCollection, InMemoryConnector},
    prelude::*,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    uuid: String,
    name: String,
    #[serde(default)]
    visits: i32,
}

impl Record for User {
    fn collection_name() -> &'static str {
        "users"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct UserName {
    name: String,
}

impl Record for UserName {
    fn collection_name() -> &'static str {
        "users"
    }
}

fn user(name: &str) -> User {
    User {
        uuid: new_uuid(),
        name: name.to_string(),
        visits: 0,
    }
}

async fn users() -> TypedCollectionAccessor<InMemoryCollection, User> {
    let mut manager = ConnectionManager::new(InMemoryConnector::new());
    manager.connect("memory://local", "app").await.unwrap();
    manager.typed_collection::<User>().await.unwrap()
}

#[tokio::test]
async fn records_round_trip_through_the_collection() {
    let users = users().await;
    let alice = user("alice");

    users.insert_one(&alice).await.unwrap();

    assert_eq!(users.untyped().name(), "users");
    assert_eq!(users.find_one(alice.uuid.as_str()).await.unwrap(), Some(alice.clone()));
    assert_eq!(users.find(doc! {}, FindOptions::new()).await.unwrap(), vec![alice]);
}

#[tokio::test]
async fn typed_inserts_are_checked() {
    let users = users().await;
    let alice = user("alice");
    users.insert_one(&alice).await.unwrap();

    let twin = User { name: "other".to_string(), ..alice.clone() };
    let err = users.insert_one(&twin).await.unwrap_err();

    assert!(matches!(err, StoreError::DuplicateEntry(_)));
    assert_eq!(users.find(doc! {}, FindOptions::new()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn typed_updates_and_deletes_return_records() {
    let users = users().await;
    let bob = user("bob");
    users.insert_one(&bob).await.unwrap();

    let updated = users
        .update_one_with(bob.uuid.as_str(), doc! { "visits": 2 }, UpdateStrategy::Inc)
        .await
        .unwrap();
    assert_eq!(updated, User { visits: 2, ..bob.clone() });

    let renamed = users
        .update_one(bob.uuid.as_str(), doc! { "name": "robert" })
        .await
        .unwrap();
    assert_eq!(renamed, User { name: "robert".to_string(), visits: 2, ..bob.clone() });

    let removed = users.delete_one(doc! { "uuid": bob.uuid.as_str() }).await.unwrap();
    assert_eq!(removed.visits, 2);

    assert!(matches!(
        users.delete_one(bob.uuid.as_str()).await,
        Err(StoreError::NonExistentEntry(_))
    ));
    assert!(matches!(
        users.update_one("missing", doc! { "visits": 1 }).await,
        Err(StoreError::NonExistentEntry(_))
    ));
}

#[tokio::test]
async fn accessors_can_switch_record_types() {
    let users = users().await;
    users.insert_one(&user("carol")).await.unwrap();

    let names = users
        .with_type::<UserName>()
        .find(doc! {}, FindOptions::new())
        .await
        .unwrap();

    assert_eq!(names, vec![UserName { name: "carol".to_string() }]);
}

#[tokio::test]
async fn mismatched_documents_fail_to_deserialize() {
    let users = users().await;
    users
        .untyped()
        .insert_one(doc! { "uuid": "raw", "name": 5 })
        .await
        .unwrap();

    let err = users.find_one("raw").await.unwrap_err();

    assert!(matches!(err, StoreError::Serialization(_)));
    assert_eq!(err.kind(), ErrorKind::Upstream);
}
