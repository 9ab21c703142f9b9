use bson::{Bson, Document, doc};
use docguard::{
    memory::{InMemoryCollection, InMemoryConnector, InMemoryError},
    prelude::*,
};
use futures::StreamExt;

async fn users() -> CollectionAccessor<InMemoryCollection> {
    let mut manager = ConnectionManager::new(InMemoryConnector::new());
    manager.connect("memory://local", "app").await.unwrap();
    manager.collection("users").await.unwrap()
}

#[tokio::test]
async fn insert_one_returns_the_stored_document() {
    let users = users().await;

    let result = users
        .insert_one(doc! { "uuid": "aaa", "foo": "bar" })
        .await
        .unwrap();

    assert_eq!(result.document.get_str("uuid").unwrap(), "aaa");
    assert_eq!(result.document.get_str("foo").unwrap(), "bar");
    assert_eq!(result.document.get("_id"), Some(&result.inserted_id));
    assert_eq!(users.count_documents(doc! { "uuid": "aaa" }).await.unwrap(), 1);
}

#[tokio::test]
async fn insert_one_rejects_a_known_uuid() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa", "foo": "bar" }).await.unwrap();

    let err = users
        .insert_one(doc! { "uuid": "aaa", "foo": "qux" })
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::DuplicateEntry(ref name) if name == "users"));
    assert_eq!(err.kind(), ErrorKind::DuplicateEntry);
    assert_eq!(users.count_documents(doc! {}).await.unwrap(), 1);
    assert_eq!(
        users
            .find_one(doc! { "uuid": "aaa" }, FindOptions::new())
            .await
            .unwrap()
            .unwrap()
            .get_str("foo")
            .unwrap(),
        "bar"
    );
}

#[tokio::test]
async fn insert_one_needs_a_uuid() {
    let users = users().await;

    let missing = users.insert_one(doc! { "foo": "bar" }).await.unwrap_err();
    let null = users.insert_one(doc! { "uuid": Bson::Null }).await.unwrap_err();

    assert!(matches!(missing, StoreError::InvalidDocument(_)));
    assert!(matches!(null, StoreError::InvalidDocument(_)));
    assert_eq!(users.estimated_document_count().await.unwrap(), 0);
}

#[tokio::test]
async fn update_one_returns_the_updated_document() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa", "foo": "bar" }).await.unwrap();

    let updated = users.update_one("aaa", doc! { "foo": "baz" }).await.unwrap();

    assert_eq!(updated.get_str("uuid").unwrap(), "aaa");
    assert_eq!(updated.get_str("foo").unwrap(), "baz");
}

#[tokio::test]
async fn update_one_with_applies_the_strategy() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa", "visits": 1, "tags": ["a"] }).await.unwrap();

    let updated = users
        .update_one_with(doc! { "uuid": "aaa" }, doc! { "visits": 2 }, UpdateStrategy::Inc)
        .await
        .unwrap();
    assert_eq!(updated.get_i32("visits").unwrap(), 3);

    let updated = users
        .update_one_with("aaa", doc! { "tags": "a" }, UpdateStrategy::Operator("$addToSet".into()))
        .await
        .unwrap();
    assert_eq!(updated.get_array("tags").unwrap().len(), 1);

    let updated = users
        .update_one_with("aaa", doc! { "visits": "" }, UpdateStrategy::Unset)
        .await
        .unwrap();
    assert!(!updated.contains_key("visits"));
}

#[tokio::test]
async fn update_one_rejects_a_filter_that_matches_nothing() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa", "foo": "bar" }).await.unwrap();

    let err = users.update_one("missing", doc! { "foo": "baz" }).await.unwrap_err();

    assert!(matches!(err, StoreError::NonExistentEntry(ref name) if name == "users"));
    assert_eq!(err.kind(), ErrorKind::NonExistentEntry);
    assert_eq!(users.count_documents(doc! { "foo": "bar" }).await.unwrap(), 1);
    assert_eq!(users.count_documents(doc! { "uuid": "missing" }).await.unwrap(), 0);
}

#[tokio::test]
async fn delete_one_returns_the_removed_document() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa", "foo": "bar" }).await.unwrap();
    users.insert_one(doc! { "uuid": "bbb", "foo": "bar" }).await.unwrap();

    let removed = users.delete_one(doc! { "uuid": "aaa" }).await.unwrap();

    assert_eq!(removed.get_str("uuid").unwrap(), "aaa");
    assert_eq!(users.count_documents(doc! {}).await.unwrap(), 1);
}

#[tokio::test]
async fn delete_one_rejects_a_filter_that_matches_nothing() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa" }).await.unwrap();

    let err = users.delete_one(doc! { "uuid": "missing" }).await.unwrap_err();

    assert!(matches!(err, StoreError::NonExistentEntry(_)));
    assert_eq!(users.count_documents(doc! {}).await.unwrap(), 1);
}

#[tokio::test]
async fn many_variants_do_not_check_existence() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa", "age": 30 }).await.unwrap();
    users.insert_one(doc! { "uuid": "bbb", "age": 40 }).await.unwrap();

    let none = users
        .update_many(doc! { "age": { "$gt": 50 } }, doc! { "old": true }, UpdateStrategy::Set)
        .await
        .unwrap();
    assert_eq!(none.matched_count, 0);

    let some = users
        .update_many(doc! { "age": { "$gte": 30 } }, doc! { "age": 1 }, UpdateStrategy::Inc)
        .await
        .unwrap();
    assert_eq!((some.matched_count, some.modified_count), (2, 2));

    let none = users.delete_many(doc! { "uuid": "missing" }).await.unwrap();
    assert_eq!(none.deleted_count, 0);

    let all = users.delete_many(doc! {}).await.unwrap();
    assert_eq!(all.deleted_count, 2);
}

#[tokio::test]
async fn safe_insert_subfields_pushes_new_entries() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa" }).await.unwrap();

    let result = users
        .safe_insert_subfields("aaa", doc! { "pets": { "uuid": "p1", "name": "rex" } })
        .await
        .unwrap();
    assert_eq!(result.modified_count, 1);

    users
        .safe_insert_subfields("aaa", doc! { "pets": { "uuid": "p2", "name": "tom" } })
        .await
        .unwrap();

    let stored = users.find_one(doc! { "uuid": "aaa" }, FindOptions::new()).await.unwrap().unwrap();
    assert_eq!(stored.get_array("pets").unwrap().len(), 2);
}

#[tokio::test]
async fn safe_insert_subfields_rejects_known_subfield_uuids() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa", "pets": [{ "uuid": "p1" }] }).await.unwrap();
    users.insert_one(doc! { "uuid": "bbb" }).await.unwrap();

    let same = users
        .safe_insert_subfields("aaa", doc! { "pets": { "uuid": "p1" } })
        .await
        .unwrap_err();
    let other = users
        .safe_insert_subfields("bbb", doc! { "pets": { "uuid": "p1" } })
        .await
        .unwrap_err();

    assert!(matches!(same, StoreError::DuplicateEntry(_)));
    assert!(matches!(other, StoreError::DuplicateEntry(_)));
    assert_eq!(users.count_documents(doc! { "pets.uuid": "p1" }).await.unwrap(), 1);

    let malformed = users
        .safe_insert_subfields("bbb", doc! { "pets": { "name": "rex" } })
        .await
        .unwrap_err();
    assert!(matches!(malformed, StoreError::InvalidDocument(_)));
}

#[tokio::test]
async fn safe_insert_subfields_on_a_missing_parent_writes_nothing() {
    let users = users().await;

    let result = users
        .safe_insert_subfields("missing", doc! { "pets": { "uuid": "p1" } })
        .await
        .unwrap();

    assert_eq!(result.matched_count, 0);
    assert_eq!(users.count_documents(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn driver_operations_pass_through() {
    let users = users().await;
    for (uuid, age) in [("a", 30), ("b", 20), ("c", 40)] {
        users.insert_one(doc! { "uuid": uuid, "age": age, "team": "x" }).await.unwrap();
    }

    let oldest = users
        .find(
            doc! {},
            FindOptions::new()
                .sort(doc! { "age": -1 })
                .limit(2)
                .projection(doc! { "_id": 0, "uuid": 1 }),
        )
        .await
        .unwrap();
    assert_eq!(oldest, vec![doc! { "uuid": "c" }, doc! { "uuid": "a" }]);

    assert_eq!(users.distinct("team", doc! {}).await.unwrap(), vec![Bson::from("x")]);

    let counted = users
        .aggregate(vec![doc! { "$match": { "age": { "$lt": 35 } } }, doc! { "$count": "n" }])
        .await
        .unwrap();
    assert_eq!(counted, vec![doc! { "n": 2 }]);

    let replaced = users
        .replace_one(doc! { "uuid": "b" }, doc! { "uuid": "b", "age": 21 }, false)
        .await
        .unwrap();
    assert_eq!(replaced.modified_count, 1);

    let bulk = users
        .bulk_write(vec![
            WriteModel::InsertOne { document: doc! { "uuid": "d" } },
            WriteModel::UpdateMany { filter: doc! {}, update: doc! { "$set": { "team": "y" } }, upsert: false },
            WriteModel::DeleteOne { filter: doc! { "uuid": "a" } },
        ])
        .await
        .unwrap();
    assert_eq!(bulk.inserted_count, 1);
    assert_eq!(bulk.matched_count, 4);
    assert_eq!(bulk.deleted_count, 1);
    assert_eq!(users.name(), "users");
    assert_eq!(CollectionDriver::name(users.delegate()), "users");
}

#[tokio::test]
async fn raw_driver_calls_bypass_the_checks() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa" }).await.unwrap();

    users.delegate().insert_one(doc! { "uuid": "aaa" }).await.unwrap();
    let missing = users
        .delegate()
        .update_one(doc! { "uuid": "zzz" }, doc! { "$set": { "a": 1 } }, false)
        .await
        .unwrap();

    assert_eq!(users.count_documents(doc! { "uuid": "aaa" }).await.unwrap(), 2);
    assert_eq!(missing.matched_count, 0);
}

#[tokio::test]
async fn a_unique_index_guards_raw_inserts() {
    let users = users().await;
    users
        .create_index(IndexSpec::new(doc! { "uuid": 1 }).unique(true))
        .await
        .unwrap();
    users.insert_one(doc! { "uuid": "aaa" }).await.unwrap();

    let err = users.delegate().insert_one(doc! { "uuid": "aaa" }).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert!(matches!(
        err.backend_source::<InMemoryError>(),
        Some(InMemoryError::DuplicateKey { .. })
    ));

    let names = users
        .list_indexes()
        .await
        .unwrap()
        .into_iter()
        .map(|index| index.resolved_name())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["_id_", "uuid_1"]);
}

#[tokio::test]
async fn driver_errors_surface_unmodified() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa" }).await.unwrap();

    let err = users
        .update_one(doc! { "uuid": { "$where": "true" } }, doc! { "foo": 1 })
        .await
        .unwrap_err();

    assert_eq!(
        err.backend_source::<InMemoryError>(),
        Some(&InMemoryError::UnknownOperator("$where".to_string()))
    );
}

#[tokio::test]
async fn update_one_rejects_out_of_range_array_positions() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa", "tags": ["a"] }).await.unwrap();

    for path in ["tags.18446744073709551615", "tags.4000000000"] {
        let err = users
            .update_one("aaa", Document::from_iter([(path.to_string(), Bson::from("x"))]))
            .await
            .unwrap_err();

        assert!(matches!(
            err.backend_source::<InMemoryError>(),
            Some(InMemoryError::BadValue(_))
        ));
    }

    let stored = users.find_one(doc! { "uuid": "aaa" }, FindOptions::new()).await.unwrap().unwrap();
    assert_eq!(stored.get_array("tags").unwrap(), &vec![Bson::String("a".into())]);

    let updated = users.update_one("aaa", doc! { "tags.2": "c" }).await.unwrap();
    assert_eq!(updated.get_array("tags").unwrap().len(), 3);
}

#[tokio::test]
async fn watch_reports_checked_writes() {
    let users = users().await;
    let mut events = users
        .watch(vec![doc! { "$match": { "operationType": { "$in": ["insert", "delete"] } } }])
        .await
        .unwrap();

    users.insert_one(doc! { "uuid": "aaa" }).await.unwrap();
    users.update_one("aaa", doc! { "foo": "bar" }).await.unwrap();
    users.delete_one("aaa").await.unwrap();

    let inserted = events.next().await.unwrap().unwrap();
    let deleted = events.next().await.unwrap().unwrap();

    assert_eq!(inserted.get_str("operationType").unwrap(), "insert");
    assert_eq!(
        inserted.get_document("fullDocument").unwrap().get_str("uuid").unwrap(),
        "aaa"
    );
    assert_eq!(deleted.get_str("operationType").unwrap(), "delete");
}

#[tokio::test]
async fn options_and_drop_pass_through() {
    let users = users().await;
    users.insert_one(doc! { "uuid": "aaa" }).await.unwrap();

    assert_eq!(users.options().await.unwrap(), doc! {});

    users.drop().await.unwrap();

    assert_eq!(users.estimated_document_count().await.unwrap(), 0);
    assert!(users.insert_one(doc! { "uuid": "aaa" }).await.is_ok());
}
