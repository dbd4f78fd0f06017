//! ORM join, delete, and prune behavior over an in-memory store.

use satchel_db::{Database, Orm, OrmModel, OrmRelation, RelationKind};
use serde_json::{Value, json};
use std::collections::BTreeMap;

async fn test_db() -> Database {
    let db = Database::in_memory().await.unwrap();
    db.execute(
        r#"
        CREATE TABLE books (
            id TEXT PRIMARY KEY,
            title TEXT,
            cover_id TEXT,
            publisher_id TEXT,
            version INTEGER NOT NULL
        );
        CREATE TABLE chapters (
            id TEXT PRIMARY KEY,
            book_id TEXT,
            title TEXT,
            version INTEGER NOT NULL
        );
        CREATE TABLE covers (id TEXT PRIMARY KEY, url TEXT);
        CREATE TABLE publishers (id TEXT PRIMARY KEY, name TEXT);
        "#,
        &[],
    )
    .await
    .unwrap();
    db
}

fn book_model() -> OrmModel {
    let mut relations = BTreeMap::new();
    relations.insert(
        "chapters".to_string(),
        OrmRelation {
            kind: RelationKind::OneMany,
            table: "chapters".to_string(),
            key: "book_id".to_string(),
            key_value: Some("{id}".to_string()),
            foreign_key: None,
            version_column: Some("version".to_string()),
        },
    );
    relations.insert(
        "cover".to_string(),
        OrmRelation {
            kind: RelationKind::OneOne,
            table: "covers".to_string(),
            key: "id".to_string(),
            key_value: Some("{cover_id}".to_string()),
            foreign_key: None,
            version_column: None,
        },
    );
    relations.insert(
        "publisher".to_string(),
        OrmRelation {
            kind: RelationKind::ManyOne,
            table: "publishers".to_string(),
            key: "id".to_string(),
            key_value: None,
            foreign_key: Some("publisher_id".to_string()),
            version_column: None,
        },
    );
    OrmModel {
        source: "books".to_string(),
        key: "id".to_string(),
        version_column: "version".to_string(),
        relations,
    }
}

async fn seed(db: &Database) {
    for (sql, params) in [
        (
            "INSERT INTO publishers (id, name) VALUES (?, ?)",
            vec![json!("p1"), json!("Acme Press")],
        ),
        (
            "INSERT INTO covers (id, url) VALUES (?, ?)",
            vec![json!("c1"), json!("covers/b1.png")],
        ),
        (
            "INSERT INTO books (id, title, cover_id, publisher_id, version) VALUES (?, ?, ?, ?, ?)",
            vec![json!("b1"), json!("First"), json!("c1"), json!("p1"), json!(2)],
        ),
        (
            "INSERT INTO books (id, title, cover_id, publisher_id, version) VALUES (?, ?, ?, ?, ?)",
            vec![json!("b2"), json!("Second"), Value::Null, Value::Null, json!(1)],
        ),
        (
            "INSERT INTO chapters (id, book_id, title, version) VALUES (?, ?, ?, ?)",
            vec![json!("ch1"), json!("b1"), json!("One"), json!(2)],
        ),
        (
            "INSERT INTO chapters (id, book_id, title, version) VALUES (?, ?, ?, ?)",
            vec![json!("ch2"), json!("b1"), json!("Two"), json!(2)],
        ),
    ] {
        db.execute(sql, &params).await.unwrap();
    }
}

#[tokio::test]
async fn test_select_key_joins_all_declared_relations() {
    let db = test_db().await;
    seed(&db).await;
    let orm = Orm::new(db, book_model());

    let book = orm.select_key("b1").await.unwrap().unwrap();
    let chapters = book["chapters"].as_array().unwrap();
    assert_eq!(chapters.len(), 2);
    assert_eq!(book["cover"]["url"], json!("covers/b1.png"));
    assert_eq!(book["publisher"]["name"], json!("Acme Press"));
}

#[tokio::test]
async fn test_relations_have_documented_empty_shapes() {
    let db = test_db().await;
    seed(&db).await;
    let orm = Orm::new(db, book_model());

    // b2 has no chapters, no cover, no publisher; every declared relation
    // must still be present.
    let book = orm.select_key("b2").await.unwrap().unwrap();
    assert_eq!(book["chapters"], json!([]));
    assert_eq!(book["cover"], Value::Null);
    assert_eq!(book["publisher"], Value::Null);
}

#[tokio::test]
async fn test_select_where_joins_every_match() {
    let db = test_db().await;
    seed(&db).await;
    let orm = Orm::new(db, book_model());

    let books = orm.select_where("version >= ?", &[json!(1)]).await.unwrap();
    assert_eq!(books.len(), 2);
    for book in &books {
        assert!(book.contains_key("chapters"));
        assert!(book.contains_key("cover"));
        assert!(book.contains_key("publisher"));
    }
}

#[tokio::test]
async fn test_select_missing_key_returns_none() {
    let db = test_db().await;
    let orm = Orm::new(db, book_model());
    assert!(orm.select_key("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_key_removes_one_many_children_only() {
    let db = test_db().await;
    seed(&db).await;
    let orm = Orm::new(db.clone(), book_model());

    assert!(orm.delete_key("b1").await.unwrap());
    assert!(orm.select_key("b1").await.unwrap().is_none());

    let chapters = db.query("SELECT * FROM chapters", &[]).await.unwrap();
    assert!(chapters.is_empty());
    // Shared tables are left alone.
    let publishers = db.query("SELECT * FROM publishers", &[]).await.unwrap();
    assert_eq!(publishers.len(), 1);
    let covers = db.query("SELECT * FROM covers", &[]).await.unwrap();
    assert_eq!(covers.len(), 1);
}

#[tokio::test]
async fn test_prune_deletes_stale_and_orphaned_children() {
    let db = test_db().await;
    seed(&db).await;

    // A stale chapter left from an older version of b1, and an orphan whose
    // book no longer exists.
    db.execute(
        "INSERT INTO chapters (id, book_id, title, version) VALUES (?, ?, ?, ?)",
        &[json!("old"), json!("b1"), json!("Stale"), json!(1)],
    )
    .await
    .unwrap();
    db.execute(
        "INSERT INTO chapters (id, book_id, title, version) VALUES (?, ?, ?, ?)",
        &[json!("orphan"), json!("gone"), json!("Orphan"), json!(9)],
    )
    .await
    .unwrap();

    let orm = Orm::new(db.clone(), book_model());
    let pruned = orm.prune_related().await.unwrap();
    assert_eq!(pruned, 2);

    let remaining = db.query("SELECT id FROM chapters ORDER BY id", &[]).await.unwrap();
    let ids: Vec<&str> = remaining
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["ch1", "ch2"]);
}

#[tokio::test]
async fn test_prune_keeps_rows_with_no_join_key() {
    let db = test_db().await;
    seed(&db).await;

    // A chapter attached to no book is valid standalone content.
    db.execute(
        "INSERT INTO chapters (id, book_id, title, version) VALUES (?, ?, ?, ?)",
        &[json!("loose"), Value::Null, json!("Unattached"), json!(1)],
    )
    .await
    .unwrap();

    let orm = Orm::new(db.clone(), book_model());
    assert_eq!(orm.prune_related().await.unwrap(), 0);

    let remaining = db
        .query("SELECT id FROM chapters WHERE book_id IS NULL", &[])
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn test_prune_is_idempotent() {
    let db = test_db().await;
    seed(&db).await;
    let orm = Orm::new(db, book_model());
    assert_eq!(orm.prune_related().await.unwrap(), 0);
    assert_eq!(orm.prune_related().await.unwrap(), 0);
}
