//! Lightweight object-relational mapping over the record store.
//!
//! An [`OrmModel`] maps a source table plus a set of named relations to
//! joined tables. Selected objects always carry every declared relation,
//! resolved in one logical read: one-one embeds an object, one-many embeds
//! an array, many-one embeds the parent object.

use crate::client::{Database, Record, execute_on, query_on, query_one_on};
use crate::error::{DbError, DbResult};
use serde_json::Value;
use std::collections::BTreeMap;

/// The kind of a declared relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    /// At most one joined row, embedded as an object.
    OneOne,
    /// Any number of joined rows, embedded as an array.
    OneMany,
    /// A single parent row found by reverse lookup, embedded as an object.
    ManyOne,
}

/// A named relation from the source table to a joined table.
#[derive(Clone, Debug)]
pub struct OrmRelation {
    pub kind: RelationKind,
    /// The joined table name.
    pub table: String,
    /// The key column on the joined table.
    pub key: String,
    /// Value template for the joined key, resolved against the source row.
    /// Used by one-one and one-many relations, e.g. `"{id}"`.
    pub key_value: Option<String>,
    /// The foreign key column on the source table. Used by many-one.
    pub foreign_key: Option<String>,
    /// The version column on the joined table; relations carrying one are
    /// subject to version-based pruning.
    pub version_column: Option<String>,
}

/// A source table and its declared relations.
#[derive(Clone, Debug)]
pub struct OrmModel {
    /// The source table name.
    pub source: String,
    /// The unique key column on the source table.
    pub key: String,
    /// The monotonic version column on the source table.
    pub version_column: String,
    /// Relations keyed by the name they are embedded under.
    pub relations: BTreeMap<String, OrmRelation>,
}

/// The ORM layer: a model bound to a database.
#[derive(Clone)]
pub struct Orm {
    db: Database,
    model: OrmModel,
}

impl Orm {
    pub fn new(db: Database, model: OrmModel) -> Self {
        Self { db, model }
    }

    pub fn model(&self) -> &OrmModel {
        &self.model
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Select the object with the given key value, with all declared
    /// relations joined and embedded by relation name.
    pub async fn select_key(&self, key: &str) -> DbResult<Option<Record>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            self.model.source, self.model.key
        );
        let row = self.db.query_one(&sql, &[Value::from(key)]).await?;
        match row {
            Some(mut record) => {
                self.resolve_relations(&mut record).await?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Select all objects matching a parameterized predicate, with all
    /// declared relations joined and embedded.
    pub async fn select_where(&self, condition: &str, values: &[Value]) -> DbResult<Vec<Record>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {}",
            self.model.source, condition
        );
        let mut records = self.db.query(&sql, values).await?;
        for record in &mut records {
            self.resolve_relations(record).await?;
        }
        Ok(records)
    }

    /// Delete the object with the given key value, together with any
    /// one-many child rows exclusively owned by it. Transactional.
    pub async fn delete_key(&self, key: &str) -> DbResult<bool> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            self.model.source, self.model.key
        );
        let Some(record) = self.db.query_one(&sql, &[Value::from(key)]).await? else {
            return Ok(false);
        };

        let mut tx = self.db.begin().await?;
        for (name, relation) in &self.model.relations {
            if relation.kind != RelationKind::OneMany {
                continue;
            }
            let value = self.relation_key_value(name, relation, &record)?;
            if value.is_null() {
                continue;
            }
            let sql = format!("DELETE FROM {} WHERE {} = ?", relation.table, relation.key);
            execute_on(&mut *tx, &sql, &[value]).await?;
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            self.model.source, self.model.key
        );
        let deleted = execute_on(&mut *tx, &sql, &[Value::from(key)]).await?;
        tx.commit().await?;
        Ok(deleted > 0)
    }

    /// Delete stale related rows after an ingest has updated source
    /// versions.
    ///
    /// For every prunable relation (one-many with a version column), rows
    /// whose version is older than their source row's current version, and
    /// rows whose source row no longer exists, are removed. Rows with a null
    /// join key belong to no source row and are never pruned. Runs against
    /// the supplied transaction so ingest and prune commit atomically.
    pub async fn prune_related_on(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
    ) -> DbResult<u64> {
        let mut pruned = 0;
        for (name, relation) in &self.model.relations {
            if relation.kind != RelationKind::OneMany {
                continue;
            }
            let Some(version_column) = &relation.version_column else {
                continue;
            };
            let template = relation.key_value.as_deref().ok_or_else(|| {
                DbError::InvalidTemplate(format!("relation '{name}' has no key value"))
            })?;
            let source_column = single_field(template).ok_or_else(|| {
                DbError::InvalidTemplate(format!(
                    "relation '{name}' key value '{template}' is not prunable"
                ))
            })?;

            let sql = format!(
                "DELETE FROM {table} WHERE {table}.{key} IS NOT NULL AND ( \
                 {vcol} < (SELECT s.{svcol} FROM {source} s WHERE s.{scol} = {table}.{key}) \
                 OR NOT EXISTS (SELECT 1 FROM {source} s WHERE s.{scol} = {table}.{key}))",
                table = relation.table,
                key = relation.key,
                vcol = version_column,
                source = self.model.source,
                svcol = self.model.version_column,
                scol = source_column,
            );
            let deleted = execute_on(&mut **tx, &sql, &[]).await?;
            if deleted > 0 {
                tracing::debug!(relation = %name, deleted, "pruned stale related rows");
            }
            pruned += deleted;
        }
        Ok(pruned)
    }

    /// As [`Orm::prune_related_on`], in its own transaction.
    pub async fn prune_related(&self) -> DbResult<u64> {
        let mut tx = self.db.begin().await?;
        let pruned = self.prune_related_on(&mut tx).await?;
        tx.commit().await?;
        Ok(pruned)
    }

    async fn resolve_relations(&self, record: &mut Record) -> DbResult<()> {
        for (name, relation) in &self.model.relations {
            let value = self.relation_key_value(name, relation, record)?;
            let resolved = match relation.kind {
                RelationKind::OneMany => {
                    if value.is_null() {
                        Value::Array(Vec::new())
                    } else {
                        let sql = format!(
                            "SELECT * FROM {} WHERE {} = ?",
                            relation.table, relation.key
                        );
                        let rows = query_on(self.db.pool(), &sql, &[value]).await?;
                        Value::Array(rows.into_iter().map(Value::Object).collect())
                    }
                }
                RelationKind::OneOne | RelationKind::ManyOne => {
                    if value.is_null() {
                        Value::Null
                    } else {
                        let sql = format!(
                            "SELECT * FROM {} WHERE {} = ? LIMIT 1",
                            relation.table, relation.key
                        );
                        query_one_on(self.db.pool(), &sql, &[value])
                            .await?
                            .map(Value::Object)
                            .unwrap_or(Value::Null)
                    }
                }
            };
            record.insert(name.clone(), resolved);
        }
        Ok(())
    }

    /// Resolve the joined-key value for a relation against a source row.
    fn relation_key_value(
        &self,
        name: &str,
        relation: &OrmRelation,
        record: &Record,
    ) -> DbResult<Value> {
        match relation.kind {
            RelationKind::ManyOne => {
                let fk = relation.foreign_key.as_deref().ok_or_else(|| {
                    DbError::InvalidTemplate(format!("relation '{name}' has no foreign key"))
                })?;
                Ok(record.get(fk).cloned().unwrap_or(Value::Null))
            }
            RelationKind::OneOne | RelationKind::OneMany => {
                let template = relation.key_value.as_deref().ok_or_else(|| {
                    DbError::InvalidTemplate(format!("relation '{name}' has no key value"))
                })?;
                resolve_template(template, record)
            }
        }
    }
}

/// Resolve a value template against a record.
///
/// A template that is a single field reference (`"{id}"`) resolves to the
/// field's value unchanged; any other template substitutes each `{field}`
/// with the field's string form.
fn resolve_template(template: &str, record: &Record) -> DbResult<Value> {
    if let Some(field) = single_field(template) {
        return Ok(record.get(field).cloned().unwrap_or(Value::Null));
    }

    let mut out = String::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let Some(close) = rest[open..].find('}') else {
            return Err(DbError::InvalidTemplate(template.to_string()));
        };
        let field = &rest[open + 1..open + close];
        match record.get(field) {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Null) | None => return Ok(Value::Null),
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    Ok(Value::from(out))
}

/// If the template is exactly one `{field}` reference, return the field.
fn single_field(template: &str) -> Option<&str> {
    let inner = template.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains(['{', '}']) {
        None
    } else {
        Some(inner)
    }
}
