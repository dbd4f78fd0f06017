//! Typed converters applied to resolved records and query results.
//!
//! Converter names come from configuration and are resolved against the
//! closed sets below when an authority is constructed. An unknown configured
//! name fails construction; an unknown requested type name fails the
//! individual resolution.

use crate::error::{SyncError, SyncResult};
use satchel_db::{FileDb, Record};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

/// A resolved piece of content.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentData {
    /// A single record with its relations joined.
    Record(Value),
    /// An ordered list of records.
    Records(Vec<Value>),
    /// A file in the local cache.
    File(PathBuf),
}

/// Converters for a single joined record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordConverter {
    /// The joined record as-is.
    Record,
    /// The record with its body rendered into a standalone HTML page.
    WebPage,
    /// The record's cached file on disk.
    File,
}

impl RecordConverter {
    pub fn parse(name: &str) -> SyncResult<Self> {
        match name {
            "record" => Ok(Self::Record),
            "webpage" => Ok(Self::WebPage),
            "file" => Ok(Self::File),
            other => Err(SyncError::Config(format!(
                "unknown record converter '{other}'"
            ))),
        }
    }

    pub fn convert(&self, record: Record, file_db: &FileDb) -> SyncResult<ContentData> {
        match self {
            Self::Record => Ok(ContentData::Record(Value::Object(record))),
            Self::WebPage => {
                let title = record.get("title").and_then(Value::as_str).unwrap_or("");
                let body = record.get("body").and_then(Value::as_str).unwrap_or("");
                let html = format!(
                    "<!DOCTYPE html>\n<html><head><title>{title}</title></head>\
                     <body>{body}</body></html>"
                );
                let mut page = record;
                page.insert("html".to_string(), Value::from(html));
                Ok(ContentData::Record(Value::Object(page)))
            }
            Self::File => {
                let location = file_db.cache_location_for_file(&record)?;
                match location {
                    Some(path) => Ok(ContentData::File(path)),
                    None => Err(SyncError::InvalidPath(
                        "file record has no local cache location".to_string(),
                    )),
                }
            }
        }
    }
}

/// Converters for a list of query result rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryConverter {
    /// The full result rows.
    Results,
    /// Rows projected down to listing fields (id, type, title, image).
    Table,
}

impl QueryConverter {
    pub fn parse(name: &str) -> SyncResult<Self> {
        match name {
            "results" => Ok(Self::Results),
            "table" => Ok(Self::Table),
            other => Err(SyncError::Config(format!(
                "unknown query converter '{other}'"
            ))),
        }
    }

    pub fn convert(&self, rows: Vec<Record>) -> ContentData {
        match self {
            Self::Results => ContentData::Records(rows.into_iter().map(Value::Object).collect()),
            Self::Table => {
                let rows = rows
                    .into_iter()
                    .map(|row| {
                        let mut cell = Map::new();
                        for field in ["id", "type", "title", "image"] {
                            if let Some(value) = row.get(field) {
                                cell.insert(field.to_string(), value.clone());
                            }
                        }
                        Value::Object(cell)
                    })
                    .collect();
                ContentData::Records(rows)
            }
        }
    }
}

/// The converters declared by one authority's configuration, resolved and
/// validated at construction time.
pub struct ConverterSet {
    records: HashMap<String, RecordConverter>,
    queries: HashMap<String, QueryConverter>,
}

impl ConverterSet {
    pub fn from_config(
        record_types: &HashMap<String, String>,
        query_types: &HashMap<String, String>,
    ) -> SyncResult<Self> {
        let mut records = HashMap::new();
        for (type_name, converter) in record_types {
            records.insert(type_name.clone(), RecordConverter::parse(converter)?);
        }
        let mut queries = HashMap::new();
        for (type_name, converter) in query_types {
            queries.insert(type_name.clone(), QueryConverter::parse(converter)?);
        }
        Ok(Self { records, queries })
    }

    /// The record converter declared for a type name.
    pub fn record(&self, type_name: &str) -> SyncResult<RecordConverter> {
        self.records
            .get(type_name)
            .copied()
            .ok_or_else(|| SyncError::UnsupportedContentType(type_name.to_string()))
    }

    /// The query converter declared for a type name.
    pub fn query(&self, type_name: &str) -> SyncResult<QueryConverter> {
        self.queries
            .get(type_name)
            .copied()
            .ok_or_else(|| SyncError::UnsupportedContentType(type_name.to_string()))
    }
}
