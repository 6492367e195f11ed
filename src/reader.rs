//! Lazy record stream over the source document.

use std::path::Path;

use json_items::{JsonItems, StreamError};
use serde_json::Value;

use crate::record::{InvalidRecord, Record};

/// Default location of the record array inside the source document.
pub const DEFAULT_ITEM_PATH: &str = "data.movies.item";

/// The source document could not be read as a record collection.
#[derive(Debug, thiserror::Error)]
#[error("failed to read records from {source_name}")]
pub struct ParseError {
    source_name: String,
    #[source]
    inner: StreamError,
}

impl ParseError {
    /// Underlying stream failure.
    pub fn stream_error(&self) -> &StreamError {
        &self.inner
    }

    /// True when the document could not be opened at all.
    pub fn is_unreadable(&self) -> bool {
        matches!(self.inner, StreamError::Open { .. })
    }
}

/// One well-formed item from the source collection.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceItem {
    /// Decoded record.
    Record(Record),
    /// Item that could not be used as a record.
    Invalid(InvalidRecord),
}

impl From<Result<Record, InvalidRecord>> for SourceItem {
    fn from(decoded: Result<Record, InvalidRecord>) -> Self {
        match decoded {
            Ok(record) => Self::Record(record),
            Err(invalid) => Self::Invalid(invalid),
        }
    }
}

/// Items in source order, parsed one at a time. Only a malformed document
/// is an error; a well-formed item with unusable fields comes back as
/// [`SourceItem::Invalid`].
pub struct RecordStream {
    source_name: String,
    items: JsonItems<Value>,
}

impl RecordStream {
    /// Opens `path` and yields every item under `item_path`.
    pub fn open(path: impl AsRef<Path>, item_path: &str) -> Result<Self, ParseError> {
        let path = path.as_ref();
        let source_name = path.display().to_string();
        match JsonItems::open(path, item_path) {
            Ok(items) => Ok(Self { source_name, items }),
            Err(inner) => Err(ParseError { source_name, inner }),
        }
    }

    /// Streams items from an in-memory or otherwise non-file source.
    pub fn from_reader<R>(name: &str, reader: R, item_path: &str) -> Result<Self, ParseError>
    where
        R: std::io::Read + Send + 'static,
    {
        let source_name = name.to_string();
        match JsonItems::from_reader(reader, item_path) {
            Ok(items) => Ok(Self { source_name, items }),
            Err(inner) => Err(ParseError { source_name, inner }),
        }
    }
}

impl Iterator for RecordStream {
    type Item = Result<SourceItem, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next().map(|item| match item {
            Ok(value) => Ok(SourceItem::from(Record::from_value(value))),
            Err(inner) => Err(ParseError {
                source_name: self.source_name.clone(),
                inner,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io::Cursor;

    fn stream(doc: &str) -> RecordStream {
        RecordStream::from_reader("test", Cursor::new(doc.as_bytes().to_vec()), DEFAULT_ITEM_PATH)
            .unwrap()
    }

    fn records(doc: &str) -> Vec<Record> {
        stream(doc)
            .map(|item| match item.unwrap() {
                SourceItem::Record(record) => record,
                SourceItem::Invalid(invalid) => panic!("unexpected invalid item: {invalid}"),
            })
            .collect()
    }

    #[test]
    fn yields_records_in_source_order() {
        let doc = r#"{"meta": {"count": 3}, "data": {"movies": [
            {"id": 1, "title": "One"},
            {"id": "2", "title": "Two", "genres": [{"id": 9, "name": "Drama"}]},
            {"id": 3}
        ]}}"#;
        let records = records(doc);
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(records[1].genres.normalized(), "Drama");
        assert_eq!(records[2].display_title(), "Unknown");
    }

    #[test]
    fn unusable_item_does_not_end_the_stream() {
        let doc = r#"{"data": {"movies": [
            {"id": 1},
            {"title": "no id"},
            {"id": 3, "title": 5}
        ]}}"#;
        let items: Vec<SourceItem> = stream(doc).collect::<Result<_, _>>().unwrap();
        assert_eq!(items.len(), 3);
        match &items[1] {
            SourceItem::Invalid(invalid) => assert_eq!(invalid.title.as_deref(), Some("no id")),
            other => panic!("expected an invalid item, got {other:?}"),
        }
        match &items[2] {
            SourceItem::Record(record) => assert_eq!(record.display_title(), "5"),
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn truncated_document_is_a_parse_error() {
        let doc = r#"{"data": {"movies": [{"id": 1}, {"id": 2"#;
        let results: Vec<_> = stream(doc).collect();
        assert!(results.first().unwrap().is_ok());
        let err = results.last().unwrap().as_ref().unwrap_err();
        assert_eq!(err.to_string(), "failed to read records from test");
        assert!(err.source().is_some());
    }

    #[test]
    fn unreadable_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = RecordStream::open(dir.path().join("absent.json"), DEFAULT_ITEM_PATH)
            .err()
            .unwrap();
        assert!(err.is_unreadable());
    }
}
