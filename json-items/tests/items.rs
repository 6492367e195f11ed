use std::io::Cursor;
use std::path::PathBuf;

use json_items::{JsonItems, StreamError};
use pretty_assertions::assert_eq;
use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq)]
struct Movie {
    id: u64,
    name: String,
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn from_str<T>(doc: &str, path: &str) -> JsonItems<T>
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    JsonItems::from_reader(Cursor::new(doc.as_bytes().to_vec()), path).expect("valid item path")
}

#[test]
fn streams_items_under_nested_prefix_in_order() {
    let movies: Vec<Movie> = JsonItems::open(fixture("catalog.json"), "data.movies.item")
        .expect("open fixture")
        .collect::<Result<_, _>>()
        .expect("well-formed fixture");

    assert_eq!(
        movies,
        vec![
            Movie {
                id: 1,
                name: "First".to_string()
            },
            Movie {
                id: 2,
                name: "Second".to_string()
            },
            Movie {
                id: 3,
                name: "Third".to_string()
            },
        ]
    );
}

#[test]
fn absent_prefix_yields_nothing() {
    let items: Vec<Result<serde_json::Value, StreamError>> =
        JsonItems::open(fixture("catalog.json"), "data.series.item")
            .expect("open fixture")
            .collect();
    assert!(items.is_empty());
}

#[test]
fn prefix_through_scalar_yields_nothing() {
    let items: Vec<Result<serde_json::Value, StreamError>> =
        from_str(r#"{"data": 7}"#, "data.movies.item").collect();
    assert!(items.is_empty());
}

#[test]
fn root_array_items() {
    let values: Vec<u32> = from_str("[4, 5, 6]", "item")
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(values, vec![4, 5, 6]);
}

#[test]
fn malformed_document_ends_with_error() {
    let doc = r#"{"data": {"movies": [{"id": 1, "name": "ok"}, {"id": 2, "name": "#;
    let mut items = from_str::<Movie>(doc, "data.movies.item");

    let first = items.next().expect("first item").expect("parsed");
    assert_eq!(first.id, 1);
    assert!(matches!(items.next(), Some(Err(StreamError::Json(_)))));
    assert!(items.next().is_none());
}

#[test]
fn trailing_garbage_is_an_error() {
    let mut items = from_str::<u32>("[1] [2]", "item");
    assert_eq!(items.next().unwrap().unwrap(), 1);
    assert!(matches!(items.next(), Some(Err(StreamError::Json(_)))));
}

#[test]
fn item_type_mismatch_is_an_error() {
    let mut items = from_str::<Movie>(r#"{"rows": [{"id": "x", "name": "y"}]}"#, "rows.item");
    assert!(matches!(items.next(), Some(Err(StreamError::Json(_)))));
    assert!(items.next().is_none());
}

#[test]
fn serde_message_appears_once_in_error_chain() {
    let mut items = from_str::<u32>("[1, oops]", "item");
    assert_eq!(items.next().unwrap().unwrap(), 1);
    let err = items.next().unwrap().unwrap_err();

    assert_eq!(err.to_string(), "malformed JSON document");
    let cause = std::error::Error::source(&err).expect("serde error as source");
    assert!(cause.to_string().contains("expected value"));
    assert!(std::error::Error::source(cause).is_none());
}

#[test]
fn missing_file_reports_open_error() {
    let result = JsonItems::<Movie>::open(fixture("does-not-exist.json"), "item");
    assert!(matches!(result, Err(StreamError::Open { .. })));
}

#[test]
fn dropping_early_releases_parser() {
    let body = (0..50_000)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let doc = format!("{{\"rows\": [{body}]}}");
    let head: Vec<u64> = from_str::<u64>(&doc, "rows.item")
        .take(3)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(head, vec![0, 1, 2]);
}
