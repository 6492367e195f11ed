//! Source records and the values derived from them on their way to the index.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Maximum characters kept for the title, genre, and overview metadata fields.
pub const METADATA_FIELD_LIMIT: usize = 1000;

/// Hard per-record metadata ceiling enforced by the index service.
pub const METADATA_LIMIT_BYTES: usize = 40 * 1024;

const UNKNOWN_TITLE: &str = "Unknown";

/// Stable identifier of a source record.
///
/// Source documents carry either JSON strings or numbers; both are coerced to
/// their string form so identifiers compare the same across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Borrows the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(raw) => Ok(Self(raw)),
            Value::Number(num) => Ok(Self(num.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "record identifier must be a string or number, got {other}"
            ))),
        }
    }
}

/// Genre collection as found in the source: a list of `{"name": ..}` objects,
/// a raw scalar, or nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Genres(Value);

impl Genres {
    /// Comma-joined genre names. Non-object list entries are ignored and
    /// scalars are rendered as-is.
    pub fn normalized(&self) -> String {
        match &self.0 {
            Value::Null => String::new(),
            Value::String(raw) => raw.clone(),
            Value::Array(entries) => entries
                .iter()
                .filter_map(Value::as_object)
                .map(|entry| match entry.get("name") {
                    Some(Value::String(name)) => name.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            other => other.to_string(),
        }
    }
}

impl From<Value> for Genres {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// One item from the source collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Record {
    /// Stable identifier, used as the index key.
    pub id: RecordId,
    /// Display title.
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    /// Free-text synopsis.
    #[serde(default, deserialize_with = "lenient_string")]
    pub overview: Option<String>,
    /// Genre collection in whatever shape the source used.
    #[serde(default)]
    pub genres: Genres,
    /// Release date string, usually `YYYY-MM-DD`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub release_date: Option<String>,
    /// Poster image path.
    #[serde(default, deserialize_with = "lenient_string")]
    pub poster_path: Option<String>,
    /// Popularity score.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub popularity: f64,
    /// Average user rating.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub vote_average: f64,
}

/// A source item that cannot become a [`Record`]; it is logged and skipped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unusable source record: {reason}")]
pub struct InvalidRecord {
    /// Raw identifier as found in the source, or empty when absent.
    pub raw_id: String,
    /// Title, when the item carried a usable one.
    pub title: Option<String>,
    /// What is wrong with the item.
    pub reason: String,
}

impl Record {
    /// Decodes one source item. Only an item that is not an object or has
    /// no string or numeric identifier is rejected; every other field is
    /// read leniently.
    pub fn from_value(value: Value) -> Result<Self, InvalidRecord> {
        let raw_id = match value.get("id") {
            Some(Value::String(raw)) => raw.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let title = value.get("title").and_then(scalar_text);
        let reject = |reason: String| InvalidRecord {
            raw_id: raw_id.clone(),
            title: title.clone(),
            reason,
        };
        if !value.is_object() {
            return Err(reject(format!("expected an object, got {value}")));
        }
        let record: Record =
            serde_json::from_value(value).map_err(|err| reject(err.to_string()))?;
        if record.id.as_str().trim().is_empty() {
            return Err(reject("blank record identifier".to_string()));
        }
        Ok(record)
    }

    /// Title used in text, metadata, and failure entries.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(UNKNOWN_TITLE)
    }

    /// Builds the embedding input and the metadata that travels with it.
    /// The record itself is left untouched.
    pub fn prepare(self) -> PreparedRecord {
        let genres = self.genres.normalized();
        let text = format!(
            "Title: {}. Overview: {}. Genres: {}",
            self.display_title(),
            self.overview.as_deref().unwrap_or_default(),
            genres
        );
        let metadata = Metadata::new(&self, &genres);
        PreparedRecord {
            record: self,
            text,
            metadata,
        }
    }
}

/// A record paired with its derived text and metadata, ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRecord {
    /// The untouched source record.
    pub record: Record,
    /// Embedding input.
    pub text: String,
    /// Bounded metadata committed alongside the vector.
    pub metadata: Metadata,
}

/// Size-bounded metadata stored with each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Title, truncated.
    pub title: String,
    /// First four characters of the release date, or empty.
    pub year: String,
    /// Normalized genre names, truncated.
    pub genres: String,
    /// Poster path, or empty.
    pub poster_path: String,
    /// Overview, truncated.
    pub overview: String,
    /// Average user rating.
    pub vote_average: f64,
    /// Popularity score.
    pub popularity: f64,
}

impl Metadata {
    fn new(record: &Record, genres: &str) -> Self {
        Self {
            title: truncate_chars(record.display_title(), METADATA_FIELD_LIMIT),
            year: record
                .release_date
                .as_deref()
                .map(|date| truncate_chars(date, 4))
                .unwrap_or_default(),
            genres: truncate_chars(genres, METADATA_FIELD_LIMIT),
            poster_path: record.poster_path.clone().unwrap_or_default(),
            overview: truncate_chars(
                record.overview.as_deref().unwrap_or_default(),
                METADATA_FIELD_LIMIT,
            ),
            vote_average: record.vote_average,
            popularity: record.popularity,
        }
    }

    /// Serialized size in bytes, as the index service measures it.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
    }
}

/// An `(id, vector, metadata)` triple committed to the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertUnit {
    /// Record identifier, used as the vector id.
    pub id: RecordId,
    /// Embedding vector.
    pub values: Vec<f32>,
    /// Metadata payload.
    pub metadata: Metadata,
}

/// Returns at most the first `limit` characters of `input`.
pub fn truncate_chars(input: &str, limit: usize) -> String {
    match input.char_indices().nth(limit) {
        Some((byte_idx, _)) => input[..byte_idx].to_string(),
        None => input.to_string(),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) => Some(raw.clone()),
        Value::Number(num) => Some(num.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_text(&Value::deserialize(deserializer)?))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(num) => num.as_f64().unwrap_or_default(),
        Value::String(raw) => raw.trim().parse().unwrap_or_default(),
        Value::Bool(flag) => f64::from(u8::from(flag)),
        _ => 0.0,
    })
}
