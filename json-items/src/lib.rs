//! Stream individual items out of very large JSON documents.
//!
//! Items are addressed by a dotted prefix such as `data.movies.item`: plain
//! segments select object keys and the `item` segment selects every element
//! of an array. Everything outside the prefix is skipped by the parser
//! without being materialized, so memory use is bounded by a single item plus
//! the hand-off channel, regardless of document size.
//!
//! # Example
//!
//! ```
//! use json_items::JsonItems;
//! use std::io::Cursor;
//!
//! let doc = br#"{"meta": {"v": 1}, "data": {"rows": [1, 2, 3]}}"#.to_vec();
//! let items: Vec<u32> = JsonItems::from_reader(Cursor::new(doc), "data.rows.item")
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(items, vec![1, 2, 3]);
//! ```

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};
use serde::de::DeserializeOwned;

mod path;

pub use path::{ItemPath, Segment};

/// Number of parsed items buffered between the parser thread and the consumer.
pub const DEFAULT_CAPACITY: usize = 64;

/// Errors surfaced while streaming items.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The source document could not be opened.
    #[error("failed to open {path}")]
    Open {
        /// Path that failed to open.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The item prefix is not a valid dotted path.
    #[error("invalid item path {0:?}")]
    InvalidPath(String),
    /// The document is malformed, truncated, unreadable, or an item did not
    /// match the requested type.
    #[error("malformed JSON document")]
    Json(#[from] serde_json::Error),
    /// The background parser thread could not be started.
    #[error("failed to start parser thread")]
    Spawn(#[source] io::Error),
    /// The background parser thread died without reporting an error.
    #[error("parser thread panicked")]
    ParserPanicked,
}

/// Lazy, finite, non-restartable iterator over the items at an [`ItemPath`].
///
/// Parsing runs on a dedicated thread that hands items over a bounded
/// channel. The first error ends the sequence. Dropping the iterator early
/// stops the parser at its next hand-off.
pub struct JsonItems<T> {
    receiver: Receiver<Result<T, StreamError>>,
    parser: Option<JoinHandle<()>>,
    finished: bool,
}

impl<T> JsonItems<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Opens `path` and streams the items found under `item_path`.
    pub fn open<P: AsRef<Path>>(path: P, item_path: &str) -> Result<Self, StreamError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| StreamError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(file, item_path)
    }

    /// Streams the items found under `item_path` in an arbitrary reader.
    pub fn from_reader<R>(reader: R, item_path: &str) -> Result<Self, StreamError>
    where
        R: Read + Send + 'static,
    {
        let parsed: ItemPath = item_path.parse()?;
        Self::with_capacity(BufReader::new(reader), parsed, DEFAULT_CAPACITY)
    }

    /// Streams items with an explicit hand-off buffer size. The reader is
    /// used as-is, so callers should pass something buffered.
    pub fn with_capacity<R>(
        reader: R,
        item_path: ItemPath,
        capacity: usize,
    ) -> Result<Self, StreamError>
    where
        R: Read + Send + 'static,
    {
        let (sender, receiver) = bounded(capacity.max(1));
        let parser = thread::Builder::new()
            .name("json-items".to_string())
            .spawn(move || path::parse_items::<R, T>(reader, &item_path, &sender))
            .map_err(StreamError::Spawn)?;
        Ok(Self {
            receiver,
            parser: Some(parser),
            finished: false,
        })
    }
}

impl<T> Iterator for JsonItems<T> {
    type Item = Result<T, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.receiver.recv() {
            Ok(Ok(item)) => Some(Ok(item)),
            Ok(Err(err)) => {
                self.finished = true;
                Some(Err(err))
            }
            Err(_) => {
                self.finished = true;
                match self.parser.take().map(JoinHandle::join) {
                    Some(Err(_)) => Some(Err(StreamError::ParserPanicked)),
                    _ => None,
                }
            }
        }
    }
}
