//! Item prefixes and the seed-driven walker that follows them.

use std::fmt;
use std::io::Read;
use std::marker::PhantomData;
use std::str::FromStr;

use crossbeam_channel::Sender;
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess,
    Visitor,
};

use crate::StreamError;

const ITEM_SEGMENT: &str = "item";
const RECEIVER_GONE: &str = "item receiver dropped";

/// One step of an [`ItemPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Descend into the value stored under this object key.
    Key(String),
    /// Descend into every element of an array.
    Item,
}

/// Dotted prefix locating the items to stream, e.g. `data.movies.item`.
///
/// An empty prefix addresses the document root as a single item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPath {
    segments: Vec<Segment>,
}

impl ItemPath {
    /// Segments from the document root inward.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl FromStr for ItemPath {
    type Err = StreamError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        let segments = trimmed
            .split('.')
            .map(|part| match part {
                "" => Err(StreamError::InvalidPath(raw.to_string())),
                ITEM_SEGMENT => Ok(Segment::Item),
                key => Ok(Segment::Key(key.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, segment) in self.segments.iter().enumerate() {
            if idx > 0 {
                f.write_str(".")?;
            }
            match segment {
                Segment::Key(key) => f.write_str(key)?,
                Segment::Item => f.write_str(ITEM_SEGMENT)?,
            }
        }
        Ok(())
    }
}

/// Runs on the parser thread: walks the document and sends every item found
/// under `path`, followed by an error if the document turns out malformed.
pub(crate) fn parse_items<R, T>(reader: R, path: &ItemPath, sender: &Sender<Result<T, StreamError>>)
where
    R: Read,
    T: DeserializeOwned,
{
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    let seed = PathSeed {
        segments: path.segments(),
        sender,
        marker: PhantomData,
    };
    let outcome = seed
        .deserialize(&mut deserializer)
        .and_then(|()| deserializer.end());
    if let Err(err) = outcome {
        // fails only when the consumer already hung up
        let _ = sender.send(Err(StreamError::Json(err)));
    }
}

struct PathSeed<'a, T> {
    segments: &'a [Segment],
    sender: &'a Sender<Result<T, StreamError>>,
    marker: PhantomData<fn() -> T>,
}

impl<T> Clone for PathSeed<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PathSeed<'_, T> {}

impl<'a, T> PathSeed<'a, T> {
    fn descend(self) -> Self {
        Self {
            segments: &self.segments[1..],
            ..self
        }
    }
}

impl<'de, T> DeserializeSeed<'de> for PathSeed<'_, T>
where
    T: DeserializeOwned,
{
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        match self.segments.first() {
            None => {
                let item = T::deserialize(deserializer)?;
                self.sender
                    .send(Ok(item))
                    .map_err(|_| de::Error::custom(RECEIVER_GONE))
            }
            Some(segment) => deserializer.deserialize_any(PathVisitor {
                segment,
                seed: self,
            }),
        }
    }
}

struct PathVisitor<'a, T> {
    segment: &'a Segment,
    seed: PathSeed<'a, T>,
}

impl<'de, T> Visitor<'de> for PathVisitor<'_, T>
where
    T: DeserializeOwned,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        match self.segment {
            Segment::Key(wanted) => {
                while let Some(key) = map.next_key::<String>()? {
                    if key == *wanted {
                        map.next_value_seed(self.seed.descend())?;
                    } else {
                        map.next_value::<IgnoredAny>()?;
                    }
                }
            }
            Segment::Item => while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {},
        }
        Ok(())
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        match self.segment {
            Segment::Item => while seq.next_element_seed(self.seed.descend())?.is_some() {},
            Segment::Key(_) => while seq.next_element::<IgnoredAny>()?.is_some() {},
        }
        Ok(())
    }

    // Scalars never contain the prefix; they are skipped.

    fn visit_bool<E>(self, _: bool) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(())
    }

    fn visit_i64<E>(self, _: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(())
    }

    fn visit_u64<E>(self, _: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(())
    }

    fn visit_f64<E>(self, _: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(())
    }

    fn visit_str<E>(self, _: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(())
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ItemPath, Segment};

    #[test]
    fn parses_nested_prefix() {
        let path: ItemPath = "data.movies.item".parse().unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("data".to_string()),
                Segment::Key("movies".to_string()),
                Segment::Item,
            ]
        );
        assert_eq!(path.to_string(), "data.movies.item");
    }

    #[test]
    fn empty_prefix_addresses_root() {
        let path: ItemPath = "  ".parse().unwrap();
        assert!(path.segments().is_empty());
    }

    #[test]
    fn rejects_empty_segments() {
        assert!("data..item".parse::<ItemPath>().is_err());
        assert!(".item".parse::<ItemPath>().is_err());
    }
}
