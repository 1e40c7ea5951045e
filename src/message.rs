//! Message payloads and the records persisted for them.
//!
//! A raw message popped from a queue is decoded into a [`Payload`], stamped
//! with its receipt time to form a [`Record`], and written to a collection
//! under the content digest of the raw bytes.
//!
//! # Message Lifecycle
//!
//! 1. Raw bytes are popped from the source queue (destructively)
//! 2. The bytes are decoded into a `Payload`; malformed input is rejected
//! 3. A `Record` is built with the current UTC time
//! 4. The record is upserted under its `DocId`, yielding a `DocumentHandle`
//!
//! Nothing is buffered between iterations: each worker holds at most one
//! message in flight.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{
    de::{self, DeserializeSeed, MapAccess, SeqAccess, Visitor},
    ser, Deserialize, Deserializer, Serialize,
};

use crate::error::Error;

/// Deepest array/object nesting a payload may have.
pub const MAX_DEPTH: usize = 10_000;

/// A structured JSON document decoded from a raw message.
///
/// Object keys are kept sorted, so two payloads that differ only in key order
/// compare equal.
///
/// Decoding, encoding and dropping do not recurse on the thread stack, so
/// payloads nested up to [`MAX_DEPTH`] levels are safe on any worker.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Payload>),
    Object(BTreeMap<String, Payload>),
}

impl Payload {
    /// Decodes raw message bytes.
    ///
    /// Any well-formed JSON value is accepted, including top-level arrays and
    /// scalars, nested up to [`MAX_DEPTH`] levels.
    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        Self::from_json(raw).map_err(Error::malformed)
    }

    pub(crate) fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let mut json = serde_json::Deserializer::from_slice(raw);
        json.disable_recursion_limit();

        let payload = Self::deserialize(serde_stacker::Deserializer::new(&mut json))?;
        json.end()?;

        Ok(payload)
    }

    /// Encodes the payload as compact JSON text.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut buf = Vec::with_capacity(128);
        let mut json = serde_json::Serializer::new(&mut buf);
        self.serialize(serde_stacker::Serializer::new(&mut json))?;

        String::from_utf8(buf).map_err(ser::Error::custom)
    }

    /// Looks up a top-level field of an object payload.
    pub fn get(&self, key: &str) -> Option<&Payload> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        let mut pending = match self {
            Self::Array(items) if !items.is_empty() => std::mem::take(items),
            Self::Object(map) if !map.is_empty() => std::mem::take(map).into_values().collect(),
            _ => return,
        };

        // Children are emptied before they drop, so each drop is shallow.
        while let Some(mut child) = pending.pop() {
            match &mut child {
                Self::Array(items) => pending.append(items),
                Self::Object(map) => pending.extend(std::mem::take(map).into_values()),
                _ => {}
            }
        }
    }
}

/// Deserializes one value at a known nesting depth.
#[derive(Clone, Copy)]
struct PayloadSeed {
    depth: usize,
}

impl PayloadSeed {
    fn nested<E: de::Error>(self) -> Result<Self, E> {
        if self.depth >= MAX_DEPTH {
            return Err(E::custom(format_args!(
                "nesting exceeds {MAX_DEPTH} levels"
            )));
        }
        Ok(Self {
            depth: self.depth + 1,
        })
    }
}

impl<'de> DeserializeSeed<'de> for PayloadSeed {
    type Value = Payload;

    fn deserialize<D>(self, deserializer: D) -> Result<Payload, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for PayloadSeed {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_unit<E>(self) -> Result<Payload, E> {
        Ok(Payload::Null)
    }

    fn visit_none<E>(self) -> Result<Payload, E> {
        Ok(Payload::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Payload, D::Error>
    where
        D: Deserializer<'de>,
    {
        DeserializeSeed::deserialize(self, deserializer)
    }

    fn visit_bool<E>(self, v: bool) -> Result<Payload, E> {
        Ok(Payload::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Payload, E> {
        Ok(Payload::Number(v.into()))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Payload, E> {
        Ok(Payload::Number(v.into()))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Payload, E> {
        Ok(serde_json::Number::from_f64(v).map_or(Payload::Null, Payload::Number))
    }

    fn visit_str<E>(self, v: &str) -> Result<Payload, E> {
        Ok(Payload::String(v.to_owned()))
    }

    fn visit_string<E>(self, v: String) -> Result<Payload, E> {
        Ok(Payload::String(v))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Payload, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let child = self.nested()?;
        let mut items = Vec::new();
        while let Some(item) = seq.next_element_seed(child)? {
            items.push(item);
        }
        Ok(Payload::Array(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Payload, A::Error>
    where
        A: MapAccess<'de>,
    {
        let child = self.nested()?;
        let mut entries = BTreeMap::new();
        while let Some(key) = map.next_key::<String>()? {
            let value = map.next_value_seed(child)?;
            entries.insert(key, value);
        }
        Ok(Payload::Object(entries))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        PayloadSeed { depth: 0 }.deserialize(deserializer)
    }
}

/// The unit persisted for each relayed message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Decoded message content
    pub payload: Payload,
    /// Time the relay received the message, not when the producer sent it
    pub timestamp: DateTime<Utc>,
}

impl Record {
    /// Builds a record stamped with the current time.
    pub fn received(payload: Payload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Location of a document after a successful upsert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHandle {
    pub collection: String,
    pub id: String,
}

/// A document read back from a sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub record: Record,
}
