//! Streaming extraction of records from large JSON documents
//!
//! Registry dumps arrive as one enormous JSON document. Records are
//! pulled out of it incrementally via serde's seeded deserialization:
//! only the sub-structure addressed by a [`RecordPath`] is materialized,
//! one match at a time, while everything else streams past as ignored
//! input.

use std::fmt;
use std::io::{BufReader, Read};

use serde::Deserialize;
use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::Value;
use thiserror::Error;

/// Malformed input. Records fully parsed before `offset` were already
/// delivered to the caller; nothing past the offset contributed to any
/// record.
#[derive(Debug, Error)]
#[error("malformed JSON at byte {offset}: {message}")]
pub struct ParseError {
    pub offset: u64,
    pub message: String,
}

/// Invalid record-path expression.
#[derive(Debug, Error)]
#[error("invalid record path {expr:?}: {reason}")]
pub struct PathSyntaxError {
    pub expr: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathStep {
    /// Descend into an object key.
    Key(String),
    /// Stream every element of an array.
    AnyElement,
}

/// Dot-separated path addressing the records inside a document:
/// `"rows.*.doc"` descends into `rows`, streams each array element, and
/// emits that element's `doc` value as one record. The empty path emits
/// the whole document as a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPath {
    steps: Vec<PathStep>,
}

impl RecordPath {
    pub fn parse(expr: &str) -> Result<RecordPath, PathSyntaxError> {
        if expr.is_empty() {
            return Ok(RecordPath { steps: Vec::new() });
        }
        let mut steps = Vec::new();
        for part in expr.split('.') {
            match part {
                "" => {
                    return Err(PathSyntaxError {
                        expr: expr.to_string(),
                        reason: "empty path segment".to_string(),
                    });
                }
                "*" => steps.push(PathStep::AnyElement),
                key => steps.push(PathStep::Key(key.to_string())),
            }
        }
        Ok(RecordPath { steps })
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match step {
                PathStep::Key(key) => f.write_str(key)?,
                PathStep::AnyElement => f.write_str("*")?,
            }
        }
        Ok(())
    }
}

/// Parse a JSON document incrementally, handing each record matched by
/// `path` to `on_record` as soon as it is complete. Returns the number
/// of records delivered.
pub fn stream_records<R: Read>(
    reader: R,
    path: &RecordPath,
    mut on_record: impl FnMut(Value),
) -> Result<u64, ParseError> {
    let mut counting = CountingReader {
        // serde_json reads byte-at-a-time; buffer underneath the
        // counter so the count tracks consumed bytes exactly.
        inner: BufReader::new(reader),
        offset: 0,
    };

    let mut count = 0u64;
    let result = {
        let mut sink = |value: Value| {
            count += 1;
            on_record(value);
        };
        let mut deserializer = serde_json::Deserializer::from_reader(&mut counting);
        PathSeed {
            steps: &path.steps,
            sink: &mut sink,
        }
        .deserialize(&mut deserializer)
        .and_then(|()| deserializer.end())
    };

    match result {
        Ok(()) => Ok(count),
        Err(err) => Err(ParseError {
            offset: counting.offset,
            message: err.to_string(),
        }),
    }
}

/// Collect records, pairing the partial output with the error when the
/// document broke partway through.
pub fn collect_records<R: Read>(
    reader: R,
    path: &RecordPath,
) -> (Vec<Value>, Option<ParseError>) {
    let mut records = Vec::new();
    match stream_records(reader, path, |value| records.push(value)) {
        Ok(_) => (records, None),
        Err(err) => (records, Some(err)),
    }
}

struct CountingReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Seed that walks the remaining path steps, emitting matched values.
struct PathSeed<'a, 'f> {
    steps: &'a [PathStep],
    sink: &'f mut dyn FnMut(Value),
}

impl<'de> DeserializeSeed<'de> for PathSeed<'_, '_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        match self.steps.split_first() {
            None => {
                let value = Value::deserialize(deserializer)?;
                (self.sink)(value);
                Ok(())
            }
            Some((PathStep::Key(key), rest)) => deserializer.deserialize_map(KeyVisitor {
                key,
                rest,
                sink: self.sink,
            }),
            Some((PathStep::AnyElement, rest)) => deserializer.deserialize_seq(ElementsVisitor {
                rest,
                sink: self.sink,
            }),
        }
    }
}

struct KeyVisitor<'a, 'f> {
    key: &'a str,
    rest: &'a [PathStep],
    sink: &'f mut dyn FnMut(Value),
}

impl<'de> Visitor<'de> for KeyVisitor<'_, '_> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a JSON object with key {:?}", self.key)
    }

    fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        while let Some(key) = map.next_key::<String>()? {
            if key == self.key {
                map.next_value_seed(PathSeed {
                    steps: self.rest,
                    sink: &mut *self.sink,
                })?;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }
}

struct ElementsVisitor<'a, 'f> {
    rest: &'a [PathStep],
    sink: &'f mut dyn FnMut(Value),
}

impl<'de> Visitor<'de> for ElementsVisitor<'_, '_> {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON array")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while seq
            .next_element_seed(PathSeed {
                steps: self.rest,
                sink: &mut *self.sink,
            })?
            .is_some()
        {}
        Ok(())
    }
}
