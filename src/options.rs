//! The ordered, raw-byte option map used by RRQ/WRQ/OACK bodies (spec §3, §9
//! "Ordered option map").
//!
//! Names and values are never decoded as text here — they stay `Bytes` all
//! the way through C1; only C4 (`negotiate`) interprets them.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;

/// An insertion-ordered `name -> value` map over raw byte strings.
///
/// Backed by a `Vec` rather than a hash map: option lists are always tiny (a
/// handful of entries at most) and one test-observable property (spec §8)
/// requires exact insertion-order iteration, which a hash map can't give.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionMap(Vec<(Bytes, Bytes)>);

impl OptionMap {
    pub fn new() -> Self {
        OptionMap(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &[u8]) -> Option<&Bytes> {
        self.0.iter().find(|(n, _)| n.as_ref() == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &[u8]) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Bytes)> {
        self.0.iter().map(|(n, v)| (n, v))
    }

    /// Inserts `name -> value`, appending to the end. Fails if `name` is
    /// already present — RRQ/WRQ/OACK bodies must never repeat an option
    /// name (spec §4.1).
    pub fn insert(&mut self, name: Bytes, value: Bytes) -> Result<(), Error> {
        if self.contains(&name) {
            return Err(Error::OptionsDecode);
        }
        self.0.push((name, value));
        Ok(())
    }

    /// Parses a flat list of NUL-delimited fragments (already stripped of
    /// any trailing empty fragments) into alternating `name, value` pairs.
    pub fn from_fragments(fragments: &[Bytes]) -> Result<OptionMap, Error> {
        if fragments.len() % 2 != 0 {
            return Err(Error::OptionsDecode);
        }
        let mut map = OptionMap::new();
        for pair in fragments.chunks_exact(2) {
            map.insert(pair[0].clone(), pair[1].clone())?;
        }
        Ok(map)
    }

    /// Wire representation: `(name NUL value NUL)*`, with no leading/trailing
    /// separator beyond what each pair contributes.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        for (name, value) in &self.0 {
            buf.put(name.as_ref());
            buf.put_u8(0);
            buf.put(value.as_ref());
            buf.put_u8(0);
        }
    }
}

impl FromIterator<(Bytes, Bytes)> for OptionMap {
    fn from_iter<T: IntoIterator<Item = (Bytes, Bytes)>>(iter: T) -> Self {
        OptionMap(iter.into_iter().collect())
    }
}
