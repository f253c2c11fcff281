//! Chunked transfer of binary payloads.
//!
//! Uploads split raw bytes into [`Chunks`]; downloads fold numbered sections
//! into a [`SectionAccumulator`]. Both sides share one termination rule: a
//! chunk shorter than the chunk size is the last one. When the data length
//! is an exact multiple of the chunk size, an empty final chunk closes the
//! transfer.

use serde_json::Value;

use crate::{PayloadCodec, ProtocolError};

/// One slice of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Zero-based position in the transfer.
    pub index: usize,
    pub bytes: &'a [u8],
    pub is_final: bool,
}

/// Splits a byte slice into upload chunks.
///
/// Always yields at least one chunk, and exactly one chunk has `is_final`
/// set: the last one.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    data: &'a [u8],
    size: usize,
    offset: usize,
    index: usize,
    done: bool,
}

impl<'a> Chunks<'a> {
    /// `size` is the raw chunk size in bytes; zero is treated as one.
    pub fn new(data: &'a [u8], size: usize) -> Self {
        Self {
            data,
            size: size.max(1),
            offset: 0,
            index: 0,
            done: false,
        }
    }

    /// Number of chunks the iterator yields in total.
    pub fn count_total(&self) -> usize {
        self.data.len() / self.size + 1
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let end = (self.offset + self.size).min(self.data.len());
        let bytes = &self.data[self.offset..end];
        let is_final = bytes.len() < self.size;

        let chunk = Chunk {
            index: self.index,
            bytes,
            is_final,
        };
        self.offset = end;
        self.index += 1;
        self.done = is_final;
        Some(chunk)
    }
}

/// Whether a download needs more sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    More,
    Finished,
}

/// Reassembles a file from numbered download sections.
///
/// Sections are numbered from 1. An empty or null section ends the
/// download.
#[derive(Debug, Default)]
pub struct SectionAccumulator {
    bytes: Vec<u8>,
    next_section: u64,
    finished: bool,
}

impl SectionAccumulator {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            next_section: 1,
            finished: false,
        }
    }

    /// The section number to request next.
    pub fn next_section(&self) -> u64 {
        self.next_section
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds one section response body.
    ///
    /// # Errors
    /// - [`ProtocolError::InvalidMessage`] if the body is neither a string
    ///   nor null.
    /// - [`ProtocolError::CorruptPayload`] if the string does not decode.
    pub fn push<C>(&mut self, body: &Value, codec: &C) -> Result<SectionStatus, ProtocolError>
    where
        C: PayloadCodec + ?Sized,
    {
        if self.finished {
            return Ok(SectionStatus::Finished);
        }
        match body {
            Value::Null => {
                self.finished = true;
                Ok(SectionStatus::Finished)
            }
            Value::String(s) if s.is_empty() => {
                self.finished = true;
                Ok(SectionStatus::Finished)
            }
            Value::String(s) => {
                self.bytes.extend(codec.decode(s)?);
                self.next_section += 1;
                Ok(SectionStatus::More)
            }
            other => Err(ProtocolError::InvalidMessage(format!(
                "file section {} is not a string: {other}",
                self.next_section
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
