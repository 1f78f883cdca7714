//! `tensorflow.Example` messages and TFRecord framing.
//!
//! A TFRecord file is a sequence of
//!
//! ```text
//! u64  length (little endian)
//! u32  masked crc32c of the length bytes
//! [u8] payload
//! u32  masked crc32c of the payload
//! ```

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use prost::Message;

use crate::error::{Error, Result};

#[derive(Clone, PartialEq, Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: Vec<f32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: Vec<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: Option<feature::Kind>,
}

pub mod feature {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(super::BytesList),
        #[prost(message, tag = "2")]
        FloatList(super::FloatList),
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Features {
    #[prost(btree_map = "string, message", tag = "1")]
    pub feature: BTreeMap<String, Feature>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: Option<Features>,
}

impl Feature {
    pub fn int64s(values: Vec<i64>) -> Self {
        Feature {
            kind: Some(feature::Kind::Int64List(Int64List { value: values })),
        }
    }

    pub fn floats(values: Vec<f32>) -> Self {
        Feature {
            kind: Some(feature::Kind::FloatList(FloatList { value: values })),
        }
    }

    pub fn bytes(values: Vec<Vec<u8>>) -> Self {
        Feature {
            kind: Some(feature::Kind::BytesList(BytesList { value: values })),
        }
    }

    pub fn as_int64s(&self) -> Option<&[i64]> {
        match &self.kind {
            Some(feature::Kind::Int64List(list)) => Some(&list.value),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f32]> {
        match &self.kind {
            Some(feature::Kind::FloatList(list)) => Some(&list.value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[Vec<u8>]> {
        match &self.kind {
            Some(feature::Kind::BytesList(list)) => Some(&list.value),
            _ => None,
        }
    }
}

impl Example {
    pub fn from_features(feature: BTreeMap<String, Feature>) -> Self {
        Example {
            features: Some(Features { feature }),
        }
    }

    pub fn feature(&self, key: &str) -> Option<&Feature> {
        self.features.as_ref().and_then(|f| f.feature.get(key))
    }
}

const MASK_DELTA: u32 = 0xa282_ead8;

fn masked_crc(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

pub struct RecordWriter<W: Write> {
    inner: W,
    records: usize,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        RecordWriter { inner, records: 0 }
    }

    pub fn write_record(&mut self, payload: &[u8]) -> io::Result<()> {
        let len = (payload.len() as u64).to_le_bytes();

        self.inner.write_all(&len)?;
        self.inner.write_all(&masked_crc(&len).to_le_bytes())?;
        self.inner.write_all(payload)?;
        self.inner.write_all(&masked_crc(payload).to_le_bytes())?;

        self.records += 1;
        Ok(())
    }

    pub fn write_example(&mut self, example: &Example) -> io::Result<()> {
        self.write_record(&example.encode_to_vec())
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads framed records back, checking both checksums of every record.
pub struct RecordReader<R: Read> {
    inner: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        RecordReader { inner }
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.inner
            .read_exact(&mut buf)
            .map_err(|e| Error::CorruptRecord(format!("truncated checksum: {}", e)))?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Next raw payload, `None` at a clean end of input.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 8];
        let mut filled = 0;
        while filled < len_buf.len() {
            match self.inner.read(&mut len_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(Error::CorruptRecord("truncated length".to_owned())),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::CorruptRecord(e.to_string())),
            }
        }

        if self.read_u32()? != masked_crc(&len_buf) {
            return Err(Error::CorruptRecord("length checksum mismatch".to_owned()));
        }

        let len = u64::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.inner
            .read_exact(&mut payload)
            .map_err(|e| Error::CorruptRecord(format!("truncated payload: {}", e)))?;

        if self.read_u32()? != masked_crc(&payload) {
            return Err(Error::CorruptRecord("payload checksum mismatch".to_owned()));
        }

        Ok(Some(payload))
    }

    pub fn read_example(&mut self) -> Result<Option<Example>> {
        match self.read_record()? {
            None => Ok(None),
            Some(payload) => Example::decode(payload.as_slice())
                .map(Some)
                .map_err(|e| Error::CorruptRecord(e.to_string())),
        }
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_example().transpose()
    }
}
