//! The four record kinds stored in reftable blocks.
//!
//! Every record has a key (used for ordering and prefix compression), a 3-bit
//! value type stored alongside the key, and a payload whose shape depends on
//! the value type:
//!
//! ```text
//! ref    value_type 0: varint(update_index)                       (deletion)
//!        value_type 1: varint(update_index) hash
//!        value_type 2: varint(update_index) hash peeled_hash
//!        value_type 3: varint(update_index) varint(len) target
//! obj    value_type n in 1..=7: n offsets, otherwise varint(count) first;
//!        varint(first_offset) varint(delta)*
//! index  varint(child_block_offset)
//! log    value_type 0: (deletion)
//!        value_type 1: old_hash new_hash varint(len) name varint(len) email
//!                      varint(time) tz_offset: i16 BE varint(len) message
//! ```
//!
//! Reference update indexes are stored relative to the table's
//! `min_update_index`; the reader and writer do the rebasing.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use super::{BlockType, Hash};
use crate::encoding::format::Raw;
use crate::encoding::{Decoder, Encoder};
use crate::error::Result;
use crate::Error;

/// Encode/decode capability shared by every record kind.
pub trait Codec: Sized {
    const BLOCK_TYPE: BlockType;

    /// The sort key of the record.
    fn key(&self) -> Vec<u8>;

    /// The 3-bit value type stored next to the key.
    fn value_type(&self) -> u8;

    /// Encodes the payload into `dest`, returning the bytes written.
    fn encode(&self, dest: &mut [u8]) -> Result<usize>;

    /// Decodes a payload for `key` from `src`, returning the record and the
    /// bytes consumed.
    fn decode(key: &[u8], value_type: u8, src: &[u8]) -> Result<(Self, usize)>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefValue {
    Deletion,
    Value(Hash),
    Peeled { value: Hash, target_value: Hash },
    Symref(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefRecord {
    pub ref_name: String,
    pub update_index: u64,
    pub value: RefValue,
}

impl RefRecord {
    pub fn new(ref_name: impl Into<String>, update_index: u64, value: RefValue) -> Self {
        Self {
            ref_name: ref_name.into(),
            update_index,
            value,
        }
    }

    pub fn value(&self) -> Option<&Hash> {
        match &self.value {
            RefValue::Value(value) | RefValue::Peeled { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn target_value(&self) -> Option<&Hash> {
        match &self.value {
            RefValue::Peeled { target_value, .. } => Some(target_value),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match &self.value {
            RefValue::Symref(target) => Some(target),
            _ => None,
        }
    }

    pub fn is_deletion(&self) -> bool {
        self.value == RefValue::Deletion
    }

    /// Whether the ref points at `hash`, directly or through its peeled value.
    pub fn points_to(&self, hash: &Hash) -> bool {
        self.value() == Some(hash) || self.target_value() == Some(hash)
    }
}

impl Codec for RefRecord {
    const BLOCK_TYPE: BlockType = BlockType::Ref;

    fn key(&self) -> Vec<u8> {
        self.ref_name.as_bytes().to_vec()
    }

    fn value_type(&self) -> u8 {
        match self.value {
            RefValue::Deletion => 0,
            RefValue::Value(_) => 1,
            RefValue::Peeled { .. } => 2,
            RefValue::Symref(_) => 3,
        }
    }

    fn encode(&self, dest: &mut [u8]) -> Result<usize> {
        let mut enc = Encoder::new(dest);
        enc.var_int(self.update_index)?;
        match &self.value {
            RefValue::Deletion => {}
            RefValue::Value(value) => enc.bytes(value)?,
            RefValue::Peeled {
                value,
                target_value,
            } => {
                enc.bytes(value)?;
                enc.bytes(target_value)?;
            }
            RefValue::Symref(target) => enc.string(target.as_bytes())?,
        }
        Ok(enc.written())
    }

    fn decode(key: &[u8], value_type: u8, src: &[u8]) -> Result<(Self, usize)> {
        let ref_name = utf8(key, "ref name")?;
        let mut dec = Decoder::new(src);
        let update_index = dec.var_int()?;
        let value = match value_type {
            0 => RefValue::Deletion,
            1 => RefValue::Value(dec.hash()?),
            2 => RefValue::Peeled {
                value: dec.hash()?,
                target_value: dec.hash()?,
            },
            3 => RefValue::Symref(utf8(dec.string()?, "symref target")?),
            other => {
                return Err(Error::format(format!(
                    "unknown ref value type {} for {}",
                    other, ref_name
                )))
            }
        };
        Ok((
            Self {
                ref_name,
                update_index,
                value,
            },
            dec.consumed(),
        ))
    }
}

impl fmt::Display for RefRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref{{{}({}) ", self.ref_name, self.update_index)?;
        match &self.value {
            RefValue::Deletion => write!(f, "delete")?,
            RefValue::Value(value) => write!(f, "val {}", Raw::hex(value))?,
            RefValue::Peeled {
                value,
                target_value,
            } => write!(
                f,
                "val {} peeled {}",
                Raw::hex(value),
                Raw::hex(target_value)
            )?,
            RefValue::Symref(target) => write!(f, "symref {}", target)?,
        }
        write!(f, "}}")
    }
}

/// Maps an object id prefix to the offsets of the ref blocks that mention it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjRecord {
    pub hash_prefix: Vec<u8>,
    pub offsets: Vec<u64>,
}

impl Codec for ObjRecord {
    const BLOCK_TYPE: BlockType = BlockType::Obj;

    fn key(&self) -> Vec<u8> {
        self.hash_prefix.clone()
    }

    fn value_type(&self) -> u8 {
        match self.offsets.len() {
            n @ 1..=7 => n as u8,
            _ => 0,
        }
    }

    fn encode(&self, dest: &mut [u8]) -> Result<usize> {
        let mut enc = Encoder::new(dest);
        if self.value_type() == 0 {
            enc.var_int(self.offsets.len() as u64)?;
        }
        let Some(&first) = self.offsets.first() else {
            return Ok(enc.written());
        };

        enc.var_int(first)?;
        for pair in self.offsets.windows(2) {
            if pair[1] <= pair[0] {
                return Err(Error::InvalidOperation(format!(
                    "object offsets must ascend: {} after {}",
                    pair[1], pair[0]
                )));
            }
            enc.var_int(pair[1] - pair[0])?;
        }
        Ok(enc.written())
    }

    fn decode(key: &[u8], value_type: u8, src: &[u8]) -> Result<(Self, usize)> {
        let mut dec = Decoder::new(src);
        let count = match value_type {
            0 => dec.var_int()?,
            n => u64::from(n),
        };
        if count > src.len() as u64 {
            return Err(Error::format(format!(
                "object record claims {} offsets in {} bytes",
                count,
                src.len()
            )));
        }

        let mut offsets = Vec::with_capacity(count as usize);
        let mut last = 0u64;
        for i in 0..count {
            let delta = dec.var_int()?;
            last = if i == 0 {
                delta
            } else {
                last.checked_add(delta)
                    .ok_or_else(|| Error::format("object offset overflows"))?
            };
            offsets.push(last);
        }

        Ok((
            Self {
                hash_prefix: key.to_vec(),
                offsets,
            },
            dec.consumed(),
        ))
    }
}

impl fmt::Display for ObjRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "obj{{{} {}}}",
            Raw::hex(&self.hash_prefix),
            Raw::offsets(&self.offsets)
        )
    }
}

/// Points at a child block whose last key is `last_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub last_key: Vec<u8>,
    pub offset: u64,
}

impl Codec for IndexRecord {
    const BLOCK_TYPE: BlockType = BlockType::Index;

    fn key(&self) -> Vec<u8> {
        self.last_key.clone()
    }

    fn value_type(&self) -> u8 {
        0
    }

    fn encode(&self, dest: &mut [u8]) -> Result<usize> {
        let mut enc = Encoder::new(dest);
        enc.var_int(self.offset)?;
        Ok(enc.written())
    }

    fn decode(key: &[u8], _value_type: u8, src: &[u8]) -> Result<(Self, usize)> {
        let mut dec = Decoder::new(src);
        let offset = dec.var_int()?;
        Ok((
            Self {
                last_key: key.to_vec(),
                offset,
            },
            dec.consumed(),
        ))
    }
}

impl fmt::Display for IndexRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index{{{} -> {}}}", Raw::bytes(&self.last_key), self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub old_hash: Hash,
    pub new_hash: Hash,
    pub name: String,
    pub email: String,
    /// Seconds since the epoch.
    pub time: u64,
    /// Minutes east of UTC.
    pub tz_offset: i16,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogValue {
    Deletion,
    Update(LogEntry),
}

/// A reflog entry. Entries of one ref sort newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub ref_name: String,
    pub update_index: u64,
    pub value: LogValue,
}

impl LogRecord {
    pub fn new(ref_name: impl Into<String>, update_index: u64, value: LogValue) -> Self {
        Self {
            ref_name: ref_name.into(),
            update_index,
            value,
        }
    }

    /// The sort key for `ref_name` at `update_index`.
    pub fn key_for(ref_name: &str, update_index: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(ref_name.len() + 9);
        key.extend_from_slice(ref_name.as_bytes());
        key.push(0);
        let mut ts = [0u8; 8];
        BigEndian::write_u64(&mut ts, u64::MAX - update_index);
        key.extend_from_slice(&ts);
        key
    }

    pub fn entry(&self) -> Option<&LogEntry> {
        match &self.value {
            LogValue::Update(entry) => Some(entry),
            LogValue::Deletion => None,
        }
    }
}

impl Codec for LogRecord {
    const BLOCK_TYPE: BlockType = BlockType::Log;

    fn key(&self) -> Vec<u8> {
        Self::key_for(&self.ref_name, self.update_index)
    }

    fn value_type(&self) -> u8 {
        match self.value {
            LogValue::Deletion => 0,
            LogValue::Update(_) => 1,
        }
    }

    fn encode(&self, dest: &mut [u8]) -> Result<usize> {
        let mut enc = Encoder::new(dest);
        if let LogValue::Update(entry) = &self.value {
            enc.bytes(&entry.old_hash)?;
            enc.bytes(&entry.new_hash)?;
            enc.string(entry.name.as_bytes())?;
            enc.string(entry.email.as_bytes())?;
            enc.var_int(entry.time)?;
            enc.i16(entry.tz_offset)?;
            enc.string(entry.message.as_bytes())?;
        }
        Ok(enc.written())
    }

    fn decode(key: &[u8], value_type: u8, src: &[u8]) -> Result<(Self, usize)> {
        if key.len() < 9 || key[key.len() - 9] != 0 {
            return Err(Error::format(format!(
                "malformed log key {}",
                Raw::bytes(key)
            )));
        }
        let split = key.len() - 9;
        let ref_name = utf8(&key[..split], "log ref name")?;
        let update_index = u64::MAX - BigEndian::read_u64(&key[split + 1..]);

        let mut dec = Decoder::new(src);
        let value = match value_type {
            0 => LogValue::Deletion,
            1 => LogValue::Update(LogEntry {
                old_hash: dec.hash()?,
                new_hash: dec.hash()?,
                name: utf8(dec.string()?, "log name")?,
                email: utf8(dec.string()?, "log email")?,
                time: dec.var_int()?,
                tz_offset: dec.i16()?,
                message: utf8(dec.string()?, "log message")?,
            }),
            other => {
                return Err(Error::format(format!(
                    "unknown log value type {} for {}",
                    other, ref_name
                )))
            }
        };

        Ok((
            Self {
                ref_name,
                update_index,
                value,
            },
            dec.consumed(),
        ))
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log{{{}({}) ", self.ref_name, self.update_index)?;
        match &self.value {
            LogValue::Deletion => write!(f, "delete")?,
            LogValue::Update(e) => write!(
                f,
                "{} => {} {} <{}> {} {:+05} {:?}",
                Raw::hex(&e.old_hash),
                Raw::hex(&e.new_hash),
                e.name,
                e.email,
                e.time,
                e.tz_offset,
                e.message
            )?,
        }
        write!(f, "}}")
    }
}

/// A record of any kind, as found in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Ref(RefRecord),
    Obj(ObjRecord),
    Log(LogRecord),
    Index(IndexRecord),
}

impl Record {
    pub fn block_type(&self) -> BlockType {
        match self {
            Record::Ref(_) => RefRecord::BLOCK_TYPE,
            Record::Obj(_) => ObjRecord::BLOCK_TYPE,
            Record::Log(_) => LogRecord::BLOCK_TYPE,
            Record::Index(_) => IndexRecord::BLOCK_TYPE,
        }
    }

    pub fn key(&self) -> Vec<u8> {
        match self {
            Record::Ref(r) => r.key(),
            Record::Obj(r) => r.key(),
            Record::Log(r) => r.key(),
            Record::Index(r) => r.key(),
        }
    }

    pub fn value_type(&self) -> u8 {
        match self {
            Record::Ref(r) => r.value_type(),
            Record::Obj(r) => r.value_type(),
            Record::Log(r) => r.value_type(),
            Record::Index(r) => r.value_type(),
        }
    }

    pub fn encode(&self, dest: &mut [u8]) -> Result<usize> {
        match self {
            Record::Ref(r) => r.encode(dest),
            Record::Obj(r) => r.encode(dest),
            Record::Log(r) => r.encode(dest),
            Record::Index(r) => r.encode(dest),
        }
    }

    /// Decodes a payload found in a block of type `typ`.
    pub fn decode(typ: BlockType, key: &[u8], value_type: u8, src: &[u8]) -> Result<(Self, usize)> {
        Ok(match typ {
            BlockType::Ref => {
                let (r, n) = RefRecord::decode(key, value_type, src)?;
                (Record::Ref(r), n)
            }
            BlockType::Obj => {
                let (r, n) = ObjRecord::decode(key, value_type, src)?;
                (Record::Obj(r), n)
            }
            BlockType::Log => {
                let (r, n) = LogRecord::decode(key, value_type, src)?;
                (Record::Log(r), n)
            }
            BlockType::Index => {
                let (r, n) = IndexRecord::decode(key, value_type, src)?;
                (Record::Index(r), n)
            }
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Ref(r) => fmt::Display::fmt(r, f),
            Record::Obj(r) => fmt::Display::fmt(r, f),
            Record::Log(r) => fmt::Display::fmt(r, f),
            Record::Index(r) => fmt::Display::fmt(r, f),
        }
    }
}

impl From<RefRecord> for Record {
    fn from(r: RefRecord) -> Self {
        Record::Ref(r)
    }
}

impl From<ObjRecord> for Record {
    fn from(r: ObjRecord) -> Self {
        Record::Obj(r)
    }
}

impl From<LogRecord> for Record {
    fn from(r: LogRecord) -> Self {
        Record::Log(r)
    }
}

impl From<IndexRecord> for Record {
    fn from(r: IndexRecord) -> Self {
        Record::Index(r)
    }
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::format(format!("{} is not UTF-8: {}", what, Raw::bytes(bytes))))
}
