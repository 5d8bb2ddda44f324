//! The `EC_VARIANT` codec.
//!
//! Native layout (16 bytes, followed by any variable-length payload in the same buffer):
//!
//! | offset | size | field                                                              |
//! |--------|------|--------------------------------------------------------------------|
//! | 0      | 8    | value: `BOOL`, `u32`, `FILETIME`, pointer to payload, or a handle |
//! | 8      | 4    | element count (arrays only)                                        |
//! | 12     | 4    | type tag, `0x80` marks an array                                    |
//!
//! Payload pointers are absolute addresses. The collector places the payload after the header in
//! the buffer it filled, so decoding resolves every pointer against that buffer and rejects
//! anything that lands outside of it.

use std::fmt;

use jiff::Timestamp;
use log::{trace, warn};
use serde_json::{Value, json};

use crate::buffer::NativeBuffer;
use crate::err::{Result, WecError};
use crate::native::RawHandle;
use crate::utils::FileTime;
use crate::utils::bytes::{self, POINTER_SIZE};
use crate::utils::{decode_utf16le_bytes_z, encode_utf16z};

pub const VARIANT_SIZE: usize = 16;
pub const COUNT_OFFSET: usize = 8;
pub const TYPE_OFFSET: usize = 12;

pub const TYPE_MASK: u32 = 0x7f;
pub const TYPE_ARRAY: u32 = 0x80;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub enum VariantTag {
    Null = 0,
    Boolean = 1,
    UInt32 = 2,
    DateTime = 3,
    String = 4,
    ObjectArrayHandle = 5,
}

impl VariantTag {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(VariantTag::Null),
            1 => Some(VariantTag::Boolean),
            2 => Some(VariantTag::UInt32),
            3 => Some(VariantTag::DateTime),
            4 => Some(VariantTag::String),
            5 => Some(VariantTag::ObjectArrayHandle),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            VariantTag::Null => "Null",
            VariantTag::Boolean => "Boolean",
            VariantTag::UInt32 => "UInt32",
            VariantTag::DateTime => "DateTime",
            VariantTag::String => "String",
            VariantTag::ObjectArrayHandle => "ObjectArrayHandle",
        }
    }

    /// Size of one element when this tag is used as an array.
    fn element_size(self) -> Option<usize> {
        match self {
            VariantTag::Boolean | VariantTag::UInt32 => Some(4),
            VariantTag::DateTime => Some(8),
            VariantTag::String => Some(POINTER_SIZE),
            VariantTag::Null | VariantTag::ObjectArrayHandle => None,
        }
    }
}

impl fmt::Display for VariantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A base tag plus the array flag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VariantType {
    pub tag: VariantTag,
    pub array: bool,
}

impl VariantType {
    pub const fn scalar(tag: VariantTag) -> Self {
        VariantType { tag, array: false }
    }

    pub const fn array(tag: VariantTag) -> Self {
        VariantType { tag, array: true }
    }

    /// Parses a raw tag word. Bits outside of the base tag and the array flag are rejected.
    pub fn from_raw(raw: u32) -> Option<Self> {
        if raw & !(TYPE_MASK | TYPE_ARRAY) != 0 {
            return None;
        }
        Some(VariantType {
            tag: VariantTag::from_u32(raw & TYPE_MASK)?,
            array: raw & TYPE_ARRAY != 0,
        })
    }

    pub fn raw(self) -> u32 {
        if self.array {
            self.tag.as_u32() | TYPE_ARRAY
        } else {
            self.tag.as_u32()
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.array {
            write!(f, "{}[]", self.tag)
        } else {
            write!(f, "{}", self.tag)
        }
    }
}

/// One element of a subscription's `EventSources` object array.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EventSourceConfig {
    pub address: String,
    pub enabled: bool,
    pub user_name: Option<String>,
}

/// A decoded `EC_VARIANT`.
///
/// `EventSources` never appears on the wire; it is the resolved form of an `EventSources`
/// object-array handle, built by the client from the per-element calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    Null,
    Boolean(bool),
    UInt32(u32),
    DateTime(FileTime),
    String(String),
    ObjectArrayHandle(RawHandle),
    BooleanArray(Vec<bool>),
    UInt32Array(Vec<u32>),
    DateTimeArray(Vec<FileTime>),
    StringArray(Vec<String>),
    EventSources(Vec<EventSourceConfig>),
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Null => VariantType::scalar(VariantTag::Null),
            Variant::Boolean(_) => VariantType::scalar(VariantTag::Boolean),
            Variant::UInt32(_) => VariantType::scalar(VariantTag::UInt32),
            Variant::DateTime(_) => VariantType::scalar(VariantTag::DateTime),
            Variant::String(_) => VariantType::scalar(VariantTag::String),
            Variant::ObjectArrayHandle(_) | Variant::EventSources(_) => {
                VariantType::scalar(VariantTag::ObjectArrayHandle)
            }
            Variant::BooleanArray(_) => VariantType::array(VariantTag::Boolean),
            Variant::UInt32Array(_) => VariantType::array(VariantTag::UInt32),
            Variant::DateTimeArray(_) => VariantType::array(VariantTag::DateTime),
            Variant::StringArray(_) => VariantType::array(VariantTag::String),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Variant::UInt32(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_file_time(&self) -> Option<FileTime> {
        match self {
            Variant::DateTime(ft) => Some(*ft),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<RawHandle> {
        match self {
            Variant::ObjectArrayHandle(h) => Some(*h),
            _ => None,
        }
    }

    /// Number of bytes [`Variant::write_native`] needs for this value.
    pub fn encoded_len(&self) -> Result<usize> {
        let payload = match self {
            Variant::Null
            | Variant::Boolean(_)
            | Variant::UInt32(_)
            | Variant::DateTime(_)
            | Variant::ObjectArrayHandle(_) => 0,
            Variant::String(s) => utf16z_len(s),
            Variant::BooleanArray(v) => v.len() * 4,
            Variant::UInt32Array(v) => v.len() * 4,
            Variant::DateTimeArray(v) => v.len() * 8,
            Variant::StringArray(v) => {
                v.len() * POINTER_SIZE + v.iter().map(|s| utf16z_len(s)).sum::<usize>()
            }
            Variant::EventSources(_) => return Err(event_sources_not_encodable()),
        };
        Ok(VARIANT_SIZE + payload)
    }

    /// Lays this value out in native form at the start of `out`.
    ///
    /// Payload pointers are absolute addresses into `out`, so the bytes are only meaningful for
    /// as long as `out` stays where it is. Returns the number of bytes written.
    pub fn write_native(&self, out: &mut [u8]) -> Result<usize> {
        let len = self.encoded_len()?;
        let out = out.get_mut(..len).ok_or(WecError::InvalidArgument {
            argument: "buffer",
            reason: "buffer is too small for the encoded variant",
        })?;
        out.fill(0);

        let mut w = NativeWriter::new(out);
        w.u32(TYPE_OFFSET, self.variant_type().raw())?;

        match self {
            Variant::Null => {}
            Variant::Boolean(b) => w.u32(0, u32::from(*b))?,
            Variant::UInt32(n) => w.u32(0, *n)?,
            Variant::DateTime(ft) => w.u64(0, ft.raw())?,
            Variant::ObjectArrayHandle(h) => w.raw_pointer(0, h.as_raw())?,
            Variant::String(s) => {
                w.pointer(0, VARIANT_SIZE)?;
                w.utf16z(VARIANT_SIZE, s)?;
            }
            Variant::BooleanArray(v) => {
                w.array_header(v.len())?;
                for (i, b) in v.iter().enumerate() {
                    w.u32(VARIANT_SIZE + i * 4, u32::from(*b))?;
                }
            }
            Variant::UInt32Array(v) => {
                w.array_header(v.len())?;
                for (i, n) in v.iter().enumerate() {
                    w.u32(VARIANT_SIZE + i * 4, *n)?;
                }
            }
            Variant::DateTimeArray(v) => {
                w.array_header(v.len())?;
                for (i, ft) in v.iter().enumerate() {
                    w.u64(VARIANT_SIZE + i * 8, ft.raw())?;
                }
            }
            Variant::StringArray(v) => {
                w.array_header(v.len())?;
                let mut offset = VARIANT_SIZE + v.len() * POINTER_SIZE;
                for (i, s) in v.iter().enumerate() {
                    w.pointer(VARIANT_SIZE + i * POINTER_SIZE, offset)?;
                    offset += w.utf16z(offset, s)?;
                }
            }
            Variant::EventSources(_) => return Err(event_sources_not_encodable()),
        }

        Ok(len)
    }

    /// Parses user-supplied text as a value of type `ty`.
    ///
    /// Booleans accept `true`/`false`/`1`/`0`/`yes`/`no`, date-times accept RFC 3339 or a raw
    /// tick count, and arrays are comma separated.
    pub fn parse_as(ty: VariantType, text: &str) -> Result<Variant> {
        if ty.array {
            let items = text.split(',').map(str::trim).filter(|s| !s.is_empty());
            return match ty.tag {
                VariantTag::Boolean => items
                    .map(parse_bool)
                    .collect::<Result<Vec<_>>>()
                    .map(Variant::BooleanArray),
                VariantTag::UInt32 => items
                    .map(parse_u32)
                    .collect::<Result<Vec<_>>>()
                    .map(Variant::UInt32Array),
                VariantTag::DateTime => items
                    .map(parse_file_time)
                    .collect::<Result<Vec<_>>>()
                    .map(Variant::DateTimeArray),
                VariantTag::String => Ok(Variant::StringArray(items.map(str::to_owned).collect())),
                VariantTag::Null | VariantTag::ObjectArrayHandle => Err(unparsable()),
            };
        }

        match ty.tag {
            VariantTag::Boolean => parse_bool(text.trim()).map(Variant::Boolean),
            VariantTag::UInt32 => parse_u32(text.trim()).map(Variant::UInt32),
            VariantTag::DateTime => parse_file_time(text.trim()).map(Variant::DateTime),
            VariantTag::String => Ok(Variant::String(text.to_owned())),
            VariantTag::Null | VariantTag::ObjectArrayHandle => Err(unparsable()),
        }
    }
}

fn event_sources_not_encodable() -> WecError {
    WecError::InvalidArgument {
        argument: "value",
        reason: "event sources are an object array and cannot be encoded",
    }
}

fn unparsable() -> WecError {
    WecError::InvalidArgument {
        argument: "value",
        reason: "values of this type cannot be parsed from text",
    }
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(WecError::InvalidArgument {
            argument: "value",
            reason: "not a boolean",
        }),
    }
}

fn parse_u32(s: &str) -> Result<u32> {
    s.parse::<u32>().map_err(|_| WecError::InvalidArgument {
        argument: "value",
        reason: "not an unsigned 32-bit integer",
    })
}

fn parse_file_time(s: &str) -> Result<FileTime> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<u64>()
            .map(FileTime::from_raw)
            .map_err(|_| WecError::InvalidArgument {
                argument: "value",
                reason: "FILETIME tick count is out of range",
            });
    }
    s.parse::<Timestamp>()
        .ok()
        .and_then(FileTime::from_timestamp)
        .ok_or(WecError::InvalidArgument {
            argument: "value",
            reason: "not an RFC 3339 timestamp after 1601-01-01",
        })
}

fn utf16z_len(s: &str) -> usize {
    (s.encode_utf16().count() + 1) * 2
}

/// Writes into an output buffer whose address is used to form payload pointers.
struct NativeWriter<'a> {
    out: &'a mut [u8],
    base: usize,
}

impl<'a> NativeWriter<'a> {
    fn new(out: &'a mut [u8]) -> Self {
        let base = out.as_ptr() as usize;
        NativeWriter { out, base }
    }

    fn check(written: Option<()>, offset: usize) -> Result<()> {
        written.ok_or_else(|| {
            WecError::malformed("encoded variant", offset, "write past the end of the buffer")
        })
    }

    fn u32(&mut self, offset: usize, value: u32) -> Result<()> {
        Self::check(bytes::write_u32(self.out, offset, value), offset)
    }

    fn u64(&mut self, offset: usize, value: u64) -> Result<()> {
        Self::check(bytes::write_u64(self.out, offset, value), offset)
    }

    fn raw_pointer(&mut self, offset: usize, value: usize) -> Result<()> {
        Self::check(bytes::write_pointer(self.out, offset, value), offset)
    }

    /// Stores the address of `target` (an offset into the output) at `offset`.
    fn pointer(&mut self, offset: usize, target: usize) -> Result<()> {
        self.raw_pointer(offset, self.base + target)
    }

    /// Writes the element count and, for non-empty arrays, the payload pointer.
    fn array_header(&mut self, count: usize) -> Result<()> {
        let count = u32::try_from(count).map_err(|_| WecError::InvalidArgument {
            argument: "value",
            reason: "array has too many elements",
        })?;
        self.u32(COUNT_OFFSET, count)?;
        if count > 0 {
            self.pointer(0, VARIANT_SIZE)?;
        }
        Ok(())
    }

    /// Writes `s` as NUL-terminated UTF-16LE, returning the number of bytes used.
    fn utf16z(&mut self, offset: usize, s: &str) -> Result<usize> {
        let units = encode_utf16z(s);
        for (i, unit) in units.iter().enumerate() {
            let at = offset + i * 2;
            Self::check(bytes::write_u16(self.out, at, *unit), at)?;
        }
        Ok(units.len() * 2)
    }
}

/// Encodes `value` into a freshly allocated, 8-byte aligned buffer.
pub fn encode(value: &Variant) -> Result<NativeBuffer> {
    let mut buffer = NativeBuffer::zeroed(value.encoded_len()?);
    let written = value.write_native(buffer.as_bytes_mut())?;
    trace!(
        "encoded {} variant into {} bytes",
        value.variant_type(),
        written
    );
    Ok(buffer)
}

/// Decodes the variant at the start of `buffer`, checking it against the expected type.
///
/// An empty buffer or a `Null` tag yields [`Variant::Null`]. Any other base tag that differs from
/// `expected.tag` is a [`WecError::TypeMismatch`]. The array flag is taken from the buffer.
pub fn decode(buffer: &[u8], expected: VariantType) -> Result<Variant> {
    if buffer.is_empty() {
        return Ok(Variant::Null);
    }

    let raw = bytes::read_u32_r(buffer, TYPE_OFFSET, "variant header")?;
    let count = bytes::read_u32_r(buffer, COUNT_OFFSET, "variant header")?;

    let found = VariantType::from_raw(raw).ok_or(WecError::TypeMismatch {
        expected,
        found: raw,
    })?;

    if found.tag == VariantTag::Null {
        return Ok(Variant::Null);
    }

    if found.tag != expected.tag {
        return Err(WecError::TypeMismatch {
            expected,
            found: raw,
        });
    }

    if found.array {
        decode_array(buffer, found.tag, count)
    } else {
        decode_scalar(buffer, found.tag)
    }
}

fn decode_scalar(buffer: &[u8], tag: VariantTag) -> Result<Variant> {
    let value = match tag {
        VariantTag::Null => Variant::Null,
        VariantTag::Boolean => Variant::Boolean(read_bool(buffer, 0)?),
        VariantTag::UInt32 => Variant::UInt32(bytes::read_u32_r(buffer, 0, "uint32 value")?),
        VariantTag::DateTime => Variant::DateTime(FileTime::from_raw(bytes::read_u64_r(
            buffer,
            0,
            "datetime value",
        )?)),
        VariantTag::String => {
            let pointer = bytes::read_pointer_r(buffer, 0, "string value")?;
            if pointer == 0 {
                return Ok(Variant::Null);
            }
            let offset = bytes::resolve_pointer(buffer, pointer, "string value")?;
            Variant::String(read_string_at(buffer, offset, "string value")?)
        }
        VariantTag::ObjectArrayHandle => {
            let raw = bytes::read_pointer_r(buffer, 0, "object array handle")?;
            if raw == 0 {
                return Ok(Variant::Null);
            }
            Variant::ObjectArrayHandle(RawHandle::from_raw(raw))
        }
    };
    Ok(value)
}

fn decode_array(buffer: &[u8], tag: VariantTag, count: u32) -> Result<Variant> {
    let element_size = tag.element_size().ok_or(WecError::malformed(
        "variant header",
        TYPE_OFFSET,
        "arrays of this type are not supported",
    ))?;

    let count = count as usize;
    let start = if count == 0 {
        0
    } else {
        let pointer = bytes::read_pointer_r(buffer, 0, "array payload")?;
        if pointer == 0 {
            return Err(WecError::malformed(
                "array payload",
                0,
                "null pointer with a nonzero count",
            ));
        }
        let offset = bytes::resolve_pointer(buffer, pointer, "array payload")?;
        let len = count.checked_mul(element_size).ok_or(WecError::malformed(
            "array payload",
            offset,
            "element count overflows the address space",
        ))?;
        bytes::slice_r(buffer, offset, len, "array payload")?;
        offset
    };
    let at = |i: usize| start + i * element_size;

    let value = match tag {
        VariantTag::Boolean => Variant::BooleanArray(
            (0..count)
                .map(|i| read_bool(buffer, at(i)))
                .collect::<Result<_>>()?,
        ),
        VariantTag::UInt32 => Variant::UInt32Array(
            (0..count)
                .map(|i| bytes::read_u32_r(buffer, at(i), "uint32 array"))
                .collect::<Result<_>>()?,
        ),
        VariantTag::DateTime => Variant::DateTimeArray(
            (0..count)
                .map(|i| bytes::read_u64_r(buffer, at(i), "datetime array").map(FileTime::from_raw))
                .collect::<Result<_>>()?,
        ),
        VariantTag::String => Variant::StringArray(
            (0..count)
                .map(|i| {
                    let pointer = bytes::read_pointer_r(buffer, at(i), "string array")?;
                    if pointer == 0 {
                        return Err(WecError::malformed(
                            "string array",
                            at(i),
                            "null string pointer",
                        ));
                    }
                    let offset = bytes::resolve_pointer(buffer, pointer, "string array")?;
                    read_string_at(buffer, offset, "string array")
                })
                .collect::<Result<_>>()?,
        ),
        VariantTag::Null | VariantTag::ObjectArrayHandle => unreachable!("no element size"),
    };
    Ok(value)
}

fn read_bool(buffer: &[u8], offset: usize) -> Result<bool> {
    match bytes::read_u32_r(buffer, offset, "boolean value")? {
        0 => Ok(false),
        1 => Ok(true),
        other => {
            warn!(
                "offset {}: boolean value {} is neither 0 nor 1, treating it as true",
                offset, other
            );
            Ok(true)
        }
    }
}

/// Reads a NUL-terminated UTF-16LE string. A missing terminator reads to the end of the buffer.
fn read_string_at(buffer: &[u8], offset: usize, what: &'static str) -> Result<String> {
    let tail = buffer
        .get(offset..)
        .ok_or(WecError::malformed(what, offset, "pointer outside of buffer"))?;
    let even = &tail[..tail.len() & !1];
    decode_utf16le_bytes_z(even).map_err(|e| WecError::malformed(what, offset, e.reason()))
}

fn to_delimited_list<N: ToString>(ns: &[N]) -> String {
    ns.iter()
        .map(ToString::to_string)
        .collect::<Vec<String>>()
        .join(",")
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Null => Ok(()),
            Variant::Boolean(b) => write!(f, "{}", b),
            Variant::UInt32(n) => write!(f, "{}", n),
            Variant::DateTime(ft) => write!(f, "{}", ft),
            Variant::String(s) => f.write_str(s),
            Variant::ObjectArrayHandle(h) => write!(f, "{}", h),
            Variant::BooleanArray(v) => f.write_str(&to_delimited_list(v)),
            Variant::UInt32Array(v) => f.write_str(&to_delimited_list(v)),
            Variant::DateTimeArray(v) => f.write_str(&to_delimited_list(v)),
            Variant::StringArray(v) => f.write_str(&v.join(",")),
            Variant::EventSources(v) => {
                let addresses: Vec<&str> = v.iter().map(|s| s.address.as_str()).collect();
                f.write_str(&addresses.join(","))
            }
        }
    }
}

impl From<&Variant> for Value {
    fn from(value: &Variant) -> Self {
        match value {
            Variant::Null => Value::Null,
            Variant::Boolean(b) => Value::Bool(*b),
            Variant::UInt32(n) => json!(n),
            Variant::DateTime(ft) => json!(ft.to_string()),
            Variant::String(s) => json!(s),
            Variant::ObjectArrayHandle(h) => json!(h.to_string()),
            Variant::BooleanArray(v) => json!(v),
            Variant::UInt32Array(v) => json!(v),
            Variant::DateTimeArray(v) => json!(v.iter().map(ToString::to_string).collect::<Vec<_>>()),
            Variant::StringArray(v) => json!(v),
            Variant::EventSources(v) => Value::Array(
                v.iter()
                    .map(|source| {
                        json!({
                            "address": source.address,
                            "enabled": source.enabled,
                            "user_name": source.user_name,
                        })
                    })
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Variant::Boolean(value)
    }
}

impl From<u32> for Variant {
    fn from(value: u32) -> Self {
        Variant::UInt32(value)
    }
}

impl From<FileTime> for Variant {
    fn from(value: FileTime) -> Self {
        Variant::DateTime(value)
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_owned())
    }
}

impl From<Vec<String>> for Variant {
    fn from(value: Vec<String>) -> Self {
        Variant::StringArray(value)
    }
}
