//! Bounds-checked little-endian access to native result buffers.
//!
//! Two layers, as with the rest of the codec:
//! - **Option layer** (`read_*` / `write_*`): return `None` when the range is out of bounds.
//! - **Result layer** (`*_r`): map `None` to [`WecError::MalformedBuffer`].
//!
//! Offsets are relative to the slice passed in. Pointer-sized values use the width of the
//! current target, matching what the native layer writes into the same process.

use byteorder::{ByteOrder, LittleEndian};

use crate::err::WecError;

pub(crate) const POINTER_SIZE: usize = std::mem::size_of::<usize>();

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    Some(LittleEndian::read_u32(slice(buf, offset, 4)?))
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    Some(LittleEndian::read_u64(slice(buf, offset, 8)?))
}

pub(crate) fn read_pointer(buf: &[u8], offset: usize) -> Option<usize> {
    let bytes = slice(buf, offset, POINTER_SIZE)?;
    Some(LittleEndian::read_uint(bytes, POINTER_SIZE) as usize)
}

pub(crate) fn slice(buf: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    buf.get(offset..end)
}

fn slice_mut(buf: &mut [u8], offset: usize, len: usize) -> Option<&mut [u8]> {
    let end = offset.checked_add(len)?;
    buf.get_mut(offset..end)
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) -> Option<()> {
    LittleEndian::write_u32(slice_mut(buf, offset, 4)?, value);
    Some(())
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) -> Option<()> {
    LittleEndian::write_u64(slice_mut(buf, offset, 8)?, value);
    Some(())
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) -> Option<()> {
    LittleEndian::write_u16(slice_mut(buf, offset, 2)?, value);
    Some(())
}

pub(crate) fn write_pointer(buf: &mut [u8], offset: usize, value: usize) -> Option<()> {
    LittleEndian::write_uint(
        slice_mut(buf, offset, POINTER_SIZE)?,
        value as u64,
        POINTER_SIZE,
    );
    Some(())
}

#[inline]
fn truncated(what: &'static str, offset: usize) -> WecError {
    WecError::malformed(what, offset, "read past the end of the buffer")
}

pub(crate) fn read_u32_r(buf: &[u8], offset: usize, what: &'static str) -> Result<u32, WecError> {
    read_u32(buf, offset).ok_or_else(|| truncated(what, offset))
}

pub(crate) fn read_u64_r(buf: &[u8], offset: usize, what: &'static str) -> Result<u64, WecError> {
    read_u64(buf, offset).ok_or_else(|| truncated(what, offset))
}

pub(crate) fn read_pointer_r(
    buf: &[u8],
    offset: usize,
    what: &'static str,
) -> Result<usize, WecError> {
    read_pointer(buf, offset).ok_or_else(|| truncated(what, offset))
}

pub(crate) fn slice_r<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], WecError> {
    slice(buf, offset, len).ok_or_else(|| truncated(what, offset))
}

/// Translates an absolute address embedded in `buf` into an offset inside `buf`.
///
/// The native layer stores variable-length payloads after the fixed struct and points at them
/// with real addresses, so every pointer must land inside the buffer it was read from.
pub(crate) fn resolve_pointer(
    buf: &[u8],
    pointer: usize,
    what: &'static str,
) -> Result<usize, WecError> {
    let base = buf.as_ptr() as usize;
    match pointer.checked_sub(base) {
        Some(offset) if offset < buf.len() => Ok(offset),
        _ => Err(WecError::malformed(
            what,
            pointer.wrapping_sub(base),
            "pointer outside of buffer",
        )),
    }
}
