//! Buffers handed to the native layer, and the probe-then-fetch protocol used to size them.
//!
//! Every buffer-filling collector call is issued twice: once with no buffer so the callee can
//! report how much it needs, then once with a buffer of exactly that size.

use std::fmt;

use log::{debug, trace};

use crate::err::{CallContext, Result, WecError, Win32Error};
use crate::native::BufferCallResult;

/// An 8-byte aligned, zero-initialised byte buffer.
///
/// Native variants embed pointers and `FILETIME`s, so the storage is a `Vec<u64>` rather than a
/// `Vec<u8>`. The heap allocation never moves while the buffer is alive, which keeps pointers
/// written into it valid when the `NativeBuffer` itself is moved.
pub struct NativeBuffer {
    words: Vec<u64>,
    len: usize,
}

impl NativeBuffer {
    pub fn empty() -> Self {
        NativeBuffer {
            words: Vec::new(),
            len: 0,
        }
    }

    pub fn zeroed(len: usize) -> Self {
        NativeBuffer {
            words: vec![0; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `words` owns at least `len` initialised bytes, and `u8` has no alignment
        // requirement. For an empty buffer the pointer is dangling but non-null and `len` is 0.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as for `as_bytes`, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast(), self.len) }
    }
}

impl Default for NativeBuffer {
    fn default() -> Self {
        NativeBuffer::empty()
    }
}

impl fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("len", &self.len)
            .field("ptr", &self.as_ptr())
            .finish()
    }
}

/// The unit a native call uses to report its required size.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SizeUnit {
    Bytes,
    /// UTF-16 code units, as used by `EcEnumNextSubscription`.
    WideChars,
}

impl SizeUnit {
    /// Converts a size in this unit to bytes, `None` on overflow.
    pub fn to_bytes(self, size: usize) -> Option<usize> {
        match self {
            SizeUnit::Bytes => Some(size),
            SizeUnit::WideChars => size.checked_mul(2),
        }
    }
}

/// Outcome of a probe-then-fetch exchange.
#[derive(Debug)]
pub enum Fetched {
    Data(NativeBuffer),
    /// The probe reported `ERROR_NO_MORE_ITEMS`.
    EndOfSequence,
}

/// Runs the probe-then-fetch protocol against `call`.
///
/// `call` receives the buffer to fill (empty for the probe) and returns the native outcome. It is
/// invoked exactly once with an empty buffer and, if the callee asked for space, exactly once more
/// with a buffer of the reported size. A required size of zero, or one above `limit` bytes, is an
/// error; no retry loop is attempted if the second call fails.
pub fn probe_and_fetch<F>(
    context: &CallContext<'_>,
    unit: SizeUnit,
    limit: usize,
    mut call: F,
) -> Result<Fetched>
where
    F: FnMut(&mut [u8]) -> BufferCallResult,
{
    let required = match call(&mut []) {
        Ok(_) => {
            debug!("`{}` succeeded without a buffer", context.api);
            return Ok(Fetched::Data(NativeBuffer::empty()));
        }
        Err(e) if e.status == Win32Error::NO_MORE_ITEMS => {
            trace!("`{}` reported no more items", context.api);
            return Ok(Fetched::EndOfSequence);
        }
        Err(e) if e.status == Win32Error::INSUFFICIENT_BUFFER => e.required,
        Err(e) => return Err(context.failed(e.status)),
    };

    if required == 0 {
        return Err(context.failed(Win32Error::INSUFFICIENT_BUFFER));
    }

    let size = match unit.to_bytes(required) {
        Some(size) if size <= limit => size,
        other => {
            return Err(WecError::BufferLimitExceeded {
                api: context.api,
                required: other.unwrap_or(usize::MAX),
                limit,
            });
        }
    };

    trace!(
        "`{}` requires {} units ({:?}), allocating {} bytes",
        context.api, required, unit, size
    );

    let mut buffer = NativeBuffer::zeroed(size);
    match call(buffer.as_bytes_mut()) {
        Ok(_) => Ok(Fetched::Data(buffer)),
        Err(e) => {
            debug!(
                "`{}` failed with a {} byte buffer: {}",
                context.api, size, e.status
            );
            Err(context.failed(e.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensure_env_logger_initialized;
    use crate::native::BufferCallError;
    use pretty_assertions::assert_eq;

    const LIMIT: usize = 1024;

    fn context() -> CallContext<'static> {
        CallContext::new("EcGetSubscriptionProperty").subscription("Sub1")
    }

    fn data(fetched: Fetched) -> NativeBuffer {
        match fetched {
            Fetched::Data(buffer) => buffer,
            Fetched::EndOfSequence => panic!("unexpected end of sequence"),
        }
    }

    #[test]
    fn test_probes_once_then_fetches_exact_size() {
        ensure_env_logger_initialized();
        let mut sizes = vec![];

        let fetched = probe_and_fetch(&context(), SizeUnit::Bytes, LIMIT, |buf| {
            sizes.push(buf.len());
            if buf.is_empty() {
                Err(BufferCallError::insufficient(40))
            } else {
                buf[0] = 0xaa;
                Ok(buf.len())
            }
        })
        .unwrap();

        assert_eq!(sizes, vec![0, 40]);
        let buffer = data(fetched);
        assert_eq!(buffer.len(), 40);
        assert_eq!(buffer.as_bytes()[0], 0xaa);
        assert_eq!(buffer.as_ptr() as usize % 8, 0);
    }

    #[test]
    fn test_wide_char_sizes_are_doubled() {
        let mut sizes = vec![];
        let fetched = probe_and_fetch(&context(), SizeUnit::WideChars, LIMIT, |buf| {
            sizes.push(buf.len());
            if buf.is_empty() {
                Err(BufferCallError::insufficient(5))
            } else {
                Ok(5)
            }
        })
        .unwrap();

        assert_eq!(sizes, vec![0, 10]);
        assert_eq!(data(fetched).len(), 10);
    }

    #[test]
    fn test_second_failure_is_not_retried() {
        let mut calls = 0;
        let err = probe_and_fetch(&context(), SizeUnit::Bytes, LIMIT, |buf| {
            calls += 1;
            if buf.is_empty() {
                Err(BufferCallError::insufficient(64))
            } else {
                // The value grew in between the two calls.
                Err(BufferCallError::insufficient(128))
            }
        })
        .unwrap_err();

        assert_eq!(calls, 2);
        assert_eq!(err.native_code(), Some(Win32Error::INSUFFICIENT_BUFFER.code()));
    }

    #[test]
    fn test_no_more_items_ends_the_sequence() {
        let mut calls = 0;
        let fetched = probe_and_fetch(&context(), SizeUnit::WideChars, LIMIT, |_| {
            calls += 1;
            Err(BufferCallError::new(Win32Error::NO_MORE_ITEMS))
        })
        .unwrap();

        assert_eq!(calls, 1);
        assert!(matches!(fetched, Fetched::EndOfSequence));
    }

    #[test]
    fn test_probe_success_yields_an_empty_buffer() {
        let fetched = probe_and_fetch(&context(), SizeUnit::Bytes, LIMIT, |_| Ok(0)).unwrap();
        assert!(data(fetched).is_empty());
    }

    #[test]
    fn test_unexpected_probe_status_is_reported() {
        let err = probe_and_fetch(&context(), SizeUnit::Bytes, LIMIT, |_| {
            Err(BufferCallError::new(Win32Error::ACCESS_DENIED))
        })
        .unwrap_err();

        match err {
            WecError::NativeCallFailed {
                api,
                subscription,
                code,
                ..
            } => {
                assert_eq!(api, "EcGetSubscriptionProperty");
                assert_eq!(subscription.as_deref(), Some("Sub1"));
                assert_eq!(code, 5);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_zero_required_size_is_an_error() {
        let mut calls = 0;
        let err = probe_and_fetch(&context(), SizeUnit::Bytes, LIMIT, |_| {
            calls += 1;
            Err(BufferCallError::insufficient(0))
        })
        .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err.native_code(), Some(Win32Error::INSUFFICIENT_BUFFER.code()));
    }

    #[test]
    fn test_limit_is_enforced_before_allocating() {
        let mut calls = 0;
        let err = probe_and_fetch(&context(), SizeUnit::WideChars, LIMIT, |_| {
            calls += 1;
            Err(BufferCallError::insufficient(LIMIT))
        })
        .unwrap_err();

        assert_eq!(calls, 1);
        match err {
            WecError::BufferLimitExceeded {
                required, limit, ..
            } => {
                assert_eq!(required, LIMIT * 2);
                assert_eq!(limit, LIMIT);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_native_buffer_rounds_storage_up() {
        let buffer = NativeBuffer::zeroed(13);
        assert_eq!(buffer.len(), 13);
        assert_eq!(buffer.as_bytes(), &[0u8; 13][..]);
        assert!(NativeBuffer::empty().as_bytes().is_empty());
    }
}
