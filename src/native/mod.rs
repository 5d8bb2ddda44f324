//! The boundary to the native collector API.
//!
//! Every native function is reached through [`EventCollectorApi`], so the client can run against
//! `wecapi.dll` ([`WecApi`], Windows only) or against a test double.

use std::fmt;

use crate::buffer::NativeBuffer;
use crate::err::Win32Error;
use crate::properties::{AccessMask, OpenDisposition, RuntimeStatusKind, SubscriptionProperty};

#[cfg(windows)]
mod wecapi;

#[cfg(windows)]
pub use self::wecapi::WecApi;

/// An opaque native handle (`EC_HANDLE`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct RawHandle(usize);

impl RawHandle {
    pub const NULL: RawHandle = RawHandle(0);

    pub const fn from_raw(value: usize) -> Self {
        RawHandle(value)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle(0x{:x})", self.0)
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Failure of a call that fills a caller-supplied buffer.
///
/// `required` is only meaningful when `status` is [`Win32Error::INSUFFICIENT_BUFFER`], and is
/// expressed in the unit of the call (see [`crate::buffer::SizeUnit`]).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferCallError {
    pub status: Win32Error,
    pub required: usize,
}

impl BufferCallError {
    pub fn new(status: Win32Error) -> Self {
        BufferCallError {
            status,
            required: 0,
        }
    }

    pub fn insufficient(required: usize) -> Self {
        BufferCallError {
            status: Win32Error::INSUFFICIENT_BUFFER,
            required,
        }
    }
}

pub type BufferCallResult = Result<usize, BufferCallError>;

/// The native Windows Event Collector functions.
///
/// Buffer-filling calls receive the whole caller buffer (possibly empty) and return the number of
/// units used. Property, status and object-array calls count bytes; `enum_next_subscription`
/// counts UTF-16 code units, including the terminator.
pub trait EventCollectorApi {
    fn open_subscription(
        &self,
        name: &str,
        access: AccessMask,
        disposition: OpenDisposition,
    ) -> Result<RawHandle, Win32Error>;

    fn close(&self, handle: RawHandle) -> Result<(), Win32Error>;

    fn open_subscription_enum(&self) -> Result<RawHandle, Win32Error>;

    fn enum_next_subscription(&self, enumeration: RawHandle, buffer: &mut [u8])
    -> BufferCallResult;

    fn get_subscription_property(
        &self,
        subscription: RawHandle,
        property: SubscriptionProperty,
        buffer: &mut [u8],
    ) -> BufferCallResult;

    /// `value` holds an encoded `EC_VARIANT` together with its payload.
    fn set_subscription_property(
        &self,
        subscription: RawHandle,
        property: SubscriptionProperty,
        value: &NativeBuffer,
    ) -> Result<(), Win32Error>;

    fn save_subscription(&self, subscription: RawHandle) -> Result<(), Win32Error>;

    fn get_runtime_status(
        &self,
        subscription: &str,
        status: RuntimeStatusKind,
        event_source: Option<&str>,
        buffer: &mut [u8],
    ) -> BufferCallResult;

    fn get_object_array_size(&self, array: RawHandle) -> Result<u32, Win32Error>;

    fn get_object_array_property(
        &self,
        array: RawHandle,
        property: SubscriptionProperty,
        index: u32,
        buffer: &mut [u8],
    ) -> BufferCallResult;

    fn delete_subscription(&self, name: &str) -> Result<(), Win32Error>;
}

impl<T: EventCollectorApi + ?Sized> EventCollectorApi for &T {
    fn open_subscription(
        &self,
        name: &str,
        access: AccessMask,
        disposition: OpenDisposition,
    ) -> Result<RawHandle, Win32Error> {
        (**self).open_subscription(name, access, disposition)
    }

    fn close(&self, handle: RawHandle) -> Result<(), Win32Error> {
        (**self).close(handle)
    }

    fn open_subscription_enum(&self) -> Result<RawHandle, Win32Error> {
        (**self).open_subscription_enum()
    }

    fn enum_next_subscription(
        &self,
        enumeration: RawHandle,
        buffer: &mut [u8],
    ) -> BufferCallResult {
        (**self).enum_next_subscription(enumeration, buffer)
    }

    fn get_subscription_property(
        &self,
        subscription: RawHandle,
        property: SubscriptionProperty,
        buffer: &mut [u8],
    ) -> BufferCallResult {
        (**self).get_subscription_property(subscription, property, buffer)
    }

    fn set_subscription_property(
        &self,
        subscription: RawHandle,
        property: SubscriptionProperty,
        value: &NativeBuffer,
    ) -> Result<(), Win32Error> {
        (**self).set_subscription_property(subscription, property, value)
    }

    fn save_subscription(&self, subscription: RawHandle) -> Result<(), Win32Error> {
        (**self).save_subscription(subscription)
    }

    fn get_runtime_status(
        &self,
        subscription: &str,
        status: RuntimeStatusKind,
        event_source: Option<&str>,
        buffer: &mut [u8],
    ) -> BufferCallResult {
        (**self).get_runtime_status(subscription, status, event_source, buffer)
    }

    fn get_object_array_size(&self, array: RawHandle) -> Result<u32, Win32Error> {
        (**self).get_object_array_size(array)
    }

    fn get_object_array_property(
        &self,
        array: RawHandle,
        property: SubscriptionProperty,
        index: u32,
        buffer: &mut [u8],
    ) -> BufferCallResult {
        (**self).get_object_array_property(array, property, index, buffer)
    }

    fn delete_subscription(&self, name: &str) -> Result<(), Win32Error> {
        (**self).delete_subscription(name)
    }
}
