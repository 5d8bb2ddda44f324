use std::ffi::c_void;
use std::ptr;

use log::trace;

use super::{BufferCallError, BufferCallResult, EventCollectorApi, RawHandle};
use crate::buffer::NativeBuffer;
use crate::err::Win32Error;
use crate::properties::{AccessMask, OpenDisposition, RuntimeStatusKind, SubscriptionProperty};
use crate::utils::encode_utf16z;

type EcHandle = *mut c_void;
type Bool = i32;

#[link(name = "wecapi")]
unsafe extern "system" {
    fn EcOpenSubscription(subscription_name: *const u16, access_mask: u32, flags: u32) -> EcHandle;
    fn EcClose(object: EcHandle) -> Bool;
    fn EcOpenSubscriptionEnum(flags: u32) -> EcHandle;
    fn EcEnumNextSubscription(
        subscription_enum: EcHandle,
        subscription_name_buffer_size: u32,
        subscription_name_buffer: *mut u16,
        subscription_name_buffer_used: *mut u32,
    ) -> Bool;
    fn EcGetSubscriptionProperty(
        subscription: EcHandle,
        property_id: u32,
        flags: u32,
        property_value_buffer_size: u32,
        property_value_buffer: *mut c_void,
        property_value_buffer_used: *mut u32,
    ) -> Bool;
    fn EcSetSubscriptionProperty(
        subscription: EcHandle,
        property_id: u32,
        flags: u32,
        property_value: *const c_void,
    ) -> Bool;
    fn EcSaveSubscription(subscription: EcHandle, flags: u32) -> Bool;
    fn EcGetSubscriptionRunTimeStatus(
        subscription_name: *const u16,
        status_info_id: u32,
        event_source_name: *const u16,
        flags: u32,
        status_value_buffer_size: u32,
        status_value_buffer: *mut c_void,
        status_value_buffer_used: *mut u32,
    ) -> Bool;
    fn EcGetObjectArraySize(object_array: EcHandle, object_array_size: *mut u32) -> Bool;
    fn EcGetObjectArrayProperty(
        object_array: EcHandle,
        property_id: u32,
        array_index: u32,
        flags: u32,
        property_value_buffer_size: u32,
        property_value_buffer: *mut c_void,
        property_value_buffer_used: *mut u32,
    ) -> Bool;
    fn EcDeleteSubscription(subscription_name: *const u16, flags: u32) -> Bool;
}

#[link(name = "kernel32")]
unsafe extern "system" {
    fn GetLastError() -> u32;
    fn SetLastError(code: u32);
}

/// `wecapi.dll`, the collector API shipped with Windows.
///
/// Stateless: every call goes straight to the corresponding native function.
#[derive(Debug, Default, Copy, Clone)]
pub struct WecApi;

impl WecApi {
    pub fn new() -> Self {
        WecApi
    }
}

fn handle_ptr(handle: RawHandle) -> EcHandle {
    handle.as_raw() as EcHandle
}

/// Runs `call` with a cleared last-error slot and returns the status it left behind.
fn with_last_error<T>(call: impl FnOnce() -> T) -> (T, Win32Error) {
    // SAFETY: thread-local error slot, no pointers involved.
    unsafe { SetLastError(0) };
    let value = call();
    // SAFETY: as above.
    let status = Win32Error::new(unsafe { GetLastError() });
    (value, status)
}

fn check(ok: Bool, status: Win32Error) -> Result<(), Win32Error> {
    if ok != 0 { Ok(()) } else { Err(status) }
}

fn open_result(handle: EcHandle, status: Win32Error) -> Result<RawHandle, Win32Error> {
    let raw = RawHandle::from_raw(handle as usize);
    match (raw.is_null(), status.is_success()) {
        (false, true) => Ok(raw),
        (true, true) => Err(Win32Error::INVALID_HANDLE),
        (true, false) => Err(status),
        (false, false) => {
            // The call reported an error yet produced a handle; release it so nothing leaks.
            // SAFETY: `handle` was just returned by the native layer and is not shared.
            unsafe { EcClose(handle) };
            Err(status)
        }
    }
}

/// Issues a buffer-filling call. `unit` is the size of one counted element in bytes.
fn fill_buffer(
    buffer: &mut [u8],
    unit: usize,
    call: impl FnOnce(u32, *mut c_void, *mut u32) -> Bool,
) -> BufferCallResult {
    let size = u32::try_from(buffer.len() / unit)
        .map_err(|_| BufferCallError::new(Win32Error::INVALID_PARAMETER))?;
    let data = if buffer.is_empty() {
        ptr::null_mut()
    } else {
        buffer.as_mut_ptr().cast::<c_void>()
    };
    let mut used = 0u32;
    let (ok, status) = with_last_error(|| call(size, data, &mut used));
    trace!(
        "native buffer call: size={} used={} ok={} status={}",
        size,
        used,
        ok,
        status.code()
    );
    if ok != 0 {
        Ok(used as usize)
    } else {
        Err(BufferCallError {
            status,
            required: used as usize,
        })
    }
}

fn optional_wide(s: Option<&str>) -> Option<Vec<u16>> {
    s.map(encode_utf16z)
}

impl EventCollectorApi for WecApi {
    fn open_subscription(
        &self,
        name: &str,
        access: AccessMask,
        disposition: OpenDisposition,
    ) -> Result<RawHandle, Win32Error> {
        let name = encode_utf16z(name);
        let (handle, status) = with_last_error(|| {
            // SAFETY: `name` is NUL-terminated and outlives the call.
            unsafe { EcOpenSubscription(name.as_ptr(), access.bits(), disposition.as_u32()) }
        });
        open_result(handle, status)
    }

    fn close(&self, handle: RawHandle) -> Result<(), Win32Error> {
        // SAFETY: the caller owns `handle` and never uses it again.
        let (ok, status) = with_last_error(|| unsafe { EcClose(handle_ptr(handle)) });
        check(ok, status)
    }

    fn open_subscription_enum(&self) -> Result<RawHandle, Win32Error> {
        // SAFETY: no pointer arguments.
        let (handle, status) = with_last_error(|| unsafe { EcOpenSubscriptionEnum(0) });
        open_result(handle, status)
    }

    fn enum_next_subscription(
        &self,
        enumeration: RawHandle,
        buffer: &mut [u8],
    ) -> BufferCallResult {
        // The name buffer is counted in WCHARs, `NativeBuffer` storage is 8-byte aligned.
        fill_buffer(buffer, 2, |size, data, used| {
            // SAFETY: `data` is null or points at `size` writable WCHARs.
            unsafe { EcEnumNextSubscription(handle_ptr(enumeration), size, data.cast(), used) }
        })
    }

    fn get_subscription_property(
        &self,
        subscription: RawHandle,
        property: SubscriptionProperty,
        buffer: &mut [u8],
    ) -> BufferCallResult {
        fill_buffer(buffer, 1, |size, data, used| {
            // SAFETY: `data` is null or points at `size` writable, aligned bytes.
            unsafe {
                EcGetSubscriptionProperty(
                    handle_ptr(subscription),
                    property.id(),
                    0,
                    size,
                    data,
                    used,
                )
            }
        })
    }

    fn set_subscription_property(
        &self,
        subscription: RawHandle,
        property: SubscriptionProperty,
        value: &NativeBuffer,
    ) -> Result<(), Win32Error> {
        let (ok, status) = with_last_error(|| {
            // SAFETY: `value` holds a complete EC_VARIANT whose pointers address `value` itself.
            unsafe {
                EcSetSubscriptionProperty(
                    handle_ptr(subscription),
                    property.id(),
                    0,
                    value.as_ptr().cast(),
                )
            }
        });
        check(ok, status)
    }

    fn save_subscription(&self, subscription: RawHandle) -> Result<(), Win32Error> {
        // SAFETY: handle owned by the caller.
        let (ok, status) =
            with_last_error(|| unsafe { EcSaveSubscription(handle_ptr(subscription), 0) });
        check(ok, status)
    }

    fn get_runtime_status(
        &self,
        subscription: &str,
        status: RuntimeStatusKind,
        event_source: Option<&str>,
        buffer: &mut [u8],
    ) -> BufferCallResult {
        let name = encode_utf16z(subscription);
        let source = optional_wide(event_source);
        let source_ptr = source.as_ref().map_or(ptr::null(), |s| s.as_ptr());
        fill_buffer(buffer, 1, |size, data, used| {
            // SAFETY: both names are NUL-terminated (or null) and outlive the call.
            unsafe {
                EcGetSubscriptionRunTimeStatus(
                    name.as_ptr(),
                    status.id(),
                    source_ptr,
                    0,
                    size,
                    data,
                    used,
                )
            }
        })
    }

    fn get_object_array_size(&self, array: RawHandle) -> Result<u32, Win32Error> {
        let mut size = 0u32;
        let (ok, status) =
            // SAFETY: `size` is a valid out pointer for the duration of the call.
            with_last_error(|| unsafe { EcGetObjectArraySize(handle_ptr(array), &mut size) });
        check(ok, status).map(|_| size)
    }

    fn get_object_array_property(
        &self,
        array: RawHandle,
        property: SubscriptionProperty,
        index: u32,
        buffer: &mut [u8],
    ) -> BufferCallResult {
        fill_buffer(buffer, 1, |size, data, used| {
            // SAFETY: `data` is null or points at `size` writable, aligned bytes.
            unsafe {
                EcGetObjectArrayProperty(
                    handle_ptr(array),
                    property.id(),
                    index,
                    0,
                    size,
                    data,
                    used,
                )
            }
        })
    }

    fn delete_subscription(&self, name: &str) -> Result<(), Win32Error> {
        let name = encode_utf16z(name);
        // SAFETY: `name` is NUL-terminated and outlives the call.
        let (ok, status) = with_last_error(|| unsafe { EcDeleteSubscription(name.as_ptr(), 0) });
        check(ok, status)
    }
}
