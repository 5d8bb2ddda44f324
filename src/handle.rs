//! Scoped ownership of native handles.
//!
//! A [`HandleGuard`] closes its handle exactly once: explicitly through [`HandleGuard::close`],
//! or when dropped on any other exit path, including early returns on error.

use log::{trace, warn};

use crate::err::{CallContext, Result, WecError, Win32Error};
use crate::native::{EventCollectorApi, RawHandle};
use crate::properties::{AccessMask, OpenDisposition};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandleKind {
    Subscription,
    Enumeration,
    ObjectArray,
}

pub struct HandleGuard<'a, A: EventCollectorApi + ?Sized> {
    api: &'a A,
    raw: RawHandle,
    kind: HandleKind,
    open: bool,
}

impl<'a, A: EventCollectorApi + ?Sized> HandleGuard<'a, A> {
    /// Takes ownership of `raw`. A null handle is never adopted.
    pub fn adopt(api: &'a A, raw: RawHandle, kind: HandleKind) -> Option<Self> {
        if raw.is_null() {
            return None;
        }
        trace!("adopted {:?} handle {}", kind, raw);
        Some(HandleGuard {
            api,
            raw,
            kind,
            open: true,
        })
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Closes the handle now, reporting a failure instead of logging it.
    pub fn close(mut self) -> Result<()> {
        self.open = false;
        trace!("closing {:?} handle {}", self.kind, self.raw);
        self.api
            .close(self.raw)
            .map_err(|status| CallContext::new("EcClose").failed(status))
    }
}

impl<A: EventCollectorApi + ?Sized> Drop for HandleGuard<'_, A> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        trace!("releasing {:?} handle {}", self.kind, self.raw);
        if let Err(status) = self.api.close(self.raw) {
            warn!(
                "failed to close {:?} handle {}: {}",
                self.kind, self.raw, status
            );
        }
    }
}

/// Opens `name` and wraps the result. A null handle is reported as [`WecError::OpenFailed`].
pub fn open_subscription<'a, A: EventCollectorApi + ?Sized>(
    api: &'a A,
    name: &str,
    access: AccessMask,
    disposition: OpenDisposition,
) -> Result<HandleGuard<'a, A>> {
    let raw = api
        .open_subscription(name, access, disposition)
        .map_err(|status| WecError::open_failed(name, status))?;
    HandleGuard::adopt(api, raw, HandleKind::Subscription)
        .ok_or_else(|| WecError::open_failed(name, Win32Error::INVALID_HANDLE))
}

pub fn open_subscription_enum<A: EventCollectorApi + ?Sized>(
    api: &A,
) -> Result<HandleGuard<'_, A>> {
    let context = CallContext::new("EcOpenSubscriptionEnum");
    let raw = api
        .open_subscription_enum()
        .map_err(|status| context.failed(status))?;
    HandleGuard::adopt(api, raw, HandleKind::Enumeration)
        .ok_or_else(|| context.failed(Win32Error::INVALID_HANDLE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::NativeBuffer;
    use crate::native::{BufferCallError, BufferCallResult};
    use crate::properties::{RuntimeStatusKind, SubscriptionProperty};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    /// Hands out sequential handles and records every close.
    #[derive(Default)]
    struct CountingApi {
        next: RefCell<usize>,
        closed: RefCell<Vec<RawHandle>>,
        open_result: Option<RawHandle>,
        fail_close: bool,
    }

    impl EventCollectorApi for CountingApi {
        fn open_subscription(
            &self,
            _name: &str,
            _access: AccessMask,
            _disposition: OpenDisposition,
        ) -> std::result::Result<RawHandle, Win32Error> {
            if let Some(raw) = self.open_result {
                return Ok(raw);
            }
            let mut next = self.next.borrow_mut();
            *next += 1;
            Ok(RawHandle::from_raw(*next))
        }

        fn close(&self, handle: RawHandle) -> std::result::Result<(), Win32Error> {
            self.closed.borrow_mut().push(handle);
            if self.fail_close {
                Err(Win32Error::INVALID_HANDLE)
            } else {
                Ok(())
            }
        }

        fn open_subscription_enum(&self) -> std::result::Result<RawHandle, Win32Error> {
            Err(Win32Error::ACCESS_DENIED)
        }

        fn enum_next_subscription(&self, _: RawHandle, _: &mut [u8]) -> BufferCallResult {
            Err(BufferCallError::new(Win32Error::NO_MORE_ITEMS))
        }

        fn get_subscription_property(
            &self,
            _: RawHandle,
            _: SubscriptionProperty,
            _: &mut [u8],
        ) -> BufferCallResult {
            Err(BufferCallError::new(Win32Error::NOT_FOUND))
        }

        fn set_subscription_property(
            &self,
            _: RawHandle,
            _: SubscriptionProperty,
            _: &NativeBuffer,
        ) -> std::result::Result<(), Win32Error> {
            Ok(())
        }

        fn save_subscription(&self, _: RawHandle) -> std::result::Result<(), Win32Error> {
            Ok(())
        }

        fn get_runtime_status(
            &self,
            _: &str,
            _: RuntimeStatusKind,
            _: Option<&str>,
            _: &mut [u8],
        ) -> BufferCallResult {
            Err(BufferCallError::new(Win32Error::NOT_FOUND))
        }

        fn get_object_array_size(&self, _: RawHandle) -> std::result::Result<u32, Win32Error> {
            Ok(0)
        }

        fn get_object_array_property(
            &self,
            _: RawHandle,
            _: SubscriptionProperty,
            _: u32,
            _: &mut [u8],
        ) -> BufferCallResult {
            Err(BufferCallError::new(Win32Error::NOT_FOUND))
        }

        fn delete_subscription(&self, _: &str) -> std::result::Result<(), Win32Error> {
            Ok(())
        }
    }

    fn open(api: &CountingApi) -> Result<HandleGuard<'_, CountingApi>> {
        open_subscription(api, "Sub1", AccessMask::READ, OpenDisposition::OpenExisting)
    }

    #[test]
    fn test_drop_closes_exactly_once() {
        let api = CountingApi::default();
        {
            let guard = open(&api).unwrap();
            assert_eq!(guard.kind(), HandleKind::Subscription);
            assert_eq!(guard.raw(), RawHandle::from_raw(1));
        }
        assert_eq!(*api.closed.borrow(), vec![RawHandle::from_raw(1)]);
    }

    #[test]
    fn test_explicit_close_is_not_repeated_on_drop() {
        let api = CountingApi::default();
        let guard = open(&api).unwrap();
        guard.close().unwrap();
        assert_eq!(api.closed.borrow().len(), 1);
    }

    #[test]
    fn test_close_failure_is_reported_by_explicit_close() {
        let api = CountingApi {
            fail_close: true,
            ..Default::default()
        };
        let err = open(&api).unwrap().close().unwrap_err();
        assert_eq!(err.native_code(), Some(Win32Error::INVALID_HANDLE.code()));

        // Dropping only logs.
        drop(open(&api).unwrap());
        assert_eq!(api.closed.borrow().len(), 2);
    }

    #[test]
    fn test_null_handle_is_an_open_failure_and_never_closed() {
        let api = CountingApi {
            open_result: Some(RawHandle::NULL),
            ..Default::default()
        };
        match open(&api) {
            Err(WecError::OpenFailed {
                subscription, code, ..
            }) => {
                assert_eq!(subscription, "Sub1");
                assert_eq!(code, Win32Error::INVALID_HANDLE.code());
            }
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("null handle was adopted"),
        }
        assert!(api.closed.borrow().is_empty());
    }

    #[test]
    fn test_enumeration_open_failure_names_the_call() {
        let api = CountingApi::default();
        match open_subscription_enum(&api) {
            Err(WecError::NativeCallFailed { api, code, .. }) => {
                assert_eq!(api, "EcOpenSubscriptionEnum");
                assert_eq!(code, Win32Error::ACCESS_DENIED.code());
            }
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("enumeration unexpectedly opened"),
        }
    }
}
