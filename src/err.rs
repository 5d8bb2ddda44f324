use std::fmt;

use thiserror::Error;

use crate::variant::VariantType;

pub type Result<T> = std::result::Result<T, WecError>;

/// A platform status code, as returned by `GetLastError` right after a native call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Win32Error(u32);

impl Win32Error {
    pub const SUCCESS: Win32Error = Win32Error(0);
    pub const FILE_NOT_FOUND: Win32Error = Win32Error(2);
    pub const ACCESS_DENIED: Win32Error = Win32Error(5);
    pub const INVALID_HANDLE: Win32Error = Win32Error(6);
    pub const INVALID_DATA: Win32Error = Win32Error(13);
    pub const INVALID_PARAMETER: Win32Error = Win32Error(87);
    pub const INSUFFICIENT_BUFFER: Win32Error = Win32Error(122);
    pub const NO_MORE_ITEMS: Win32Error = Win32Error(259);
    pub const NOT_FOUND: Win32Error = Win32Error(1168);

    pub const fn new(code: u32) -> Self {
        Win32Error(code)
    }

    pub const fn code(self) -> u32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Win32Error::SUCCESS
    }

    /// The system message for this code.
    ///
    /// On Windows this is the localized text from the OS message table.
    #[cfg(windows)]
    pub fn message(self) -> String {
        // `io::Error` appends its own " (os error N)", the code is rendered by `Display` instead.
        let rendered = std::io::Error::from_raw_os_error(self.0 as i32).to_string();
        let suffix = format!(" (os error {})", self.0 as i32);
        rendered
            .strip_suffix(suffix.as_str())
            .unwrap_or(&rendered)
            .trim_end()
            .to_owned()
    }

    /// The system message for this code.
    ///
    /// Off Windows there is no message table to consult, so only the codes this crate reacts to
    /// are described.
    #[cfg(not(windows))]
    pub fn message(self) -> String {
        let text = match self {
            Win32Error::SUCCESS => "The operation completed successfully.",
            Win32Error::FILE_NOT_FOUND => "The system cannot find the file specified.",
            Win32Error::ACCESS_DENIED => "Access is denied.",
            Win32Error::INVALID_HANDLE => "The handle is invalid.",
            Win32Error::INVALID_DATA => "The data is invalid.",
            Win32Error::INVALID_PARAMETER => "The parameter is incorrect.",
            Win32Error::INSUFFICIENT_BUFFER => {
                "The data area passed to a system call is too small."
            }
            Win32Error::NO_MORE_ITEMS => "No more data is available.",
            Win32Error::NOT_FOUND => "Element not found.",
            _ => return format!("Unknown Win32 error {}", self.0),
        };
        text.to_owned()
    }
}

impl fmt::Display for Win32Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08x})", self.message().trim_end(), self.0)
    }
}

#[derive(Debug, Error)]
pub enum WecError {
    #[error("Failed to open subscription `{subscription}`: {message} (0x{code:08x})")]
    OpenFailed {
        subscription: String,
        code: u32,
        message: String,
    },

    #[error(
        "`{api}` failed{}: {message} (0x{code:08x})",
        describe_target(.subscription, .event_source)
    )]
    NativeCallFailed {
        api: &'static str,
        subscription: Option<String>,
        event_source: Option<String>,
        code: u32,
        message: String,
    },

    #[error("Variant type mismatch, expected `{expected}`, found raw type 0x{found:02x}")]
    TypeMismatch { expected: VariantType, found: u32 },

    #[error("Invalid argument `{argument}`: {reason}")]
    InvalidArgument {
        argument: &'static str,
        reason: &'static str,
    },

    #[error("Offset {offset}: malformed {what}: {reason}")]
    MalformedBuffer {
        what: &'static str,
        offset: usize,
        reason: &'static str,
    },

    #[error("`{api}` requested a {required} byte buffer, which exceeds the limit of {limit} bytes")]
    BufferLimitExceeded {
        api: &'static str,
        required: usize,
        limit: usize,
    },

    #[error("FILETIME value {raw} is outside the representable range")]
    InvalidFileTime { raw: u64 },
}

fn describe_target(subscription: &Option<String>, event_source: &Option<String>) -> String {
    match (subscription.as_deref(), event_source.as_deref()) {
        (Some(s), Some(e)) => format!(" for subscription `{}`, event source `{}`", s, e),
        (Some(s), None) => format!(" for subscription `{}`", s),
        (None, Some(e)) => format!(" for event source `{}`", e),
        (None, None) => String::new(),
    }
}

/// Names the native call and the objects it was acting on.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub api: &'static str,
    pub subscription: Option<&'a str>,
    pub event_source: Option<&'a str>,
}

impl<'a> CallContext<'a> {
    pub fn new(api: &'static str) -> Self {
        CallContext {
            api,
            subscription: None,
            event_source: None,
        }
    }

    pub fn subscription(mut self, name: &'a str) -> Self {
        self.subscription = Some(name);
        self
    }

    pub fn event_source(mut self, name: Option<&'a str>) -> Self {
        self.event_source = name;
        self
    }

    /// Translates a native status into a structured error for this call.
    pub fn failed(&self, status: Win32Error) -> WecError {
        WecError::NativeCallFailed {
            api: self.api,
            subscription: self.subscription.map(str::to_owned),
            event_source: self.event_source.map(str::to_owned),
            code: status.code(),
            message: status.message(),
        }
    }
}

impl WecError {
    pub(crate) fn open_failed(subscription: &str, status: Win32Error) -> Self {
        WecError::OpenFailed {
            subscription: subscription.to_owned(),
            code: status.code(),
            message: status.message(),
        }
    }

    pub(crate) fn malformed(what: &'static str, offset: usize, reason: &'static str) -> Self {
        WecError::MalformedBuffer {
            what,
            offset,
            reason,
        }
    }

    /// The native status code, for errors that originate in a native call.
    pub fn native_code(&self) -> Option<u32> {
        match self {
            WecError::OpenFailed { code, .. } | WecError::NativeCallFailed { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_native_call_failure_carries_context() {
        let err = CallContext::new("EcGetSubscriptionRunTimeStatus")
            .subscription("Sub1")
            .event_source(Some("host.example.com"))
            .failed(Win32Error::ACCESS_DENIED);

        let rendered = err.to_string();
        assert!(rendered.contains("EcGetSubscriptionRunTimeStatus"), "{}", rendered);
        assert!(rendered.contains("`Sub1`"), "{}", rendered);
        assert!(rendered.contains("`host.example.com`"), "{}", rendered);
        assert!(rendered.contains("0x00000005"), "{}", rendered);
        assert_eq!(err.native_code(), Some(5));
    }

    #[test]
    fn test_failure_without_target_has_no_target_clause() {
        let err = CallContext::new("EcOpenSubscriptionEnum").failed(Win32Error::ACCESS_DENIED);
        assert!(err.to_string().starts_with("`EcOpenSubscriptionEnum` failed: "));
    }

    #[test]
    fn test_open_failed_reports_subscription() {
        let err = WecError::open_failed("Missing", Win32Error::FILE_NOT_FOUND);
        match &err {
            WecError::OpenFailed {
                subscription, code, ..
            } => {
                assert_eq!(subscription, "Missing");
                assert_eq!(*code, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.native_code(), Some(2));
    }

    #[test]
    fn test_status_code_is_rendered_once() {
        for status in [
            Win32Error::ACCESS_DENIED,
            Win32Error::FILE_NOT_FOUND,
            Win32Error::new(0x3a9d),
        ] {
            let message = status.message();
            assert!(!message.is_empty());
            assert!(!message.contains("os error"), "{}", message);

            let rendered = status.to_string();
            let code = format!("0x{:08x}", status.code());
            assert_eq!(rendered.matches(code.as_str()).count(), 1, "{}", rendered);
            assert!(!rendered.contains("os error"), "{}", rendered);
        }

        let err = WecError::open_failed("Sub1", Win32Error::ACCESS_DENIED);
        let rendered = err.to_string();
        assert_eq!(rendered.matches("0x00000005").count(), 1, "{}", rendered);
        assert!(!rendered.contains("os error"), "{}", rendered);
    }

    #[test]
    fn test_codec_errors_have_no_native_code() {
        let err = WecError::malformed("string payload", 16, "pointer outside of buffer");
        assert_eq!(err.native_code(), None);
        assert_eq!(
            err.to_string(),
            "Offset 16: malformed string payload: pointer outside of buffer"
        );
    }
}
