#![deny(unused_must_use)]
//! Administration of Windows Event Collector subscriptions.
//!
//! The collector exposes its configuration through `wecapi.dll`. This crate wraps that API:
//! - [`variant`] translates between the native `EC_VARIANT` layout and [`Variant`].
//! - [`buffer`] sizes result buffers with the probe-then-fetch protocol.
//! - [`handle`] guarantees every native handle is closed exactly once.
//! - [`SubscriptionClient`] enumerates, reads and writes subscriptions.
//!
//! All native calls go through [`EventCollectorApi`]. [`WecApi`] implements it on Windows; any
//! other implementation can stand in for the collector.

#[macro_use]
mod macros;

pub mod buffer;
pub mod client;
pub mod err;
pub mod handle;
pub mod native;
pub mod properties;
pub mod variant;

mod utils;

pub use crate::client::{ClientSettings, SubscriptionClient};
pub use crate::err::{Result, WecError, Win32Error};
pub use crate::handle::{HandleGuard, HandleKind};
pub use crate::native::{BufferCallError, BufferCallResult, EventCollectorApi, RawHandle};
pub use crate::properties::{
    AccessMask, ActiveStatus, ConfigurationMode, ContentFormat, CredentialsType, DeliveryMode,
    OpenDisposition, RuntimeStatusKind, SubscriptionProperty, SubscriptionType,
};
pub use crate::utils::FileTime;
pub use crate::variant::{EventSourceConfig, Variant, VariantTag, VariantType};

#[cfg(windows)]
pub use crate::native::WecApi;

#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
