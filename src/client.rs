use log::{debug, trace};

use crate::buffer::{Fetched, NativeBuffer, SizeUnit, probe_and_fetch};
use crate::err::{CallContext, Result, WecError, Win32Error};
use crate::handle::{self, HandleGuard, HandleKind};
use crate::native::{BufferCallResult, EventCollectorApi};
use crate::properties::{
    AccessMask, ActiveStatus, ContentFormat, OpenDisposition, RuntimeStatusKind,
    SubscriptionProperty,
};
use crate::utils::{FileTime, decode_utf16le_bytes_z};
use crate::variant::{EventSourceConfig, Variant, VariantTag, VariantType, decode, encode};

/// Largest buffer a single native call may ask for.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    max_buffer_size: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

impl ClientSettings {
    pub fn new() -> Self {
        ClientSettings::default()
    }

    /// Sets the upper bound, in bytes, on the size the collector may request for one result.
    pub fn max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    pub fn get_max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }
}

/// Reads and modifies collector subscriptions through an [`EventCollectorApi`].
///
/// Every operation opens what it needs, releases it before returning, and keeps no state
/// between calls. Callers must not run concurrent operations against the same subscription.
///
/// ```no_run
/// # #[cfg(windows)]
/// # fn main() -> wecadmin::err::Result<()> {
/// use wecadmin::{SubscriptionClient, WecApi};
///
/// let client = SubscriptionClient::new(WecApi::new());
/// for name in client.enumerate_subscriptions()? {
///     println!("{}: {}", name, client.query(&name)?);
/// }
/// # Ok(())
/// # }
/// # #[cfg(not(windows))]
/// # fn main() {}
/// ```
#[derive(Debug)]
pub struct SubscriptionClient<A: EventCollectorApi> {
    api: A,
    settings: ClientSettings,
}

fn require_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(WecError::InvalidArgument {
            argument: "subscription",
            reason: "subscription name must not be empty",
        });
    }
    Ok(())
}

/// Rejects values that do not carry the type the collector stores for `property`.
fn check_settable(property: SubscriptionProperty, value: &Variant) -> Result<()> {
    let expected = property.variant_type();
    if expected.tag == VariantTag::ObjectArrayHandle {
        return Err(WecError::InvalidArgument {
            argument: "property",
            reason: "object array properties cannot be set",
        });
    }
    if property.is_event_source_element() {
        return Err(WecError::InvalidArgument {
            argument: "property",
            reason: "event source properties belong to an element of the event source array",
        });
    }
    let found = value.variant_type();
    if found != expected {
        return Err(WecError::TypeMismatch {
            expected,
            found: found.raw(),
        });
    }
    Ok(())
}

/// A decoded value that is neither `Null` nor the shape `expected` describes.
fn unexpected(expected: VariantType, value: &Variant) -> WecError {
    WecError::TypeMismatch {
        expected,
        found: value.variant_type().raw(),
    }
}

impl<A: EventCollectorApi> SubscriptionClient<A> {
    pub fn new(api: A) -> Self {
        SubscriptionClient {
            api,
            settings: ClientSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Opens a subscription handle. The handle is closed when the guard is dropped.
    pub fn open(
        &self,
        name: &str,
        access: AccessMask,
        disposition: OpenDisposition,
    ) -> Result<HandleGuard<'_, A>> {
        require_name(name)?;
        handle::open_subscription(&self.api, name, access, disposition)
    }

    /// Runs a negotiated fetch where running out of items is a failure.
    fn fetch<F>(&self, context: &CallContext<'_>, call: F) -> Result<NativeBuffer>
    where
        F: FnMut(&mut [u8]) -> BufferCallResult,
    {
        match probe_and_fetch(
            context,
            SizeUnit::Bytes,
            self.settings.max_buffer_size,
            call,
        )? {
            Fetched::Data(buffer) => Ok(buffer),
            Fetched::EndOfSequence => Err(context.failed(Win32Error::NO_MORE_ITEMS)),
        }
    }

    /// Names of all subscriptions, in the order the collector reports them.
    pub fn enumerate_subscriptions(&self) -> Result<Vec<String>> {
        let enumeration = handle::open_subscription_enum(&self.api)?;
        let context = CallContext::new("EcEnumNextSubscription");
        let mut names = vec![];

        loop {
            let fetched = probe_and_fetch(
                &context,
                SizeUnit::WideChars,
                self.settings.max_buffer_size,
                |buf| self.api.enum_next_subscription(enumeration.raw(), buf),
            )?;

            let buffer = match fetched {
                Fetched::Data(buffer) => buffer,
                Fetched::EndOfSequence => break,
            };

            // Each step must consume an entry, an entry always has at least a terminator.
            if buffer.is_empty() {
                return Err(WecError::malformed(
                    "subscription name",
                    0,
                    "enumeration step returned no data",
                ));
            }

            let name = decode_utf16le_bytes_z(buffer.as_bytes())
                .map_err(|e| WecError::malformed("subscription name", 0, e.reason()))?;
            trace!("enumerated subscription `{}`", name);
            names.push(name);
        }

        debug!("enumerated {} subscriptions", names.len());
        Ok(names)
    }

    /// Reads one property, decoded with the type the collector stores for it.
    ///
    /// `EventSources` is resolved into [`Variant::EventSources`].
    pub fn get_property(&self, name: &str, property: SubscriptionProperty) -> Result<Variant> {
        let subscription = self.open(name, AccessMask::READ, OpenDisposition::OpenExisting)?;
        self.read_property(&subscription, name, property)
    }

    fn read_property(
        &self,
        subscription: &HandleGuard<'_, A>,
        name: &str,
        property: SubscriptionProperty,
    ) -> Result<Variant> {
        let context = CallContext::new("EcGetSubscriptionProperty").subscription(name);
        let buffer = self.fetch(&context, |buf| {
            self.api
                .get_subscription_property(subscription.raw(), property, buf)
        })?;
        let value = decode(buffer.as_bytes(), property.variant_type())?;
        debug!("read `{}` {} ({})", name, property, value.variant_type());

        match value {
            Variant::ObjectArrayHandle(raw) => {
                match HandleGuard::adopt(&self.api, raw, HandleKind::ObjectArray) {
                    Some(array) => self
                        .read_event_sources(&array, name)
                        .map(Variant::EventSources),
                    None => Ok(Variant::Null),
                }
            }
            other => Ok(other),
        }
    }

    fn read_event_sources(
        &self,
        array: &HandleGuard<'_, A>,
        name: &str,
    ) -> Result<Vec<EventSourceConfig>> {
        let size = self.api.get_object_array_size(array.raw()).map_err(|status| {
            CallContext::new("EcGetObjectArraySize")
                .subscription(name)
                .failed(status)
        })?;
        trace!("`{}` has {} configured event sources", name, size);

        (0..size)
            .map(|index| -> Result<EventSourceConfig> {
                let address = match self.read_element(
                    array,
                    name,
                    SubscriptionProperty::EventSourceAddress,
                    index,
                )? {
                    Variant::String(s) => s,
                    Variant::Null => String::new(),
                    other => {
                        return Err(unexpected(
                            SubscriptionProperty::EventSourceAddress.variant_type(),
                            &other,
                        ));
                    }
                };
                let enabled = match self.read_element(
                    array,
                    name,
                    SubscriptionProperty::EventSourceEnabled,
                    index,
                )? {
                    Variant::Boolean(b) => b,
                    Variant::Null => false,
                    other => {
                        return Err(unexpected(
                            SubscriptionProperty::EventSourceEnabled.variant_type(),
                            &other,
                        ));
                    }
                };
                let user_name = match self.read_element(
                    array,
                    name,
                    SubscriptionProperty::EventSourceUserName,
                    index,
                )? {
                    Variant::String(s) if !s.is_empty() => Some(s),
                    Variant::String(_) | Variant::Null => None,
                    other => {
                        return Err(unexpected(
                            SubscriptionProperty::EventSourceUserName.variant_type(),
                            &other,
                        ));
                    }
                };
                Ok(EventSourceConfig {
                    address,
                    enabled,
                    user_name,
                })
            })
            .collect()
    }

    fn read_element(
        &self,
        array: &HandleGuard<'_, A>,
        name: &str,
        property: SubscriptionProperty,
        index: u32,
    ) -> Result<Variant> {
        let context = CallContext::new("EcGetObjectArrayProperty").subscription(name);
        let buffer = self.fetch(&context, |buf| {
            self.api
                .get_object_array_property(array.raw(), property, index, buf)
        })?;
        decode(buffer.as_bytes(), property.variant_type())
    }

    /// Writes one property and saves the subscription.
    ///
    /// The value must carry exactly the type the collector stores for `property`.
    pub fn set_property(
        &self,
        name: &str,
        property: SubscriptionProperty,
        value: &Variant,
    ) -> Result<()> {
        check_settable(property, value)?;
        let subscription = self.open(
            name,
            AccessMask::READ | AccessMask::WRITE,
            OpenDisposition::OpenExisting,
        )?;
        self.write_property(&subscription, name, property, value)?;
        self.save(&subscription, name)
    }

    /// Writes several properties and saves once. Every value is checked before anything is
    /// written.
    pub fn update_properties(
        &self,
        name: &str,
        changes: &[(SubscriptionProperty, Variant)],
    ) -> Result<()> {
        require_name(name)?;
        for (property, value) in changes {
            check_settable(*property, value)?;
        }
        if changes.is_empty() {
            return Ok(());
        }

        let subscription = self.open(
            name,
            AccessMask::READ | AccessMask::WRITE,
            OpenDisposition::OpenExisting,
        )?;
        for (property, value) in changes {
            self.write_property(&subscription, name, *property, value)?;
        }
        self.save(&subscription, name)
    }

    fn write_property(
        &self,
        subscription: &HandleGuard<'_, A>,
        name: &str,
        property: SubscriptionProperty,
        value: &Variant,
    ) -> Result<()> {
        let encoded = encode(value)?;
        debug!("setting `{}` {} ({})", name, property, value.variant_type());
        self.api
            .set_subscription_property(subscription.raw(), property, &encoded)
            .map_err(|status| {
                CallContext::new("EcSetSubscriptionProperty")
                    .subscription(name)
                    .failed(status)
            })
    }

    fn save(&self, subscription: &HandleGuard<'_, A>, name: &str) -> Result<()> {
        self.api
            .save_subscription(subscription.raw())
            .map_err(|status| {
                CallContext::new("EcSaveSubscription")
                    .subscription(name)
                    .failed(status)
            })?;
        debug!("saved subscription `{}`", name);
        Ok(())
    }

    /// Reads a runtime status value for the subscription, or for one of its event sources.
    pub fn get_runtime_status(
        &self,
        name: &str,
        event_source: Option<&str>,
        kind: RuntimeStatusKind,
    ) -> Result<Variant> {
        require_name(name)?;
        if kind.requires_event_source() && event_source.is_none_or(str::is_empty) {
            return Err(WecError::InvalidArgument {
                argument: "event_source",
                reason: "this status is only tracked per event source",
            });
        }

        let context = CallContext::new("EcGetSubscriptionRunTimeStatus")
            .subscription(name)
            .event_source(event_source);
        let buffer = self.fetch(&context, |buf| {
            self.api.get_runtime_status(name, kind, event_source, buf)
        })?;
        decode(buffer.as_bytes(), kind.variant_type())
    }

    /// Event sources the collector has heard from, in native order, duplicates preserved.
    pub fn list_event_sources(&self, name: &str) -> Result<Vec<String>> {
        let kind = RuntimeStatusKind::EventSources;
        match self.get_runtime_status(name, None, kind)? {
            Variant::StringArray(sources) => Ok(sources),
            Variant::Null => Ok(Vec::new()),
            other => Err(unexpected(kind.variant_type(), &other)),
        }
    }

    /// Whether the subscription, or one of its event sources, is active.
    /// A `Null` status reads as `Unknown(0)`.
    pub fn active_status(&self, name: &str, event_source: Option<&str>) -> Result<ActiveStatus> {
        let kind = RuntimeStatusKind::Active;
        match self.get_runtime_status(name, event_source, kind)? {
            Variant::UInt32(status) => Ok(ActiveStatus::from_u32(status)),
            Variant::Null => Ok(ActiveStatus::from_u32(0)),
            other => Err(unexpected(kind.variant_type(), &other)),
        }
    }

    /// Last heartbeat from `event_source`. [`FileTime::EPOCH`] when none was ever recorded.
    pub fn last_heartbeat(&self, name: &str, event_source: &str) -> Result<FileTime> {
        let kind = RuntimeStatusKind::LastHeartbeatTime;
        match self.get_runtime_status(name, Some(event_source), kind)? {
            Variant::DateTime(time) => Ok(time),
            Variant::Null => Ok(FileTime::EPOCH),
            other => Err(unexpected(kind.variant_type(), &other)),
        }
    }

    /// The subscription's query. Empty when the collector returns no value.
    pub fn query(&self, name: &str) -> Result<String> {
        let property = SubscriptionProperty::Query;
        match self.get_property(name, property)? {
            Variant::String(query) => Ok(query),
            Variant::Null => Ok(String::new()),
            other => Err(unexpected(property.variant_type(), &other)),
        }
    }

    pub fn set_query(&self, name: &str, query: &str) -> Result<()> {
        self.set_property(name, SubscriptionProperty::Query, &Variant::from(query))
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.set_property(name, SubscriptionProperty::Enabled, &Variant::from(enabled))
    }

    pub fn set_transport_port(&self, name: &str, port: u32) -> Result<()> {
        self.set_property(name, SubscriptionProperty::TransportPort, &Variant::from(port))
    }

    pub fn set_content_format(&self, name: &str, format: ContentFormat) -> Result<()> {
        self.set_property(name, SubscriptionProperty::ContentFormat, &Variant::from(format))
    }

    /// Sets the log forwarded events are written to.
    pub fn set_destination_log(&self, name: &str, log: &str) -> Result<()> {
        self.set_property(name, SubscriptionProperty::LogFile, &Variant::from(log))
    }

    /// Event sources configured on the subscription.
    pub fn event_sources(&self, name: &str) -> Result<Vec<EventSourceConfig>> {
        let property = SubscriptionProperty::EventSources;
        match self.get_property(name, property)? {
            Variant::EventSources(sources) => Ok(sources),
            Variant::Null => Ok(Vec::new()),
            other => Err(unexpected(property.variant_type(), &other)),
        }
    }

    pub fn delete_subscription(&self, name: &str) -> Result<()> {
        require_name(name)?;
        self.api.delete_subscription(name).map_err(|status| {
            CallContext::new("EcDeleteSubscription")
                .subscription(name)
                .failed(status)
        })?;
        debug!("deleted subscription `{}`", name);
        Ok(())
    }
}
