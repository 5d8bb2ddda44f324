//! Identifiers understood by the collector, and the variant type each of them carries.
//!
//! The property and status tables are the single source of truth for the expected variant type:
//! the client consults them when decoding a result and when validating a value before encoding.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::err::WecError;
use crate::variant::{VariantTag, VariantType};

bitflags! {
    /// Access requested when opening a subscription.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct AccessMask: u32 {
        const READ = 1;
        const WRITE = 2;
    }
}

/// What `EcOpenSubscription` does when the subscription does (not) exist.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OpenDisposition {
    OpenAlways = 0,
    CreateNew = 1,
    OpenExisting = 2,
}

impl OpenDisposition {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum SubscriptionProperty {
    Enabled = 0,
    EventSources = 1,
    EventSourceAddress = 2,
    EventSourceEnabled = 3,
    EventSourceUserName = 4,
    EventSourcePassword = 5,
    Description = 6,
    Uri = 7,
    ConfigurationMode = 8,
    Expires = 9,
    Query = 10,
    TransportName = 11,
    TransportPort = 12,
    DeliveryMode = 13,
    DeliveryMaxItems = 14,
    DeliveryMaxLatencyTime = 15,
    HeartbeatInterval = 16,
    Locale = 17,
    ContentFormat = 18,
    LogFile = 19,
    PublisherName = 20,
    CredentialsType = 21,
    CommonUserName = 22,
    CommonPassword = 23,
    HostName = 24,
    ReadExistingEvents = 25,
    Dialect = 26,
    Type = 27,
    AllowedIssuerCAs = 28,
    AllowedSubjects = 29,
    DeniedSubjects = 30,
    AllowedSourceDomainComputers = 31,
}

#[derive(Debug)]
pub struct PropertyInfo {
    pub property: SubscriptionProperty,
    pub name: &'static str,
    pub variant_type: VariantType,
}

const BOOLEAN: VariantType = VariantType::scalar(VariantTag::Boolean);
const UINT32: VariantType = VariantType::scalar(VariantTag::UInt32);
const DATETIME: VariantType = VariantType::scalar(VariantTag::DateTime);
const STRING: VariantType = VariantType::scalar(VariantTag::String);
const OBJECT_ARRAY: VariantType = VariantType::scalar(VariantTag::ObjectArrayHandle);

macro_rules! property {
    ($property:ident, $ty:expr) => {
        PropertyInfo {
            property: SubscriptionProperty::$property,
            name: stringify!($property),
            variant_type: $ty,
        }
    };
}

/// Indexed by property id.
static PROPERTY_TABLE: [PropertyInfo; 32] = [
    property!(Enabled, BOOLEAN),
    property!(EventSources, OBJECT_ARRAY),
    property!(EventSourceAddress, STRING),
    property!(EventSourceEnabled, BOOLEAN),
    property!(EventSourceUserName, STRING),
    property!(EventSourcePassword, STRING),
    property!(Description, STRING),
    property!(Uri, STRING),
    property!(ConfigurationMode, UINT32),
    property!(Expires, DATETIME),
    property!(Query, STRING),
    property!(TransportName, STRING),
    property!(TransportPort, UINT32),
    property!(DeliveryMode, UINT32),
    property!(DeliveryMaxItems, UINT32),
    property!(DeliveryMaxLatencyTime, UINT32),
    property!(HeartbeatInterval, UINT32),
    property!(Locale, STRING),
    property!(ContentFormat, UINT32),
    property!(LogFile, STRING),
    property!(PublisherName, STRING),
    property!(CredentialsType, UINT32),
    property!(CommonUserName, STRING),
    property!(CommonPassword, STRING),
    property!(HostName, STRING),
    property!(ReadExistingEvents, BOOLEAN),
    property!(Dialect, STRING),
    property!(Type, UINT32),
    property!(AllowedIssuerCAs, STRING),
    property!(AllowedSubjects, STRING),
    property!(DeniedSubjects, STRING),
    property!(AllowedSourceDomainComputers, STRING),
];

impl SubscriptionProperty {
    pub fn all() -> impl Iterator<Item = SubscriptionProperty> {
        PROPERTY_TABLE.iter().map(|info| info.property)
    }

    pub fn from_u32(id: u32) -> Option<Self> {
        PROPERTY_TABLE.get(id as usize).map(|info| info.property)
    }

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn info(self) -> &'static PropertyInfo {
        &PROPERTY_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn variant_type(self) -> VariantType {
        self.info().variant_type
    }

    /// Properties of a single element of the `EventSources` object array.
    pub fn is_event_source_element(self) -> bool {
        matches!(
            self,
            SubscriptionProperty::EventSourceAddress
                | SubscriptionProperty::EventSourceEnabled
                | SubscriptionProperty::EventSourceUserName
                | SubscriptionProperty::EventSourcePassword
        )
    }
}

impl fmt::Display for SubscriptionProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SubscriptionProperty {
    type Err = WecError;

    /// Accepts the property name (case-insensitive) or its numeric id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(id) = s.parse::<u32>() {
            return SubscriptionProperty::from_u32(id).ok_or(WecError::InvalidArgument {
                argument: "property",
                reason: "unknown property id",
            });
        }
        PROPERTY_TABLE
            .iter()
            .find(|info| info.name.eq_ignore_ascii_case(s))
            .map(|info| info.property)
            .ok_or(WecError::InvalidArgument {
                argument: "property",
                reason: "unknown property name",
            })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum RuntimeStatusKind {
    Active = 0,
    LastError = 1,
    LastErrorMessage = 2,
    LastErrorTime = 3,
    NextRetryTime = 4,
    EventSources = 5,
    LastHeartbeatTime = 6,
}

impl RuntimeStatusKind {
    pub const ALL: [RuntimeStatusKind; 7] = [
        RuntimeStatusKind::Active,
        RuntimeStatusKind::LastError,
        RuntimeStatusKind::LastErrorMessage,
        RuntimeStatusKind::LastErrorTime,
        RuntimeStatusKind::NextRetryTime,
        RuntimeStatusKind::EventSources,
        RuntimeStatusKind::LastHeartbeatTime,
    ];

    pub fn from_u32(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            RuntimeStatusKind::Active => "Active",
            RuntimeStatusKind::LastError => "LastError",
            RuntimeStatusKind::LastErrorMessage => "LastErrorMessage",
            RuntimeStatusKind::LastErrorTime => "LastErrorTime",
            RuntimeStatusKind::NextRetryTime => "NextRetryTime",
            RuntimeStatusKind::EventSources => "EventSources",
            RuntimeStatusKind::LastHeartbeatTime => "LastHeartbeatTime",
        }
    }

    pub fn variant_type(self) -> VariantType {
        match self {
            RuntimeStatusKind::Active | RuntimeStatusKind::LastError => UINT32,
            RuntimeStatusKind::LastErrorMessage => STRING,
            RuntimeStatusKind::LastErrorTime
            | RuntimeStatusKind::NextRetryTime
            | RuntimeStatusKind::LastHeartbeatTime => DATETIME,
            RuntimeStatusKind::EventSources => VariantType::array(VariantTag::String),
        }
    }

    /// Heartbeats are tracked per event source; there is no aggregate value.
    pub fn requires_event_source(self) -> bool {
        self == RuntimeStatusKind::LastHeartbeatTime
    }
}

impl fmt::Display for RuntimeStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuntimeStatusKind {
    type Err = WecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or(WecError::InvalidArgument {
                argument: "status",
                reason: "unknown runtime status kind",
            })
    }
}

/// Runtime state of a subscription or of one of its event sources.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ActiveStatus {
    Disabled,
    Active,
    Inactive,
    Trying,
    Unknown(u32),
}

impl ActiveStatus {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => ActiveStatus::Disabled,
            2 => ActiveStatus::Active,
            3 => ActiveStatus::Inactive,
            4 => ActiveStatus::Trying,
            other => ActiveStatus::Unknown(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            ActiveStatus::Disabled => 1,
            ActiveStatus::Active => 2,
            ActiveStatus::Inactive => 3,
            ActiveStatus::Trying => 4,
            ActiveStatus::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ActiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveStatus::Disabled => f.write_str("Disabled"),
            ActiveStatus::Active => f.write_str("Active"),
            ActiveStatus::Inactive => f.write_str("Inactive"),
            ActiveStatus::Trying => f.write_str("Trying"),
            ActiveStatus::Unknown(other) => write!(f, "Unknown({})", other),
        }
    }
}

native_enum! {
    pub enum ConfigurationMode {
        Normal = 0,
        Custom = 1,
        MinLatency = 2,
        MinBandwidth = 3,
    }
}

native_enum! {
    pub enum DeliveryMode {
        Pull = 1,
        Push = 2,
    }
}

native_enum! {
    /// Whether forwarded events carry rendered message text.
    pub enum ContentFormat {
        Events = 1,
        RenderedText = 2,
    }
}

native_enum! {
    pub enum CredentialsType {
        Default = 0,
        Negotiate = 1,
        Digest = 2,
        Basic = 3,
        LocalMachine = 4,
    }
}

native_enum! {
    pub enum SubscriptionType {
        SourceInitiated = 0,
        CollectorInitiated = 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_property_table_is_indexed_by_id() {
        assert_eq!(SubscriptionProperty::all().count(), 32);
        for (index, property) in SubscriptionProperty::all().enumerate() {
            assert_eq!(property.id() as usize, index, "{}", property);
            assert_eq!(SubscriptionProperty::from_u32(property.id()), Some(property));
        }
        assert_eq!(SubscriptionProperty::from_u32(32), None);
    }

    #[test]
    fn test_every_property_has_a_concrete_scalar_type() {
        for property in SubscriptionProperty::all() {
            let ty = property.variant_type();
            assert_ne!(ty.tag, VariantTag::Null, "{}", property);
            assert!(!ty.array, "{}", property);
        }
        assert_eq!(SubscriptionProperty::Query.variant_type(), STRING);
        assert_eq!(SubscriptionProperty::TransportPort.variant_type(), UINT32);
        assert_eq!(SubscriptionProperty::Expires.variant_type(), DATETIME);
        assert_eq!(SubscriptionProperty::Enabled.variant_type(), BOOLEAN);
        assert_eq!(SubscriptionProperty::EventSources.variant_type(), OBJECT_ARRAY);
    }

    #[test]
    fn test_property_names_parse() {
        for property in SubscriptionProperty::all() {
            assert_eq!(property.name().parse::<SubscriptionProperty>().unwrap(), property);
            assert_eq!(
                property.name().to_lowercase().parse::<SubscriptionProperty>().unwrap(),
                property
            );
        }
        assert_eq!(
            "10".parse::<SubscriptionProperty>().unwrap(),
            SubscriptionProperty::Query
        );
        assert!("NotAProperty".parse::<SubscriptionProperty>().is_err());
        assert!("99".parse::<SubscriptionProperty>().is_err());
    }

    #[test]
    fn test_status_kinds() {
        for (index, kind) in RuntimeStatusKind::ALL.iter().enumerate() {
            assert_eq!(kind.id() as usize, index);
            assert_eq!(kind.name().parse::<RuntimeStatusKind>().unwrap(), *kind);
        }
        assert_eq!(
            RuntimeStatusKind::EventSources.variant_type(),
            VariantType::array(VariantTag::String)
        );
        assert!(RuntimeStatusKind::LastHeartbeatTime.requires_event_source());
        assert!(!RuntimeStatusKind::Active.requires_event_source());
    }

    #[test]
    fn test_native_enums() {
        assert_eq!(ActiveStatus::from_u32(2), ActiveStatus::Active);
        assert_eq!(ActiveStatus::from_u32(9), ActiveStatus::Unknown(9));
        assert_eq!(ActiveStatus::Unknown(9).as_u32(), 9);
        assert_eq!(ContentFormat::from_u32(2), Some(ContentFormat::RenderedText));
        assert_eq!(ContentFormat::from_u32(0), None);
        assert_eq!(DeliveryMode::Push.as_u32(), 2);
        assert_eq!(CredentialsType::ALL.len(), 5);
        assert_eq!(SubscriptionType::CollectorInitiated.to_string(), "CollectorInitiated");
        assert_eq!((AccessMask::READ | AccessMask::WRITE).bits(), 3);
        assert_eq!(OpenDisposition::OpenExisting.as_u32(), 2);
    }
}
