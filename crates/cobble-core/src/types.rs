//! Core data model shared by the state machine, the cache and the adapters

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CobbleError;

// ----------------------------------------------------------------------------
// Lifecycle Status
// ----------------------------------------------------------------------------

/// Overall status of a [`Central`](crate::Central) session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    #[default]
    Uninitialised = 0,
    Initialised = 1,
    Scanning = 2,
    Connecting = 3,
    Connected = 4,
    Error = 5,
}

impl Status {
    /// Every status value, in declaration order
    pub const ALL: [Status; 6] = [
        Status::Uninitialised,
        Status::Initialised,
        Status::Scanning,
        Status::Connecting,
        Status::Connected,
        Status::Error,
    ];

    /// True while a connect attempt is pending or a link is up
    pub fn has_link(self) -> bool {
        matches!(self, Status::Connecting | Status::Connected)
    }

    /// Name used in log output
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Uninitialised => "Uninitialised",
            Status::Initialised => "Initialised",
            Status::Scanning => "Scanning",
            Status::Connecting => "Connecting",
            Status::Connected => "Connected",
            Status::Error => "Error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason the session entered [`Status::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    #[default]
    None = 0,
    HardwareUnsupported = 1,
    /// Adapter disabled. Raised at initialisation or at scan start, depending on platform.
    HardwareTurnedOff = 2,
    PermissionsNotGranted = 3,
    Unknown = 0xFF,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorCode::None => "no error",
            ErrorCode::HardwareUnsupported => "bluetooth low energy is not supported",
            ErrorCode::HardwareTurnedOff => "bluetooth adapter is turned off",
            ErrorCode::PermissionsNotGranted => "bluetooth permission not granted",
            ErrorCode::Unknown => "unknown adapter error",
        };
        f.write_str(text)
    }
}

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Bluetooth SIG base UUID `00000000-0000-1000-8000-00805F9B34FB`
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Service or characteristic UUID
///
/// Displays as canonical uppercase hyphenated text, so two values are equal
/// exactly when their canonical texts are equal. Parsing accepts any case,
/// the simple (unhyphenated) form, and 16/32-bit SIG short forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GattUuid(Uuid);

impl GattUuid {
    /// Wrap an already parsed UUID
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Expand a 16- or 32-bit assigned number against the SIG base UUID
    pub const fn from_short(value: u32) -> Self {
        Self(Uuid::from_u128(BLUETOOTH_BASE_UUID | ((value as u128) << 96)))
    }

    /// Underlying UUID value
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Canonical uppercase hyphenated text
    pub fn to_canonical(&self) -> String {
        self.0
            .hyphenated()
            .encode_upper(&mut Uuid::encode_buffer())
            .to_owned()
    }
}

impl From<Uuid> for GattUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<GattUuid> for Uuid {
    fn from(uuid: GattUuid) -> Self {
        uuid.0
    }
}

impl FromStr for GattUuid {
    type Err = CobbleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let is_short = matches!(text.len(), 4 | 8) && text.chars().all(|c| c.is_ascii_hexdigit());
        if is_short {
            if let Ok(value) = u32::from_str_radix(text, 16) {
                return Ok(Self::from_short(value));
            }
        }
        Uuid::parse_str(text)
            .map(Self)
            .map_err(|_| CobbleError::InvalidUuid {
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for GattUuid {
    type Error = CobbleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GattUuid> for String {
    fn from(uuid: GattUuid) -> Self {
        uuid.to_canonical()
    }
}

impl fmt::Display for GattUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.hyphenated().encode_upper(&mut Uuid::encode_buffer()))
    }
}

/// Opaque, platform-native handle for a remote device (usually `AA:BB:CC:DD:EE:FF`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentifier(String);

impl DeviceIdentifier {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceIdentifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DeviceIdentifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&DeviceIdentifier> for DeviceIdentifier {
    fn from(value: &DeviceIdentifier) -> Self {
        value.clone()
    }
}

impl AsRef<str> for DeviceIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Characteristic Capabilities
// ----------------------------------------------------------------------------

bitflags! {
    /// Operations a characteristic advertises
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Capabilities: u8 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
        const WRITE_WITHOUT_RESPONSE = 0b0000_0100;
        const NOTIFY = 0b0000_1000;
        const INDICATE = 0b0001_0000;
    }
}

impl Capabilities {
    /// Push mechanism used when subscribing.
    ///
    /// Notify wins over Indicate when both are advertised.
    pub fn subscription_kind(self) -> Option<SubscriptionKind> {
        if self.contains(Capabilities::NOTIFY) {
            Some(SubscriptionKind::Notify)
        } else if self.contains(Capabilities::INDICATE) {
            Some(SubscriptionKind::Indicate)
        } else {
            None
        }
    }

    /// Write type used for a plain `write`, acknowledged writes first
    pub fn write_type(self) -> Option<WriteType> {
        if self.contains(Capabilities::WRITE) {
            Some(WriteType::WithResponse)
        } else if self.contains(Capabilities::WRITE_WITHOUT_RESPONSE) {
            Some(WriteType::WithoutResponse)
        } else {
            None
        }
    }
}

/// How value changes are pushed by the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionKind {
    /// Unconfirmed, low latency
    Notify,
    /// Confirmed by the central, one round trip per update
    Indicate,
}

/// Whether the peripheral acknowledges a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

impl WriteType {
    pub fn with_response(self) -> bool {
        matches!(self, WriteType::WithResponse)
    }
}

// ----------------------------------------------------------------------------
// Records and Event Payloads
// ----------------------------------------------------------------------------

/// Connection outcome reported by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionStatus {
    Disconnected = 0,
    Connected = 1,
    ConnectFailed = 2,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::ConnectFailed => "connect failed",
        };
        f.write_str(text)
    }
}

/// An advertisement seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub name: Option<String>,
    pub rssi: i32,
    pub identifier: DeviceIdentifier,
}

/// A service of the connected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub uuid: GattUuid,
}

/// A characteristic of the connected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRecord {
    pub uuid: GattUuid,
    pub service_uuid: GattUuid,
    pub capabilities: Capabilities,
}

/// A characteristic value delivered by a read or a notification/indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueUpdate {
    pub characteristic_uuid: GattUuid,
    pub payload: Vec<u8>,
    /// Native length when the payload had to be cut to the configured maximum
    pub truncated_from: Option<usize>,
}

impl ValueUpdate {
    /// Copy at most `max_len` bytes of a native buffer
    pub fn bounded(characteristic_uuid: GattUuid, bytes: &[u8], max_len: usize) -> Self {
        let kept = bytes.len().min(max_len);
        Self {
            characteristic_uuid,
            payload: bytes[..kept].to_vec(),
            truncated_from: (bytes.len() > max_len).then_some(bytes.len()),
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated_from.is_some()
    }
}
