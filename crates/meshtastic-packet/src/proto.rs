//! Meshtastic payload protobufs.
//!
//! Hand-written `prost` definitions for the subset of the Meshtastic
//! schema this node exchanges: the `Data` envelope carried in every
//! channel payload plus the application payloads (`User`, `Position`,
//! `Telemetry`). Field tags follow the stock Meshtastic `.proto` files so
//! the wire format interoperates with real nodes.

/// Port numbers identifying the application a `Data` payload belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PortNum {
    /// Unset / invalid.
    UnknownApp = 0,
    /// Plain UTF-8 text messages.
    TextMessageApp = 1,
    /// Remote GPIO access.
    RemoteHardwareApp = 2,
    /// Position beacons.
    PositionApp = 3,
    /// Node identity beacons.
    NodeinfoApp = 4,
    /// Mesh routing control.
    RoutingApp = 5,
    /// Administration messages.
    AdminApp = 6,
    /// Device and environment telemetry.
    TelemetryApp = 67,
    /// Traceroute probes.
    TracerouteApp = 70,
    /// First port reserved for private applications.
    PrivateApp = 256,
}

/// The envelope inside every encrypted channel payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Data {
    /// Which application this payload belongs to.
    #[prost(enumeration = "PortNum", tag = "1")]
    pub portnum: i32,
    /// Opaque application payload.
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
    /// Sender wants a response on the same port.
    #[prost(bool, tag = "3")]
    pub want_response: bool,
    /// Original destination for multi-hop reliable delivery.
    #[prost(fixed32, tag = "4")]
    pub dest: u32,
    /// Original source for multi-hop reliable delivery.
    #[prost(fixed32, tag = "5")]
    pub source: u32,
    /// Request id this payload responds to.
    #[prost(fixed32, tag = "6")]
    pub request_id: u32,
    /// Packet id this payload replies to.
    #[prost(fixed32, tag = "7")]
    pub reply_id: u32,
    /// Emoji tapback marker.
    #[prost(fixed32, tag = "8")]
    pub emoji: u32,
}

impl Data {
    /// Convenience constructor for an application payload.
    pub fn new(portnum: PortNum, payload: Vec<u8>) -> Self {
        Data {
            portnum: portnum as i32,
            payload,
            ..Default::default()
        }
    }

    /// The port number, or `UnknownApp` for out-of-range values.
    pub fn port(&self) -> PortNum {
        PortNum::try_from(self.portnum).unwrap_or(PortNum::UnknownApp)
    }
}

/// Hardware model advertised in node info beacons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum HardwareModel {
    /// Unset.
    Unset = 0,
    /// TTGO LoRa32 v2.
    TloraV2 = 1,
    /// Heltec v3.
    HeltecV3 = 43,
    /// Self-built or unlisted hardware.
    PrivateHw = 255,
}

/// Device role advertised in node info beacons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Role {
    /// Regular client node.
    Client = 0,
    /// Client that never forwards.
    ClientMute = 1,
    /// Infrastructure router.
    Router = 2,
}

/// Node identity, broadcast on [`PortNum::NodeinfoApp`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    /// Node id rendered as `!hex`.
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    /// Full node name.
    #[prost(string, tag = "2")]
    pub long_name: ::prost::alloc::string::String,
    /// Short display name, up to four characters.
    #[prost(string, tag = "3")]
    pub short_name: ::prost::alloc::string::String,
    /// MAC address (legacy field).
    #[prost(bytes = "vec", tag = "4")]
    pub macaddr: ::prost::alloc::vec::Vec<u8>,
    /// Hardware model.
    #[prost(enumeration = "HardwareModel", tag = "5")]
    pub hw_model: i32,
    /// Operator holds an amateur radio licence (name is then a callsign).
    #[prost(bool, tag = "6")]
    pub is_licensed: bool,
    /// Device role.
    #[prost(enumeration = "Role", tag = "7")]
    pub role: i32,
    /// Node public key.
    #[prost(bytes = "vec", tag = "8")]
    pub public_key: ::prost::alloc::vec::Vec<u8>,
}

/// How a position fix was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LocationSource {
    /// Unset.
    LocUnset = 0,
    /// Entered by hand.
    LocManual = 1,
    /// Internal GPS.
    LocInternal = 2,
    /// External source.
    LocExternal = 3,
}

/// Position report, broadcast on [`PortNum::PositionApp`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Position {
    /// Latitude in 1e-7 degrees.
    #[prost(sfixed32, optional, tag = "1")]
    pub latitude_i: ::core::option::Option<i32>,
    /// Longitude in 1e-7 degrees.
    #[prost(sfixed32, optional, tag = "2")]
    pub longitude_i: ::core::option::Option<i32>,
    /// Altitude above MSL in metres.
    #[prost(int32, optional, tag = "3")]
    pub altitude: ::core::option::Option<i32>,
    /// Unix timestamp of the fix in seconds.
    #[prost(fixed32, tag = "4")]
    pub time: u32,
    /// Provenance of the fix.
    #[prost(enumeration = "LocationSource", tag = "5")]
    pub location_source: i32,
}

/// Device health metrics.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceMetrics {
    /// Battery charge 0..=100, or 101 when powered externally.
    #[prost(uint32, optional, tag = "1")]
    pub battery_level: ::core::option::Option<u32>,
    /// Supply voltage.
    #[prost(float, optional, tag = "2")]
    pub voltage: ::core::option::Option<f32>,
    /// Channel utilization percentage.
    #[prost(float, optional, tag = "3")]
    pub channel_utilization: ::core::option::Option<f32>,
    /// Airtime utilization percentage for our own transmissions.
    #[prost(float, optional, tag = "4")]
    pub air_util_tx: ::core::option::Option<f32>,
    /// Seconds since boot.
    #[prost(uint32, optional, tag = "5")]
    pub uptime_seconds: ::core::option::Option<u32>,
}

/// Telemetry report, broadcast on [`PortNum::TelemetryApp`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Telemetry {
    /// Unix timestamp of the measurement in seconds.
    #[prost(fixed32, tag = "1")]
    pub time: u32,
    /// Which kind of telemetry this is.
    #[prost(oneof = "telemetry::Variant", tags = "2")]
    pub variant: ::core::option::Option<telemetry::Variant>,
}

/// Nested types for [`Telemetry`].
pub mod telemetry {
    /// The telemetry payload variants this node understands.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        /// Device health metrics.
        #[prost(message, tag = "2")]
        DeviceMetrics(super::DeviceMetrics),
    }
}
