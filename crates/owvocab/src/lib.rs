#![cfg_attr(docsrs, feature(doc_cfg))]
//! Normalized vocabulary for EDS OWServer feeds.
//!
//! The gateway reports devices by one-wire family code, telemetry by vendor
//! element name, and units by vendor unit string. These tables translate
//! that closed vendor vocabulary into a normalized one. Everything outside
//! the tables is deliberately defaulted: unknown families become
//! [`DeviceKind::Unknown`], unknown sensor names are dropped by the caller,
//! and unknown unit strings become [`Unit::Unspecified`]. The tables are
//! plain data meant to be injected into the reconcilers, so deployments can
//! extend them without recompiling.

use core::fmt;
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Normalized hardware class of an entity in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceKind {
    /// The OWServer gateway itself.
    Gateway,
    /// Temperature-only device (DS18x20 family).
    Thermometer,
    /// Device reporting several measurement types (EDS0068 and friends).
    MultiSensor,
    /// Family code outside the table.
    Unknown,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Gateway => f.write_str("gateway"),
            DeviceKind::Thermometer => f.write_str("thermometer"),
            DeviceKind::MultiSensor => f.write_str("multisensor"),
            DeviceKind::Unknown => f.write_str("unknown"),
        }
    }
}

/// Normalized category of a telemetry reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SensorKind {
    AtmosphericPressure,
    Dewpoint,
    HeatIndex,
    Humidity,
    Humidex,
    Luminance,
    Relay,
    Temperature,
}

impl SensorKind {
    /// Stable lowercase name used in output addresses.
    pub const fn name(self) -> &'static str {
        match self {
            SensorKind::AtmosphericPressure => "atmosphericpressure",
            SensorKind::Dewpoint => "dewpoint",
            SensorKind::HeatIndex => "heatindex",
            SensorKind::Humidity => "humidity",
            SensorKind::Humidex => "humidex",
            SensorKind::Luminance => "luminance",
            SensorKind::Relay => "relay",
            SensorKind::Temperature => "temperature",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized engineering unit of a sensor output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Unit {
    Percent,
    Millibar,
    Celsius,
    Fahrenheit,
    /// Inches of mercury.
    Mercury,
    Lux,
    Count,
    Volt,
    /// The vendor unit string had no mapping.
    Unspecified,
}

impl Unit {
    /// Short symbol suitable for display.
    pub const fn symbol(self) -> &'static str {
        match self {
            Unit::Percent => "%",
            Unit::Millibar => "mbar",
            Unit::Celsius => "C",
            Unit::Fahrenheit => "F",
            Unit::Mercury => "inHg",
            Unit::Lux => "lux",
            Unit::Count => "#",
            Unit::Volt => "V",
            Unit::Unspecified => "",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Immutable lookup tables mapping vendor vocabulary to the normalized one.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vocabulary {
    /// One-wire family code to device kind.
    pub families: HashMap<String, DeviceKind>,
    /// Vendor element name to sensor kind.
    pub sensors: HashMap<String, SensorKind>,
    /// Vendor unit string to normalized unit.
    pub units: HashMap<String, Unit>,
}

impl Vocabulary {
    /// The vocabulary observed on EDS OWServer ENet gateways.
    ///
    /// Family codes follow the one-wire convention
    /// (<http://owfs.sourceforge.net/simple_family.html>).
    pub fn builtin() -> Self {
        let families = HashMap::from([
            ("10".to_string(), DeviceKind::Thermometer),
            ("28".to_string(), DeviceKind::Thermometer),
            ("7E".to_string(), DeviceKind::MultiSensor),
        ]);
        let sensors = HashMap::from([
            (
                "BarometricPressureMb".to_string(),
                SensorKind::AtmosphericPressure,
            ),
            ("DewPoint".to_string(), SensorKind::Dewpoint),
            ("HeatIndex".to_string(), SensorKind::HeatIndex),
            ("Humidity".to_string(), SensorKind::Humidity),
            ("Humidex".to_string(), SensorKind::Humidex),
            ("Light".to_string(), SensorKind::Luminance),
            ("RelayState".to_string(), SensorKind::Relay),
            ("Temperature".to_string(), SensorKind::Temperature),
        ]);
        let units = HashMap::from([
            ("PercentRelativeHumidity".to_string(), Unit::Percent),
            ("Millibars".to_string(), Unit::Millibar),
            ("Centigrade".to_string(), Unit::Celsius),
            ("Fahrenheit".to_string(), Unit::Fahrenheit),
            ("InchesOfMercury".to_string(), Unit::Mercury),
            ("Lux".to_string(), Unit::Lux),
            ("#".to_string(), Unit::Count),
            ("Volt".to_string(), Unit::Volt),
        ]);
        Self {
            families,
            sensors,
            units,
        }
    }

    /// Classify a device from its one-wire family code.
    pub fn device_kind(&self, family: &str) -> DeviceKind {
        self.families
            .get(family)
            .copied()
            .unwrap_or(DeviceKind::Unknown)
    }

    /// Classify a telemetry element; `None` means the caller must drop it.
    pub fn sensor_kind(&self, element: &str) -> Option<SensorKind> {
        self.sensors.get(element).copied()
    }

    /// Normalize a vendor unit string.
    pub fn unit(&self, raw: &str) -> Unit {
        self.units.get(raw).copied().unwrap_or(Unit::Unspecified)
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::builtin()
    }
}
