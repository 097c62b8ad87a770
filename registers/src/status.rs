//! Status register bits.

pub const HIGH_TEMPERATURE: u16 = 1 << 0;
pub const LOW_TEMPERATURE: u16 = 1 << 1;
pub const HIGH_HUMIDITY: u16 = 1 << 2;
pub const LOW_HUMIDITY: u16 = 1 << 3;
pub const SENSOR_FAULT: u16 = 1 << 4;

/// Bits 5..15 carry no meaning and must be zero.
pub const RESERVED_MASK: u16 = !0b1_1111;

const NAMES: [(u16, &str); 5] = [
    (HIGH_TEMPERATURE, "High temperature"),
    (LOW_TEMPERATURE, "Low temperature"),
    (HIGH_HUMIDITY, "High humidity"),
    (LOW_HUMIDITY, "Low humidity"),
    (SENSOR_FAULT, "Sensor fault"),
];

/// Human-readable names of the conditions set in `status`, in bit order.
pub fn alarm_names(status: u16) -> Vec<&'static str> {
    NAMES
        .iter()
        .filter(|(bit, _)| status & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

pub fn has_reserved_bits(status: u16) -> bool {
    status & RESERVED_MASK != 0
}
