//! Unit conversion for scraped hashrate and temperature values.

use std::str::FromStr;

/// Hashrate units a miner status page may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashrateUnit {
    Hashes,
    KiloHashes,
    MegaHashes,
}

impl HashrateUnit {
    fn multiplier(self) -> f64 {
        match self {
            HashrateUnit::Hashes => 1.0,
            HashrateUnit::KiloHashes => 1_000.0,
            HashrateUnit::MegaHashes => 1_000_000.0,
        }
    }
}

impl FromStr for HashrateUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h/s" => Ok(HashrateUnit::Hashes),
            "kh/s" => Ok(HashrateUnit::KiloHashes),
            "mh/s" => Ok(HashrateUnit::MegaHashes),
            other => Err(format!("unsupported hashrate unit: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl FromStr for TemperatureUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" => Ok(TemperatureUnit::Celsius),
            "f" => Ok(TemperatureUnit::Fahrenheit),
            other => Err(format!("unsupported temperature unit: {}", other)),
        }
    }
}

/// Convert a hashrate to hashes per second. No rounding is applied.
pub fn normalize_hashrate(value: f64, unit: HashrateUnit) -> f64 {
    value * unit.multiplier()
}

/// Convert a temperature to Celsius.
///
/// A missing unit means Celsius. Fahrenheit values are converted and
/// rounded to one decimal; Celsius values pass through untouched.
pub fn normalize_temperature(value: f64, unit: Option<TemperatureUnit>) -> f64 {
    match unit {
        Some(TemperatureUnit::Fahrenheit) => round_one_decimal((value - 32.0) * 5.0 / 9.0),
        Some(TemperatureUnit::Celsius) | None => value,
    }
}

pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashrate_units() {
        assert_eq!(normalize_hashrate(1.0, HashrateUnit::KiloHashes), 1_000.0);
        assert_eq!(normalize_hashrate(1.0, HashrateUnit::MegaHashes), 1_000_000.0);
        for value in [0.0, 0.5, 42.0, 123_456.789] {
            assert_eq!(normalize_hashrate(value, HashrateUnit::Hashes), value);
        }
    }

    #[test]
    fn test_hashrate_unit_parsing_is_case_insensitive() {
        assert_eq!("KH/s".parse::<HashrateUnit>(), Ok(HashrateUnit::KiloHashes));
        assert_eq!("mh/S".parse::<HashrateUnit>(), Ok(HashrateUnit::MegaHashes));
        assert_eq!("H/s".parse::<HashrateUnit>(), Ok(HashrateUnit::Hashes));
        assert!("GH/s".parse::<HashrateUnit>().is_err());
    }

    #[test]
    fn test_fahrenheit_conversion() {
        assert_eq!(normalize_temperature(32.0, Some(TemperatureUnit::Fahrenheit)), 0.0);
        assert_eq!(normalize_temperature(212.0, Some(TemperatureUnit::Fahrenheit)), 100.0);
        // 100F = 37.777.. C
        assert_eq!(normalize_temperature(100.0, Some(TemperatureUnit::Fahrenheit)), 37.8);
    }

    #[test]
    fn test_celsius_passes_through_unrounded() {
        assert_eq!(normalize_temperature(41.26, Some(TemperatureUnit::Celsius)), 41.26);
        assert_eq!(normalize_temperature(41.26, None), 41.26);
    }
}
