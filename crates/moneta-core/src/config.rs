//! String-keyed device configuration.
//!
//! Drivers receive a [`DeviceConfig`] at construction and consult it for
//! operator intent (`Enabled`), timing overrides and model pinning. Values
//! are JSON so configurations round-trip through `serde` unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Recognized configuration keys.
pub mod keys {
    /// Operator intent: should the device accept money / print.
    pub const ENABLED: &str = "Enabled";
    /// Grace period in ms before the disabled event fires.
    pub const DISABLING_TIMEOUT: &str = "DisablingTimeout";
    /// Upper bound in ms for the initialization sequence.
    pub const INITIALIZE_TIMEOUT: &str = "InitializeTimeout";
    /// Whether duplicate stacked events are suppressed.
    pub const STACKED_FILTER: &str = "StackedFilter";
    /// Whether the device may run without its printer (tri-state).
    pub const CAN_WITHOUT_PRINTING: &str = "CanWithoutPrinting";
    /// Operator override for printer-less operation (tri-state).
    pub const WITHOUT_PRINTING: &str = "WithoutPrinting";
    /// Model override for setups without autodetection.
    pub const MODEL_NAME: &str = "ModelName";
    /// ISO 4217 alphabetic code of the system currency.
    pub const SYSTEM_CURRENCY_ID: &str = "SystemCurrencyId";
}

/// Auto / Use / NotUse switch for optional capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tristate {
    #[default]
    Auto,
    Use,
    NotUse,
}

impl Tristate {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "Auto" => Some(Tristate::Auto),
            "Use" => Some(Tristate::Use),
            "NotUse" => Some(Tristate::NotUse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    values: BTreeMap<String, Value>,
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Millisecond values become `Duration`s; non-numeric values are None.
    pub fn get_ms(&self, key: &str) -> Option<Duration> {
        self.get_i64(key)
            .filter(|ms| *ms >= 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }

    pub fn get_tristate(&self, key: &str) -> Tristate {
        self.get_str(key)
            .and_then(Tristate::parse)
            .unwrap_or_default()
    }

    /// Operator enable intent, defaulting to disabled.
    pub fn enabled(&self) -> bool {
        self.get_bool(keys::ENABLED).unwrap_or(false)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.set(keys::ENABLED, enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let mut config = DeviceConfig::new();
        config.set(keys::ENABLED, true);
        config.set(keys::DISABLING_TIMEOUT, 1500);
        config.set(keys::MODEL_NAME, "CashFlow SC-1");
        config.set(keys::WITHOUT_PRINTING, "Use");

        assert!(config.enabled());
        assert_eq!(
            config.get_ms(keys::DISABLING_TIMEOUT),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.get_str(keys::MODEL_NAME), Some("CashFlow SC-1"));
        assert_eq!(config.get_tristate(keys::WITHOUT_PRINTING), Tristate::Use);
    }

    #[test]
    fn missing_and_malformed_keys_fall_back() {
        let mut config = DeviceConfig::new();
        config.set(keys::DISABLING_TIMEOUT, "soon");

        assert!(!config.enabled());
        assert_eq!(config.get_ms(keys::DISABLING_TIMEOUT), None);
        assert_eq!(config.get_tristate(keys::CAN_WITHOUT_PRINTING), Tristate::Auto);
    }

    #[test]
    fn negative_timeouts_are_rejected() {
        let mut config = DeviceConfig::new();
        config.set(keys::INITIALIZE_TIMEOUT, -1);
        assert_eq!(config.get_ms(keys::INITIALIZE_TIMEOUT), None);
    }
}
