//! Denomination (par) records for cash receivers.

use serde::{Deserialize, Serialize};

/// Physical receiver a denomination belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CashReceiver {
    #[default]
    Bill,
    Coin,
}

/// One denomination the device can recognize.
///
/// Rebuilt on every par-table load; `enabled` reflects what the platform
/// asked for, `inhibit` what the device reports.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Par {
    pub nominal: u64,
    /// ISO 4217 alphabetic code, e.g. "RUB".
    pub currency: String,
    pub enabled: bool,
    pub inhibit: bool,
    pub receiver: CashReceiver,
}

impl Par {
    pub fn new(nominal: u64, currency: impl Into<String>) -> Self {
        Self {
            nominal,
            currency: currency.into(),
            enabled: false,
            inhibit: true,
            receiver: CashReceiver::Bill,
        }
    }

    /// A par can take part in acceptance only with a positive nominal and
    /// no device-side inhibit.
    pub fn acceptable(&self) -> bool {
        self.nominal > 0 && !self.inhibit
    }
}

/// ISO 4217 numeric id for the currencies the platform ships with.
pub fn currency_numeric(code: &str) -> Option<u16> {
    match code {
        "RUB" => Some(643),
        "USD" => Some(840),
        "EUR" => Some(978),
        "KZT" => Some(398),
        "BYN" => Some(933),
        "UAH" => Some(980),
        _ => None,
    }
}
