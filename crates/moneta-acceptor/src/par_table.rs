//! Bill (par) table loading and validation.
//!
//! The reference protocol reports up to 24 bill types, five bytes each:
//!
//! ```text
//! byte 0   first digits of the nominal
//! byte 1-3 ISO 4217 alphabetic currency code
//! byte 4   decimal exponent: nominal = byte0 × 10^byte4
//! ```
//!
//! All-zero entries are unassigned positions.

use moneta_core::{CurrencyError, Error, Par, Result, par::currency_numeric};
use std::collections::BTreeMap;
use tracing::debug;

const ENTRY_SIZE: usize = 5;
const MAX_BILL_TYPES: usize = 24;

/// Parse a bill-table answer into position-keyed pars.
pub fn parse_bill_table(answer: &[u8]) -> Result<BTreeMap<u8, Par>> {
    if answer.is_empty() || answer.len() % ENTRY_SIZE != 0 {
        return Err(Error::protocol(format!(
            "bill table of {} bytes is not a multiple of {ENTRY_SIZE}",
            answer.len()
        )));
    }
    if answer.len() / ENTRY_SIZE > MAX_BILL_TYPES {
        return Err(Error::protocol("bill table reports too many bill types"));
    }

    let mut table = BTreeMap::new();
    for (position, entry) in answer.chunks(ENTRY_SIZE).enumerate() {
        if entry.iter().all(|&b| b == 0) {
            continue;
        }
        let exponent = u32::from(entry[4]);
        let nominal = u64::from(entry[0])
            .checked_mul(10u64.pow(exponent.min(12)))
            .filter(|_| exponent <= 12)
            .ok_or_else(|| Error::protocol("bill nominal overflows"))?;
        let currency: String = entry[1..4]
            .iter()
            .map(|&b| char::from(b))
            .collect();
        if !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(Error::protocol(format!(
                "bill type {position} carries a malformed currency code"
            )));
        }

        let mut par = Par::new(nominal, currency);
        par.inhibit = false;
        table.insert(position as u8, par);
    }
    debug!(bill_types = table.len(), "bill table parsed");
    Ok(table)
}

/// Validate a loaded table against the system currency and compute which
/// pars take part in acceptance. On success every acceptable par is
/// marked enabled.
pub fn validate_par_table(
    table: &mut BTreeMap<u8, Par>,
    system_currency: Option<&str>,
) -> std::result::Result<(), CurrencyError> {
    let system_currency = system_currency.ok_or(CurrencyError::Config)?;
    if currency_numeric(system_currency).is_none() {
        return Err(CurrencyError::Config);
    }
    if table.is_empty() {
        return Err(CurrencyError::Loading);
    }

    for par in table.values() {
        if currency_numeric(&par.currency).is_none() {
            return Err(CurrencyError::Billset);
        }
    }
    if table.values().any(|par| par.currency != system_currency) {
        return Err(CurrencyError::Config);
    }

    let mut any = false;
    for par in table.values_mut() {
        par.enabled = par.acceptable();
        any |= par.enabled;
    }
    if !any {
        return Err(CurrencyError::NoAvailable);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(digits: u8, currency: &str, exponent: u8) -> Vec<u8> {
        let mut bytes = vec![digits];
        bytes.extend_from_slice(currency.as_bytes());
        bytes.push(exponent);
        bytes
    }

    fn table_answer(entries: &[Vec<u8>]) -> Vec<u8> {
        entries.concat()
    }

    #[test]
    fn nominal_is_digits_times_power_of_ten() {
        let answer = table_answer(&[entry(1, "RUB", 2), entry(5, "RUB", 3)]);
        let table = parse_bill_table(&answer).unwrap();
        assert_eq!(table[&0].nominal, 100);
        assert_eq!(table[&1].nominal, 5000);
        assert_eq!(table[&0].currency, "RUB");
    }

    #[test]
    fn zero_entries_are_skipped() {
        let answer = table_answer(&[vec![0; 5], entry(1, "RUB", 1)]);
        let table = parse_bill_table(&answer).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.contains_key(&1));
    }

    #[test]
    fn ragged_answer_is_rejected() {
        assert!(parse_bill_table(&[0x01, 0x52]).is_err());
        assert!(parse_bill_table(&[]).is_err());
    }

    #[test]
    fn validation_enables_acceptable_pars() {
        let answer = table_answer(&[entry(1, "RUB", 2), entry(5, "RUB", 2)]);
        let mut table = parse_bill_table(&answer).unwrap();
        validate_par_table(&mut table, Some("RUB")).unwrap();
        assert!(table.values().all(|par| par.enabled));
    }

    #[test]
    fn currency_mismatch_is_a_config_error_with_nothing_enabled() {
        let answer = table_answer(&[entry(1, "USD", 2), entry(5, "USD", 2)]);
        let mut table = parse_bill_table(&answer).unwrap();
        assert_eq!(
            validate_par_table(&mut table, Some("RUB")),
            Err(CurrencyError::Config)
        );
        assert!(table.values().all(|par| !par.enabled));
    }

    #[test]
    fn missing_system_currency_is_a_config_error() {
        let answer = table_answer(&[entry(1, "RUB", 2)]);
        let mut table = parse_bill_table(&answer).unwrap();
        assert_eq!(
            validate_par_table(&mut table, None),
            Err(CurrencyError::Config)
        );
    }

    #[test]
    fn unknown_billset_currency_is_a_billset_error() {
        let answer = table_answer(&[entry(1, "XTS", 2)]);
        let mut table = parse_bill_table(&answer).unwrap();
        assert_eq!(
            validate_par_table(&mut table, Some("RUB")),
            Err(CurrencyError::Billset)
        );
    }

    #[test]
    fn empty_table_is_a_loading_error() {
        let mut table = BTreeMap::new();
        assert_eq!(
            validate_par_table(&mut table, Some("RUB")),
            Err(CurrencyError::Loading)
        );
    }

    #[test]
    fn all_inhibited_is_no_available() {
        let answer = table_answer(&[entry(1, "RUB", 2)]);
        let mut table = parse_bill_table(&answer).unwrap();
        for par in table.values_mut() {
            par.inhibit = true;
        }
        assert_eq!(
            validate_par_table(&mut table, Some("RUB")),
            Err(CurrencyError::NoAvailable)
        );
    }
}
