//! Local form validation.
//!
//! These checks run before a request is sent, and report every offending field at once so that a front end can show
//! the messages inline next to each input.
use std::fmt::Display;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use crate::data_objects::{CreateDepositRequest, CreateOrderRequest, UpdateWalletRequest};

static CURRENCY_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3,5}$").expect("valid regex"));
static EVM_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex"));
static STELLAR_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^G[A-Z2-7]{55}$").expect("valid regex"));

const MAX_DESCRIPTION_LEN: usize = 500;
const MAX_DECIMAL_PLACES: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn add<S: Into<String>>(&mut self, field: &'static str, message: S) {
        self.errors.push(FieldError { field, message: message.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// The message for the given field, if it failed validation.
    pub fn field(&self, field: &str) -> Option<&str> {
        self.errors.iter().find(|e| e.field == field).map(|e| e.message.as_str())
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msgs = self.errors.iter().map(|e| format!("{}: {}", e.field, e.message)).collect::<Vec<_>>().join("; ");
        write!(f, "{msgs}")
    }
}

impl std::error::Error for ValidationErrors {}

/// A withdrawal or payout destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletKind {
    Evm,
    Stellar,
}

pub fn wallet_kind(address: &str) -> Option<WalletKind> {
    let address = address.trim();
    if EVM_ADDRESS.is_match(address) {
        Some(WalletKind::Evm)
    } else if STELLAR_ADDRESS.is_match(address) {
        Some(WalletKind::Stellar)
    } else {
        None
    }
}

fn check_amount(errors: &mut ValidationErrors, field: &'static str, amount: Decimal) {
    if amount <= Decimal::ZERO {
        errors.add(field, "must be greater than zero");
    } else if amount.normalize().scale() > MAX_DECIMAL_PLACES {
        errors.add(field, format!("must have at most {MAX_DECIMAL_PLACES} decimal places"));
    }
}

fn check_currency(errors: &mut ValidationErrors, field: &'static str, currency: &str) {
    if !CURRENCY_CODE.is_match(currency) {
        errors.add(field, format!("'{currency}' is not a currency code"));
    }
}

pub fn validate_create_order(req: &CreateOrderRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    check_amount(&mut errors, "display_amount", req.display_amount);
    check_currency(&mut errors, "display_currency", &req.display_currency);
    if req.description.as_ref().is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN) {
        errors.add("description", format!("must be at most {MAX_DESCRIPTION_LEN} characters"));
    }
    errors.into_result()
}

pub fn validate_create_deposit(req: &CreateDepositRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    check_amount(&mut errors, "amount", req.amount);
    check_currency(&mut errors, "currency", &req.currency);
    errors.into_result()
}

pub fn validate_wallet_update(req: &UpdateWalletRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    match (wallet_kind(&req.wallet_address), req.chain.as_deref()) {
        (None, _) => errors.add("wallet_address", "is neither an EVM nor a Stellar address"),
        (Some(WalletKind::Evm), Some(chain)) if chain.eq_ignore_ascii_case("stellar") => {
            errors.add("chain", "an EVM address cannot be used on the stellar chain")
        },
        (Some(WalletKind::Stellar), Some(chain)) if !chain.eq_ignore_ascii_case("stellar") => {
            errors.add("chain", format!("a Stellar address cannot be used on {chain}"))
        },
        _ => {},
    }
    errors.into_result()
}
