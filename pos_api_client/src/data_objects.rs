use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

//--------------------------------------      Identifiers      ---------------------------------------------------------
macro_rules! string_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new<S: Into<String>>(id: S) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

string_id!(OrderId, "#");
string_id!(DepositId, "#");
string_id!(MerchantId, "");

//--------------------------------------      OrderStatus      ---------------------------------------------------------
/// The server-side lifecycle of orders and deposits. Only the server moves an order between these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, no payment seen yet
    Pending,
    /// A payment has been seen and is being confirmed
    Processing,
    /// Paid in full
    Completed,
    /// The payment failed or the order expired
    Failed,
    /// A payment arrived, but it does not match the required amount
    Discrepancy,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Discrepancy)
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Processing => write!(f, "PROCESSING"),
            OrderStatus::Completed => write!(f, "COMPLETED"),
            OrderStatus::Failed => write!(f, "FAILED"),
            OrderStatus::Discrepancy => write!(f, "DISCREPANCY"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid order status: {0}")]
pub struct StatusConversionError(String);

impl FromStr for OrderStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "DISCREPANCY" => Ok(Self::Discrepancy),
            _ => Err(StatusConversionError(s.to_string())),
        }
    }
}

//--------------------------------------         Order         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub merchant_id: MerchantId,
    /// Human-friendly order number shown on receipts
    #[serde(default)]
    pub order_number: Option<String>,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::float")]
    pub display_amount: Decimal,
    pub display_currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub required_amount_usd: Decimal,
    /// Payment reference used to build the checkout URL
    #[serde(default)]
    pub payment_id: Option<String>,
    /// A fully-formed checkout URL, meant to be rendered as a QR code
    #[serde(default)]
    pub qrcode: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub display_amount: Decimal,
    pub display_currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CreateOrderRequest {
    pub fn new<S: Into<String>>(display_amount: Decimal, display_currency: S) -> Self {
        Self { display_amount, display_currency: display_currency.into(), description: None }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderListParams {
    pub status: Option<OrderStatus>,
    pub limit: u32,
    pub offset: u64,
}

impl Default for OrderListParams {
    fn default() -> Self {
        Self { status: None, limit: 20, offset: 0 }
    }
}

impl OrderListParams {
    pub fn new(limit: u32, offset: u64) -> Self {
        Self { status: None, limit, offset }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("limit", self.limit.to_string()), ("offset", self.offset.to_string())];
        if let Some(status) = self.status {
            params.push(("status", status.to_string()));
        }
        params
    }
}

//--------------------------------------        Deposit        ---------------------------------------------------------
/// A merchant top-up. Same lifecycle as an [`Order`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub deposit_id: DepositId,
    pub merchant_id: MerchantId,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub payment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDepositRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
}

//--------------------------------------       Merchant        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Merchant {
    pub merchant_id: MerchantId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub default_currency: String,
    #[serde(default)]
    pub default_language: Option<String>,
    #[serde(default)]
    pub default_token_id: Option<String>,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub stellar_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMerchantRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateWalletRequest {
    pub wallet_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

//--------------------------------------        Reports        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportGrouping {
    Day,
    Week,
    Month,
}

impl Display for ReportGrouping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportGrouping::Day => write!(f, "day"),
            ReportGrouping::Week => write!(f, "week"),
            ReportGrouping::Month => write!(f, "month"),
        }
    }
}

impl FromStr for ReportGrouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(format!("Invalid report grouping: {other}. Use day, week or month")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportParams {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub group_by: ReportGrouping,
}

impl ReportParams {
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("from", self.from.format("%Y-%m-%d").to_string()),
            ("to", self.to.format("%Y-%m-%d").to_string()),
            ("group_by", self.group_by.to_string()),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_orders: u64,
    #[serde(default)]
    pub completed_orders: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount_usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportBucket {
    /// Start of the bucket, formatted by the server according to the grouping
    pub period: String,
    pub total_orders: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount_usd: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub summary: ReportSummary,
    #[serde(default)]
    pub groups: Vec<ReportBucket>,
}

//--------------------------------------   Realtime payloads   ---------------------------------------------------------
/// Pushed on the merchant channel when one of the merchant's orders completes. It is a hint that the order changed,
/// never a replacement for the order record itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompletedEvent {
    pub order_id: OrderId,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub display_amount: Option<Decimal>,
    #[serde(default)]
    pub display_currency: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

//--------------------------------------     Wire envelope     ---------------------------------------------------------
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: Option<bool>,
    pub data: T,
}
