//! Point-of-sale REST client
//!
//! Typed access to the merchant backend's order, deposit, merchant, wallet and report resources. Every request is
//! authenticated with a bearer token that is read from a [`TokenStore`] at request time, so a rotated token takes
//! effect on the very next call.
//!
//! On top of the raw client ([`PosApi`]) the crate provides:
//! * [`OrderQuery`], an on-demand, disabled-by-default order check,
//! * [`OrderHistory`], a de-duplicating accumulator for paginated order listings,
//! * [`MerchantProfileCache`], a once-per-session merchant profile cache,
//! * [`validation`], local form validation that runs before anything hits the network.
mod api;
mod config;
mod data_objects;
mod error;
mod merchant_cache;
mod queries;
mod token_store;
pub mod validation;

pub use api::PosApi;
pub use config::PosApiConfig;
pub use data_objects::{
    CreateDepositRequest,
    CreateMerchantRequest,
    CreateOrderRequest,
    Deposit,
    DepositId,
    Merchant,
    MerchantId,
    Order,
    OrderId,
    OrderListParams,
    OrderStatus,
    PaymentCompletedEvent,
    Report,
    ReportBucket,
    ReportGrouping,
    ReportParams,
    ReportSummary,
    UpdateWalletRequest,
};
pub use error::PosApiError;
pub use merchant_cache::MerchantProfileCache;
pub use queries::{OrderHistory, OrderQuery, OrderSource};
pub use token_store::{token_store_from_env, FileTokenStore, StaticTokenStore, TokenStore};
pub use validation::ValidationErrors;
