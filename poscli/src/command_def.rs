use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use pos_api_client::{DepositId, MerchantId, OrderId, OrderStatus, ReportGrouping};
use rust_decimal::Decimal;

#[derive(Parser, Debug)]
#[command(version, about = "Point-of-sale client for crypto payments")]
pub struct Arguments {
    /// The merchant whose realtime channel is watched. Defaults to POS_MERCHANT_ID, then to the signed-in merchant's
    /// profile.
    #[arg(short = 'm', long = "merchant", global = true)]
    pub merchant: Option<MerchantId>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    #[command(subcommand)]
    /// Manage the stored session token
    Token(TokenCommand),
    #[command(subcommand)]
    /// Show or create the merchant profile
    Merchant(MerchantCommand),
    #[command(subcommand)]
    /// Create, fetch, list and watch orders
    Order(OrderCommand),
    #[command(subcommand)]
    /// Create, fetch and list deposits
    Deposit(DepositCommand),
    /// Sales report for a date range
    Report(ReportArgs),
    #[command(subcommand)]
    /// Manage payout wallets
    Wallet(WalletCommand),
}

#[derive(Debug, Subcommand)]
pub enum TokenCommand {
    /// Store a session token for subsequent commands
    Set {
        #[arg(required = true, index = 1)]
        token: String,
    },
    /// Forget the stored session token
    Clear,
    /// Say whether a session token is available. Never prints the token itself.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum MerchantCommand {
    /// Show the signed-in merchant's profile
    Show,
    /// Create a merchant profile for the signed-in user
    Create {
        #[arg(short = 'n', long = "name")]
        name: Option<String>,
        #[arg(short = 'c', long = "currency")]
        currency: Option<String>,
        #[arg(short = 'l', long = "language")]
        language: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum OrderCommand {
    /// Create an order and print its payment QR code
    Create {
        /// The amount to charge, in the display currency
        #[arg(required = true, index = 1)]
        amount: Decimal,
        /// The display currency, e.g. USD
        #[arg(required = true, index = 2)]
        currency: String,
        #[arg(short = 'd', long = "description")]
        description: Option<String>,
        /// Keep running until the order is paid, fails, or the timeout expires
        #[arg(short = 'w', long = "watch")]
        watch: bool,
        #[command(flatten)]
        watch_opts: WatchOptions,
    },
    /// Fetch the order with the given ID
    Get {
        #[arg(required = true, index = 1)]
        id: OrderId,
    },
    /// List orders, newest first
    List {
        #[arg(short = 's', long = "status", value_parser = parse_status)]
        status: Option<OrderStatus>,
        #[arg(short = 'l', long = "limit", default_value = "20")]
        limit: u32,
        /// Keep fetching pages until the history is exhausted
        #[arg(short = 'a', long = "all")]
        all: bool,
        /// Upper bound on the number of pages fetched with --all
        #[arg(long = "max-pages", default_value = "50")]
        max_pages: usize,
    },
    /// Wait for an existing order to be paid
    Watch {
        #[arg(required = true, index = 1)]
        id: OrderId,
        #[command(flatten)]
        watch_opts: WatchOptions,
    },
}

#[derive(Debug, Clone, Args)]
pub struct WatchOptions {
    /// Give up after this many seconds
    #[arg(short = 't', long = "timeout", default_value = "600")]
    pub timeout_secs: u64,
    /// Also poll the order every N seconds. 0 disables polling. Defaults to POS_POLL_INTERVAL_SECS.
    #[arg(short = 'p', long = "poll")]
    pub poll_secs: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum DepositCommand {
    /// Create a deposit
    Create {
        #[arg(required = true, index = 1)]
        amount: Decimal,
        #[arg(required = true, index = 2)]
        currency: String,
    },
    /// Fetch the deposit with the given ID
    Get {
        #[arg(required = true, index = 1)]
        id: DepositId,
    },
    /// List all deposits
    List,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// First day of the report (YYYY-MM-DD)
    #[arg(short = 'f', long = "from", value_parser = parse_date)]
    pub from: NaiveDate,
    /// Last day of the report (YYYY-MM-DD)
    #[arg(short = 't', long = "to", value_parser = parse_date)]
    pub to: NaiveDate,
    #[arg(short = 'g', long = "group-by", default_value = "day", value_parser = parse_grouping)]
    pub group_by: ReportGrouping,
}

#[derive(Debug, Subcommand)]
pub enum WalletCommand {
    /// Set the payout address of a wallet
    Update {
        #[arg(required = true, index = 1)]
        wallet_id: String,
        /// An EVM (0x...) or Stellar (G...) address
        #[arg(required = true, index = 2)]
        address: String,
        /// The chain the address belongs to. Inferred from the address if omitted.
        #[arg(short = 'c', long = "chain")]
        chain: Option<String>,
    },
}

fn parse_status(s: &str) -> Result<OrderStatus> {
    OrderStatus::from_str(s).map_err(|e| anyhow!("{e}"))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| anyhow!("{s} is not a YYYY-MM-DD date. {e}"))
}

fn parse_grouping(s: &str) -> Result<ReportGrouping> {
    ReportGrouping::from_str(s).map_err(|e| anyhow!(e))
}

#[cfg(test)]
mod test {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Arguments::command().debug_assert();
    }

    #[test]
    fn parse_order_create() {
        let args = Arguments::parse_from(["poscli", "order", "create", "12.50", "USD", "-d", "Coffee", "--watch"]);
        let Command::Order(OrderCommand::Create { amount, currency, description, watch, watch_opts }) = args.command
        else {
            panic!("Expected order create");
        };
        assert_eq!(amount, rust_decimal_macros::dec!(12.50));
        assert_eq!(currency, "USD");
        assert_eq!(description.as_deref(), Some("Coffee"));
        assert!(watch);
        assert_eq!(watch_opts.timeout_secs, 600);
        assert_eq!(watch_opts.poll_secs, None);
    }

    #[test]
    fn parse_report_args() {
        let args = Arguments::parse_from(["poscli", "report", "--from", "2024-05-01", "--to", "2024-05-31", "-g", "week"]);
        let Command::Report(report) = args.command else { panic!("Expected report") };
        assert_eq!(report.group_by, ReportGrouping::Week);
        assert_eq!(report.from, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert!(Arguments::try_parse_from(["poscli", "report", "--from", "May 1", "--to", "2024-05-31"]).is_err());
    }

    #[test]
    fn parse_list_with_status_and_global_merchant() {
        let args = Arguments::parse_from(["poscli", "order", "list", "--status", "completed", "--all", "-m", "m42"]);
        assert_eq!(args.merchant, Some(MerchantId::new("m42")));
        let Command::Order(OrderCommand::List { status, all, limit, .. }) = args.command else {
            panic!("Expected order list")
        };
        assert_eq!(status, Some(OrderStatus::Completed));
        assert!(all);
        assert_eq!(limit, 20);
    }
}
