use anyhow::{bail, Context, Result};
use log::*;
use pos_api_client::{
    token_store_from_env,
    validation::{wallet_kind, WalletKind},
    CreateDepositRequest,
    CreateMerchantRequest,
    CreateOrderRequest,
    FileTokenStore,
    MerchantId,
    MerchantProfileCache,
    OrderHistory,
    OrderId,
    OrderSource,
    PosApi,
    PosApiConfig,
    PosApiError,
    ReportParams,
    UpdateWalletRequest,
};
use pos_common::{AbortSignal, Secret};
use pos_engine::TrackedStatus;

use crate::{
    command_def::{
        Arguments,
        Command,
        DepositCommand,
        MerchantCommand,
        OrderCommand,
        ReportArgs,
        TokenCommand,
        WalletCommand,
        WatchOptions,
    },
    formatting::{
        format_deposit,
        format_deposits,
        format_merchant,
        format_order,
        format_order_with_qr_code,
        format_orders,
        format_report,
    },
    watch::watch_order,
};

pub async fn handle_command(cli: Arguments) -> Result<()> {
    let Arguments { merchant, command } = cli;
    match command {
        Command::Token(cmd) => handle_token_command(cmd),
        Command::Merchant(cmd) => handle_merchant_command(cmd).await,
        Command::Order(cmd) => handle_order_command(cmd, merchant).await,
        Command::Deposit(cmd) => handle_deposit_command(cmd).await,
        Command::Report(args) => print_report(args).await,
        Command::Wallet(cmd) => handle_wallet_command(cmd).await,
    }
}

fn new_pos_api() -> Result<PosApi> {
    let config = PosApiConfig::new_from_env_or_default();
    let tokens = token_store_from_env()?;
    let api = PosApi::new(config, tokens)?;
    Ok(api)
}

/// Turn local validation failures into one line per field, which reads better on a terminal than the joined message.
fn explain(err: PosApiError) -> anyhow::Error {
    match err {
        PosApiError::Validation(errors) => {
            let lines = errors.errors().iter().map(|e| format!("  {}: {}", e.field, e.message)).collect::<Vec<_>>();
            anyhow::anyhow!("The request is invalid:\n{}", lines.join("\n"))
        },
        PosApiError::MissingToken => {
            anyhow::anyhow!("You are not signed in. Store a session token with `poscli token set <token>`")
        },
        other => other.into(),
    }
}

//--------------------------------------        Tokens         ---------------------------------------------------------
fn handle_token_command(cmd: TokenCommand) -> Result<()> {
    let store = FileTokenStore::new(FileTokenStore::default_path()?);
    match cmd {
        TokenCommand::Set { token } => {
            let token = token.trim().to_string();
            if token.is_empty() {
                bail!("The token is empty");
            }
            store.save_token(&Secret::new(token))?;
            println!("Session token saved to {}", store.path().display());
        },
        TokenCommand::Clear => {
            store.clear()?;
            println!("Session token removed");
        },
        TokenCommand::Status => match token_store_from_env()?.load_token()? {
            Some(_) => println!("A session token is available"),
            None => println!("No session token. Use `poscli token set <token>` or set POS_ACCESS_TOKEN"),
        },
    }
    Ok(())
}

//--------------------------------------       Merchant        ---------------------------------------------------------
async fn handle_merchant_command(cmd: MerchantCommand) -> Result<()> {
    let api = new_pos_api()?;
    match cmd {
        MerchantCommand::Show => {
            let cache = MerchantProfileCache::new(api);
            let merchant = cache.profile().await.map_err(explain)?;
            println!("{}", format_merchant(&merchant)?);
        },
        MerchantCommand::Create { name, currency, language } => {
            let req = CreateMerchantRequest { display_name: name, default_currency: currency, default_language: language };
            let merchant = api.create_merchant(&req).await.map_err(explain)?;
            println!("Merchant created\n{}", format_merchant(&merchant)?);
        },
    }
    Ok(())
}

/// The merchant channel to watch: the command line wins, then POS_MERCHANT_ID, then the order's own merchant.
fn resolve_merchant(cli: Option<MerchantId>, order_merchant: &MerchantId) -> MerchantId {
    cli.or_else(|| std::env::var("POS_MERCHANT_ID").ok().filter(|s| !s.trim().is_empty()).map(MerchantId::from))
        .unwrap_or_else(|| order_merchant.clone())
}

//--------------------------------------        Orders         ---------------------------------------------------------
async fn handle_order_command(cmd: OrderCommand, merchant: Option<MerchantId>) -> Result<()> {
    let api = new_pos_api()?;
    match cmd {
        OrderCommand::Create { amount, currency, description, watch, watch_opts } => {
            let mut req = CreateOrderRequest::new(amount, currency.to_ascii_uppercase());
            if let Some(description) = description {
                req = req.with_description(description);
            }
            let order = api.create_order(&req).await.map_err(explain)?;
            info!("🧾️ Created order {}", order.order_id);
            println!("{}", format_order_with_qr_code(&order)?);
            if watch {
                let merchant_id = resolve_merchant(merchant, &order.merchant_id);
                watch_until_settled(api, merchant_id, order.order_id, &watch_opts).await?;
            }
        },
        OrderCommand::Get { id } => {
            let order = api.get_order(&id).await.map_err(explain)?;
            println!("{}", format_order(&order)?);
        },
        OrderCommand::List { status, limit, all, max_pages } => {
            let mut history = OrderHistory::new(limit);
            if let Some(status) = status {
                history = history.with_status(status);
            }
            if all {
                history.fetch_all(&api, max_pages).await.map_err(explain)?;
            } else {
                history.fetch_next_page(&api).await.map_err(explain)?;
            }
            println!("{}", format_orders(history.orders()));
            let more = if history.is_exhausted() { "" } else { " More are available; use --all to fetch them." };
            println!("{} order(s).{more}", history.len());
        },
        OrderCommand::Watch { id, watch_opts } => {
            let order = api.fetch_order(&id, &AbortSignal::new()).await.map_err(explain)?;
            println!("{}", format_order(&order)?);
            if order.status.is_terminal() {
                println!("Order {id} has already settled");
                return Ok(());
            }
            let merchant_id = resolve_merchant(merchant, &order.merchant_id);
            watch_until_settled(api, merchant_id, id, &watch_opts).await?;
        },
    }
    Ok(())
}

async fn watch_until_settled(api: PosApi, merchant: MerchantId, order: OrderId, opts: &WatchOptions) -> Result<()> {
    let status = watch_order(api, merchant, order.clone(), opts).await?;
    match status {
        TrackedStatus::Completed => Ok(()),
        TrackedStatus::Pending => bail!("Order {order} has not been paid yet"),
        other => bail!("Order {order} settled as {other}"),
    }
}

//--------------------------------------       Deposits        ---------------------------------------------------------
async fn handle_deposit_command(cmd: DepositCommand) -> Result<()> {
    let api = new_pos_api()?;
    match cmd {
        DepositCommand::Create { amount, currency } => {
            let req = CreateDepositRequest { amount, currency: currency.to_ascii_uppercase() };
            let deposit = api.create_deposit(&req).await.map_err(explain)?;
            println!("{}", format_deposit(&deposit)?);
        },
        DepositCommand::Get { id } => {
            let deposit = api.get_deposit(&id).await.map_err(explain)?;
            println!("{}", format_deposit(&deposit)?);
        },
        DepositCommand::List => {
            let deposits = api.list_deposits().await.map_err(explain)?;
            println!("{}", format_deposits(&deposits));
        },
    }
    Ok(())
}

//--------------------------------------    Reports & wallets  ---------------------------------------------------------
async fn print_report(args: ReportArgs) -> Result<()> {
    let api = new_pos_api()?;
    let params = ReportParams { from: args.from, to: args.to, group_by: args.group_by };
    let report = api.fetch_report(&params).await.map_err(explain)?;
    println!("Sales from {} to {}, by {}", params.from, params.to, params.group_by);
    println!("{}", format_report(&report)?);
    Ok(())
}

fn infer_chain(address: &str) -> Option<String> {
    match wallet_kind(address)? {
        WalletKind::Evm => Some("evm".to_string()),
        WalletKind::Stellar => Some("stellar".to_string()),
    }
}

async fn handle_wallet_command(cmd: WalletCommand) -> Result<()> {
    let api = new_pos_api()?;
    match cmd {
        WalletCommand::Update { wallet_id, address, chain } => {
            let chain = chain.or_else(|| infer_chain(&address));
            let req = UpdateWalletRequest { wallet_address: address.trim().to_string(), chain };
            let cache = MerchantProfileCache::new(api.clone());
            api.update_wallet(&wallet_id, &req).await.map_err(explain)?;
            cache.invalidate().await;
            let merchant = cache.profile().await.context("The wallet was updated, but the profile could not be reloaded")?;
            println!("Wallet {wallet_id} updated\n{}", format_merchant(&merchant)?);
        },
    }
    Ok(())
}
