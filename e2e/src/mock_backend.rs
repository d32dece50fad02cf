//! An in-process stand-in for the payments backend.
//!
//! It implements the REST surface under `/functions/v1` with in-memory state, checks bearer tokens, counts requests per
//! route and can be told to fail upcoming requests. Payments are simulated with [`MockBackend::complete_order`] and
//! friends; pairing those with a loopback realtime transport gives a fully offline end-to-end setup.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io,
    str::FromStr,
    sync::Arc,
};

use actix_web::{dev::ServerHandle, http::header::AUTHORIZATION, web, App, HttpRequest, HttpResponse, HttpServer};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use log::*;
use parking_lot::Mutex;
use pos_api_client::{
    CreateDepositRequest,
    CreateMerchantRequest,
    CreateOrderRequest,
    Deposit,
    DepositId,
    Merchant,
    MerchantId,
    Order,
    OrderId,
    OrderStatus,
    PaymentCompletedEvent,
    PosApiConfig,
    Report,
    ReportBucket,
    ReportSummary,
    UpdateWalletRequest,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const API_PREFIX: &str = "/functions/v1";

struct BackendState {
    merchant_id: MerchantId,
    merchant: Option<Merchant>,
    /// Oldest first
    orders: Vec<Order>,
    deposits: Vec<Deposit>,
    tokens: HashSet<String>,
    requests: HashMap<String, usize>,
    tokens_seen: Vec<String>,
    fail_next: usize,
    last_id: u64,
}

impl BackendState {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new<M: Into<MerchantId>>(merchant_id: M) -> Self {
        let state = BackendState {
            merchant_id: merchant_id.into(),
            merchant: None,
            orders: Vec::new(),
            deposits: Vec::new(),
            tokens: HashSet::new(),
            requests: HashMap::new(),
            tokens_seen: Vec::new(),
            fail_next: 0,
            last_id: 0,
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub fn merchant_id(&self) -> MerchantId {
        self.state.lock().merchant_id.clone()
    }

    /// Create the merchant profile, as if the merchant had already signed up.
    pub fn with_merchant_profile(self, display_name: &str) -> Self {
        {
            let mut state = self.state.lock();
            let merchant = Merchant {
                merchant_id: state.merchant_id.clone(),
                display_name: Some(display_name.to_string()),
                email: None,
                default_currency: "USD".into(),
                default_language: Some("en".into()),
                default_token_id: None,
                wallet_address: None,
                stellar_address: None,
            };
            state.merchant = Some(merchant);
        }
        self
    }

    pub fn accept_token(&self, token: &str) {
        self.state.lock().tokens.insert(token.to_string());
    }

    pub fn revoke_token(&self, token: &str) {
        self.state.lock().tokens.remove(token);
    }

    /// The next `n` requests get a 503, regardless of route.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    /// Requests received for `route`, e.g. `GET /orders/ord_1`. Failed and unauthorised requests count too.
    pub fn request_count(&self, route: &str) -> usize {
        self.state.lock().requests.get(route).copied().unwrap_or_default()
    }

    pub fn total_requests(&self) -> usize {
        self.state.lock().requests.values().sum()
    }

    /// Bearer tokens in the order they were presented
    pub fn tokens_seen(&self) -> Vec<String> {
        self.state.lock().tokens_seen.clone()
    }

    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        self.state.lock().orders.iter().find(|o| &o.order_id == order_id).cloned()
    }

    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }

    pub fn create_order(&self, req: CreateOrderRequest) -> Order {
        let mut state = self.state.lock();
        let n = state.next_id();
        let payment_id = format!("pay_{n}");
        // Keep creation times strictly increasing, so that newest-first ordering is stable
        let created_at = Utc::now() + ChronoDuration::milliseconds(n as i64);
        let order = Order {
            order_id: OrderId::new(format!("ord_{n}")),
            merchant_id: state.merchant_id.clone(),
            order_number: Some(format!("{}", 1000 + n)),
            status: OrderStatus::Pending,
            display_amount: req.display_amount,
            display_currency: req.display_currency,
            required_amount_usd: req.display_amount,
            qrcode: Some(format!("https://pay.example.com/checkout/{payment_id}")),
            payment_id: Some(payment_id),
            description: req.description,
            created_at,
            updated_at: None,
        };
        state.orders.push(order.clone());
        order
    }

    pub fn seed_orders(&self, n: usize) -> Vec<Order> {
        (0..n)
            .map(|i| self.create_order(CreateOrderRequest::new(Decimal::from(i as u64 + 1), "USD")))
            .collect()
    }

    pub fn set_order_status(&self, order_id: &OrderId, status: OrderStatus) -> Option<Order> {
        let mut state = self.state.lock();
        let order = state.orders.iter_mut().find(|o| &o.order_id == order_id)?;
        order.status = status;
        order.updated_at = Some(Utc::now());
        Some(order.clone())
    }

    /// Mark the order as paid and return the realtime notification the backend would broadcast.
    pub fn complete_order(&self, order_id: &OrderId) -> Option<Value> {
        let order = self.set_order_status(order_id, OrderStatus::Completed)?;
        let event = PaymentCompletedEvent {
            order_id: order.order_id,
            display_amount: Some(order.display_amount),
            display_currency: Some(order.display_currency),
            message: Some("Payment received".into()),
            timestamp: order.updated_at,
        };
        serde_json::to_value(event).ok()
    }

    fn gate(&self, req: &HttpRequest) -> Result<(), HttpResponse> {
        let route = format!("{} {}", req.method(), req.path().trim_start_matches(API_PREFIX));
        let token = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);
        let mut state = self.state.lock();
        trace!("🌍️ {route}");
        *state.requests.entry(route).or_default() += 1;
        if let Some(token) = &token {
            state.tokens_seen.push(token.clone());
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(HttpResponse::ServiceUnavailable().json(json!({ "message": "Injected failure" })));
        }
        match token {
            Some(token) if state.tokens.contains(&token) => Ok(()),
            _ => Err(HttpResponse::Unauthorized().json(json!({ "error": "Invalid or missing token" }))),
        }
    }
}

fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "success": true, "data": data }))
}

fn created<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Created().json(json!({ "success": true, "data": data }))
}

fn not_found(what: &str) -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "message": format!("{what} not found") }))
}

macro_rules! gate {
    ($backend:expr, $req:expr) => {
        if let Err(res) = $backend.gate(&$req) {
            return res;
        }
    };
}

//--------------------------------------        Orders         ---------------------------------------------------------
#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
    status: Option<String>,
}

async fn create_order(req: HttpRequest, backend: web::Data<MockBackend>, body: web::Json<CreateOrderRequest>) -> HttpResponse {
    gate!(backend, req);
    created(backend.create_order(body.into_inner()))
}

async fn list_orders(req: HttpRequest, backend: web::Data<MockBackend>, query: web::Query<ListQuery>) -> HttpResponse {
    gate!(backend, req);
    let status = match query.status.as_deref().map(OrderStatus::from_str).transpose() {
        Ok(status) => status,
        Err(e) => return HttpResponse::BadRequest().json(json!({ "message": e.to_string() })),
    };
    let state = backend.state.lock();
    let page = state
        .orders
        .iter()
        .rev()
        .filter(|o| status.map_or(true, |s| o.status == s))
        .skip(query.offset.unwrap_or_default())
        .take(query.limit.unwrap_or(20))
        .cloned()
        .collect::<Vec<_>>();
    ok(page)
}

async fn get_order(req: HttpRequest, backend: web::Data<MockBackend>, id: web::Path<String>) -> HttpResponse {
    gate!(backend, req);
    match backend.order(&OrderId::new(id.into_inner())) {
        Some(order) => ok(order),
        None => not_found("Order"),
    }
}

//--------------------------------------       Deposits        ---------------------------------------------------------
async fn create_deposit(req: HttpRequest, backend: web::Data<MockBackend>, body: web::Json<CreateDepositRequest>) -> HttpResponse {
    gate!(backend, req);
    let body = body.into_inner();
    let mut state = backend.state.lock();
    let n = state.next_id();
    let deposit_id = DepositId::new(format!("dep_{n}"));
    let deposit = Deposit {
        payment_url: Some(format!("https://pay.example.com/deposit/{}", deposit_id.as_str())),
        deposit_id,
        merchant_id: state.merchant_id.clone(),
        amount: body.amount,
        currency: body.currency,
        status: OrderStatus::Pending,
        created_at: Utc::now(),
        updated_at: None,
    };
    state.deposits.push(deposit.clone());
    created(deposit)
}

async fn list_deposits(req: HttpRequest, backend: web::Data<MockBackend>) -> HttpResponse {
    gate!(backend, req);
    let deposits = backend.state.lock().deposits.iter().rev().cloned().collect::<Vec<_>>();
    ok(deposits)
}

async fn get_deposit(req: HttpRequest, backend: web::Data<MockBackend>, id: web::Path<String>) -> HttpResponse {
    gate!(backend, req);
    let id = DepositId::new(id.into_inner());
    let deposit = backend.state.lock().deposits.iter().find(|d| d.deposit_id == id).cloned();
    match deposit {
        Some(deposit) => ok(deposit),
        None => not_found("Deposit"),
    }
}

//--------------------------------------  Merchants & wallets  ---------------------------------------------------------
async fn get_merchant(req: HttpRequest, backend: web::Data<MockBackend>) -> HttpResponse {
    gate!(backend, req);
    let merchant = backend.state.lock().merchant.clone();
    match merchant {
        Some(merchant) => ok(merchant),
        None => not_found("Merchant profile"),
    }
}

async fn create_merchant(req: HttpRequest, backend: web::Data<MockBackend>, body: web::Json<CreateMerchantRequest>) -> HttpResponse {
    gate!(backend, req);
    let body = body.into_inner();
    let mut state = backend.state.lock();
    if state.merchant.is_some() {
        return HttpResponse::Conflict().json(json!({ "message": "Merchant profile already exists" }));
    }
    let merchant = Merchant {
        merchant_id: state.merchant_id.clone(),
        display_name: body.display_name,
        email: None,
        default_currency: body.default_currency.unwrap_or_else(|| "USD".into()),
        default_language: body.default_language,
        default_token_id: None,
        wallet_address: None,
        stellar_address: None,
    };
    state.merchant = Some(merchant.clone());
    created(merchant)
}

async fn update_wallet(
    req: HttpRequest,
    backend: web::Data<MockBackend>,
    wallet_id: web::Path<String>,
    body: web::Json<UpdateWalletRequest>,
) -> HttpResponse {
    gate!(backend, req);
    let body = body.into_inner();
    let mut state = backend.state.lock();
    let Some(merchant) = state.merchant.as_mut() else {
        return not_found("Merchant profile");
    };
    debug!("🌍️ Updating wallet {wallet_id}");
    if body.chain.as_deref().is_some_and(|c| c.eq_ignore_ascii_case("stellar")) {
        merchant.stellar_address = Some(body.wallet_address);
    } else {
        merchant.wallet_address = Some(body.wallet_address);
    }
    ok(merchant.clone())
}

//--------------------------------------        Reports        ---------------------------------------------------------
#[derive(Debug, Deserialize)]
struct ReportQuery {
    from: NaiveDate,
    to: NaiveDate,
    group_by: Option<String>,
}

async fn get_report(req: HttpRequest, backend: web::Data<MockBackend>, query: web::Query<ReportQuery>) -> HttpResponse {
    gate!(backend, req);
    let format = match query.group_by.as_deref().unwrap_or("day") {
        "day" => "%Y-%m-%d",
        "week" => "%G-W%V",
        "month" => "%Y-%m",
        other => return HttpResponse::BadRequest().json(json!({ "message": format!("Unknown grouping {other}") })),
    };
    let state = backend.state.lock();
    let mut summary = ReportSummary::default();
    let mut groups = BTreeMap::<String, (u64, Decimal)>::new();
    state.orders.iter().filter(|o| (query.from..=query.to).contains(&o.created_at.date_naive())).for_each(|o| {
        summary.total_orders += 1;
        if o.status == OrderStatus::Completed {
            summary.completed_orders += 1;
        }
        summary.total_amount_usd += o.required_amount_usd;
        let bucket = groups.entry(o.created_at.format(format).to_string()).or_default();
        bucket.0 += 1;
        bucket.1 += o.required_amount_usd;
    });
    let groups = groups
        .into_iter()
        .map(|(period, (total_orders, total_amount_usd))| ReportBucket { period, total_orders, total_amount_usd })
        .collect();
    ok(Report { summary, groups })
}

//--------------------------------------        Server         ---------------------------------------------------------
pub struct MockServer {
    pub url: String,
    pub backend: MockBackend,
    handle: ServerHandle,
}

impl MockServer {
    /// Serve `backend` on a random local port.
    pub async fn start(backend: MockBackend) -> io::Result<Self> {
        let data = web::Data::new(backend.clone());
        let server = HttpServer::new(move || {
            App::new().app_data(data.clone()).service(
                web::scope(API_PREFIX)
                    .route("/orders", web::post().to(create_order))
                    .route("/orders", web::get().to(list_orders))
                    .route("/orders/{id}", web::get().to(get_order))
                    .route("/deposits", web::post().to(create_deposit))
                    .route("/deposits", web::get().to(list_deposits))
                    .route("/deposits/{id}", web::get().to(get_deposit))
                    .route("/merchants", web::get().to(get_merchant))
                    .route("/merchants", web::post().to(create_merchant))
                    .route("/wallets/{wallet_id}", web::post().to(update_wallet))
                    .route("/reports", web::get().to(get_report)),
            )
        })
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))?;
        let addr = server
            .addrs()
            .first()
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "Mock backend has no address"))?;
        let server = server.run();
        let handle = server.handle();
        tokio::spawn(async move {
            match server.await {
                Ok(_) => info!("🌍️ Mock backend shut down"),
                Err(e) => warn!("🌍️ Mock backend error: {e}"),
            }
        });
        info!("🌍️ Mock backend listening on {addr}");
        Ok(Self { url: format!("http://{addr}"), backend, handle })
    }

    pub fn api_config(&self) -> PosApiConfig {
        PosApiConfig::new(&self.url)
    }

    pub async fn stop(&self) {
        self.handle.stop(true).await;
    }
}
