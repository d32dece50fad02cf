use std::sync::Arc;

use log::*;
use pos_common::AbortSignal;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Client,
    Method,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::PosApiConfig,
    data_objects::{
        ApiEnvelope,
        CreateDepositRequest,
        CreateMerchantRequest,
        CreateOrderRequest,
        Deposit,
        DepositId,
        Merchant,
        Order,
        OrderId,
        OrderListParams,
        Report,
        ReportParams,
        UpdateWalletRequest,
    },
    token_store::TokenStore,
    validation,
    PosApiError,
};

#[derive(Clone)]
pub struct PosApi {
    config: PosApiConfig,
    client: Client,
    tokens: Arc<dyn TokenStore>,
}

impl PosApi {
    pub fn new(config: PosApiConfig, tokens: Arc<dyn TokenStore>) -> Result<Self, PosApiError> {
        let mut headers = HeaderMap::with_capacity(2);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| PosApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client, tokens })
    }

    pub fn config(&self) -> &PosApiConfig {
        &self.config
    }

    /// Send a request, retrying once (or `config.retries` times) on network failures and non-2xx responses.
    ///
    /// If `abort` fires while a request is in flight, the request is dropped and [`PosApiError::Cancelled`] is
    /// returned. No further attempts are made after an abort.
    pub async fn rest_query<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&B>,
        abort: Option<&AbortSignal>,
    ) -> Result<T, PosApiError> {
        let attempts = 1 + usize::from(self.config.retries);
        let mut attempt = 1;
        loop {
            let request = self.send_once::<T, B>(method.clone(), path, params, body);
            let result = match abort {
                Some(signal) => signal.run(request).await.unwrap_or(Err(PosApiError::Cancelled)),
                None => request.await,
            };
            match result {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!("🧾️ {method} {path} failed (attempt {attempt} of {attempts}). {e}. Retrying.");
                    attempt += 1;
                },
                Err(e) => {
                    debug!("🧾️ {method} {path} failed. {e}");
                    return Err(e);
                },
                Ok(v) => return Ok(v),
            }
        }
    }

    async fn send_once<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<T, PosApiError> {
        // Read at request time, so that a rotated token is used straight away
        let token = self.tokens.load_token()?.ok_or(PosApiError::MissingToken)?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", token.reveal()))
            .map_err(|e| PosApiError::InvalidRequest(format!("Access token is not a valid header value. {e}")))?;
        let url = self.config.url(path);
        trace!("🧾️ Sending REST query: {method} {url}");
        let mut req = self.client.request(method, url).header(AUTHORIZATION, auth);
        if !params.is_empty() {
            req = req.query(params);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let response = req.send().await.map_err(|e| PosApiError::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            trace!("🧾️ REST query successful. {status}");
            let envelope =
                response.json::<ApiEnvelope<T>>().await.map_err(|e| PosApiError::Json(e.to_string()))?;
            if envelope.success == Some(false) {
                warn!("🧾️ {path} returned {status} but flagged the response as unsuccessful");
            }
            Ok(envelope.data)
        } else {
            let text = response.text().await.map_err(|e| PosApiError::Network(e.to_string()))?;
            Err(PosApiError::from_error_body(status.as_u16(), &text))
        }
    }

    //------------------------------------------------   Orders   ------------------------------------------------------
    pub async fn create_order(&self, order: &CreateOrderRequest) -> Result<Order, PosApiError> {
        validation::validate_create_order(order)?;
        debug!("🧾️ Creating order for {} {}", order.display_amount, order.display_currency);
        let order = self.rest_query::<Order, _>(Method::POST, "/orders", &[], Some(order), None).await?;
        info!("🧾️ Created order {} ({})", order.order_id, order.order_number.as_deref().unwrap_or("no number"));
        Ok(order)
    }

    pub async fn get_order(&self, order_id: &OrderId) -> Result<Order, PosApiError> {
        self.fetch_order_inner(order_id, None).await
    }

    /// Like [`Self::get_order`], but the request is dropped as soon as `abort` fires.
    pub async fn get_order_with_abort(&self, order_id: &OrderId, abort: &AbortSignal) -> Result<Order, PosApiError> {
        self.fetch_order_inner(order_id, Some(abort)).await
    }

    async fn fetch_order_inner(&self, order_id: &OrderId, abort: Option<&AbortSignal>) -> Result<Order, PosApiError> {
        let path = format!("/orders/{}", urlencoding::encode(order_id.as_str()));
        debug!("🧾️ Fetching order {order_id}");
        self.rest_query::<Order, ()>(Method::GET, &path, &[], None, abort).await
    }

    pub async fn list_orders(&self, params: &OrderListParams) -> Result<Vec<Order>, PosApiError> {
        let query = params.query_params();
        debug!("🧾️ Listing orders. limit={} offset={}", params.limit, params.offset);
        self.rest_query::<Vec<Order>, ()>(Method::GET, "/orders", &query, None, None).await
    }

    //------------------------------------------------  Deposits  ------------------------------------------------------
    pub async fn create_deposit(&self, deposit: &CreateDepositRequest) -> Result<Deposit, PosApiError> {
        validation::validate_create_deposit(deposit)?;
        let deposit = self.rest_query::<Deposit, _>(Method::POST, "/deposits", &[], Some(deposit), None).await?;
        info!("🧾️ Created deposit {}", deposit.deposit_id);
        Ok(deposit)
    }

    pub async fn get_deposit(&self, deposit_id: &DepositId) -> Result<Deposit, PosApiError> {
        let path = format!("/deposits/{}", urlencoding::encode(deposit_id.as_str()));
        self.rest_query::<Deposit, ()>(Method::GET, &path, &[], None, None).await
    }

    pub async fn list_deposits(&self) -> Result<Vec<Deposit>, PosApiError> {
        self.rest_query::<Vec<Deposit>, ()>(Method::GET, "/deposits", &[], None, None).await
    }

    //------------------------------------------------  Merchants  -----------------------------------------------------
    pub async fn create_merchant(&self, merchant: &CreateMerchantRequest) -> Result<Merchant, PosApiError> {
        let merchant = self.rest_query::<Merchant, _>(Method::POST, "/merchants", &[], Some(merchant), None).await?;
        info!("🧾️ Merchant profile {} created", merchant.merchant_id);
        Ok(merchant)
    }

    /// The profile of the merchant the current token belongs to.
    pub async fn fetch_merchant(&self) -> Result<Merchant, PosApiError> {
        self.rest_query::<Merchant, ()>(Method::GET, "/merchants", &[], None, None).await
    }

    pub async fn update_wallet(&self, wallet_id: &str, update: &UpdateWalletRequest) -> Result<Merchant, PosApiError> {
        validation::validate_wallet_update(update)?;
        let path = format!("/wallets/{}", urlencoding::encode(wallet_id));
        self.rest_query::<Merchant, _>(Method::POST, &path, &[], Some(update), None).await
    }

    //------------------------------------------------   Reports  ------------------------------------------------------
    pub async fn fetch_report(&self, params: &ReportParams) -> Result<Report, PosApiError> {
        if params.from > params.to {
            return Err(PosApiError::InvalidRequest(format!(
                "Report range is empty: {} is after {}",
                params.from, params.to
            )));
        }
        let query = params.query_params();
        self.rest_query::<Report, ()>(Method::GET, "/reports", &query, None, None).await
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::StaticTokenStore;

    fn api() -> PosApi {
        // Nothing listens on port 9; requests that get past local checks fail with a network error
        let config = PosApiConfig::new("http://127.0.0.1:9").with_retries(0);
        PosApi::new(config, Arc::new(StaticTokenStore::new("token"))).unwrap()
    }

    #[test]
    fn path_segments_are_encoded() {
        assert_eq!(urlencoding::encode("abc-123"), "abc-123");
        assert_eq!(urlencoding::encode("a/b c"), "a%2Fb%20c");
        let path = format!("/orders/{}", urlencoding::encode(OrderId::new("a/b c").as_str()));
        assert_eq!(api().config().url(&path), "http://127.0.0.1:9/functions/v1/orders/a%2Fb%20c");
    }

    #[tokio::test]
    async fn invalid_orders_never_reach_the_network() {
        let _ = env_logger::try_init();
        let err = api().create_order(&CreateOrderRequest::new(dec!(0), "USD")).await.unwrap_err();
        assert!(matches!(err, PosApiError::Validation(_)), "{err}");
    }

    #[tokio::test]
    async fn missing_token_is_not_retried() {
        let _ = env_logger::try_init();
        let store = Arc::new(StaticTokenStore::default());
        let api = PosApi::new(PosApiConfig::new("http://127.0.0.1:9"), store).unwrap();
        let err = api.get_order(&OrderId::new("abc")).await.unwrap_err();
        assert!(matches!(err, PosApiError::MissingToken), "{err}");
    }

    #[tokio::test]
    async fn aborted_requests_are_cancelled() {
        let _ = env_logger::try_init();
        let signal = AbortSignal::new();
        signal.abort();
        let err = api().get_order_with_abort(&OrderId::new("abc"), &signal).await.unwrap_err();
        assert!(matches!(err, PosApiError::Cancelled), "{err}");
    }

    #[tokio::test]
    async fn empty_report_range_is_rejected() {
        let params = ReportParams {
            from: chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            to: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            group_by: crate::ReportGrouping::Day,
        };
        let err = api().fetch_report(&params).await.unwrap_err();
        assert!(matches!(err, PosApiError::InvalidRequest(_)));
    }
}
