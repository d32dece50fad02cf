use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use log::*;
use pos_common::AbortSignal;

use crate::{
    data_objects::{Order, OrderId, OrderListParams, OrderStatus},
    PosApi,
    PosApiError,
};

/// The read side of the order resource. [`PosApi`] is the production implementation; the seam exists so that status
/// tracking and pagination can be exercised without a backend.
#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_order(&self, order_id: &OrderId, abort: &AbortSignal) -> Result<Order, PosApiError>;

    async fn fetch_orders(&self, params: &OrderListParams) -> Result<Vec<Order>, PosApiError>;
}

#[async_trait]
impl OrderSource for PosApi {
    async fn fetch_order(&self, order_id: &OrderId, abort: &AbortSignal) -> Result<Order, PosApiError> {
        self.get_order_with_abort(order_id, abort).await
    }

    async fn fetch_orders(&self, params: &OrderListParams) -> Result<Vec<Order>, PosApiError> {
        self.list_orders(params).await
    }
}

//--------------------------------------      OrderQuery       ---------------------------------------------------------
/// An on-demand status check for a single order.
///
/// Queries are created disabled: [`OrderQuery::load`] returns whatever was fetched last without touching the network
/// until the query is enabled. [`OrderQuery::refetch`] always goes to the server. This lets a status screen use the
/// query as a reconciliation check rather than as an eager poll.
pub struct OrderQuery<S: ?Sized> {
    source: Arc<S>,
    order_id: OrderId,
    enabled: bool,
    data: Option<Order>,
}

impl<S: OrderSource + ?Sized> OrderQuery<S> {
    pub fn new(source: Arc<S>, order_id: OrderId) -> Self {
        Self { source, order_id, enabled: false, data: None }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// The last order record fetched, if any.
    pub fn data(&self) -> Option<&Order> {
        self.data.as_ref()
    }

    /// Fetch the order if the query is enabled and nothing has been fetched yet.
    pub async fn load(&mut self, abort: &AbortSignal) -> Result<Option<&Order>, PosApiError> {
        if self.enabled && self.data.is_none() {
            self.refetch(abort).await?;
        }
        Ok(self.data.as_ref())
    }

    /// Fetch the order from the server, regardless of whether the query is enabled.
    pub async fn refetch(&mut self, abort: &AbortSignal) -> Result<&Order, PosApiError> {
        trace!("🧾️ Refetching order {}", self.order_id);
        let order = self.source.fetch_order(&self.order_id, abort).await?;
        Ok(self.data.insert(order))
    }
}

//--------------------------------------     OrderHistory      ---------------------------------------------------------
/// Accumulates a paginated order listing.
///
/// The server paginates by offset, so when new orders arrive while a merchant is paging, identifiers near the page
/// boundary can show up twice. Orders are de-duplicated by `order_id`, keeping the first copy seen.
#[derive(Debug, Clone)]
pub struct OrderHistory {
    status: Option<OrderStatus>,
    limit: u32,
    next_offset: u64,
    orders: Vec<Order>,
    seen: HashSet<OrderId>,
    exhausted: bool,
}

impl OrderHistory {
    pub fn new(limit: u32) -> Self {
        Self {
            status: None,
            limit: limit.max(1),
            next_offset: 0,
            orders: Vec::new(),
            seen: HashSet::new(),
            exhausted: false,
        }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn into_orders(self) -> Vec<Order> {
        self.orders
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// True once a page shorter than the page size has been received.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// The parameters for the next page request.
    pub fn next_params(&self) -> OrderListParams {
        OrderListParams { status: self.status, limit: self.limit, offset: self.next_offset }
    }

    /// Merge a page into the history. Returns the number of orders that were not seen before.
    pub fn merge_page(&mut self, page: Vec<Order>) -> usize {
        let received = page.len();
        self.next_offset += received as u64;
        if received < self.limit as usize {
            self.exhausted = true;
        }
        let before = self.orders.len();
        for order in page {
            if self.seen.insert(order.order_id.clone()) {
                self.orders.push(order);
            } else {
                trace!("🧾️ Skipping duplicate order {} in page", order.order_id);
            }
        }
        let added = self.orders.len() - before;
        debug!("🧾️ Merged page of {received} orders, {added} new. {} orders in history", self.orders.len());
        added
    }

    pub async fn fetch_next_page<S: OrderSource + ?Sized>(&mut self, source: &S) -> Result<usize, PosApiError> {
        if self.exhausted {
            return Ok(0);
        }
        let page = source.fetch_orders(&self.next_params()).await?;
        Ok(self.merge_page(page))
    }

    /// Keep fetching pages until the server runs out of orders, or `max_pages` have been fetched.
    pub async fn fetch_all<S: OrderSource + ?Sized>(&mut self, source: &S, max_pages: usize) -> Result<(), PosApiError> {
        let mut pages = 0;
        while !self.exhausted && pages < max_pages {
            self.fetch_next_page(source).await?;
            pages += 1;
        }
        Ok(())
    }

    /// Start over from the first page, e.g. after a pull-to-refresh.
    pub fn reset(&mut self) {
        self.next_offset = 0;
        self.orders.clear();
        self.seen.clear();
        self.exhausted = false;
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::data_objects::MerchantId;

    fn order(id: usize) -> Order {
        Order {
            order_id: OrderId::new(format!("order-{id}")),
            merchant_id: MerchantId::new("merchant-1"),
            order_number: Some(id.to_string()),
            status: OrderStatus::Pending,
            display_amount: dec!(10),
            display_currency: "USD".into(),
            required_amount_usd: dec!(10),
            payment_id: None,
            qrcode: None,
            description: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Serves canned pages in order and records the parameters it was asked for.
    #[derive(Default)]
    struct PagedSource {
        pages: Mutex<Vec<Vec<Order>>>,
        requests: Mutex<Vec<OrderListParams>>,
        single_fetches: AtomicUsize,
    }

    #[async_trait]
    impl OrderSource for PagedSource {
        async fn fetch_order(&self, order_id: &OrderId, _abort: &AbortSignal) -> Result<Order, PosApiError> {
            self.single_fetches.fetch_add(1, Ordering::SeqCst);
            let mut o = order(0);
            o.order_id = order_id.clone();
            Ok(o)
        }

        async fn fetch_orders(&self, params: &OrderListParams) -> Result<Vec<Order>, PosApiError> {
            self.requests.lock().unwrap().push(params.clone());
            let mut pages = self.pages.lock().unwrap();
            Ok(if pages.is_empty() { vec![] } else { pages.remove(0) })
        }
    }

    #[tokio::test]
    async fn duplicates_across_page_boundary_are_dropped() {
        let _ = env_logger::try_init();
        let first = (0..20).map(order).collect::<Vec<_>>();
        // 5 orders from the first page shifted across the boundary, plus 10 new ones
        let second = (15..20).chain(20..30).map(order).collect::<Vec<_>>();
        let source = PagedSource { pages: Mutex::new(vec![first, second]), ..Default::default() };
        let mut history = OrderHistory::new(20);
        assert_eq!(history.fetch_next_page(&source).await.unwrap(), 20);
        assert!(!history.is_exhausted());
        assert_eq!(history.fetch_next_page(&source).await.unwrap(), 10);
        assert!(history.is_exhausted());
        assert_eq!(history.len(), 30);
        let unique = history.orders().iter().map(|o| o.order_id.clone()).collect::<HashSet<_>>();
        assert_eq!(unique.len(), 30);
        let requests = source.requests.lock().unwrap();
        assert_eq!(requests[0], OrderListParams::new(20, 0));
        assert_eq!(requests[1], OrderListParams::new(20, 20));
        // Exhausted histories do not hit the server again
        drop(requests);
        assert_eq!(history.fetch_next_page(&source).await.unwrap(), 0);
        assert_eq!(source.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fetch_all_respects_page_cap_and_reset() {
        let pages = (0..5).map(|p| (p * 2..p * 2 + 2).map(order).collect::<Vec<_>>()).collect::<Vec<_>>();
        let source = PagedSource { pages: Mutex::new(pages), ..Default::default() };
        let mut history = OrderHistory::new(2).with_status(OrderStatus::Completed);
        history.fetch_all(&source, 3).await.unwrap();
        assert_eq!(history.len(), 6);
        assert_eq!(history.next_params().offset, 6);
        assert_eq!(history.next_params().status, Some(OrderStatus::Completed));
        history.reset();
        assert!(history.is_empty());
        assert_eq!(history.next_params().offset, 0);
    }

    #[tokio::test]
    async fn disabled_query_does_not_fetch_until_refetch() {
        let _ = env_logger::try_init();
        let source = Arc::new(PagedSource::default());
        let abort = AbortSignal::new();
        let mut query = OrderQuery::new(source.clone(), OrderId::new("order-7"));
        assert!(query.load(&abort).await.unwrap().is_none());
        assert_eq!(source.single_fetches.load(Ordering::SeqCst), 0);
        let order = query.refetch(&abort).await.unwrap();
        assert_eq!(order.order_id.as_str(), "order-7");
        assert_eq!(source.single_fetches.load(Ordering::SeqCst), 1);
        assert!(query.data().is_some());
    }

    #[tokio::test]
    async fn enabled_query_loads_once() {
        let source = Arc::new(PagedSource::default());
        let abort = AbortSignal::new();
        let mut query = OrderQuery::new(source.clone(), OrderId::new("order-8")).enabled(true);
        assert!(query.load(&abort).await.unwrap().is_some());
        assert!(query.load(&abort).await.unwrap().is_some());
        assert_eq!(source.single_fetches.load(Ordering::SeqCst), 1);
    }
}
