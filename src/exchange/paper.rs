// Paper trading venue
// Matches orders against the last known price, no order book

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CancelOutcome, Exchange, OrderRequest, OrderStatusReport, VenueError, VenueResult};
use crate::clients::RestTickerClient;
use crate::core::types::{MarginMode, OrderKind, OrderSide, OrderStatus};

/// Venue-side view of an order
#[derive(Debug, Clone, Serialize)]
pub struct PaperOrder {
    pub order_id: String,
    pub request: OrderRequest,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub average_price: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl PaperOrder {
    fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Add `quantity` at `price`, keeping the running average
    fn apply_fill(&mut self, quantity: f64, price: f64) {
        let remaining = self.request.quantity - self.filled_quantity;
        let quantity = quantity.min(remaining);
        if quantity <= 0.0 {
            return;
        }

        let previous_cost = self.filled_quantity * self.average_price.unwrap_or(price);
        self.filled_quantity += quantity;
        self.average_price = Some((previous_cost + quantity * price) / self.filled_quantity);
        self.status = if self.request.quantity - self.filled_quantity <= 1e-12 {
            self.filled_quantity = self.request.quantity;
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }

    fn report(&self) -> OrderStatusReport {
        OrderStatusReport {
            status: self.status,
            filled_quantity: self.filled_quantity,
            average_price: self.average_price,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Orders below this size are rejected
    pub min_order_size: f64,
    /// Fill resting orders whenever the price crosses them
    pub auto_match: bool,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            min_order_size: 0.00001,
            auto_match: true,
        }
    }
}

#[derive(Default)]
struct PaperState {
    prices: HashMap<String, f64>,
    orders: HashMap<String, PaperOrder>,
    faults: HashMap<&'static str, VecDeque<VenueError>>,
    leverage: HashMap<String, (u32, MarginMode)>,
    next_id: u64,
    placed: u64,
    cancelled: u64,
}

impl PaperState {
    fn take_fault(&mut self, op: &'static str) -> VenueResult<()> {
        match self.faults.get_mut(op).and_then(|queue| queue.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Fill every open order the price has crossed
    fn match_symbol(&mut self, symbol: &str, price: f64) {
        for order in self.orders.values_mut() {
            if order.request.symbol != symbol || !order.is_open() {
                continue;
            }
            let Some(limit) = order.request.price else {
                continue;
            };
            let crossed = match order.request.side {
                OrderSide::Buy => price <= limit,
                OrderSide::Sell => price >= limit,
            };
            if crossed {
                let remaining = order.request.quantity - order.filled_quantity;
                order.apply_fill(remaining, limit);
                debug!("📄 paper fill {} {} @ {:.5}", order.order_id, symbol, limit);
            }
        }
    }
}

/// In-process venue used for paper trading and tests.
///
/// Prices come from `set_price` or, when configured, from a REST ticker.
/// Faults queued with `inject_fault` are returned by the next call of that
/// operation.
pub struct PaperExchange {
    config: PaperConfig,
    state: Mutex<PaperState>,
    price_feed: Option<RestTickerClient>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::with_config(PaperConfig::default())
    }

    pub fn with_config(config: PaperConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PaperState::default()),
            price_feed: None,
        }
    }

    /// Take prices from a live ticker instead of `set_price`
    pub fn with_price_feed(mut self, feed: RestTickerClient) -> Self {
        self.price_feed = Some(feed);
        self
    }

    pub async fn set_price(&self, symbol: &str, price: f64) {
        let mut state = self.state.lock().await;
        state.prices.insert(symbol.to_string(), price);
        if self.config.auto_match {
            state.match_symbol(symbol, price);
        }
    }

    /// Fill part (or all) of an order at its limit price, or at the last
    /// price for market orders
    pub async fn fill_order(&self, order_id: &str, quantity: f64) -> VenueResult<()> {
        let mut state = self.state.lock().await;
        let last_price = state.orders.get(order_id).and_then(|o| state.prices.get(&o.request.symbol).copied());
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| VenueError::Rejected(format!("unknown order {}", order_id)))?;
        if !order.is_open() {
            return Err(VenueError::Rejected(format!("order {} is {}", order_id, order.status)));
        }

        let price = order
            .request
            .price
            .or(last_price)
            .ok_or_else(|| VenueError::Rejected("no price to fill at".to_string()))?;
        order.apply_fill(quantity, price);
        Ok(())
    }

    /// Cancel venue-side without the bot asking (exchange maintenance etc.)
    pub async fn expire_order(&self, order_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(order) = state.orders.get_mut(order_id) {
            if order.is_open() {
                order.status = OrderStatus::Cancelled;
            }
        }
    }

    pub async fn inject_fault(&self, op: &'static str, err: VenueError) {
        let mut state = self.state.lock().await;
        state.faults.entry(op).or_default().push_back(err);
    }

    pub async fn order(&self, order_id: &str) -> Option<PaperOrder> {
        self.state.lock().await.orders.get(order_id).cloned()
    }

    pub async fn orders(&self, symbol: &str) -> Vec<PaperOrder> {
        let state = self.state.lock().await;
        let mut orders: Vec<PaperOrder> = state
            .orders
            .values()
            .filter(|o| o.request.symbol == symbol)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        orders
    }

    pub async fn open_orders(&self, symbol: &str) -> Vec<PaperOrder> {
        self.orders(symbol)
            .await
            .into_iter()
            .filter(PaperOrder::is_open)
            .collect()
    }

    pub async fn placed_count(&self) -> u64 {
        self.state.lock().await.placed
    }

    pub async fn cancelled_count(&self) -> u64 {
        self.state.lock().await.cancelled
    }

    pub async fn leverage(&self, symbol: &str) -> Option<(u32, MarginMode)> {
        self.state.lock().await.leverage.get(symbol).copied()
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn get_price(&self, symbol: &str) -> VenueResult<f64> {
        self.state.lock().await.take_fault("get_price")?;

        if let Some(feed) = &self.price_feed {
            let price = feed.fetch_price(symbol).await?;
            self.set_price(symbol, price).await;
            return Ok(price);
        }

        self.state
            .lock()
            .await
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::Rejected(format!("no price for {}", symbol)))
    }

    async fn place_order(&self, request: &OrderRequest) -> VenueResult<String> {
        let mut state = self.state.lock().await;
        state.take_fault("place_order")?;

        if request.quantity < self.config.min_order_size {
            return Err(VenueError::Rejected(format!(
                "quantity {} below minimum {}",
                request.quantity, self.config.min_order_size
            )));
        }
        if request.kind != OrderKind::Market && request.price.is_none() {
            return Err(VenueError::Rejected("limit order without price".to_string()));
        }

        let last_price = state.prices.get(&request.symbol).copied();
        if request.kind == OrderKind::Market && last_price.is_none() {
            return Err(VenueError::Rejected(format!("no market for {}", request.symbol)));
        }

        state.next_id += 1;
        state.placed += 1;
        let order_id = format!("paper-{}", state.next_id);
        let mut order = PaperOrder {
            order_id: order_id.clone(),
            request: request.clone(),
            status: OrderStatus::Pending,
            filled_quantity: 0.0,
            average_price: None,
            created_at: Utc::now(),
        };

        if let (OrderKind::Market, Some(price)) = (request.kind, last_price) {
            order.apply_fill(request.quantity, price);
        }
        state.orders.insert(order_id.clone(), order);

        // Marketable limits fill on arrival
        if let (true, Some(price)) = (self.config.auto_match, last_price) {
            state.match_symbol(&request.symbol, price);
        }

        info!(
            "📄 paper {} {} {} {:.5} @ {:?} → {}",
            request.side.as_str(),
            request.kind.as_str(),
            request.symbol,
            request.quantity,
            request.price,
            order_id
        );
        Ok(order_id)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> VenueResult<CancelOutcome> {
        let mut state = self.state.lock().await;
        state.take_fault("cancel_order")?;

        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| VenueError::Rejected(format!("unknown order {}", order_id)))?;
        if !order.is_open() {
            return Ok(CancelOutcome::AlreadyClosed);
        }
        order.status = OrderStatus::Cancelled;
        state.cancelled += 1;
        Ok(CancelOutcome::Cancelled)
    }

    async fn get_order_status(&self, _symbol: &str, order_id: &str) -> VenueResult<OrderStatusReport> {
        let mut state = self.state.lock().await;
        state.take_fault("get_order_status")?;

        state
            .orders
            .get(order_id)
            .map(PaperOrder::report)
            .ok_or_else(|| VenueError::Rejected(format!("unknown order {}", order_id)))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32, margin_mode: MarginMode) -> VenueResult<()> {
        let mut state = self.state.lock().await;
        state.take_fault("set_leverage")?;
        state.leverage.insert(symbol.to_string(), (leverage, margin_mode));
        Ok(())
    }
}
