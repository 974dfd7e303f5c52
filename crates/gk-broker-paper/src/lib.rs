//! In-process paper broker.
//!
//! Implements [`BrokerAdapter`] against an in-memory book: deterministic
//! `PAPER-n` order ids, a seeded portfolio snapshot, and scripted fills,
//! cancels, rejects, and outages for driving scenarios. Used by the daemon
//! in `dev`/`paper` environments and by every end-to-end test.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use rust_decimal::Decimal;

use gk_execution::{BrokerAdapter, BrokerError, BrokerSubmitAck, OrderStatusReport};
use gk_schemas::{Cash, OrderIntent, OrderStatus, Portfolio, Position};

// ---------------------------------------------------------------------------
// PaperBroker
// ---------------------------------------------------------------------------

pub struct PaperBroker {
    account_id: String,
    inner: Mutex<Book>,
}

struct Book {
    cash: Decimal,
    positions: Vec<Position>,
    orders: HashMap<String, PaperOrder>,
    next_order_seq: u64,
    reject_next_submit: Option<String>,
    outages_remaining: u32,
    auto_fill_price: Option<Decimal>,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    quantity: Decimal,
    status: OrderStatus,
    filled_quantity: Decimal,
    average_fill_price: Option<Decimal>,
}

impl PaperBroker {
    /// Broker seeded with `cash` USD and no positions.
    pub fn new(account_id: impl Into<String>, cash: Decimal) -> Self {
        Self {
            account_id: account_id.into(),
            inner: Mutex::new(Book {
                cash,
                positions: Vec::new(),
                orders: HashMap::new(),
                next_order_seq: 1,
                reject_next_submit: None,
                outages_remaining: 0,
                auto_fill_price: None,
            }),
        }
    }

    pub fn with_position(self, position: Position) -> Self {
        self.inner
            .lock()
            .expect("paper broker lock poisoned")
            .positions
            .push(position);
        self
    }

    /// Every submitted order fills immediately at `price`.
    pub fn with_auto_fill(self, price: Decimal) -> Self {
        self.inner
            .lock()
            .expect("paper broker lock poisoned")
            .auto_fill_price = Some(price);
        self
    }

    /// The next submit is refused synchronously with `reason`.
    pub fn reject_next_submit(&self, reason: impl Into<String>) {
        self.inner
            .lock()
            .expect("paper broker lock poisoned")
            .reject_next_submit = Some(reason.into());
    }

    /// The next `n` submits fail as unavailable (transport outage).
    pub fn fail_next_submits(&self, n: u32) {
        self.inner
            .lock()
            .expect("paper broker lock poisoned")
            .outages_remaining = n;
    }

    /// Fill a live order at `price`.
    pub fn simulate_fill(&self, broker_order_id: &str, price: Decimal) -> Result<(), BrokerError> {
        let mut book = self.inner.lock().expect("paper broker lock poisoned");
        let order = book
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(broker_order_id.to_string()))?;
        if order.status.is_terminal() {
            return Err(BrokerError::Rejected(format!(
                "order {broker_order_id} is already {}",
                order.status.as_str()
            )));
        }
        order.status = OrderStatus::Filled;
        order.filled_quantity = order.quantity;
        order.average_fill_price = Some(price);
        Ok(())
    }

    /// Reject a live order broker-side.
    pub fn simulate_reject(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let mut book = self.inner.lock().expect("paper broker lock poisoned");
        let order = book
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(broker_order_id.to_string()))?;
        order.status = OrderStatus::Rejected;
        Ok(())
    }
}

impl BrokerAdapter for PaperBroker {
    fn portfolio(&self, account_id: &str) -> Result<Portfolio, BrokerError> {
        if account_id != self.account_id {
            return Err(BrokerError::Rejected(format!(
                "unknown account: {account_id}"
            )));
        }
        let book = self.inner.lock().expect("paper broker lock poisoned");
        let positions_value: Decimal = book.positions.iter().map(|p| p.market_value).sum();
        Ok(Portfolio {
            account_id: self.account_id.clone(),
            positions: book.positions.clone(),
            cash: vec![Cash {
                currency: "USD".to_string(),
                available: book.cash,
                total: book.cash,
            }],
            total_value: book.cash + positions_value,
            captured_at: Utc::now(),
        })
    }

    fn submit_order(&self, intent: &OrderIntent) -> Result<BrokerSubmitAck, BrokerError> {
        let mut book = self.inner.lock().expect("paper broker lock poisoned");

        if book.outages_remaining > 0 {
            book.outages_remaining -= 1;
            return Err(BrokerError::Unavailable("paper gateway offline".into()));
        }
        if let Some(reason) = book.reject_next_submit.take() {
            return Err(BrokerError::Rejected(reason));
        }
        if intent.account_id != self.account_id {
            return Err(BrokerError::Rejected(format!(
                "unknown account: {}",
                intent.account_id
            )));
        }

        let broker_order_id = format!("PAPER-{}", book.next_order_seq);
        book.next_order_seq += 1;

        let order = match book.auto_fill_price {
            Some(price) => PaperOrder {
                quantity: intent.quantity,
                status: OrderStatus::Filled,
                filled_quantity: intent.quantity,
                average_fill_price: Some(price),
            },
            None => PaperOrder {
                quantity: intent.quantity,
                status: OrderStatus::Submitted,
                filled_quantity: Decimal::ZERO,
                average_fill_price: None,
            },
        };
        book.orders.insert(broker_order_id.clone(), order);

        Ok(BrokerSubmitAck {
            broker_order_id,
            status: OrderStatus::Submitted,
            submitted_at: Utc::now(),
        })
    }

    fn order_status(&self, broker_order_id: &str) -> Result<OrderStatusReport, BrokerError> {
        let book = self.inner.lock().expect("paper broker lock poisoned");
        let order = book
            .orders
            .get(broker_order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(broker_order_id.to_string()))?;
        Ok(OrderStatusReport {
            broker_order_id: broker_order_id.to_string(),
            status: order.status,
            filled_quantity: order.filled_quantity,
            average_fill_price: order.average_fill_price,
        })
    }

    fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let mut book = self.inner.lock().expect("paper broker lock poisoned");
        let order = book
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(broker_order_id.to_string()))?;
        if order.status.is_terminal() {
            return Err(BrokerError::Rejected(format!(
                "cannot cancel order in state {}",
                order.status.as_str()
            )));
        }
        order.status = OrderStatus::Cancelled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gk_schemas::{Instrument, OrderSide, OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    fn intent() -> OrderIntent {
        OrderIntent {
            account_id: "DU123456".to_string(),
            instrument: Instrument::stock("AAPL"),
            side: OrderSide::Buy,
            quantity: dec!(10),
            order_type: OrderType::Market,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            reason: "Paper broker exercise order flow".to_string(),
            strategy_tag: "paper_test".to_string(),
            constraints: None,
        }
    }

    #[test]
    fn portfolio_reports_seeded_cash() {
        let broker = PaperBroker::new("DU123456", dec!(100000.00));
        let pf = broker.portfolio("DU123456").unwrap();
        assert_eq!(pf.total_value, dec!(100000.00));
        assert_eq!(pf.cash[0].total, dec!(100000.00));
        assert!(pf.positions.is_empty());
    }

    #[test]
    fn unknown_account_is_rejected() {
        let broker = PaperBroker::new("DU123456", dec!(1000));
        assert!(broker.portfolio("DU999999").is_err());
    }

    #[test]
    fn submit_assigns_sequential_paper_ids() {
        let broker = PaperBroker::new("DU123456", dec!(100000));
        let a = broker.submit_order(&intent()).unwrap();
        let b = broker.submit_order(&intent()).unwrap();
        assert_eq!(a.broker_order_id, "PAPER-1");
        assert_eq!(b.broker_order_id, "PAPER-2");
        assert_eq!(a.status, OrderStatus::Submitted);
    }

    #[test]
    fn fill_reflects_in_status() {
        let broker = PaperBroker::new("DU123456", dec!(100000));
        let ack = broker.submit_order(&intent()).unwrap();
        broker.simulate_fill(&ack.broker_order_id, dec!(150.50)).unwrap();

        let report = broker.order_status(&ack.broker_order_id).unwrap();
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.filled_quantity, dec!(10));
        assert_eq!(report.average_fill_price, Some(dec!(150.50)));
    }

    #[test]
    fn auto_fill_mode_fills_on_submit() {
        let broker = PaperBroker::new("DU123456", dec!(100000)).with_auto_fill(dec!(150.50));
        let ack = broker.submit_order(&intent()).unwrap();
        let report = broker.order_status(&ack.broker_order_id).unwrap();
        assert_eq!(report.status, OrderStatus::Filled);
    }

    #[test]
    fn scripted_reject_applies_once() {
        let broker = PaperBroker::new("DU123456", dec!(100000));
        broker.reject_next_submit("risk desk says no");
        assert!(matches!(
            broker.submit_order(&intent()),
            Err(BrokerError::Rejected(_))
        ));
        assert!(broker.submit_order(&intent()).is_ok());
    }

    #[test]
    fn scripted_outage_applies_n_times() {
        let broker = PaperBroker::new("DU123456", dec!(100000));
        broker.fail_next_submits(2);
        assert!(matches!(
            broker.submit_order(&intent()),
            Err(BrokerError::Unavailable(_))
        ));
        assert!(matches!(
            broker.submit_order(&intent()),
            Err(BrokerError::Unavailable(_))
        ));
        assert!(broker.submit_order(&intent()).is_ok());
    }

    #[test]
    fn cancel_only_applies_to_live_orders() {
        let broker = PaperBroker::new("DU123456", dec!(100000));
        let ack = broker.submit_order(&intent()).unwrap();
        broker.cancel_order(&ack.broker_order_id).unwrap();
        let report = broker.order_status(&ack.broker_order_id).unwrap();
        assert_eq!(report.status, OrderStatus::Cancelled);
        assert!(broker.cancel_order(&ack.broker_order_id).is_err());
    }

    #[test]
    fn double_fill_is_refused() {
        let broker = PaperBroker::new("DU123456", dec!(100000));
        let ack = broker.submit_order(&intent()).unwrap();
        broker.simulate_fill(&ack.broker_order_id, dec!(150.50)).unwrap();
        assert!(broker.simulate_fill(&ack.broker_order_id, dec!(151.00)).is_err());
    }
}
