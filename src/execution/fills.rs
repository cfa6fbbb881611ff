use std::time::Duration;
use tokio::time::sleep;

use crate::api::{ExchangeError, ExchangeGateway};
use crate::models::{OrderFill, OrderStatus};

/// Pause between two fill checks while an order is still working
pub const FILL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Poll an order until it reaches a final state.
///
/// `Filled` confirms. Any other final status still counts when something
/// was executed, and fails with `OrderNotFilled` when nothing was. Working orders are polled up to `max_retries` times.
pub async fn await_fill(
    gateway: &dyn ExchangeGateway,
    symbol: &str,
    order_id: i64,
    max_retries: u32,
) -> Result<OrderFill, ExchangeError> {
    let polls = max_retries.max(1);
    let mut last_status = OrderStatus::New;

    for poll in 1..=polls {
        let fill = gateway.get_order_status(symbol, order_id, max_retries).await?;

        match fill.status {
            OrderStatus::Filled => return Ok(fill),
            status if status.is_terminal() => {
                if fill.executed_quantity > 0.0 {
                    tracing::warn!(
                        "Order {} for {} ended {:?} after a partial fill of {}",
                        order_id,
                        symbol,
                        status,
                        fill.executed_quantity
                    );
                    return Ok(fill);
                }
                return Err(ExchangeError::OrderNotFilled {
                    symbol: symbol.to_string(),
                    order_id,
                    status,
                });
            }
            status => {
                tracing::debug!(
                    "Order {} for {} is {:?} (poll {}/{})",
                    order_id,
                    symbol,
                    status,
                    poll,
                    polls
                );
                last_status = status;
                if poll < polls {
                    sleep(FILL_POLL_INTERVAL).await;
                }
            }
        }
    }

    Err(ExchangeError::OrderNotFilled {
        symbol: symbol.to_string(),
        order_id,
        status: last_status,
    })
}
