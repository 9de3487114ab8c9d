mod postgres;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Order, OrderAccrual};

pub use postgres::PgAgentStore;

// ============================================================================
// Storage Collaborator
// ============================================================================
//
// The pipeline owns order status transitions but not the orders table itself;
// it talks to storage through this seam so the loops can be driven against an
// in-memory double in tests.
//
// ============================================================================

#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Fetch up to `limit` orders still awaiting a terminal status, oldest
    /// submission first.
    async fn pending_orders(&self, limit: i64) -> Result<Vec<Order>>;

    /// Persist a batch of status transitions, keyed by order number. Safe to
    /// repeat for the same order.
    async fn update_order_accruals(&self, updates: &[OrderAccrual]) -> Result<()>;
}
