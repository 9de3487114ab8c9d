use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::models::{Order, OrderAccrual, OrderStatus};

use super::AgentStore;

// ============================================================================
// Postgres Storage
// ============================================================================

pub struct PgAgentStore {
    pool: PgPool,
}

impl PgAgentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(uri: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(uri)
            .await
            .context("Failed to connect to Postgres")?;

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl AgentStore for PgAgentStore {
    async fn pending_orders(&self, limit: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT order_num, status
            FROM accruals
            WHERE status = $1 OR status = $2
            ORDER BY uploaded_at
            LIMIT $3
            "#,
        )
        .bind(OrderStatus::New.as_str())
        .bind(OrderStatus::Processing.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch pending orders")?;

        let orders = rows
            .iter()
            .map(|row| {
                let status: String = row.get("status");
                Order {
                    number: row.get("order_num"),
                    status: OrderStatus::from_db(&status),
                }
            })
            .collect();

        Ok(orders)
    }

    async fn update_order_accruals(&self, updates: &[OrderAccrual]) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open accrual update transaction")?;

        for update in updates {
            sqlx::query(
                r#"
                UPDATE accruals
                SET status = $1, amount = $2
                WHERE order_num = $3
                "#,
            )
            .bind(update.status.as_str())
            .bind(update.accrual)
            .bind(update.number)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to update order {}", update.number))?;
        }

        tx.commit()
            .await
            .context("Failed to commit accrual update transaction")?;

        Ok(())
    }
}
