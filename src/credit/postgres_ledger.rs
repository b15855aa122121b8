//! PostgreSQL-backed credit ledger.
//!
//! The ordered deduction is a single guarded UPDATE so concurrent sends for
//! the same tenant serialize on the row lock and can never over-spend.
//!
//! Table structure:
//! - `credit_pools(tenant_id, subscription_quota_total, subscription_quota_used,
//!   voucher_balance, updated_at)`

use async_trait::async_trait;
use sqlx::PgPool;

use super::{CreditError, CreditLedger, CreditPool, CreditShortfall, DeductionPlan};

pub struct PostgresCreditLedger {
    pool: PgPool,
}

impl PostgresCreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditLedger for PostgresCreditLedger {
    async fn pool(&self, tenant_id: &str) -> Result<CreditPool, CreditError> {
        let row: Option<(i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT subscription_quota_total, subscription_quota_used, voucher_balance
            FROM credit_pools
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((total, used, voucher)) => Ok(CreditPool {
                tenant_id: tenant_id.to_string(),
                subscription_quota_total: total,
                subscription_quota_used: used,
                voucher_balance: voucher,
            }),
            None => Err(CreditError::UnknownTenant(tenant_id.to_string())),
        }
    }

    async fn deduct(&self, tenant_id: &str, count: i64) -> Result<DeductionPlan, CreditError> {
        // Voucher-first split computed against the locked row, committed in
        // the same statement. The guard rejects the whole deduction when the
        // combined pools cannot cover it.
        let row: Option<(i64, i64)> = sqlx::query_as(
            r#"
            WITH locked AS (
                SELECT tenant_id, LEAST(voucher_balance, $2::bigint) AS from_voucher
                FROM credit_pools
                WHERE tenant_id = $1
                FOR UPDATE
            )
            UPDATE credit_pools c
            SET voucher_balance = c.voucher_balance - l.from_voucher,
                subscription_quota_used = c.subscription_quota_used + ($2 - l.from_voucher),
                updated_at = NOW()
            FROM locked l
            WHERE c.tenant_id = l.tenant_id
              AND c.voucher_balance
                  + GREATEST(0, c.subscription_quota_total - c.subscription_quota_used) >= $2
            RETURNING l.from_voucher, $2 - l.from_voucher
            "#,
        )
        .bind(tenant_id)
        .bind(count)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((from_voucher, from_subscription)) => {
                tracing::debug!(
                    tenant_id = %tenant_id,
                    count = count,
                    from_voucher = from_voucher,
                    from_subscription = from_subscription,
                    "Credit deducted"
                );
                Ok(DeductionPlan {
                    from_voucher,
                    from_subscription,
                })
            }
            None => {
                // Distinguish missing tenant from insufficient balance
                let pool = self.pool(tenant_id).await?;
                Err(CreditError::Insufficient(CreditShortfall {
                    requested: count,
                    subscription_remaining: pool.subscription_remaining(),
                    voucher_remaining: pool.voucher_balance,
                }))
            }
        }
    }
}
