use rebate_types::TypeError;
use sqlx::PgPool;

use crate::error::map_sqlx_err;
use crate::models::ReferralChainEdgeRow;

/// Recursive walk from `child` up to the root, ordered root-last, ported
/// from the original `child_to_root` CTE.
pub async fn chain_of_child(
    pool: &PgPool,
    broker_id: &str,
    child: &str,
) -> Result<Vec<ReferralChainEdgeRow>, TypeError> {
    sqlx::query_as::<_, ReferralChainEdgeRow>(
        "WITH RECURSIVE child_to_root AS (
            SELECT child, parent, pass_on, broker_id, created_on, 1 AS lvl
            FROM referral_chain
            WHERE child = $1 AND broker_id = $2
            UNION ALL
            SELECT c.child, c.parent, c.pass_on, c.broker_id, c.created_on, cr.lvl + 1
            FROM referral_chain c
            INNER JOIN child_to_root cr ON cr.parent = c.child AND c.broker_id = $2
        )
        SELECT parent, child, broker_id, pass_on, created_on
        FROM child_to_root
        ORDER BY -lvl",
    )
    .bind(child)
    .bind(broker_id)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)
}

/// Every edge for `broker_id`, used to rebuild the in-memory graph at
/// startup (and after a `rotate_broker` migration).
pub async fn all_edges(pool: &PgPool, broker_id: &str) -> Result<Vec<ReferralChainEdgeRow>, TypeError> {
    sqlx::query_as::<_, ReferralChainEdgeRow>(
        "SELECT parent, child, broker_id, pass_on, created_on
         FROM referral_chain WHERE broker_id = $1",
    )
    .bind(broker_id)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)
}

/// All ancestors of `addr` (used by `has_loop`'s upward walk).
pub async fn ancestors_of(
    pool: &PgPool,
    broker_id: &str,
    addr: &str,
) -> Result<Vec<ReferralChainEdgeRow>, TypeError> {
    chain_of_child(pool, broker_id, addr).await
}

pub async fn is_child(pool: &PgPool, broker_id: &str, addr: &str) -> Result<bool, TypeError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM referral_chain WHERE child = $1 AND broker_id = $2")
            .bind(addr)
            .bind(broker_id)
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_err)?;
    Ok(row.is_some())
}

/// §9 Design Note / §11 broker-rotation cleanup: rewrites every occurrence
/// of `old_broker` as `referrer_addr`/`parent` to `new_broker`. Non-recursive
/// — assumes the broker occupies only the root position, never an
/// intermediate hop — and is never run automatically; callers invoke it as
/// an explicit migration step.
pub async fn rotate_broker(
    pool: &PgPool,
    broker_id: &str,
    old_broker: &str,
    new_broker: &str,
) -> Result<(), TypeError> {
    let mut tx = pool.begin().await.map_err(map_sqlx_err)?;

    sqlx::query("UPDATE referral_code SET referrer_addr = $1 WHERE referrer_addr = $2 AND broker_id = $3")
        .bind(new_broker)
        .bind(old_broker)
        .bind(broker_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

    sqlx::query("UPDATE referral_chain SET parent = $1 WHERE parent = $2 AND broker_id = $3")
        .bind(new_broker)
        .bind(old_broker)
        .bind(broker_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

    tx.commit().await.map_err(map_sqlx_err)
}

pub async fn insert_edge(
    pool: &PgPool,
    broker_id: &str,
    parent: &str,
    child: &str,
    pass_on_percent: f32,
) -> Result<(), TypeError> {
    sqlx::query(
        "INSERT INTO referral_chain (parent, child, broker_id, pass_on) VALUES ($1, $2, $3, $4)",
    )
    .bind(parent)
    .bind(child)
    .bind(broker_id)
    .bind(pass_on_percent)
    .execute(pool)
    .await
    .map_err(map_sqlx_err)?;
    Ok(())
}
