use alloy_primitives::Address;
use anyhow::{Context, Result};
use rebate_db::referral_chain;
use rebate_db::referral_code;
use rebate_db::PgPool;
use rebate_types::{Code, Fraction};
use rebate_graph::{CodeInfo, CodeRegistry, Graph};

/// Rebuilds the in-memory chain graph and code registry from storage
/// (§10 Design Note 9) — run once at startup and after a `rotate_broker`
/// migration, since both are cheap full-table scans for realistic broker
/// sizes.
pub async fn load_graph_and_codes(
    pool: &PgPool,
    broker_id: &str,
    broker_addr: Address,
) -> Result<(Graph, CodeRegistry)> {
    let mut graph = Graph::new(broker_addr);
    for edge in referral_chain::all_edges(pool, broker_id).await? {
        let parent: Address = edge.parent.parse().with_context(|| format!("bad parent address {}", edge.parent))?;
        let child: Address = edge.child.parse().with_context(|| format!("bad child address {}", edge.child))?;
        graph.load_edge(parent, child, edge.pass_on)?;
    }

    let mut registry = CodeRegistry::new();
    for row in referral_code::all_codes(pool, broker_id).await? {
        let referrer_addr: Address = row
            .referrer_addr
            .parse()
            .with_context(|| format!("bad referrer address {}", row.referrer_addr))?;
        let trader_rebate_perc = Fraction::from_percent_tdf(row.trader_rebate_perc as u32)?;
        registry.load(Code::from_stored(row.code), CodeInfo { referrer_addr, trader_rebate_perc });
    }

    Ok((graph, registry))
}
