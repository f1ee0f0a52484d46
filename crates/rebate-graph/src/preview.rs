use rebate_types::{Code, Fraction, TypeError};

use crate::chain::Graph;
use crate::codes::CodeRegistry;

/// One pool's preview row (§11 `OpenPay`): what a trader would currently
/// receive for this pool's accrued fee if a batch ran right now.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPayRow {
    pub pool_id: i32,
    pub amount: f64,
}

/// `open_pay_preview` (§11): for each `(pool_id, code, broker_fee)` row
/// already fetched from `referral_aggr_fees_per_trader`, resolves the
/// code's chain and reports the trader's share of that pool's fee — the
/// same `chain_for_code` terminal `child_avail` the batch executor uses to
/// size the trader's real payout, just without submitting anything.
pub fn open_pay_preview(
    registry: &CodeRegistry,
    graph: &Graph,
    rows: &[(i32, Code, f64)],
    referrer_cut: Fraction,
) -> Result<Vec<OpenPayRow>, TypeError> {
    rows.iter()
        .map(|(pool_id, code, broker_fee)| {
            let chain = registry.chain_for_code(graph, code, referrer_cut)?;
            let trader_share = chain.last().map(|l| l.child_avail.as_f64()).unwrap_or(0.0);
            Ok(OpenPayRow { pool_id: *pool_id, amount: broker_fee * trader_share })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;
    use rebate_types::DEFAULT_CODE;

    use super::*;
    use crate::codes::CodeInfo;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn default_code_previews_zero_amount() {
        let broker = addr(1);
        let graph = Graph::new(broker);
        let registry = CodeRegistry::new();
        let rows = vec![(1, Code::from_stored(DEFAULT_CODE), 1000.0)];
        let preview = open_pay_preview(&registry, &graph, &rows, Fraction::ZERO).unwrap();
        assert_eq!(preview, vec![OpenPayRow { pool_id: 1, amount: 0.0 }]);
    }

    #[test]
    fn resolved_code_previews_the_traders_share_of_the_fee() {
        let broker = addr(1);
        let referrer = addr(2);
        let mut graph = Graph::new(broker);
        graph.load_edge(broker, referrer, 40.0).unwrap();

        let mut registry = CodeRegistry::new();
        let code = Code::normalize("XYZ").unwrap();
        registry.load(
            code.clone(),
            CodeInfo { referrer_addr: referrer, trader_rebate_perc: Fraction::from_percent(50.0).unwrap() },
        );

        let rows = vec![(7, code, 200.0)];
        let preview = open_pay_preview(&registry, &graph, &rows, Fraction::ZERO).unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].pool_id, 7);
        // chain crumble = 0.4 (broker->referrer pass_on), trader cut 50% -> 0.2 share
        assert!((preview[0].amount - 40.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_code_surfaces_not_found() {
        let broker = addr(1);
        let graph = Graph::new(broker);
        let registry = CodeRegistry::new();
        let rows = vec![(1, Code::normalize("GHOST").unwrap(), 50.0)];
        let err = open_pay_preview(&registry, &graph, &rows, Fraction::ZERO).unwrap_err();
        assert!(matches!(err, TypeError::NotFound(_)));
    }
}
