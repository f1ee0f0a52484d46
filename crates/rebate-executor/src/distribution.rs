use alloy_primitives::Address;
use rebate_fixed::{abdk_to_dec_n, dec_n_times_float, Abdk};
use rebate_graph::ChainLevel;

/// The resolved per-recipient distribution for one row, ready for the
/// `delegatedPay` submission (§4.2 `pay_batch` steps 1-4). `total` may be
/// smaller than the pre-scaling fee once rounding has been applied.
pub struct Payout {
    pub payees: Vec<Address>,
    pub amounts: Vec<i128>,
    pub total: i128,
}

/// Builds the payee/amount vectors for one aggregated-fee row.
///
/// `chain` is the resolved `chain_for_code` result with `chain.last()`'s
/// `child` replaced by the real `trader_addr` (that placeholder address
/// isn't known to the graph layer, only to the caller — see
/// `rebate-graph`'s `codes` module doc comment).
pub fn build_payout(
    broker_fee_abdk: Abdk,
    decimals: u8,
    scaling: f64,
    chain: &[ChainLevel],
    trader_addr: Address,
    broker_payout_addr: Address,
) -> Payout {
    let total0 = abdk_to_dec_n(broker_fee_abdk, decimals);
    let total = if scaling < 1.0 { dec_n_times_float(total0, scaling, 18) } else { total0 };

    let trader_share = chain.last().map(|l| l.child_avail.as_f64()).unwrap_or(0.0);
    let trader_amount = dec_n_times_float(total, trader_share, 18);

    let mut payees = vec![trader_addr, broker_payout_addr];
    let mut amounts = vec![trader_amount, 0i128];

    for level in chain {
        payees.push(level.parent);
        amounts.push(dec_n_times_float(total, level.parent_pay.as_f64(), 18));
    }

    let distributed_excl_broker: i128 = amounts[0] + amounts[2..].iter().sum::<i128>();
    amounts[1] = (total - distributed_excl_broker).max(0);

    let distributed: i128 = amounts.iter().sum();
    let total = distributed.min(total);

    Payout { payees, amounts, total }
}

impl Payout {
    /// Drops zero-amount payees — the ledger never persists a zero-amount
    /// row (Testable Property 1). The yielded index is the payee's position
    /// within *this filtered* sequence, matching the index the on-chain
    /// event (and reconciliation's `upsert_log`) assigns once submitted,
    /// since only these non-zero rows are ever submitted on-chain.
    pub fn non_zero_rows(&self) -> impl Iterator<Item = (usize, Address, i128)> + '_ {
        self.payees
            .iter()
            .copied()
            .zip(self.amounts.iter().copied())
            .filter(|(_, amount)| *amount > 0)
            .enumerate()
            .map(|(k, (payee, amount))| (k, payee, amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebate_types::Fraction;

    const ONE_ABDK: Abdk = 1i128 << 64;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn broker_receives_remainder_after_chain_and_trader() {
        let trader = addr(1);
        let broker_payout = addr(2);
        let referrer = addr(3);

        // single-level chain broker->referrer pass_on 40%, trader cut 50%
        // within that: child_avail = 0.4*0.5 = 0.2, parent_pay(referrer's
        // own hop in this synthetic single-edge case) = 0.4*0.5 = 0.2,
        // and the ancestor hop's own parent_pay (broker's direct cut) 0.6.
        let chain = vec![
            ChainLevel {
                parent: addr(9), // stands in for broker in this unit test
                child: referrer,
                pass_on: Fraction::from_percent(40.0).unwrap(),
                child_avail: Fraction::from_percent(40.0).unwrap(),
                parent_pay: Fraction::from_percent(60.0).unwrap(),
                level: 1,
            },
            ChainLevel {
                parent: referrer,
                child: Address::ZERO,
                pass_on: Fraction::from_percent(50.0).unwrap(),
                child_avail: Fraction::from_f64(0.2),
                parent_pay: Fraction::from_f64(0.2),
                level: 2,
            },
        ];

        let payout =
            build_payout(10 * ONE_ABDK, 6, 1.0, &chain, trader, broker_payout);

        assert_eq!(payout.total, 10_000_000);
        assert_eq!(payout.amounts[0], 2_000_000); // trader: 20%
        assert_eq!(payout.payees[2], addr(9));
        assert_eq!(payout.amounts[2], 6_000_000); // broker-as-parent hop: 60%
        assert_eq!(payout.payees[3], referrer);
        assert_eq!(payout.amounts[3], 2_000_000); // referrer: 20%
        assert_eq!(payout.amounts[1], 0); // configured broker payout gets the true remainder
    }

    #[test]
    fn scaling_below_one_shrinks_every_amount_proportionally() {
        let trader = addr(1);
        let broker_payout = addr(2);
        let chain = vec![ChainLevel {
            parent: addr(9),
            child: Address::ZERO,
            pass_on: Fraction::ONE,
            child_avail: Fraction::ONE,
            parent_pay: Fraction::ZERO,
            level: 1,
        }];

        let full = build_payout(10 * ONE_ABDK, 6, 1.0, &chain, trader, broker_payout);
        let scaled = build_payout(10 * ONE_ABDK, 6, 0.7, &chain, trader, broker_payout);
        assert_eq!(full.total, 10_000_000);
        assert_eq!(scaled.total, 7_000_000);
        assert_eq!(scaled.amounts[0], 7_000_000);
    }

    #[test]
    fn non_zero_rows_drops_zero_amount_payees() {
        let trader = addr(1);
        let broker_payout = addr(2);
        let chain = vec![ChainLevel {
            parent: addr(9),
            child: Address::ZERO,
            pass_on: Fraction::ONE,
            child_avail: Fraction::ONE,
            parent_pay: Fraction::ZERO,
            level: 1,
        }];
        let payout = build_payout(5 * ONE_ABDK, 6, 1.0, &chain, trader, broker_payout);
        let rows: Vec<_> = payout.non_zero_rows().collect();
        // broker_payout (amount 0) and the zero-cut ancestor hop are dropped
        assert!(rows.iter().all(|(_, _, amount)| *amount > 0));
        assert!(rows.iter().any(|(_, addr, _)| *addr == trader));
    }

    #[test]
    fn non_zero_rows_indexes_within_the_filtered_sequence() {
        let trader = addr(1);
        let broker_payout = addr(2);
        let referrer = addr(3);
        let chain = vec![
            ChainLevel {
                parent: addr(9),
                child: referrer,
                pass_on: Fraction::from_percent(40.0).unwrap(),
                child_avail: Fraction::from_percent(40.0).unwrap(),
                parent_pay: Fraction::from_percent(60.0).unwrap(),
                level: 1,
            },
            ChainLevel {
                parent: referrer,
                child: Address::ZERO,
                pass_on: Fraction::from_percent(50.0).unwrap(),
                child_avail: Fraction::from_f64(0.2),
                parent_pay: Fraction::from_f64(0.2),
                level: 2,
            },
        ];
        let payout = build_payout(10 * ONE_ABDK, 6, 1.0, &chain, trader, broker_payout);
        // payees = [trader, broker_payout(0), addr(9), referrer]; broker_payout
        // is dropped, so the submitted/indexed sequence is trader=0, addr(9)=1,
        // referrer=2 — never the original unfiltered position.
        let rows: Vec<_> = payout.non_zero_rows().collect();
        assert_eq!(rows[0], (0, trader, 2_000_000));
        assert_eq!(rows[1], (1, addr(9), 6_000_000));
        assert_eq!(rows[2], (2, referrer, 2_000_000));
    }
}
