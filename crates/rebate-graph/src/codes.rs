use std::collections::HashMap;

use alloy_primitives::Address;
use rebate_types::{Code, Fraction, TypeError, DEFAULT_CODE};

use crate::chain::{ChainLevel, Graph};

#[derive(Debug, Clone)]
pub struct CodeInfo {
    pub referrer_addr: Address,
    pub trader_rebate_perc: Fraction,
}

/// The code registry loaded in memory alongside the chain graph.
#[derive(Debug, Clone, Default)]
pub struct CodeRegistry {
    codes: HashMap<Code, CodeInfo>,
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, code: Code, info: CodeInfo) {
        self.codes.insert(code, info);
    }

    pub fn get(&self, code: &Code) -> Option<&CodeInfo> {
        self.codes.get(code)
    }

    /// `upsert_code(payload)` (§4.1): rejects `DEFAULT` (already enforced by
    /// [`Code::normalize`]), inserts if unknown, else requires the caller to
    /// be the code's own referrer and only updates `trader_rebate_perc`.
    pub fn upsert_code(
        &mut self,
        code: Code,
        caller: Address,
        referrer_addr: Address,
        trader_rebate_perc: Fraction,
    ) -> Result<(), TypeError> {
        if code.is_default() {
            return Err(TypeError::InputInvalid(format!("{DEFAULT_CODE} is reserved")));
        }
        match self.codes.get(&code) {
            None => {
                self.codes.insert(code, CodeInfo { referrer_addr, trader_rebate_perc });
                Ok(())
            }
            Some(existing) => {
                if existing.referrer_addr != caller {
                    return Err(TypeError::Conflict(
                        "only the code's own referrer may update it".into(),
                    ));
                }
                self.codes.insert(
                    code,
                    CodeInfo { referrer_addr: existing.referrer_addr, trader_rebate_perc },
                );
                Ok(())
            }
        }
    }

    /// `cut_percentage_code(code)` (§4.1).
    pub fn cut_percentage_code(
        &self,
        graph: &Graph,
        code: &Code,
        referrer_cut: Fraction,
    ) -> Result<f64, TypeError> {
        let info = self
            .codes
            .get(code)
            .ok_or_else(|| TypeError::NotFound(format!("code {code} not found")))?;
        let (refer_cut, _) = graph.cut_percentage_agency(info.referrer_addr, referrer_cut);
        Ok(refer_cut * info.trader_rebate_perc.as_f64())
    }

    /// `chain_for_code(code)` (§4.1): the reserved `DEFAULT` code returns
    /// the entire fee to the broker. Otherwise the referrer's chain is
    /// fetched and a terminal edge for the code's trader cut is appended.
    pub fn chain_for_code(
        &self,
        graph: &Graph,
        code: &Code,
        referrer_cut: Fraction,
    ) -> Result<Vec<ChainLevel>, TypeError> {
        if code.is_default() {
            return Ok(vec![ChainLevel {
                parent: graph.broker(),
                child: Address::ZERO, // synthetic broker -> DEFAULT edge, no real address
                pass_on: Fraction::ZERO,
                child_avail: Fraction::ZERO,
                parent_pay: Fraction::ONE,
                level: 1,
            }]);
        }

        let info = self
            .codes
            .get(code)
            .ok_or_else(|| TypeError::NotFound(format!("code {code} not found")))?;

        let (mut chain, _) = graph.chain_from_child(info.referrer_addr, referrer_cut);
        let crumble = chain.last().map(|l| l.child_avail).unwrap_or(Fraction::ONE);
        let trader_cut = info.trader_rebate_perc;
        let level = chain.len() as u32 + 1;

        chain.push(ChainLevel {
            parent: info.referrer_addr,
            // the trader's own address isn't known at this layer (`chain_for_code`
            // takes only a code); the caller fills it in when building payees.
            child: Address::ZERO,
            pass_on: trader_cut,
            child_avail: Fraction::from_f64(crumble.as_f64() * trader_cut.as_f64()),
            parent_pay: Fraction::from_f64(crumble.as_f64() * (1.0 - trader_cut.as_f64())),
            level,
        });
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn default_code_returns_entire_fee_to_broker() {
        let broker = addr(1);
        let graph = Graph::new(broker);
        let registry = CodeRegistry::new();
        let code = Code::from_stored(DEFAULT_CODE);
        let chain = registry.chain_for_code(&graph, &code, Fraction::ZERO).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].parent_pay, Fraction::ONE);
        assert_eq!(chain[0].child_avail, Fraction::ZERO);
    }

    #[test]
    fn upsert_code_rejects_foreign_update() {
        let mut registry = CodeRegistry::new();
        let code = Code::normalize("ABC").unwrap();
        let owner = addr(2);
        let stranger = addr(3);
        registry
            .upsert_code(code.clone(), owner, owner, Fraction::from_percent(10.0).unwrap())
            .unwrap();
        let err = registry
            .upsert_code(code, stranger, stranger, Fraction::from_percent(20.0).unwrap())
            .unwrap_err();
        assert!(matches!(err, TypeError::Conflict(_)));
    }

    #[test]
    fn chain_for_code_appends_trader_cut_after_referrer_chain() {
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

        let chain = registry.chain_for_code(&graph, &code, Fraction::ZERO).unwrap();
        assert_eq!(chain.len(), 2);
        let crumble = chain[0].child_avail.as_f64();
        assert!((crumble - 0.4).abs() < 1e-9);
        assert!((chain[1].child_avail.as_f64() - 0.2).abs() < 1e-9);
    }

    /// Scenario S2: broker->A pass_on=50%, A->B pass_on=60%, code X on B with
    /// trader_rebate=20%. Expected split: broker 50%, A 20%, B 24%, trader 6%.
    #[test]
    fn chain_for_code_matches_two_agency_hop_scenario() {
        let broker = addr(1);
        let a = addr(2);
        let b = addr(3);
        let mut graph = Graph::new(broker);
        graph.load_edge(broker, a, 50.0).unwrap();
        graph.load_edge(a, b, 60.0).unwrap();

        let mut registry = CodeRegistry::new();
        let code = Code::normalize("X").unwrap();
        registry.load(
            code.clone(),
            CodeInfo { referrer_addr: b, trader_rebate_perc: Fraction::from_percent(20.0).unwrap() },
        );

        let chain = registry.chain_for_code(&graph, &code, Fraction::ZERO).unwrap();
        assert_eq!(chain.len(), 3);

        assert_eq!(chain[0].parent, broker);
        assert!((chain[0].parent_pay.as_f64() - 0.5).abs() < 1e-9); // broker: 50%

        assert_eq!(chain[1].parent, a);
        assert!((chain[1].parent_pay.as_f64() - 0.2).abs() < 1e-9); // A: 20%

        assert_eq!(chain[2].parent, b);
        assert!((chain[2].parent_pay.as_f64() - 0.24).abs() < 1e-9); // B: 24%
        assert!((chain[2].child_avail.as_f64() - 0.06).abs() < 1e-9); // trader: 6%
    }
}
