use alloy_primitives::Address;
use rebate_types::{Code, Fraction, TypeError, MAX_REFERRAL_CHAIN_LEN};

use crate::chain::Graph;

/// Validates a `refer(payload)` mutation (§4.1) against the in-memory
/// graph: the parent must already be an agent, `refer_to` must be fresh,
/// and the resulting depth must stay within bound. Does not mutate the
/// graph — callers apply the edge (and persist it) only after this
/// succeeds.
pub fn validate_refer(graph: &Graph, parent: Address, refer_to: Address) -> Result<(), TypeError> {
    let (parent_is_agent, _) = graph.is_agency(parent);
    if !parent_is_agent {
        return Err(TypeError::InputInvalid("parent is not a known agency".into()));
    }
    if graph.is_child(refer_to) {
        return Err(TypeError::Conflict("refer_to already has a parent".into()));
    }
    if graph.has_loop(parent, refer_to) {
        return Err(TypeError::Conflict("referral would close a loop".into()));
    }
    let depth = graph.chain_depth(parent) + 1;
    if depth > MAX_REFERRAL_CHAIN_LEN {
        return Err(TypeError::InputInvalid(format!(
            "chain depth {depth} exceeds MAX_REFERRAL_CHAIN_LEN ({MAX_REFERRAL_CHAIN_LEN})"
        )));
    }
    Ok(())
}

/// Applies a `refer` mutation already validated by [`validate_refer`].
pub fn apply_refer(graph: &mut Graph, parent: Address, refer_to: Address, pass_on: Fraction) {
    graph.insert_edge(parent, refer_to, pass_on);
}

/// Validates a `select_code(payload)` mutation (§4.1): the code must exist
/// and be unexpired (`code_exists_unexpired`, already checked by the caller
/// against the persisted row at the call's `now`), and re-selecting the
/// trader's current code is rejected. Closing the prior selection and
/// inserting the new one is the caller's job once this succeeds.
pub fn validate_select_code(
    code_exists_unexpired: bool,
    current_code: Option<&Code>,
    new_code: &Code,
) -> Result<(), TypeError> {
    if !code_exists_unexpired {
        return Err(TypeError::NotFound(format!("code {new_code} unknown or expired")));
    }
    if current_code == Some(new_code) {
        return Err(TypeError::Conflict("trader already selected this code".into()));
    }
    Ok(())
}
