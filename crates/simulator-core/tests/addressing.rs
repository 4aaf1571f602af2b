//! Address pattern tests for simulator-core.
// crates/simulator-core/tests/addressing.rs
// =============================================================================
// Module: Addressing Tests
// Description: Check wildcard matching and routing coverage against a fleet.
// Purpose: Ensure patterns name exactly the concrete addresses they describe.
// =============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use proptest::prelude::*;
use simulator_core::AddressLevel;
use simulator_core::SimulatorAddress;

/// Every concrete address of a 3 x 3 x 3 fleet, coordinator included.
fn fleet() -> Vec<SimulatorAddress> {
    let mut all = vec![SimulatorAddress::coordinator()];
    for agent in 1..=3 {
        all.push(SimulatorAddress::agent(agent));
        for worker in 1..=3 {
            all.push(SimulatorAddress::worker(agent, worker));
            for test in 1..=3 {
                all.push(SimulatorAddress::test(agent, worker, test));
            }
        }
    }
    all
}

fn level_strategy() -> impl Strategy<Value = AddressLevel> {
    prop_oneof![
        Just(AddressLevel::Coordinator),
        Just(AddressLevel::Agent),
        Just(AddressLevel::Worker),
        Just(AddressLevel::Test),
    ]
}

/// Patterns at any level whose components are wildcards or indices below
/// `bound`; a bound above 4 names addresses outside the fleet.
fn pattern_strategy(bound: u32) -> impl Strategy<Value = SimulatorAddress> {
    (
        level_strategy(),
        proptest::option::of(1..bound),
        proptest::option::of(1..bound),
        proptest::option::of(1..bound),
    )
        .prop_map(|(level, agent, worker, test)| {
            let depth = level.depth();
            SimulatorAddress::new(
                level,
                agent.filter(|_| depth >= 1),
                worker.filter(|_| depth >= 2),
                test.filter(|_| depth >= 3),
            )
            .unwrap()
        })
}

/// Component-wise reference for pattern matching.
fn names(pattern: &SimulatorAddress, concrete: &SimulatorAddress) -> bool {
    let agree = |wanted: Option<u32>, actual: Option<u32>| wanted.is_none() || wanted == actual;
    pattern.level() == concrete.level()
        && agree(pattern.agent_index(), concrete.agent_index())
        && agree(pattern.worker_index(), concrete.worker_index())
        && agree(pattern.test_index(), concrete.test_index())
}

proptest! {
    #[test]
    fn pattern_matches_exactly_the_named_addresses(pattern in pattern_strategy(6)) {
        for concrete in fleet() {
            prop_assert_eq!(pattern.matches(&concrete), names(&pattern, &concrete), "{} vs {}", pattern, concrete);
        }
    }

    #[test]
    fn subtree_covers_pattern_iff_a_match_lies_beneath(pattern in pattern_strategy(4)) {
        let all = fleet();
        for node in &all {
            let reachable = all.iter().any(|concrete| {
                pattern.matches(concrete) && concrete.ancestor_at(node.level()) == Some(*node)
            });
            prop_assert_eq!(node.covers(&pattern), reachable, "{} covers {}", node, pattern);
        }
    }

    #[test]
    fn text_and_json_forms_round_trip(pattern in pattern_strategy(6)) {
        let text = pattern.to_string();
        prop_assert_eq!(text.parse::<SimulatorAddress>().unwrap(), pattern);
        let json = serde_json::to_string(&pattern).unwrap();
        prop_assert_eq!(json.clone(), format!("\"{text}\""));
        prop_assert_eq!(serde_json::from_str::<SimulatorAddress>(&json).unwrap(), pattern);
    }
}

#[test]
fn wildcard_constructors_name_their_population() {
    let all = fleet();
    let count = |pattern: SimulatorAddress| all.iter().filter(|concrete| pattern.matches(concrete)).count();
    assert_eq!(count(SimulatorAddress::all_agents()), 3);
    assert_eq!(count(SimulatorAddress::all_workers(None)), 9);
    assert_eq!(count(SimulatorAddress::all_workers(Some(2))), 3);
    assert_eq!(count(SimulatorAddress::test_on_all_workers(1)), 9);
    assert_eq!(count(SimulatorAddress::worker(2, 2)), 1);
    assert!(!SimulatorAddress::all_agents().is_concrete());
    assert!(!SimulatorAddress::all_agents().matches(&SimulatorAddress::all_agents()));
}

#[test]
fn children_extend_by_one_level() {
    let agent = SimulatorAddress::agent(4);
    let worker = agent.child(7).unwrap();
    assert_eq!(worker, SimulatorAddress::worker(4, 7));
    assert_eq!(worker.child(1).unwrap().to_string(), "C_A4_W7_T1");
    assert_eq!(SimulatorAddress::test(1, 1, 1).child(1), None);
    assert!(SimulatorAddress::coordinator().is_ancestor_of(&worker));
    assert!(!worker.is_ancestor_of(&worker));
}
