//! Seed sweeps over the scenarios.

use proptest::prelude::*;
use unmerge_core::{ComDistance, DisambiguatorKind, ExtractorKind, MergerResolver, ResolverConfig};
use unmerge_sim::scenarios::ScenarioId;
use unmerge_sim::{check_resolution, ScenarioRunner};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_crossing_passes_for_any_seed(seed in 0u64..500) {
        let result = ScenarioRunner::new(seed).run(ScenarioId::Crossing);
        prop_assert!(result.passed, "seed {}: {:?}", seed, result.failure_reason);
        prop_assert_eq!(result.children_created, 2 * result.mergers);
    }

    #[test]
    fn test_swarm_passes_with_both_disambiguators(seed in 0u64..500) {
        for disambiguator in DisambiguatorKind::all() {
            let result = ScenarioRunner::new(seed)
                .with_frames(12)
                .with_disambiguator(disambiguator)
                .run(ScenarioId::Swarm);
            prop_assert!(result.passed, "seed {} {}: {:?}", seed, disambiguator.name(), result.failure_reason);
            prop_assert_eq!(result.resolution_failures, 0);
        }
    }

    #[test]
    fn test_resolution_records_provenance(seed in 0u64..500) {
        let runner = ScenarioRunner::new(seed)
            .with_frames(15)
            .with_extractor(ExtractorKind::PossibleComs);
        let mut tracked = runner.simulate(ScenarioId::Convoy).unwrap();
        let expected = tracked.expected_children();
        let extractor = ExtractorKind::PossibleComs.build(&ResolverConfig::default());

        let report = MergerResolver::new(&mut tracked.graph)
            .unwrap()
            .resolve_mergers(&*extractor, &ComDistance)
            .unwrap();
        let violations = check_resolution(&tracked.graph, &report, expected).unwrap();
        prop_assert!(violations.is_empty(), "seed {}: {:?}", seed, violations);
    }
}

#[test]
fn test_runs_are_reproducible() {
    for scenario in ScenarioId::all() {
        let a = ScenarioRunner::new(99).run(scenario);
        let b = ScenarioRunner::new(99).run(scenario);
        assert_eq!(a, b, "{}", scenario.name());
    }
}
