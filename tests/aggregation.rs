use std::collections::BTreeMap;

use private_lift::{
    exec::Role,
    game::{Error, GameConfig, simulate},
    metrics::{
        GroupedLiftMetrics, LiftMetrics, MetricField, RevealedMetrics, Shard, VisibilityPolicy,
    },
};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn metrics(impressions: i64, conversions: i64, test: i64, control: i64) -> LiftMetrics {
    LiftMetrics {
        impressions,
        conversions,
        test_population: test,
        control_population: control,
    }
}

fn grouped(entries: &[(&str, LiftMetrics)]) -> GroupedLiftMetrics {
    GroupedLiftMetrics {
        groups: entries
            .iter()
            .map(|(k, m)| (k.to_string(), *m))
            .collect(),
    }
}

fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

/// Both parties' shard views for a given assignment of shard data to owners.
fn shard_views(shards: &[(Role, GroupedLiftMetrics)]) -> (Vec<Shard>, Vec<Shard>) {
    let first = shards
        .iter()
        .map(|(owner, data)| match owner {
            Role::FirstParty => Shard::owned(*owner, data.clone()),
            Role::SecondParty => Shard::placeholder(*owner),
        })
        .collect();
    let second = shards
        .iter()
        .map(|(owner, data)| match owner {
            Role::SecondParty => Shard::owned(*owner, data.clone()),
            Role::FirstParty => Shard::placeholder(*owner),
        })
        .collect();
    (first, second)
}

#[test]
fn discloses_large_groups_and_suppresses_small_ones() {
    init_logging();
    // Two shards, threshold 100. Group "big" has population 90 + 60 = 150,
    // group "small" has population 30 + 20 = 50 and must come out all-zero.
    let shards = [
        (
            Role::FirstParty,
            grouped(&[
                ("big", metrics(1000, 40, 50, 40)),
                ("small", metrics(777, 66, 20, 10)),
            ]),
        ),
        (
            Role::SecondParty,
            grouped(&[
                ("big", metrics(2000, 35, 40, 20)),
                ("small", metrics(888, 55, 10, 10)),
            ]),
        ),
    ];
    let cfg = GameConfig::new(
        100,
        keys(&["big", "small"]),
        vec![Role::FirstParty, Role::SecondParty],
    );
    let (first_shards, second_shards) = shard_views(&shards);
    let (first, second) = simulate(&cfg, first_shards, second_shards).unwrap();
    assert_eq!(first, second);

    let big = first.groups["big"];
    assert_eq!(big.impressions, Some(3000));
    assert_eq!(big.conversions, Some(75));
    assert_eq!(big.test_population, Some(90));
    assert_eq!(big.control_population, Some(60));

    let small = first.groups["small"];
    assert_eq!(small, RevealedMetrics {
        impressions: Some(0),
        conversions: Some(0),
        test_population: Some(0),
        control_population: Some(0),
    });
}

#[test]
fn suppression_is_independent_of_metric_magnitudes() {
    init_logging();
    // A tiny population with huge metric values must still be zeroed.
    let shards = [(
        Role::FirstParty,
        grouped(&[("loud", metrics(1 << 40, 1 << 39, 1, 0))]),
    )];
    let cfg = GameConfig::new(2, keys(&["loud"]), vec![Role::FirstParty]);
    let (first_shards, second_shards) = shard_views(&shards);
    let (first, _) = simulate(&cfg, first_shards, second_shards).unwrap();
    assert_eq!(first.groups["loud"].impressions, Some(0));
    assert_eq!(first.groups["loud"].conversions, Some(0));
}

#[test]
fn population_equal_to_threshold_is_disclosed() {
    init_logging();
    // The k-anonymity bound is inclusive.
    let shards = [(
        Role::SecondParty,
        grouped(&[("edge", metrics(10, 5, 60, 40))]),
    )];
    let cfg = GameConfig::new(100, keys(&["edge"]), vec![Role::SecondParty]);
    let (first_shards, second_shards) = shard_views(&shards);
    let (first, second) = simulate(&cfg, first_shards, second_shards).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.groups["edge"].impressions, Some(10));
    assert_eq!(first.groups["edge"].test_population, Some(60));
}

#[test]
fn oblivious_sums_match_plaintext_sums() {
    init_logging();
    // Summing shards inside the protocol equals summing them in plaintext,
    // for shard counts 1, 3 and 10.
    for shard_count in [1usize, 3, 10] {
        let mut shards = vec![];
        for i in 0..shard_count {
            let owner = if i % 2 == 0 {
                Role::FirstParty
            } else {
                Role::SecondParty
            };
            let base = (i as i64 + 1) * 7;
            shards.push((
                owner,
                grouped(&[
                    ("x", metrics(base, base + 1, base + 2, base + 3)),
                    ("y", metrics(2 * base, base / 2, base, base + 5)),
                ]),
            ));
        }
        let expected = shards
            .iter()
            .map(|(_, data)| data.clone())
            .fold(GroupedLiftMetrics::default(), |acc, d| acc + d);

        let mut cfg = GameConfig::new(
            0,
            keys(&["x", "y"]),
            shards.iter().map(|(owner, _)| *owner).collect(),
        );
        cfg.bit_width = 32;
        let (first_shards, second_shards) = shard_views(&shards);
        let (first, second) = simulate(&cfg, first_shards, second_shards).unwrap();
        assert_eq!(first, second);
        for key in ["x", "y"] {
            let revealed = first.groups[key];
            let plain = expected.groups[key];
            for field in MetricField::ALL {
                assert_eq!(
                    revealed.field(field),
                    Some(plain.field(field)),
                    "{key}/{field:?} with {shard_count} shards"
                );
            }
        }
    }
}

#[test]
fn identical_runs_yield_bit_identical_results() {
    init_logging();
    let shards = [
        (
            Role::FirstParty,
            grouped(&[("a", metrics(5, 4, 70, 50)), ("b", metrics(9, 8, 10, 5))]),
        ),
        (
            Role::SecondParty,
            grouped(&[("a", metrics(6, 3, 30, 20))]),
        ),
    ];
    let cfg = GameConfig::new(
        100,
        keys(&["a", "b"]),
        vec![Role::FirstParty, Role::SecondParty],
    );
    let (first_shards, second_shards) = shard_views(&shards);
    let run1 = simulate(&cfg, first_shards.clone(), second_shards.clone()).unwrap();
    let run2 = simulate(&cfg, first_shards, second_shards).unwrap();
    assert_eq!(
        serde_json::to_string(&run1.0).unwrap(),
        serde_json::to_string(&run2.0).unwrap()
    );
    assert_eq!(run1.1, run2.0);
}

#[test]
fn hidden_fields_are_never_materialized() {
    init_logging();
    let shards = [(
        Role::FirstParty,
        grouped(&[("a", metrics(123, 45, 200, 100))]),
    )];
    let mut cfg = GameConfig::new(100, keys(&["a"]), vec![Role::FirstParty]);
    cfg.visibility =
        VisibilityPolicy::only([MetricField::Conversions, MetricField::TestPopulation]);
    let (first_shards, second_shards) = shard_views(&shards);
    let (first, second) = simulate(&cfg, first_shards, second_shards).unwrap();
    assert_eq!(first, second);

    let revealed = first.groups["a"];
    assert_eq!(revealed.conversions, Some(45));
    assert_eq!(revealed.test_population, Some(200));
    assert_eq!(revealed.impressions, None);
    assert_eq!(revealed.control_population, None);
    let json = serde_json::to_string(&first).unwrap();
    assert!(!json.contains("impressions"));
    assert!(!json.contains("control_population"));
}

#[test]
fn shard_count_mismatch_is_fatal() {
    init_logging();
    let cfg = GameConfig::new(
        10,
        keys(&["a"]),
        vec![Role::FirstParty, Role::SecondParty],
    );
    // Only one shard loaded on each side, two configured.
    let first_shards = vec![Shard::owned(
        Role::FirstParty,
        grouped(&[("a", metrics(1, 1, 1, 1))]),
    )];
    let second_shards = vec![Shard::placeholder(Role::FirstParty)];
    let result = simulate(&cfg, first_shards, second_shards);
    assert!(matches!(
        result,
        Err(Error::ShardCountMismatch {
            expected: 2,
            actual: 1
        })
    ));
}

#[test]
fn owned_shard_without_data_is_fatal() {
    init_logging();
    let cfg = GameConfig::new(10, keys(&["a"]), vec![Role::FirstParty]);
    // The first party owns the shard but only has a placeholder for it.
    let first_shards = vec![Shard::placeholder(Role::FirstParty)];
    let second_shards = vec![Shard::placeholder(Role::FirstParty)];
    let result = simulate(&cfg, first_shards, second_shards);
    assert!(matches!(result, Err(Error::MissingShardData { index: 0 })));
}

#[test]
fn groups_absent_from_some_shards_contribute_zero() {
    init_logging();
    let shards = [
        (Role::FirstParty, grouped(&[("a", metrics(10, 1, 80, 80))])),
        (Role::SecondParty, grouped(&[("b", metrics(20, 2, 90, 90))])),
    ];
    let cfg = GameConfig::new(
        100,
        keys(&["a", "b"]),
        vec![Role::FirstParty, Role::SecondParty],
    );
    let (first_shards, second_shards) = shard_views(&shards);
    let (first, _) = simulate(&cfg, first_shards, second_shards).unwrap();
    assert_eq!(first.groups["a"].impressions, Some(10));
    assert_eq!(first.groups["b"].impressions, Some(20));
}

#[test]
fn every_configured_group_appears_in_the_result() {
    init_logging();
    let shards = [(
        Role::FirstParty,
        grouped(&[("z", metrics(1, 1, 200, 0)), ("a", metrics(2, 2, 200, 0))]),
    )];
    let cfg = GameConfig::new(10, keys(&["z", "a"]), vec![Role::FirstParty]);
    let (first_shards, second_shards) = shard_views(&shards);
    let (first, _) = simulate(&cfg, first_shards, second_shards).unwrap();
    let got: BTreeMap<String, RevealedMetrics> = first.groups;
    assert_eq!(got.len(), 2);
    assert_eq!(got["z"].impressions, Some(1));
    assert_eq!(got["a"].impressions, Some(2));
}
