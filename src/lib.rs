//! Privacy-preserving advertising lift aggregation with k-anonymous release.
//!
//! This crate lets two mutually distrusting parties (e.g. a publisher and an
//! advertiser) jointly compute aggregate lift metrics without either party
//! learning the other's raw data, and release only those aggregates whose
//! underlying population meets a public k-anonymity threshold. The protocol
//! assumes semi-honest, non-colluding participants.
//!
//! ## Main Components
//!
//! The crate is structured into several modules, leaves first:
//!
//! * [`channel`]: Communication abstractions for exchanging data between the
//!   parties and the correlated-randomness dealer.
//! * [`dealer`]: The trusted preprocessing endpoint serving Beaver bit
//!   triples.
//! * [`exec`]: The oblivious execution engine: XOR-shared integers and bits
//!   with branch-free arithmetic, comparison, selection and a single reveal
//!   operation.
//! * [`secret_sharing`]: The transfer layer moving plaintext scalars and
//!   (padded) arrays into oblivious form, plus branch-free container
//!   combinators.
//! * [`metrics`]: The plaintext data model: lift metrics, shards, visibility
//!   policy, aggregation result.
//! * [`game`]: The k-anonymity threshold aggregation game state machine, and
//!   an in-process [`game::simulate`] for tests and development.
//! * [`aggregator`]: The application driving one end-to-end run: role
//!   resolution, shard loading, game execution, result persistence.
//!
//! ## Basic Usage
//!
//! Each party configures an identical [`game::GameConfig`] (threshold, group
//! keys, shard owners, visibility policy, bit width), loads its local shards
//! and runs the [`aggregator::KAnonymityAggregatorApp`]. For simulated
//! environments, [`game::simulate`] runs both parties and the dealer in a
//! single process:
//!
//! ```
//! use private_lift::{
//!     exec::Role,
//!     game::{simulate, GameConfig},
//!     metrics::{GroupedLiftMetrics, LiftMetrics, Shard},
//! };
//!
//! let mut data = GroupedLiftMetrics::default();
//! data.groups.insert(
//!     "group A".to_string(),
//!     LiftMetrics {
//!         impressions: 1000,
//!         conversions: 50,
//!         test_population: 90,
//!         control_population: 60,
//!     },
//! );
//!
//! let cfg = GameConfig::new(
//!     100,
//!     vec!["group A".to_string()],
//!     vec![Role::FirstParty],
//! );
//! let first_shards = vec![Shard::owned(Role::FirstParty, data)];
//! let second_shards = vec![Shard::placeholder(Role::FirstParty)];
//!
//! let (first, second) = simulate(&cfg, first_shards, second_shards).unwrap();
//! assert_eq!(first, second);
//! // population 90 + 60 >= 100, so the group is disclosed
//! assert_eq!(first.groups["group A"].conversions, Some(50));
//! ```
//!
//! ## Security Properties
//!
//! Intermediate sums and comparison outcomes never exist as plaintext on
//! either side; the only disclosure happens at the game's terminal reveal
//! step, restricted to the fields the visibility policy permits, and only for
//! groups whose population clears the public threshold. All data-dependent
//! decisions are routed through oblivious comparison and selection, never
//! through real control flow, so execution behavior leaks nothing about
//! secret values.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod aggregator;
pub mod channel;
pub mod dealer;
pub mod exec;
pub mod game;
pub mod metrics;
pub mod secret_sharing;
