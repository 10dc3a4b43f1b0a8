//! The k-anonymity threshold aggregation game.
//!
//! Both parties execute the same strictly sequential state machine in
//! lockstep:
//!
//! 1. **Init**: agree on all public parameters; any divergence is fatal
//!    before data is shared.
//! 2. **ShareInputs**: transfer each shard's metrics into oblivious per-group
//!    vectors, aligned to the agreed group-key ordering.
//! 3. **ObliviousSum**: fold each shard into oblivious running per-group
//!    sums.
//! 4. **ThresholdCompare**: compare each group's population against the
//!    public threshold, producing secret disclosure bits.
//! 5. **Suppress**: obliviously zero every field of the groups below the
//!    threshold.
//! 6. **RevealOutput**: reveal plaintext sums, restricted to the fields the
//!    visibility policy permits.
//! 7. **Done**: hand the [`AggregationResult`] to the caller.
//!
//! There are no checkpoints and no partial results: any failure aborts the
//! run, and a restart begins again from Init with both parties resynchronized.

use serde::{Deserialize, Serialize};
use tokio::{runtime::Runtime, task};
use tracing::{debug, info};

use crate::{
    channel::{Channel, SimpleChannel},
    dealer,
    exec::{self, Executor, INT_SIZE, OBit, OInt, Role},
    metrics::{AggregationResult, MetricField, RevealedMetrics, Shard, VisibilityPolicy},
    secret_sharing,
};

/// A custom error type for the aggregation game.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caused by the oblivious execution engine or its channel.
    #[error(transparent)]
    Exec(#[from] exec::Error),
    /// Caused by the correlated-randomness dealer (only surfaced by
    /// [`simulate`], where the dealer runs in-process).
    #[error(transparent)]
    Dealer(#[from] dealer::Error),
    /// The number of loaded shards does not match the configured shard count.
    #[error("expected {expected} shards, got {actual}")]
    ShardCountMismatch {
        /// The configured number of shards.
        expected: usize,
        /// The number of shards supplied to the game.
        actual: usize,
    },
    /// A shard's declared owner does not match the configuration.
    #[error("shard {index} is declared as owned by the wrong party")]
    ShardOwnerMismatch {
        /// The index of the offending shard.
        index: usize,
    },
    /// A shard owned by this party has no local plaintext data.
    #[error("shard {index} is owned by this party but has no local data")]
    MissingShardData {
        /// The index of the offending shard.
        index: usize,
    },
}

/// The public parameters of one aggregation run.
///
/// Both parties must be configured identically; the Init state exchanges and
/// cross-checks this entire block before any data is shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    /// The public k-anonymity floor: groups with a population below this
    /// bound are suppressed. The bound is inclusive, a population equal to
    /// the threshold is disclosed.
    pub threshold: i64,
    /// The bit width of every shared metric integer.
    pub bit_width: usize,
    /// The public group keys, in the fixed ordering used for all shared
    /// metric vectors.
    pub group_keys: Vec<String>,
    /// The public owner of each shard, by shard index.
    pub shard_owners: Vec<Role>,
    /// Which metric fields may be revealed at the end of the run.
    pub visibility: VisibilityPolicy,
}

impl GameConfig {
    /// A config with the default bit width and full visibility.
    pub fn new(threshold: i64, group_keys: Vec<String>, shard_owners: Vec<Role>) -> Self {
        GameConfig {
            threshold,
            bit_width: INT_SIZE,
            group_keys,
            shard_owners,
            visibility: VisibilityPolicy::all(),
        }
    }
}

/// One party's execution of the k-anonymity threshold aggregation game.
pub struct KAnonymityAggregationGame<C: Channel> {
    exec: Executor<C>,
    cfg: GameConfig,
}

impl<C: Channel> KAnonymityAggregationGame<C> {
    /// Creates the game for one party on top of an established executor.
    pub fn new(exec: Executor<C>, cfg: GameConfig) -> Self {
        KAnonymityAggregationGame { exec, cfg }
    }

    /// Plays one full pass of the game over the given shards.
    ///
    /// Consumes the game: a failed run cannot be resumed or patched, it must
    /// restart entirely from Init.
    pub async fn play(mut self, shards: &[Shard]) -> Result<AggregationResult, Error> {
        self.init(shards).await?;
        let sums = self.share_and_sum(shards).await?;
        let disclose = self.threshold_compare(&sums).await?;
        let released = self.suppress(sums, &disclose).await?;
        let result = self.reveal(released).await?;
        info!(groups = self.cfg.group_keys.len(), "aggregation complete");
        self.exec.finish().await?;
        Ok(result)
    }

    /// Init: validates the local shard set against the configuration and
    /// cross-checks all public parameters with the peer.
    async fn init(&mut self, shards: &[Shard]) -> Result<(), Error> {
        if shards.len() != self.cfg.shard_owners.len() {
            return Err(Error::ShardCountMismatch {
                expected: self.cfg.shard_owners.len(),
                actual: shards.len(),
            });
        }
        for (index, (shard, owner)) in shards.iter().zip(&self.cfg.shard_owners).enumerate() {
            if shard.owner != *owner {
                return Err(Error::ShardOwnerMismatch { index });
            }
            if shard.owner == self.exec.role() && shard.data.is_none() {
                return Err(Error::MissingShardData { index });
            }
        }
        self.exec.agree("init parameters", &self.cfg).await?;
        debug!(
            shards = shards.len(),
            groups = self.cfg.group_keys.len(),
            threshold = self.cfg.threshold,
            "init parameters agreed"
        );
        Ok(())
    }

    /// ShareInputs + ObliviousSum: shares each shard's per-group metric
    /// vectors from their owner and folds them into oblivious running sums.
    ///
    /// Returns one vector of per-group sums per metric field, in
    /// [`MetricField::ALL`] order. The running state never leaves oblivious
    /// form.
    async fn share_and_sum(&mut self, shards: &[Shard]) -> Result<Vec<Vec<OInt>>, Error> {
        let n = self.cfg.group_keys.len();
        let width = self.cfg.bit_width;
        let mut sums = Vec::with_capacity(MetricField::ALL.len());
        for _ in MetricField::ALL {
            let zeros: Result<Vec<OInt>, exec::Error> =
                (0..n).map(|_| self.exec.constant(0, width)).collect();
            sums.push(zeros?);
        }
        for (index, shard) in shards.iter().enumerate() {
            let owner = shard.owner;
            let aligned = match &shard.data {
                Some(data) if owner == self.exec.role() => data.aligned(&self.cfg.group_keys),
                _ => vec![],
            };
            for (f, field) in MetricField::ALL.into_iter().enumerate() {
                let values: Vec<i64> = aligned.iter().map(|m| m.field(field)).collect();
                let shared =
                    secret_sharing::share_vector(&mut self.exec, owner, &values, n, width).await?;
                sums[f] = self.exec.add_many(&sums[f], &shared).await?;
            }
            debug!(shard = index, "folded shard into the running sums");
        }
        Ok(sums)
    }

    /// ThresholdCompare: one oblivious comparison per group between its
    /// secret population and the public threshold.
    async fn threshold_compare(&mut self, sums: &[Vec<OInt>]) -> Result<Vec<OBit>, Error> {
        let n = self.cfg.group_keys.len();
        let width = self.cfg.bit_width;
        let test = &sums[MetricField::TestPopulation.index()];
        let control = &sums[MetricField::ControlPopulation.index()];
        let population = self.exec.add_many(test, control).await?;
        let bound: Result<Vec<OInt>, exec::Error> = (0..n)
            .map(|_| self.exec.constant(self.cfg.threshold, width))
            .collect();
        let disclose = self.exec.ge_many(&population, &bound?).await?;
        debug!(groups = n, "threshold comparison complete");
        Ok(disclose)
    }

    /// Suppress: obliviously selects the true sum for disclosable groups and
    /// zero for all others, per metric field.
    async fn suppress(
        &mut self,
        sums: Vec<Vec<OInt>>,
        disclose: &[OBit],
    ) -> Result<Vec<Vec<OInt>>, Error> {
        let mut released = Vec::with_capacity(sums.len());
        for field_sums in &sums {
            released.push(secret_sharing::multiply_bitmask(&mut self.exec, field_sums, disclose).await?);
        }
        Ok(released)
    }

    /// RevealOutput: the single point of plaintext disclosure, restricted to
    /// the fields the visibility policy allows both parties to learn.
    async fn reveal(&mut self, released: Vec<Vec<OInt>>) -> Result<AggregationResult, Error> {
        let mut revealed: Vec<RevealedMetrics> =
            vec![RevealedMetrics::default(); self.cfg.group_keys.len()];
        for (f, field) in MetricField::ALL.into_iter().enumerate() {
            if !self.cfg.visibility.allows(field) {
                continue;
            }
            let values = self.exec.reveal_ints(&released[f]).await?;
            for (group, value) in revealed.iter_mut().zip(values) {
                group.set(field, value);
            }
        }
        Ok(AggregationResult {
            threshold: self.cfg.threshold,
            groups: self
                .cfg
                .group_keys
                .iter()
                .cloned()
                .zip(revealed)
                .collect(),
        })
    }
}

/// Simulates one full aggregation run with both parties and the dealer in a
/// single process, communicating over in-memory channels.
///
/// Returns both parties' results (which are identical for any successful
/// run). Intended for tests and development; production runs use one process
/// per party over [`TcpChannel`](crate::channel::TcpChannel)s.
pub fn simulate(
    cfg: &GameConfig,
    first_shards: Vec<Shard>,
    second_shards: Vec<Shard>,
) -> Result<(AggregationResult, AggregationResult), Error> {
    let tokio = Runtime::new().expect("Could not start tokio runtime");
    tokio.block_on(async {
        let mut channels = SimpleChannel::channels(3);
        let dealer_channel = channels.pop().expect("dealer channel");
        let second_channel = channels.pop().expect("second party channel");
        let first_channel = channels.pop().expect("first party channel");

        let dealer = task::spawn(dealer::serve(dealer_channel));

        let second_cfg = cfg.clone();
        let second = task::spawn(async move {
            let exec = Executor::new(Role::SecondParty, second_channel);
            KAnonymityAggregationGame::new(exec, second_cfg)
                .play(&second_shards)
                .await
        });

        let exec = Executor::new(Role::FirstParty, first_channel);
        let first_result = KAnonymityAggregationGame::new(exec, cfg.clone())
            .play(&first_shards)
            .await?;
        let second_result = second.await.expect("second party task panicked")?;
        dealer.await.expect("dealer task panicked")?;
        Ok((first_result, second_result))
    })
}
