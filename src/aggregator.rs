//! The aggregator application: resolves this process's role, loads local
//! shard files, drives the aggregation game over the network and persists the
//! single output artifact.

use std::{
    fs,
    future::Future,
    io,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{
    channel::TcpChannel,
    dealer,
    exec::{Executor, Role},
    game::{self, GameConfig, KAnonymityAggregationGame},
    metrics::{AggregationResult, GroupedLiftMetrics, Shard},
};

/// A custom error type for the aggregator application.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caused by the aggregation game or the layers below it.
    #[error(transparent)]
    Game(#[from] game::Error),
    /// Caused by the dealer endpoint (only when running as the dealer).
    #[error(transparent)]
    Dealer(#[from] dealer::Error),
    /// A shard file owned by this party could not be read.
    #[error("failed to read shard file {path}")]
    ReadShard {
        /// The path of the shard file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A shard file owned by this party could not be parsed.
    #[error("failed to parse shard file {path}")]
    ParseShard {
        /// The path of the shard file.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// The aggregation result could not be serialized.
    #[error("failed to serialize the aggregation result")]
    SerializeResult(#[source] serde_json::Error),
    /// The aggregation result could not be written.
    #[error("failed to write the result to {path}")]
    WriteResult {
        /// The configured output path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The run's channels could not be established.
    #[error("failed to establish the run's channels")]
    Connect(#[source] io::Error),
}

/// The configuration surface of one aggregation run, supplied by the
/// surrounding application (flag parsing and process bootstrap are not part
/// of this crate).
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// This process's role.
    pub role: Role,
    /// The IP address the first party listens on (and the second connects to).
    pub server_ip: String,
    /// The port the first party listens on.
    pub port: u16,
    /// The address (`ip:port`) of the dealer endpoint.
    pub dealer_addr: String,
    /// The public game parameters (threshold, visibility, group keys, shard
    /// owners, bit width).
    pub game: GameConfig,
    /// The shard input path prefix: shard `i` is read from
    /// `{input_path}_{i}.json`.
    pub input_path: String,
    /// The path the serialized [`AggregationResult`] is written to.
    pub output_path: PathBuf,
}

impl AggregatorConfig {
    /// The input file path of the shard with the given index.
    pub fn shard_path(&self, shard: usize) -> PathBuf {
        PathBuf::from(format!("{}_{shard}.json", self.input_path))
    }
}

/// The capability surface of an MPC application: load local inputs, run the
/// protocol, persist the output.
pub trait Application {
    /// The locally loaded input data.
    type Input;
    /// The final output artifact.
    type Output;

    /// Loads this party's local input data.
    fn load_inputs(&self) -> Result<Self::Input, Error>;

    /// Executes one full protocol run: loads inputs, plays the protocol and
    /// persists the output. Returns the output on success; on any failure no
    /// artifact is written.
    fn run(&mut self) -> impl Future<Output = Result<Self::Output, Error>> + Send;

    /// Persists the final output artifact.
    fn persist_output(&self, output: &Self::Output) -> Result<(), Error>;
}

/// One aggregation run of the k-anonymity lift aggregation protocol.
pub struct KAnonymityAggregatorApp {
    cfg: AggregatorConfig,
}

impl KAnonymityAggregatorApp {
    /// Creates the application from its configuration.
    pub fn new(cfg: AggregatorConfig) -> Self {
        KAnonymityAggregatorApp { cfg }
    }

    fn read_shard(&self, path: &Path) -> Result<GroupedLiftMetrics, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadShard {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| Error::ParseShard {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Application for KAnonymityAggregatorApp {
    type Input = Vec<Shard>;
    type Output = AggregationResult;

    /// Reads the configured number of local partition files, or synthesizes a
    /// placeholder for every shard this party does not own.
    fn load_inputs(&self) -> Result<Vec<Shard>, Error> {
        let mut shards = Vec::with_capacity(self.cfg.game.shard_owners.len());
        for (i, owner) in self.cfg.game.shard_owners.iter().enumerate() {
            if *owner == self.cfg.role {
                let path = self.cfg.shard_path(i);
                shards.push(Shard::owned(*owner, self.read_shard(&path)?));
            } else {
                shards.push(Shard::placeholder(*owner));
            }
        }
        info!(shards = shards.len(), "loaded local shards");
        Ok(shards)
    }

    async fn run(&mut self) -> Result<AggregationResult, Error> {
        let shards = self.load_inputs()?;
        let channel = TcpChannel::connect_party(
            self.cfg.role,
            (self.cfg.server_ip.as_str(), self.cfg.port),
            self.cfg.dealer_addr.as_str(),
        )
        .await
        .map_err(Error::Connect)?;
        let exec = Executor::new(self.cfg.role, channel);
        let game = KAnonymityAggregationGame::new(exec, self.cfg.game.clone());
        let result = game.play(&shards).await?;
        self.persist_output(&result)?;
        Ok(result)
    }

    /// Writes the single result artifact, only ever called after the game
    /// reached its terminal state.
    fn persist_output(&self, output: &AggregationResult) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(output).map_err(Error::SerializeResult)?;
        fs::write(&self.cfg.output_path, json).map_err(|source| Error::WriteResult {
            path: self.cfg.output_path.clone(),
            source,
        })?;
        info!(path = %self.cfg.output_path.display(), "wrote aggregation result");
        Ok(())
    }
}

/// Runs the dealer endpoint of one aggregation run: listens on `addr`,
/// accepts both parties and serves correlated randomness until the run ends.
pub async fn run_dealer(addr: &str) -> Result<(), Error> {
    let channel = TcpChannel::bind_dealer(addr).await.map_err(Error::Connect)?;
    dealer::serve(channel).await?;
    Ok(())
}
