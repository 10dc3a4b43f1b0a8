//! The correlated-randomness dealer, providing Beaver bit triples to both
//! parties as a (semi-)trusted preprocessing party.
//!
//! The dealer never sees any shared data: it only hands out fresh random
//! triples `(a, b, a & b)`, split into XOR shares between the two parties.
//! Both parties must request identical batch sizes in lockstep; a mismatch is
//! a protocol desynchronization and aborts the run.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::channel::{self, Channel, FIRST_PARTY, MsgChannel, SECOND_PARTY};

/// One party's shares of a batch of Beaver bit triples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripleShares {
    pub(crate) a: Vec<bool>,
    pub(crate) b: Vec<bool>,
    pub(crate) c: Vec<bool>,
}

/// Errors that can occur while serving correlated randomness.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The parties requested different numbers of triples, which means their
    /// protocol executions have diverged.
    #[error("the parties request different numbers of triples: {0} vs {1}")]
    TripleCountMismatch(u32, u32),
    /// An error occurred while trying to communicate over the channel.
    #[error(transparent)]
    Channel(#[from] channel::Error),
}

/// Runs the dealer until both parties signal the end of the run.
///
/// Each round, both parties request a batch size; the dealer cross-checks the
/// requests, generates the triples and sends each party its shares. A request
/// of zero triples from both parties terminates the dealer cleanly.
pub async fn serve(channel: impl Channel) -> Result<(), Error> {
    let mut chan = MsgChannel(channel);
    let mut rng = ChaCha20Rng::from_os_rng();
    let mut served: u64 = 0;
    loop {
        let n0: u32 = chan.recv_from(FIRST_PARTY, "triples").await?;
        let n1: u32 = chan.recv_from(SECOND_PARTY, "triples").await?;
        if n0 != n1 {
            return Err(Error::TripleCountMismatch(n0, n1));
        }
        if n0 == 0 {
            debug!(served, "both parties signalled the end of the run");
            return Ok(());
        }
        let n = n0 as usize;
        let mut first = TripleShares {
            a: Vec::with_capacity(n),
            b: Vec::with_capacity(n),
            c: Vec::with_capacity(n),
        };
        let mut second = TripleShares {
            a: Vec::with_capacity(n),
            b: Vec::with_capacity(n),
            c: Vec::with_capacity(n),
        };
        for _ in 0..n {
            let (a0, a1): (bool, bool) = (rng.random(), rng.random());
            let (b0, b1): (bool, bool) = (rng.random(), rng.random());
            let c = (a0 ^ a1) & (b0 ^ b1);
            let c0: bool = rng.random();
            first.a.push(a0);
            first.b.push(b0);
            first.c.push(c0);
            second.a.push(a1);
            second.b.push(b1);
            second.c.push(c ^ c0);
        }
        chan.send_to(FIRST_PARTY, "triples", &first).await?;
        chan.send_to(SECOND_PARTY, "triples", &second).await?;
        served += n as u64;
    }
}
