//! The oblivious execution engine: bit-level secure two-party arithmetic.
//!
//! Values are held as XOR secret shares between exactly two parties, so that
//! neither party can reconstruct a plaintext on its own. Linear operations
//! (XOR, NOT, public constants) are local; every AND gate consumes one Beaver
//! bit triple served by the [dealer](crate::dealer) and costs one network
//! round with the peer. Addition and comparison are bit-serial circuits whose
//! AND gates are batched across the whole operand vector per bit position.
//!
//! [`OInt`] and [`OBit`] cannot be constructed from or converted to plaintext
//! outside this module; [`Executor::reveal_ints`] and
//! [`Executor::reveal_bits`] are the only disclosure points.

use std::fmt;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    channel::{self, Channel, DEALER, MsgChannel},
    dealer::TripleShares,
};

/// The default bit width for shared integers.
pub const INT_SIZE: usize = 64;

/// The fixed identity of one of the two parties, public for the run's duration.
///
/// The role designates which party is the authoritative plaintext source of a
/// sharing operation and which side of the channel setup a process takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The party that listens for the peer connection.
    FirstParty,
    /// The party that connects to the first party.
    SecondParty,
}

impl Role {
    /// The endpoint index of this role.
    pub fn index(self) -> usize {
        match self {
            Role::FirstParty => crate::channel::FIRST_PARTY,
            Role::SecondParty => crate::channel::SECOND_PARTY,
        }
    }

    /// The role of the other party.
    pub fn peer(self) -> Role {
        match self {
            Role::FirstParty => Role::SecondParty,
            Role::SecondParty => Role::FirstParty,
        }
    }
}

/// A custom error type for oblivious computation and communication.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message could not be sent or received.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// The parties' public parameters diverge; continuing would desynchronize
    /// the protocol.
    #[error("public configuration mismatch during {0}")]
    ConfigMismatch(String),
    /// The owning party supplied a different number of values than publicly
    /// declared.
    #[error("expected {expected} values for the owned share, got {actual}")]
    InputLengthMismatch {
        /// The publicly declared number of values.
        expected: usize,
        /// The number of values actually supplied.
        actual: usize,
    },
    /// Two operand vectors have different lengths.
    #[error("operand vectors have mismatching lengths ({0} vs {1})")]
    LengthMismatch(usize, usize),
    /// Two operands have different bit widths.
    #[error("operands have mismatching bit widths ({0} vs {1})")]
    WidthMismatch(usize, usize),
    /// The requested bit width cannot be shared.
    #[error("bit width must be between 1 and {INT_SIZE}, got {0}")]
    UnsupportedWidth(usize),
    /// An inner array is longer than the publicly declared maximum size.
    #[error("inner array of length {actual} exceeds the public maximum {max}")]
    InnerSizeExceeded {
        /// The publicly declared maximum inner size.
        max: usize,
        /// The actual inner array length.
        actual: usize,
    },
    /// The dealer sent a triple batch of the wrong size.
    #[error("dealer sent {actual} triples, expected {expected}")]
    MalformedTriples {
        /// The requested number of triples.
        expected: usize,
        /// The number of triples received.
        actual: usize,
    },
}

/// An oblivious bit: one XOR share of a secret bit.
#[derive(Debug, Clone)]
pub struct OBit {
    share: bool,
}

/// An oblivious integer: XOR shares of the bits of a secret integer,
/// little-endian, with a publicly known width.
#[derive(Debug, Clone)]
pub struct OInt {
    bits: Vec<bool>,
}

impl OInt {
    /// The public bit width of this integer.
    pub fn width(&self) -> usize {
        self.bits.len()
    }

    pub(crate) fn from_share_bits(bits: Vec<bool>) -> Self {
        OInt { bits }
    }

    pub(crate) fn share_bits(&self) -> &[bool] {
        &self.bits
    }
}

impl OBit {
    pub(crate) fn from_share_bit(share: bool) -> Self {
        OBit { share }
    }
}

/// Decomposes the low `width` bits of a value, little-endian.
///
/// Values that do not fit in `width` bits are silently truncated, which is a
/// documented caller obligation rather than an error.
pub(crate) fn decompose(value: i64, width: usize) -> Vec<bool> {
    (0..width).map(|k| (value as u64 >> k) & 1 == 1).collect()
}

/// Recomposes plaintext bits into a zero-extended integer.
pub(crate) fn recompose(bits: &[bool]) -> i64 {
    let mut v: u64 = 0;
    for (k, bit) in bits.iter().enumerate() {
        if *bit {
            v |= 1 << k;
        }
    }
    v as i64
}

/// The per-party execution context for oblivious operations.
///
/// Both parties must issue identical operations in identical order; the
/// engine enforces shapes where it can (lengths, widths, declared counts) but
/// operation ordering is a protocol contract established at Init.
pub struct Executor<C: Channel> {
    role: Role,
    chan: MsgChannel<C>,
    rng: ChaCha20Rng,
}

impl<C: Channel> Executor<C> {
    /// Creates an executor for the given role on top of an established channel.
    pub fn new(role: Role, channel: C) -> Self {
        Executor {
            role,
            chan: MsgChannel(channel),
            rng: ChaCha20Rng::from_os_rng(),
        }
    }

    /// Creates an executor with a fixed share-mask seed, for reproducible tests.
    pub fn with_seed(role: Role, channel: C, seed: u64) -> Self {
        Executor {
            role,
            chan: MsgChannel(channel),
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    /// The role of this party.
    pub fn role(&self) -> Role {
        self.role
    }

    fn peer(&self) -> usize {
        self.role.peer().index()
    }

    /// Flips a shared bit: only one party's share is toggled.
    fn flip(&self, share: bool) -> bool {
        match self.role {
            Role::FirstParty => !share,
            Role::SecondParty => share,
        }
    }

    /// Exchanges a public parameter block with the peer and fails if the two
    /// sides disagree.
    ///
    /// This is the Init-time defense against configuration divergence: any
    /// mismatch is fatal before data is shared.
    pub async fn agree<T>(&mut self, phase: &str, params: &T) -> Result<(), Error>
    where
        T: Serialize + DeserializeOwned + PartialEq + fmt::Debug + Sync,
    {
        self.chan.send_to(self.peer(), phase, params).await?;
        let theirs: T = self.chan.recv_from(self.peer(), phase).await?;
        if *params == theirs {
            Ok(())
        } else {
            Err(Error::ConfigMismatch(phase.to_string()))
        }
    }

    /// Shares `count` plaintext bits owned by `owner` into XOR shares.
    ///
    /// The owner splits each bit with a fresh random mask and sends the
    /// peer's half; the non-owner's `bits` argument is ignored. Both parties
    /// must call this with the same `count`.
    pub(crate) async fn share_bits_raw(
        &mut self,
        owner: Role,
        bits: &[bool],
        count: usize,
    ) -> Result<Vec<bool>, Error> {
        if owner == self.role {
            if bits.len() != count {
                return Err(Error::InputLengthMismatch {
                    expected: count,
                    actual: bits.len(),
                });
            }
            let mine: Vec<bool> = (0..count).map(|_| self.rng.random()).collect();
            let theirs: Vec<bool> = bits.iter().zip(&mine).map(|(b, m)| b ^ m).collect();
            self.chan
                .send_to(self.peer(), "input shares", &theirs)
                .await?;
            Ok(mine)
        } else {
            Ok(self
                .chan
                .recv_vec_from(self.peer(), "input shares", count)
                .await?)
        }
    }

    /// Shares of a public constant: no communication, the first party holds
    /// the plaintext bits and the second party holds zeros.
    pub fn constant(&self, value: i64, width: usize) -> Result<OInt, Error> {
        if width == 0 || width > INT_SIZE {
            return Err(Error::UnsupportedWidth(width));
        }
        let bits = match self.role {
            Role::FirstParty => decompose(value, width),
            Role::SecondParty => vec![false; width],
        };
        Ok(OInt::from_share_bits(bits))
    }

    /// Fetches a batch of Beaver bit triples from the dealer.
    async fn triples(&mut self, n: usize) -> Result<TripleShares, Error> {
        self.chan.send_to(DEALER, "triples", &(n as u32)).await?;
        let t: TripleShares = self.chan.recv_from(DEALER, "triples").await?;
        if t.a.len() != n || t.b.len() != n || t.c.len() != n {
            return Err(Error::MalformedTriples {
                expected: n,
                actual: t.a.len(),
            });
        }
        Ok(t)
    }

    /// Computes shares of `x[i] & y[i]` for two equal-length share vectors.
    ///
    /// One dealer round and one peer round for the whole batch. The masked
    /// openings `d` and `e` are uniformly random and reveal nothing about the
    /// underlying bits.
    async fn and_bits(&mut self, x: &[bool], y: &[bool]) -> Result<Vec<bool>, Error> {
        if x.len() != y.len() {
            return Err(Error::LengthMismatch(x.len(), y.len()));
        }
        let n = x.len();
        if n == 0 {
            return Ok(vec![]);
        }
        let t = self.triples(n).await?;
        let d_mine: Vec<bool> = x.iter().zip(&t.a).map(|(x, a)| x ^ a).collect();
        let e_mine: Vec<bool> = y.iter().zip(&t.b).map(|(y, b)| y ^ b).collect();
        self.chan
            .send_to(self.peer(), "AND openings", &(&d_mine, &e_mine))
            .await?;
        let (d_theirs, e_theirs): (Vec<bool>, Vec<bool>) =
            self.chan.recv_from(self.peer(), "AND openings").await?;
        if d_theirs.len() != n || e_theirs.len() != n {
            return Err(Error::LengthMismatch(d_theirs.len(), n));
        }
        let mut z = Vec::with_capacity(n);
        for i in 0..n {
            let d = d_mine[i] ^ d_theirs[i];
            let e = e_mine[i] ^ e_theirs[i];
            let mut share = t.c[i] ^ (d & t.b[i]) ^ (e & t.a[i]);
            if let Role::FirstParty = self.role {
                share ^= d & e;
            }
            z.push(share);
        }
        Ok(z)
    }

    fn check_shapes(&self, a: &[OInt], b: &[OInt]) -> Result<usize, Error> {
        if a.len() != b.len() {
            return Err(Error::LengthMismatch(a.len(), b.len()));
        }
        let Some(first) = a.first() else {
            return Ok(0);
        };
        let w = first.width();
        for v in a.iter().chain(b.iter()) {
            if v.width() != w {
                return Err(Error::WidthMismatch(w, v.width()));
            }
        }
        Ok(w)
    }

    /// Elementwise oblivious addition modulo 2^width.
    ///
    /// Ripple-carry addition; the final carry is dropped, so sums wrap at the
    /// shared bit width.
    pub async fn add_many(&mut self, a: &[OInt], b: &[OInt]) -> Result<Vec<OInt>, Error> {
        let w = self.check_shapes(a, b)?;
        let n = a.len();
        if n == 0 {
            return Ok(vec![]);
        }
        let mut carry = vec![false; n];
        let mut sums = vec![Vec::with_capacity(w); n];
        for k in 0..w {
            let mut axb = Vec::with_capacity(n);
            for i in 0..n {
                let x = a[i].bits[k] ^ b[i].bits[k];
                sums[i].push(x ^ carry[i]);
                axb.push(x);
            }
            if k + 1 < w {
                // carry' = (a & b) ^ (carry & (a ^ b)), both ANDs in one round
                let mut lhs = Vec::with_capacity(2 * n);
                let mut rhs = Vec::with_capacity(2 * n);
                for i in 0..n {
                    lhs.push(a[i].bits[k]);
                    rhs.push(b[i].bits[k]);
                }
                lhs.extend_from_slice(&carry);
                rhs.extend_from_slice(&axb);
                let r = self.and_bits(&lhs, &rhs).await?;
                for i in 0..n {
                    carry[i] = r[i] ^ r[n + i];
                }
            }
        }
        Ok(sums.into_iter().map(OInt::from_share_bits).collect())
    }

    /// Elementwise oblivious unsigned comparison, `a[i] >= b[i]`.
    ///
    /// The outcome stays secret; it is only usable through
    /// [`Executor::select_many`] or an explicit reveal.
    pub async fn ge_many(&mut self, a: &[OInt], b: &[OInt]) -> Result<Vec<OBit>, Error> {
        let w = self.check_shapes(a, b)?;
        let n = a.len();
        if n == 0 {
            return Ok(vec![]);
        }
        let mut borrow = vec![false; n];
        for k in 0..w {
            // borrow' = (!a & b) ^ (!(a ^ b) & borrow), both ANDs in one round
            let mut lhs = Vec::with_capacity(2 * n);
            let mut rhs = Vec::with_capacity(2 * n);
            for i in 0..n {
                lhs.push(self.flip(a[i].bits[k]));
                rhs.push(b[i].bits[k]);
            }
            for i in 0..n {
                lhs.push(self.flip(a[i].bits[k] ^ b[i].bits[k]));
                rhs.push(borrow[i]);
            }
            let r = self.and_bits(&lhs, &rhs).await?;
            for i in 0..n {
                borrow[i] = r[i] ^ r[n + i];
            }
        }
        Ok(borrow
            .into_iter()
            .map(|b| OBit::from_share_bit(self.flip(b)))
            .collect())
    }

    /// Elementwise oblivious equality, `a[i] == b[i]`.
    pub async fn eq_many(&mut self, a: &[OInt], b: &[OInt]) -> Result<Vec<OBit>, Error> {
        let w = self.check_shapes(a, b)?;
        let n = a.len();
        if n == 0 {
            return Ok(vec![]);
        }
        let layers: Vec<Vec<bool>> = (0..w)
            .map(|k| {
                (0..n)
                    .map(|i| self.flip(a[i].bits[k] ^ b[i].bits[k]))
                    .collect()
            })
            .collect();
        let mut acc = layers[0].clone();
        for layer in &layers[1..] {
            acc = self.and_bits(&acc, layer).await?;
        }
        Ok(acc.into_iter().map(OBit::from_share_bit).collect())
    }

    /// Negates an oblivious bit (local, no communication).
    pub fn not(&self, bit: &OBit) -> OBit {
        OBit::from_share_bit(self.flip(bit.share))
    }

    /// Oblivious selection: `vals[i]` where `mask[i]` is secret-true, else zero.
    ///
    /// Implemented as an oblivious multiplication of every value bit with the
    /// mask bit, never as a branch, so execution behavior is independent of
    /// the mask's plaintext.
    pub async fn select_many(&mut self, mask: &[OBit], vals: &[OInt]) -> Result<Vec<OInt>, Error> {
        if mask.len() != vals.len() {
            return Err(Error::LengthMismatch(mask.len(), vals.len()));
        }
        let mut lhs = vec![];
        let mut rhs = vec![];
        for (m, v) in mask.iter().zip(vals) {
            for bit in &v.bits {
                lhs.push(m.share);
                rhs.push(*bit);
            }
        }
        let z = self.and_bits(&lhs, &rhs).await?;
        let mut out = Vec::with_capacity(vals.len());
        let mut offset = 0;
        for v in vals {
            let w = v.width();
            out.push(OInt::from_share_bits(z[offset..offset + w].to_vec()));
            offset += w;
        }
        Ok(out)
    }

    /// Reveals oblivious integers as plaintext to both parties.
    ///
    /// The single point of disclosure for integers: both parties exchange
    /// their shares and reconstruct. Results are zero-extended to `i64`.
    pub async fn reveal_ints(&mut self, vals: &[OInt]) -> Result<Vec<i64>, Error> {
        let mine: Vec<&[bool]> = vals.iter().map(|v| v.share_bits()).collect();
        self.chan.send_to(self.peer(), "reveal", &mine).await?;
        let theirs: Vec<Vec<bool>> = self
            .chan
            .recv_vec_from(self.peer(), "reveal", vals.len())
            .await?;
        debug!(count = vals.len(), "revealed integer batch");
        let mut out = Vec::with_capacity(vals.len());
        for (v, t) in vals.iter().zip(&theirs) {
            if t.len() != v.width() {
                return Err(Error::WidthMismatch(v.width(), t.len()));
            }
            let bits: Vec<bool> = v.bits.iter().zip(t).map(|(m, o)| m ^ o).collect();
            out.push(recompose(&bits));
        }
        Ok(out)
    }

    /// Reveals oblivious bits as plaintext to both parties.
    pub async fn reveal_bits(&mut self, bits: &[OBit]) -> Result<Vec<bool>, Error> {
        let mine: Vec<bool> = bits.iter().map(|b| b.share).collect();
        self.chan.send_to(self.peer(), "reveal bits", &mine).await?;
        let theirs: Vec<bool> = self
            .chan
            .recv_vec_from(self.peer(), "reveal bits", bits.len())
            .await?;
        Ok(mine.iter().zip(&theirs).map(|(m, t)| m ^ t).collect())
    }

    /// Signals the end of the run to the dealer and consumes the executor.
    pub async fn finish(mut self) -> Result<(), Error> {
        self.chan.send_to(DEALER, "triples", &0u32).await?;
        Ok(())
    }
}
