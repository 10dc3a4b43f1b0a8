//! Secret sharing of plaintext scalars and arrays, plus branch-free
//! combinators for composing computations over sequences of oblivious values.
//!
//! All sharing operations are owner-parameterized: the `owner` role is the
//! exclusive plaintext source, while the other party supplies a placeholder
//! so that both call sites stay symmetric. Both parties must issue the same
//! sharing operations with identical public parameters (counts, widths,
//! maximum sizes) in identical order.

use tracing::debug;

use crate::{
    channel::Channel,
    exec::{Error, Executor, INT_SIZE, OBit, OInt, Role, decompose},
};

/// An element type that can be transferred into oblivious form.
///
/// This is the transfer layer's sole extension point for new oblivious
/// element kinds: a transferable type declares how many secret-shared wire
/// bits one element occupies, how to encode a plaintext element into wire
/// bits, and how to decode one element from its wire-bit shares. No other
/// part of the transfer machinery needs to know about specific types.
pub trait Transferable: Sized {
    /// The plaintext type transferred into this oblivious element.
    type Plain: Clone + Send + Sync;

    /// The number of secret-shared wire bits one element occupies.
    fn wire_bits() -> usize;

    /// Encodes a plaintext element by appending its wire bits to `bits`.
    fn encode(plain: &Self::Plain, bits: &mut Vec<bool>);

    /// Decodes one element from its `wire_bits()` wire-bit shares.
    fn from_shares(shares: &[bool]) -> Self;
}

impl Transferable for OInt {
    type Plain = i64;

    fn wire_bits() -> usize {
        INT_SIZE
    }

    fn encode(plain: &Self::Plain, bits: &mut Vec<bool>) {
        bits.extend(decompose(*plain, INT_SIZE));
    }

    fn from_shares(shares: &[bool]) -> Self {
        OInt::from_share_bits(shares.to_vec())
    }
}

impl Transferable for OBit {
    type Plain = bool;

    fn wire_bits() -> usize {
        1
    }

    fn encode(plain: &Self::Plain, bits: &mut Vec<bool>) {
        bits.push(*plain);
    }

    fn from_shares(shares: &[bool]) -> Self {
        OBit::from_share_bit(shares[0])
    }
}

/// Shares a single integer of the given bit width from `owner`.
///
/// Values outside the range of `width` bits are silently truncated; callers
/// must validate ranges upstream.
pub async fn share_scalar<C: Channel>(
    exec: &mut Executor<C>,
    owner: Role,
    value: i64,
    width: usize,
) -> Result<OInt, Error> {
    if width == 0 || width > INT_SIZE {
        return Err(Error::UnsupportedWidth(width));
    }
    let bits = decompose(value, width);
    let shares = exec.share_bits_raw(owner, &bits, width).await?;
    Ok(OInt::from_share_bits(shares))
}

/// Shares `count` integers of the given bit width from `owner`.
///
/// `count` must match exactly between both parties' calls; a mismatch is a
/// protocol desynchronization, not a recoverable error.
pub async fn share_vector<C: Channel>(
    exec: &mut Executor<C>,
    owner: Role,
    values: &[i64],
    count: usize,
    width: usize,
) -> Result<Vec<OInt>, Error> {
    if width == 0 || width > INT_SIZE {
        return Err(Error::UnsupportedWidth(width));
    }
    if exec.role() == owner && values.len() != count {
        return Err(Error::InputLengthMismatch {
            expected: count,
            actual: values.len(),
        });
    }
    let mut bits = Vec::with_capacity(count * width);
    if exec.role() == owner {
        for v in values {
            bits.extend(decompose(*v, width));
        }
    }
    debug!(owner = owner.index(), count, width, "sharing integer vector");
    let shares = exec.share_bits_raw(owner, &bits, count * width).await?;
    Ok(shares
        .chunks(width)
        .map(|c| OInt::from_share_bits(c.to_vec()))
        .collect())
}

/// Shares `count` bits from `owner`.
pub async fn share_bits<C: Channel>(
    exec: &mut Executor<C>,
    owner: Role,
    values: &[bool],
    count: usize,
) -> Result<Vec<OBit>, Error> {
    if exec.role() == owner && values.len() != count {
        return Err(Error::InputLengthMismatch {
            expected: count,
            actual: values.len(),
        });
    }
    let shares = exec.share_bits_raw(owner, values, count).await?;
    Ok(shares.into_iter().map(OBit::from_share_bit).collect())
}

/// Shares `count` elements of any [`Transferable`] type from `owner`.
///
/// The non-owner encodes `count` copies of `null_value` instead of real data,
/// keeping both call sites symmetric; those placeholder bits never influence
/// the resulting shares.
pub async fn share_transferable<O: Transferable, C: Channel>(
    exec: &mut Executor<C>,
    owner: Role,
    values: &[O::Plain],
    count: usize,
    null_value: O::Plain,
) -> Result<Vec<O>, Error> {
    let wire = O::wire_bits();
    let mut bits = Vec::with_capacity(count * wire);
    if exec.role() == owner {
        if values.len() != count {
            return Err(Error::InputLengthMismatch {
                expected: count,
                actual: values.len(),
            });
        }
        for v in values {
            O::encode(v, &mut bits);
        }
    } else {
        for _ in 0..count {
            O::encode(&null_value, &mut bits);
        }
    }
    let shares = exec.share_bits_raw(owner, &bits, count * wire).await?;
    Ok(shares.chunks(wire).map(O::from_shares).collect())
}

/// Shares a ragged array-of-arrays from `owner`, padding every inner array to
/// the publicly fixed `max_inner_size` before sharing.
///
/// The padding defeats the side channel where true inner lengths would
/// otherwise be inferable from message sizes: the non-owner only ever
/// observes `count` transfers of exactly `max_inner_size` elements. An inner
/// array longer than `max_inner_size` is a fatal error.
pub async fn share_nested_padded<O: Transferable, C: Channel>(
    exec: &mut Executor<C>,
    owner: Role,
    values: &[Vec<O::Plain>],
    count: usize,
    max_inner_size: usize,
    padding_value: O::Plain,
) -> Result<Vec<Vec<O>>, Error> {
    if exec.role() == owner && values.len() != count {
        return Err(Error::InputLengthMismatch {
            expected: count,
            actual: values.len(),
        });
    }
    debug!(
        owner = owner.index(),
        count, max_inner_size, "sharing padded nested arrays"
    );
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let padded = if exec.role() == owner {
            let inner = &values[i];
            if inner.len() > max_inner_size {
                return Err(Error::InnerSizeExceeded {
                    max: max_inner_size,
                    actual: inner.len(),
                });
            }
            let mut padded = inner.clone();
            padded.resize(max_inner_size, padding_value.clone());
            padded
        } else {
            vec![]
        };
        out.push(
            share_transferable::<O, C>(
                exec,
                owner,
                &padded,
                max_inner_size,
                padding_value.clone(),
            )
            .await?,
        );
    }
    Ok(out)
}

/// Shares an array of already-uniform integer arrays from `owner`, without
/// padding, with an explicit per-element bit width.
///
/// Every inner array must have exactly `inner_size` elements, and the caller
/// must guarantee that every value fits in `width` bits: out-of-range values
/// are silently truncated, not rejected.
pub async fn share_nested_fixed<C: Channel>(
    exec: &mut Executor<C>,
    owner: Role,
    values: &[Vec<i64>],
    count: usize,
    inner_size: usize,
    width: usize,
) -> Result<Vec<Vec<OInt>>, Error> {
    if exec.role() == owner {
        if values.len() != count {
            return Err(Error::InputLengthMismatch {
                expected: count,
                actual: values.len(),
            });
        }
        for inner in values {
            if inner.len() != inner_size {
                return Err(Error::InputLengthMismatch {
                    expected: inner_size,
                    actual: inner.len(),
                });
            }
        }
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let inner: &[i64] = if exec.role() == owner { &values[i] } else { &[] };
        out.push(share_vector(exec, owner, inner, inner_size, width).await?);
    }
    Ok(out)
}

/// Applies a side-effecting action to corresponding elements of two
/// equal-length sequences.
///
/// Panics on a length mismatch: unequal lengths mean the parties' protocol
/// alignment is already broken and no recovery is possible.
pub fn zip<T, S>(a: &[T], b: &[S], mut action: impl FnMut(&T, &S)) {
    assert_eq!(
        a.len(),
        b.len(),
        "pairwise traversal over sequences of unequal lengths"
    );
    for (x, y) in a.iter().zip(b) {
        action(x, y);
    }
}

/// Maps a function over a sequence, producing one output per element.
///
/// The supplied function must never branch on the plaintext of an oblivious
/// value; data-dependent decisions belong in the oblivious comparison/select
/// primitives.
pub fn map<T, O>(v: &[T], f: impl FnMut(&T) -> O) -> Vec<O> {
    v.iter().map(f).collect()
}

/// Maps a binary function over corresponding elements of two equal-length
/// sequences. Panics on a length mismatch (protocol-alignment guard).
pub fn zip_map<T, S, O>(a: &[T], b: &[S], mut f: impl FnMut(&T, &S) -> O) -> Vec<O> {
    assert_eq!(
        a.len(),
        b.len(),
        "pairwise map over sequences of unequal lengths"
    );
    a.iter().zip(b).map(|(x, y)| f(x, y)).collect()
}

/// Maps a ternary function over corresponding elements of three equal-length
/// sequences. Panics on a length mismatch (protocol-alignment guard).
pub fn zip_map3<T, S, R, O>(
    a: &[T],
    b: &[S],
    c: &[R],
    mut f: impl FnMut(&T, &S, &R) -> O,
) -> Vec<O> {
    assert_eq!(
        a.len(),
        b.len(),
        "pairwise map over sequences of unequal lengths"
    );
    assert_eq!(
        a.len(),
        c.len(),
        "pairwise map over sequences of unequal lengths"
    );
    a.iter()
        .zip(b)
        .zip(c)
        .map(|((x, y), z)| f(x, y, z))
        .collect()
}

/// Multiplies a sequence by a bitmask: `vals[i]` wherever `mask[i]` is the
/// oblivious true value, else zero.
///
/// Implemented as oblivious multiplication, never a branch, so the bitmask's
/// plaintext is never inferable from execution behavior.
pub async fn multiply_bitmask<C: Channel>(
    exec: &mut Executor<C>,
    vals: &[OInt],
    mask: &[OBit],
) -> Result<Vec<OInt>, Error> {
    exec.select_many(mask, vals).await
}
