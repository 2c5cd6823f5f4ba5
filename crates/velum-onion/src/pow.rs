//! Proof-of-work stamping over canonical event ids.
//!
//! A routing envelope carries `["nonce", <counter>, <committed>]`. The
//! committed difficulty is the tag's third element and therefore part of the
//! hashed content: a validator requires the commitment to be at least the
//! network floor and the id's actual leading-zero count to meet the
//! commitment. The validator recomputes the id over the padding-stripped
//! envelope rather than trusting the stated field, so neither a forged id
//! nor a tampered tag can claim work that was not done.

use rand::rngs::OsRng;
use rand::RngCore;

use velum_event::{Event, EventDraft, PublicKey, TAG_NONCE};

use crate::padding::strip_padding;
use crate::{OnionError, Result};

/// Count leading zero bits of a byte string.
pub fn leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut count = 0u32;
    for byte in bytes {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros();
            break;
        }
    }
    count
}

/// Mine a nonce tag onto `draft` until its id under `author` has at least
/// `difficulty` leading zero bits.
///
/// The counter starts at a random u64 and increments; at difficulty 16 the
/// expected cost is about 65k id recomputations.
pub fn mine(draft: &mut EventDraft, author: &PublicKey, difficulty: u32) {
    let mut counter = OsRng.next_u64();
    draft.tags.push(vec![
        TAG_NONCE.to_string(),
        counter.to_string(),
        difficulty.to_string(),
    ]);
    let slot = draft.tags.len() - 1;
    loop {
        draft.tags[slot][1] = counter.to_string();
        let id = draft.id_for(author);
        if leading_zero_bits(id.as_bytes()) >= difficulty {
            return;
        }
        counter = counter.wrapping_add(1);
    }
}

/// Validate the proof of work committed by `event`'s nonce tag.
///
/// # Errors
///
/// Returns [`OnionError::Malformed`] when the nonce tag is missing or its
/// committed difficulty does not parse, and [`OnionError::InsufficientPow`]
/// when the commitment is below `min_difficulty` or the id fails to meet the
/// committed value.
pub fn check(event: &Event, min_difficulty: u32) -> Result<()> {
    let tag = event
        .tags
        .iter()
        .find(|t| t.len() >= 3 && t[0] == TAG_NONCE)
        .ok_or_else(|| OnionError::Malformed("missing nonce tag".into()))?;

    let committed: u32 = tag[2]
        .parse()
        .map_err(|_| OnionError::Malformed("unparseable committed difficulty".into()))?;

    if committed < min_difficulty {
        return Err(OnionError::InsufficientPow);
    }
    let id = strip_padding(event).compute_id();
    if leading_zero_bits(id.as_bytes()) < committed {
        return Err(OnionError::InsufficientPow);
    }
    Ok(())
}
