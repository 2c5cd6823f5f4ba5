//! Hop path validation and per-event shuffling.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use thiserror::Error;

use velum_event::PublicKey;

/// Error types for path validation.
#[derive(Debug, Error)]
pub enum PathError {
    /// No hops were given.
    #[error("hop path cannot be empty")]
    Empty,

    /// A path entry was blank.
    #[error("hop at index {0} is empty")]
    EmptyEntry(usize),

    /// A path entry did not decode as an npub address.
    #[error("hop at index {index} is not a valid npub: {reason}")]
    InvalidAddress { index: usize, reason: String },

    /// The same hop appears more than once.
    #[error("hop path contains duplicate entries")]
    Duplicate,
}

/// Decode and validate a list of npub strings into hop public keys.
///
/// Entries are trimmed; empty input, empty entries, undecodable addresses
/// and duplicate hops are all rejected before any envelope is built.
pub fn validate_path(npubs: &[String]) -> Result<Vec<PublicKey>, PathError> {
    if npubs.is_empty() {
        return Err(PathError::Empty);
    }

    let mut hops = Vec::with_capacity(npubs.len());
    for (index, npub) in npubs.iter().enumerate() {
        let npub = npub.trim();
        if npub.is_empty() {
            return Err(PathError::EmptyEntry(index));
        }
        let hop = PublicKey::from_npub(npub).map_err(|e| PathError::InvalidAddress {
            index,
            reason: e.to_string(),
        })?;
        if hops.contains(&hop) {
            return Err(PathError::Duplicate);
        }
        hops.push(hop);
    }
    Ok(hops)
}

/// Return the hops in a fresh random order.
///
/// Applied per event so successive submissions do not share a routing
/// pattern.
pub fn shuffle_path(hops: &[PublicKey]) -> Vec<PublicKey> {
    let mut shuffled = hops.to_vec();
    shuffled.shuffle(&mut OsRng);
    shuffled
}
