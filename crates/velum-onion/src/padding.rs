//! Exact-size padding of serialized envelopes.
//!
//! Padding lives inside the encrypted payload: a single
//! `["padding", <hex>]` tag whose hex payload has the arithmetically
//! required length. The tag is appended after signing and stripped before id
//! recomputation, so it never touches author-authenticated content.

use rand::rngs::OsRng;
use rand::RngCore;

use velum_event::{Event, TAG_PADDING};

use crate::{OnionError, Result};

/// Serialized byte length of an event's compact JSON form.
pub fn serialized_len(event: &Event) -> Result<usize> {
    Ok(event.to_json()?.len())
}

/// Pad `event` so its serialization is exactly `target` bytes long.
///
/// The overhead of the padding tag itself is measured by serializing the
/// event with an empty `["padding",""]` tag appended and subtracting; the
/// hex payload then makes up the remainder (odd lengths are handled by
/// truncating the hex string).
///
/// # Errors
///
/// Returns [`OnionError::TooLarge`] when the event plus the empty-tag
/// overhead already exceeds `target`, and [`OnionError::Padding`] if the
/// result misses the target (an arithmetic defect, not an input error).
pub fn pad_to_exact(event: &Event, target: usize) -> Result<Event> {
    let mut probe = event.clone();
    probe.tags.push(vec![TAG_PADDING.to_string(), String::new()]);
    // Size with the empty tag in place; the filler adds bytes one-for-one.
    let total = serialized_len(&probe)?;

    if total > target {
        return Err(OnionError::TooLarge {
            size: total,
            limit: target,
        });
    }

    let needed = target - total;
    let mut bytes = vec![0u8; needed.div_ceil(2)];
    OsRng.fill_bytes(&mut bytes);
    let mut filler = hex::encode(bytes);
    filler.truncate(needed);

    let mut padded = event.clone();
    padded.tags.push(vec![TAG_PADDING.to_string(), filler]);

    let final_len = serialized_len(&padded)?;
    if final_len != target {
        return Err(OnionError::Padding(format!(
            "padded to {final_len} bytes, target was {target}"
        )));
    }
    Ok(padded)
}

/// Remove every padding tag, restoring the author-authenticated tag list.
pub fn strip_padding(event: &Event) -> Event {
    let mut stripped = event.clone();
    stripped
        .tags
        .retain(|t| t.first().map(String::as_str) != Some(TAG_PADDING));
    stripped
}
