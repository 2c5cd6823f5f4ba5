//! Per-message encryption ("v2").
//!
//! ```text
//! Encrypt(conv_key, plaintext):
//!   1. nonce = 32 random bytes
//!   2. chacha_key(32) || chacha_nonce(12) || hmac_key(32)
//!        = HKDF-SHA256-Expand(conv_key, info = nonce, 76)
//!   3. padded = len(plaintext) as u16 BE || plaintext || zeros
//!        (total per the padding schedule below)
//!   4. ciphertext = ChaCha20(chacha_key, chacha_nonce, padded)
//!   5. mac = HMAC-SHA256(hmac_key, nonce || ciphertext)
//!   6. return base64(0x02 || nonce || ciphertext || mac)
//! ```
//!
//! The padding schedule rounds the length-prefixed plaintext up to 32 bytes
//! minimum, then to a 32-byte step below 256 bytes and to an eighth of the
//! next power of two above it, hiding exact plaintext sizes from recipients
//! of shorter layers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::{ConversationKey, CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Payload version byte.
const VERSION: u8 = 2;

/// Per-message nonce length.
const NONCE_SIZE: usize = 32;

/// HMAC-SHA256 tag length.
const MAC_SIZE: usize = 32;

/// Smallest and largest plaintext the u16 length prefix can describe.
const MIN_PLAINTEXT: usize = 1;
const MAX_PLAINTEXT: usize = 65535;

/// Message keys expanded from the conversation key and a nonce.
struct MessageKeys {
    chacha_key: [u8; 32],
    chacha_nonce: [u8; 12],
    hmac_key: [u8; 32],
}

fn message_keys(key: &ConversationKey, nonce: &[u8; NONCE_SIZE]) -> Result<MessageKeys> {
    let hk = Hkdf::<Sha256>::from_prk(key.as_bytes()).map_err(|_| CryptoError::Decrypt)?;
    let mut okm = [0u8; 76];
    hk.expand(nonce, &mut okm).map_err(|_| CryptoError::Decrypt)?;

    let mut keys = MessageKeys {
        chacha_key: [0u8; 32],
        chacha_nonce: [0u8; 12],
        hmac_key: [0u8; 32],
    };
    keys.chacha_key.copy_from_slice(&okm[0..32]);
    keys.chacha_nonce.copy_from_slice(&okm[32..44]);
    keys.hmac_key.copy_from_slice(&okm[44..76]);
    Ok(keys)
}

/// Padded length for a plaintext of `len` bytes (length prefix excluded).
fn calc_padded_len(len: usize) -> usize {
    if len <= 32 {
        return 32;
    }
    let next_power = len.next_power_of_two();
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    chunk * ((len - 1) / chunk + 1)
}

/// Length-prefix and zero-pad a plaintext.
fn pad(plaintext: &[u8]) -> Result<Vec<u8>> {
    let len = plaintext.len();
    if !(MIN_PLAINTEXT..=MAX_PLAINTEXT).contains(&len) {
        return Err(CryptoError::MessageSize(len));
    }
    let mut padded = vec![0u8; 2 + calc_padded_len(len)];
    padded[0..2].copy_from_slice(&(len as u16).to_be_bytes());
    padded[2..2 + len].copy_from_slice(plaintext);
    Ok(padded)
}

/// Undo [`pad`], validating the length prefix against the schedule.
fn unpad(padded: &[u8]) -> Result<Vec<u8>> {
    if padded.len() < 2 {
        return Err(CryptoError::Decrypt);
    }
    let len = u16::from_be_bytes([padded[0], padded[1]]) as usize;
    if len < MIN_PLAINTEXT || 2 + len > padded.len() || padded.len() - 2 != calc_padded_len(len) {
        return Err(CryptoError::Decrypt);
    }
    Ok(padded[2..2 + len].to_vec())
}

/// Encrypt `plaintext` under a conversation key.
///
/// # Errors
///
/// Returns [`CryptoError::MessageSize`] when the plaintext is empty or
/// exceeds 65535 bytes.
pub fn encrypt(plaintext: &str, key: &ConversationKey) -> Result<String> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    encrypt_with_nonce(plaintext, key, &nonce)
}

fn encrypt_with_nonce(
    plaintext: &str,
    key: &ConversationKey,
    nonce: &[u8; NONCE_SIZE],
) -> Result<String> {
    let keys = message_keys(key, nonce)?;

    let mut buf = pad(plaintext.as_bytes())?;
    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut buf);

    let mut mac = HmacSha256::new_from_slice(&keys.hmac_key).map_err(|_| CryptoError::Decrypt)?;
    mac.update(nonce);
    mac.update(&buf);
    let tag = mac.finalize().into_bytes();

    let mut payload = Vec::with_capacity(1 + NONCE_SIZE + buf.len() + MAC_SIZE);
    payload.push(VERSION);
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&buf);
    payload.extend_from_slice(&tag);
    Ok(BASE64.encode(payload))
}

/// Decrypt a base64 payload under a conversation key.
///
/// The MAC is verified (in constant time) before any decryption. Every
/// failure mode maps to the same [`CryptoError::Decrypt`].
pub fn decrypt(payload: &str, key: &ConversationKey) -> Result<String> {
    let data = BASE64.decode(payload).map_err(|_| CryptoError::Decrypt)?;
    // version + nonce + minimum padded block + mac
    if data.len() < 1 + NONCE_SIZE + 2 + 32 + MAC_SIZE {
        return Err(CryptoError::Decrypt);
    }
    if data[0] != VERSION {
        return Err(CryptoError::Decrypt);
    }

    let nonce: [u8; NONCE_SIZE] = data[1..1 + NONCE_SIZE]
        .try_into()
        .map_err(|_| CryptoError::Decrypt)?;
    let ciphertext = &data[1 + NONCE_SIZE..data.len() - MAC_SIZE];
    let their_mac = &data[data.len() - MAC_SIZE..];

    let keys = message_keys(key, &nonce)?;
    let mut mac = HmacSha256::new_from_slice(&keys.hmac_key).map_err(|_| CryptoError::Decrypt)?;
    mac.update(&nonce);
    mac.update(ciphertext);
    mac.verify_slice(their_mac).map_err(|_| CryptoError::Decrypt)?;

    let mut buf = ciphertext.to_vec();
    let mut cipher = ChaCha20::new(&keys.chacha_key.into(), &keys.chacha_nonce.into());
    cipher.apply_keystream(&mut buf);

    let plaintext = unpad(&buf)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
}
