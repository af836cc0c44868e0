//! NTAG 424 DNA SUN (Secure Unique NFC Message) primitives.
//!
//! Everything here is pure: no I/O, no clock, no allocation beyond the
//! returned values. Outputs must match the card's secure element bit for bit.

use aes::Aes128;
use anyhow::{Result, anyhow, ensure};
use cipher::{BlockDecrypt, KeyInit};
use cmac::{Cmac, Mac};
use std::fmt;

/// Session vector prefix for the SDM MAC (SV2 = 3C C3 00 01 00 80).
const SV2_PREFIX: [u8; 6] = [0x3c, 0xc3, 0x00, 0x01, 0x00, 0x80];

/// Shortest provided MAC that will be compared at all.
const MIN_MAC_LEN: usize = 4;

/// A 16-byte AES key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesKey([u8; 16]);

impl AesKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| anyhow!("AES key must be 16 bytes"))?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(s)?)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// A 7-byte card UID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardUid([u8; 7]);

impl CardUid {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 7] = bytes
            .try_into()
            .map_err(|_| anyhow!("UID must be 7 bytes"))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 7] {
        &self.0
    }

    pub fn to_hex_upper(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Case-insensitive comparison against a stored hex UID.
    pub fn matches_hex(&self, stored: &str) -> bool {
        self.to_hex_upper() == stored.to_ascii_uppercase()
    }
}

impl fmt::Display for CardUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Card counter value for replay protection (24 bits on the card).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Counter(u32);

impl Counter {
    #[cfg(test)]
    pub fn new(value: u32) -> Self {
        Self(value & 0x00ff_ffff)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(bytes.len() == 3, "Counter must be 3 bytes");
        // Little-endian
        let value = u32::from(bytes[2]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[0]);
        Ok(Self(value))
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        let le = self.0.to_le_bytes();
        [le[0], le[1], le[2]]
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Decrypts the `p` parameter of a tap.
///
/// AES-128-CBC with a zero IV over exactly one block, no padding. Byte 0 is
/// the PICC data tag and is skipped, bytes 1..8 are the UID and bytes 8..11
/// the little-endian read counter.
pub fn decrypt_sun(encrypted: &[u8], key: &[u8]) -> Result<(CardUid, Counter)> {
    ensure!(
        encrypted.len() == 16,
        "Invalid encrypted data length, must be 16 bytes"
    );
    ensure!(key.len() == 16, "Invalid key length, must be 16 bytes");

    let cipher = Aes128::new_from_slice(key).map_err(|e| anyhow!("Invalid key length: {e:?}"))?;
    let mut block = [0u8; 16];
    block.copy_from_slice(encrypted);
    // Single block with a zero IV: the CBC XOR step is the identity.
    cipher.decrypt_block((&mut block).into());

    let uid = CardUid::from_bytes(&block[1..8])?;
    let counter = Counter::from_bytes(&block[8..11])?;
    Ok((uid, counter))
}

fn aes_cmac(key: &[u8], msg: &[u8]) -> Result<[u8; 16]> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key)
        .map_err(|e| anyhow!("Invalid key length: {e:?}"))?;
    mac.update(msg);
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Computes the 8-byte SUN MAC the card appends as the `c` parameter.
///
/// `mac1 = CMAC(key, SV2 || uid || counter[0..3])`, `mac2 = CMAC(mac1, "")`,
/// result is the odd-indexed bytes of `mac2`.
pub fn compute_sun_mac(uid: &[u8], counter: &[u8], key: &[u8]) -> Result<[u8; 8]> {
    ensure!(uid.len() == 7, "Invalid card UID length, must be 7 bytes");
    ensure!(key.len() == 16, "Invalid key length, must be 16 bytes");
    ensure!(counter.len() >= 3, "Counter must be at least 3 bytes");

    let mut sv2 = [0u8; 16];
    sv2[..6].copy_from_slice(&SV2_PREFIX);
    sv2[6..13].copy_from_slice(uid);
    sv2[13..16].copy_from_slice(&counter[..3]);

    let session_key = aes_cmac(key, &sv2)?;
    let full = aes_cmac(&session_key, &[])?;

    let mut out = [0u8; 8];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = full[1 + i * 2];
    }
    Ok(out)
}

/// Compares a computed MAC with the one supplied by the reader.
///
/// Some readers send truncated or padded MAC representations, so only the
/// overlapping prefix is compared. Provided MACs shorter than
/// [`MIN_MAC_LEN`] never match.
pub fn mac_matches(computed: &[u8], provided: &[u8]) -> bool {
    let overlap = computed.len().min(provided.len());
    if overlap < MIN_MAC_LEN {
        return false;
    }
    computed[..overlap]
        .iter()
        .zip(&provided[..overlap])
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Produces the `p`/`c` pair a card would emit for the given tap.
#[cfg(test)]
pub(crate) fn simulate_tap(
    uid: &[u8; 7],
    counter: u32,
    k1: &[u8; 16],
    k2: &[u8; 16],
) -> (String, String) {
    use cipher::BlockEncrypt;

    let counter = Counter::new(counter);
    let mut block = [0u8; 16];
    block[0] = 0xc7;
    block[1..8].copy_from_slice(uid);
    block[8..11].copy_from_slice(&counter.to_bytes());
    let cipher = Aes128::new_from_slice(k1).expect("16-byte key");
    cipher.encrypt_block((&mut block).into());

    let mac = compute_sun_mac(uid, &counter.to_bytes(), k2).expect("valid inputs");
    (hex::encode_upper(block), hex::encode_upper(mac))
}
