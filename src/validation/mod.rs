//! Authentication of a single tap against a card's keys.

use std::fmt;

use crate::{
    cards::BoltCard,
    crypto::{AesKey, CardUid, Counter, compute_sun_mac, decrypt_sun, mac_matches},
};

/// Why a tap failed to authenticate. Only ever logged; callers see one
/// opaque message regardless of the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MalformedHex,
    BadLength,
    InvalidCardKey,
    UidMismatch,
    MacMismatch,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            AuthFailure::MalformedHex => "malformed p or c parameter",
            AuthFailure::BadLength => "wrong p length",
            AuthFailure::InvalidCardKey => "stored card key is not a 16-byte hex key",
            AuthFailure::UidMismatch => "decrypted uid does not match card",
            AuthFailure::MacMismatch => "sun mac mismatch",
        };
        f.write_str(reason)
    }
}

/// A tap that decrypted to the card's UID under a valid MAC.
#[derive(Debug, PartialEq)]
pub struct TapAuth {
    pub uid: CardUid,
    pub counter: Counter,
    /// Authenticated with `prev_k1`/`prev_k2` rather than the current keys.
    pub used_previous_keys: bool,
}

fn authenticate_with(
    stored_uid: &str,
    p: &[u8],
    c: &[u8],
    k1_hex: &str,
    k2_hex: &str,
) -> Result<(CardUid, Counter), AuthFailure> {
    let k1 = AesKey::from_hex(k1_hex).map_err(|_| AuthFailure::InvalidCardKey)?;
    let k2 = AesKey::from_hex(k2_hex).map_err(|_| AuthFailure::InvalidCardKey)?;

    let (uid, counter) = decrypt_sun(p, k1.as_bytes()).map_err(|_| AuthFailure::BadLength)?;
    if !uid.matches_hex(stored_uid) {
        return Err(AuthFailure::UidMismatch);
    }

    let mac = compute_sun_mac(uid.as_bytes(), &counter.to_bytes(), k2.as_bytes())
        .map_err(|_| AuthFailure::BadLength)?;
    if !mac_matches(&mac, c) {
        return Err(AuthFailure::MacMismatch);
    }

    Ok((uid, counter))
}

/// Raw `p` and `c` tap parameters, hex-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapParams {
    pub p: Vec<u8>,
    pub c: Vec<u8>,
}

impl TapParams {
    pub fn from_hex(p_hex: &str, c_hex: &str) -> Result<Self, AuthFailure> {
        let p = hex::decode(p_hex.trim()).map_err(|_| AuthFailure::MalformedHex)?;
        let c = hex::decode(c_hex.trim()).map_err(|_| AuthFailure::MalformedHex)?;
        Ok(Self { p, c })
    }
}

/// Decrypts `p` with the card's k1, checks the UID, and verifies `c` with k2.
///
/// If the current keys fail and the card holds previous keys from a rotation,
/// the tap is retried with those. The counter is not checked here.
pub fn authenticate_tap(card: &BoltCard, tap: &TapParams) -> Result<TapAuth, AuthFailure> {
    let (p, c) = (&tap.p, &tap.c);

    let failure = match authenticate_with(&card.uid, p, c, &card.k1, &card.k2) {
        Ok((uid, counter)) => {
            return Ok(TapAuth {
                uid,
                counter,
                used_previous_keys: false,
            });
        }
        Err(failure) => failure,
    };

    if card.prev_k1.is_none() && card.prev_k2.is_none() {
        return Err(failure);
    }

    let k1 = card.prev_k1.as_deref().unwrap_or(&card.k1);
    let k2 = card.prev_k2.as_deref().unwrap_or(&card.k2);
    authenticate_with(&card.uid, p, c, k1, k2)
        .map(|(uid, counter)| TapAuth {
            uid,
            counter,
            used_previous_keys: true,
        })
        .map_err(|_| failure)
}
