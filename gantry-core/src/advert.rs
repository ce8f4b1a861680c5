//! Proxy advertisement wire record.
//!
//! Front-end proxies announce themselves on a multicast group with a small
//! ASCII datagram of `Key: Value` lines. The record carries a freshness
//! marker (`Date` in unix milliseconds plus a `Sequence` tie-breaker) and a
//! digest derived from a secret key shared out of band between proxy and
//! node. The exact field set is a configuration contract with the proxy
//! deployment; both sides of this crate's encode/decode are symmetric so a
//! proxy built against it interoperates by construction.

use sha2::{Digest, Sha256};
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Legacy multicast group the advertisement protocol historically uses.
pub const DEFAULT_ADVERT_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 105);
pub const DEFAULT_ADVERT_PORT: u16 = 23364;
pub const DEFAULT_ADVERT_TTL: u32 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdvertError {
    #[error("advertisement payload is not valid UTF-8")]
    NotUtf8,

    #[error("advertisement is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("advertisement field '{0}' is invalid: {1}")]
    InvalidField(&'static str, String),
}

/// One decoded advertisement datagram.
///
/// Values are ephemeral: decoded per datagram, dispatched to the
/// management handler on acceptance, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAdvertisement {
    /// Advertiser identity.
    pub server: String,
    /// Freshness marker: unix epoch milliseconds on the sender.
    pub date_millis: u64,
    /// Tie-breaker for adverts emitted within the same millisecond.
    pub sequence: u64,
    /// Management address the node should register against, if advertised.
    pub address: Option<String>,
    /// Lowercase hex digest over the signed fields and the shared secret.
    pub digest: String,
}

impl ProxyAdvertisement {
    /// Build a signed advertisement (proxy side and tests).
    pub fn signed(
        server: impl Into<String>,
        date_millis: u64,
        sequence: u64,
        address: Option<String>,
        secret_key: &str,
    ) -> Self {
        let server = server.into();
        let digest = compute_digest(secret_key, date_millis, sequence, &server);
        ProxyAdvertisement {
            server,
            date_millis,
            sequence,
            address,
            digest,
        }
    }

    /// Decode a datagram payload. Unknown fields are ignored; the required
    /// fields (`Server`, `Date`, `Sequence`, `Digest`) are strict.
    pub fn decode(payload: &[u8]) -> Result<Self, AdvertError> {
        let text = std::str::from_utf8(payload).map_err(|_| AdvertError::NotUtf8)?;

        let mut server = None;
        let mut date_millis = None;
        let mut sequence = None;
        let mut address = None;
        let mut digest = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if key.eq_ignore_ascii_case("server") {
                server = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("date") {
                date_millis = Some(parse_u64("Date", value)?);
            } else if key.eq_ignore_ascii_case("sequence") {
                sequence = Some(parse_u64("Sequence", value)?);
            } else if key.eq_ignore_ascii_case("address") {
                address = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("digest") {
                digest = Some(value.to_ascii_lowercase());
            }
        }

        Ok(ProxyAdvertisement {
            server: server.ok_or(AdvertError::MissingField("Server"))?,
            date_millis: date_millis.ok_or(AdvertError::MissingField("Date"))?,
            sequence: sequence.ok_or(AdvertError::MissingField("Sequence"))?,
            address,
            digest: digest.ok_or(AdvertError::MissingField("Digest"))?,
        })
    }

    /// Encode the record as the symmetric wire payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        push_field(&mut out, "Date", &self.date_millis);
        push_field(&mut out, "Sequence", &self.sequence);
        push_field(&mut out, "Server", &self.server);
        if let Some(address) = &self.address {
            push_field(&mut out, "Address", address);
        }
        push_field(&mut out, "Digest", &self.digest);
        out.into_bytes()
    }

    /// Check the digest against the shared secret. Never errors: a failed
    /// verification is an expected occurrence on a shared multicast
    /// segment and is simply reported as false.
    pub fn verify(&self, secret_key: &str) -> bool {
        let expected = compute_digest(secret_key, self.date_millis, self.sequence, &self.server);
        self.digest == expected
    }

    /// The (date, sequence) marker used for replay protection.
    pub fn freshness(&self) -> (u64, u64) {
        (self.date_millis, self.sequence)
    }

    /// Strict ordering against the last accepted marker from the same
    /// sender: equal-or-older is stale and must be discarded.
    pub fn is_fresher_than(&self, last_accepted: Option<(u64, u64)>) -> bool {
        match last_accepted {
            None => true,
            Some(last) => self.freshness() > last,
        }
    }
}

fn push_field(out: &mut String, key: &str, value: &dyn fmt::Display) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(&value.to_string());
    out.push_str("\r\n");
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, AdvertError> {
    value
        .parse::<u64>()
        .map_err(|e| AdvertError::InvalidField(field, e.to_string()))
}

fn compute_digest(secret_key: &str, date_millis: u64, sequence: u64, server: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret_key.as_bytes());
    hasher.update(b"\n");
    hasher.update(date_millis.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(sequence.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(server.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "shared-secret";

    #[test]
    fn encode_decode_roundtrip() {
        let advert = ProxyAdvertisement::signed(
            "proxy-1",
            1_724_580_000_000,
            7,
            Some("10.0.0.5:6666".to_string()),
            SECRET,
        );
        let decoded = ProxyAdvertisement::decode(&advert.encode()).expect("decode advert");
        assert_eq!(decoded, advert);
        assert!(decoded.verify(SECRET));
    }

    #[test]
    fn decode_tolerates_unknown_fields_and_casing() {
        let payload = b"date: 10\r\nSEQUENCE: 2\r\nX-Extra: ignored\r\nserver: p1\r\nDigest: abcd\r\n";
        let advert = ProxyAdvertisement::decode(payload).expect("decode advert");
        assert_eq!(advert.server, "p1");
        assert_eq!(advert.freshness(), (10, 2));
        assert_eq!(advert.address, None);
    }

    #[test]
    fn decode_rejects_missing_and_invalid_fields() {
        let missing = b"Date: 10\r\nSequence: 2\r\nDigest: abcd\r\n";
        assert_eq!(
            ProxyAdvertisement::decode(missing),
            Err(AdvertError::MissingField("Server"))
        );

        let invalid = b"Date: soon\r\nSequence: 2\r\nServer: p1\r\nDigest: abcd\r\n";
        assert!(matches!(
            ProxyAdvertisement::decode(invalid),
            Err(AdvertError::InvalidField("Date", _))
        ));

        assert_eq!(
            ProxyAdvertisement::decode(&[0xff, 0xfe]),
            Err(AdvertError::NotUtf8)
        );
    }

    #[test]
    fn verify_rejects_wrong_secret_and_tampered_fields() {
        let advert = ProxyAdvertisement::signed("proxy-1", 10, 1, None, SECRET);
        assert!(advert.verify(SECRET));
        assert!(!advert.verify("other-secret"));

        let mut tampered = advert.clone();
        tampered.server = "proxy-2".to_string();
        assert!(!tampered.verify(SECRET));
    }

    #[test]
    fn freshness_is_strict_on_date_then_sequence() {
        let advert = ProxyAdvertisement::signed("proxy-1", 10, 2, None, SECRET);
        assert!(advert.is_fresher_than(None));
        assert!(advert.is_fresher_than(Some((9, 9))));
        assert!(advert.is_fresher_than(Some((10, 1))));
        assert!(!advert.is_fresher_than(Some((10, 2))));
        assert!(!advert.is_fresher_than(Some((10, 3))));
        assert!(!advert.is_fresher_than(Some((11, 0))));
    }
}
