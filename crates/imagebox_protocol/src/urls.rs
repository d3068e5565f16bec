//! Box URL scheme: validation, token rules, and endpoint builders.
//!
//! A box URL embeds the issuing node's token as its final path segment,
//! for example `https://peer.example.com:8443/box/0f8fad5bd9cb469fa165b7ac009383c4`.
//! Every endpoint a box exposes is addressed relative to that base, so the
//! token authenticates all poll and inbox traffic without extra headers.

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::TransactionId;

/// Length of a box token in its canonical form.
///
/// Tokens are UUIDs rendered as 32 lowercase hex characters.
pub const TOKEN_LEN: usize = 32;

/// Returns true if `token` is a well-formed box token.
#[must_use]
pub fn is_valid_token(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// A validated box URL split into its base and token parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxUrl {
    base: String,
    token: String,
}

impl BoxUrl {
    /// Parses and validates a raw box URL.
    ///
    /// Requirements: an `http` or `https` scheme, a non-empty host, an
    /// in-range port when one is given, and a well-formed token as the
    /// final path segment. Violations are hard input-validation failures.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        let trimmed = raw.trim().trim_end_matches('/');
        let rest = trimmed
            .strip_prefix("http://")
            .or_else(|| trimmed.strip_prefix("https://"))
            .ok_or_else(|| ProtocolError::InvalidScheme {
                url: raw.to_string(),
            })?;

        let (authority, path) = rest.split_once('/').ok_or_else(|| {
            ProtocolError::MissingToken {
                url: raw.to_string(),
            }
        })?;

        let host = match authority.rsplit_once(':') {
            Some((host, port)) => {
                if !matches!(port.parse::<u16>(), Ok(p) if p > 0) {
                    return Err(ProtocolError::InvalidPort {
                        value: port.to_string(),
                    });
                }
                host
            }
            None => authority,
        };
        if host.is_empty() {
            return Err(ProtocolError::MissingHost {
                url: raw.to_string(),
            });
        }

        let token = path.rsplit_once('/').map_or(path, |(_, last)| last);
        if !is_valid_token(token) {
            return Err(ProtocolError::InvalidToken {
                token: token.to_string(),
            });
        }

        Ok(Self {
            base: trimmed.to_string(),
            token: token.to_string(),
        })
    }

    /// Returns the normalized URL, without a trailing slash.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// Returns the token segment.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Consumes the URL, returning its string form.
    #[must_use]
    pub fn into_string(self) -> String {
        self.base
    }
}

/// Builds the base URL a peer adopts to reach this node's box endpoints.
#[must_use]
pub fn box_base_url(self_base: &str, token: &str) -> String {
    format!("{}/box/{}", self_base.trim_end_matches('/'), token)
}

/// URL for pushing one image of a transaction to the peer.
#[must_use]
pub fn image_push_url(
    base: &str,
    transaction_id: TransactionId,
    sequence_number: u32,
    total_image_count: u32,
) -> String {
    format!(
        "{}/image?transactionid={}&sequencenumber={}&totalimagecount={}",
        base.trim_end_matches('/'),
        transaction_id.as_u64(),
        sequence_number,
        total_image_count
    )
}

/// URL a poll client calls to see the peer's next queued entry.
#[must_use]
pub fn outbox_poll_url(base: &str) -> String {
    format!("{}/outbox/poll", base.trim_end_matches('/'))
}

/// URL addressing one outbox entry, for payload fetch (GET) and receipt
/// confirmation (DELETE).
#[must_use]
pub fn outbox_entry_url(base: &str, transaction_id: TransactionId, sequence_number: u32) -> String {
    format!(
        "{}/outbox/{}/{}",
        base.trim_end_matches('/'),
        transaction_id.as_u64(),
        sequence_number
    )
}

/// URL for reporting receive progress to the sending peer.
#[must_use]
pub fn inbox_report_url(
    base: &str,
    transaction_id: TransactionId,
    sequence_number: u32,
    total_image_count: u32,
) -> String {
    format!(
        "{}/inbox?transactionid={}&sequencenumber={}&totalimagecount={}",
        base.trim_end_matches('/'),
        transaction_id.as_u64(),
        sequence_number,
        total_image_count
    )
}
