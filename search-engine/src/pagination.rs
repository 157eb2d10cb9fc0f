//! Page-number ⇄ opaque-token conversion.
//!
//! Tokens are URL-safe base64 over a small JSON body. Page tokens carry
//! `(page, size)`. Cursor tokens carry the provider's native continuation, the
//! size that produced it and a keyed blake3 tag, so a tampered or
//! resized cursor fails deterministically instead of returning wrong rows.
//!
//! Iteration is weakly consistent: following successive tokens with a fixed
//! size partitions the provider's matches as they are at each call, with no
//! snapshot isolation across index updates.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const TOKEN_VERSION: u8 = 1;
const KEY_CONTEXT: &str = "texgrep search-engine 2024-06 cursor token v1";

/// How a provider addresses pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationKind {
    PageNumber,
    Cursor,
}

impl PaginationKind {
    fn tag_byte(self) -> u8 {
        match self {
            PaginationKind::PageNumber => b'p',
            PaginationKind::Cursor => b'c',
        }
    }
}

/// Where a provider should resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// 1-based page number.
    Page(u32),
    /// Provider-native cursor; empty means "from the start".
    Cursor(String),
}

impl Continuation {
    /// Continuation for the first page of a provider.
    pub fn first(kind: PaginationKind) -> Self {
        match kind {
            PaginationKind::PageNumber => Continuation::Page(1),
            PaginationKind::Cursor => Continuation::Cursor(String::new()),
        }
    }
}

/// Opaque pagination token handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageToken(String);

impl PageToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageToken {
    fn from(s: &str) -> Self {
        PageToken(s.to_string())
    }
}

/// Token rejected on decode. The reason is for logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid cursor: {0}")]
pub struct InvalidCursor(pub &'static str);

#[derive(Serialize, Deserialize)]
struct TokenBody {
    v: u8,
    k: PaginationKind,
    s: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    p: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    c: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    t: Option<String>,
}

/// Encodes and verifies pagination tokens.
#[derive(Clone)]
pub struct PaginationCoordinator {
    key: [u8; 32],
}

impl fmt::Debug for PaginationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaginationCoordinator").finish_non_exhaustive()
    }
}

impl PaginationCoordinator {
    /// Derives the tag key from `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
        }
    }

    /// Wraps a provider continuation into an opaque token.
    pub fn encode(&self, kind: PaginationKind, next: &Continuation, size: u32) -> PageToken {
        let body = match next {
            Continuation::Page(page) => TokenBody {
                v: TOKEN_VERSION,
                k: kind,
                s: size,
                p: Some(*page),
                c: None,
                t: None,
            },
            Continuation::Cursor(raw) => TokenBody {
                v: TOKEN_VERSION,
                k: kind,
                s: size,
                p: None,
                t: Some(self.tag(kind, size, raw).to_hex().to_string()),
                c: Some(raw.clone()),
            },
        };
        // Serializing a struct of integers and strings cannot fail.
        let json = serde_json::to_vec(&body).unwrap_or_default();
        PageToken(URL_SAFE_NO_PAD.encode(json))
    }

    /// Verifies a token against the active provider kind and requested size.
    ///
    /// # Errors
    /// [`InvalidCursor`] on bad encoding, unknown version, kind or size
    /// mismatch, tag mismatch, or page 0.
    pub fn decode(
        &self,
        token: &str,
        kind: PaginationKind,
        size: u32,
    ) -> Result<Continuation, InvalidCursor> {
        let result = self.decode_inner(token, kind, size);
        if let Err(InvalidCursor(reason)) = &result {
            debug!(reason, "pagination token rejected");
        }
        result
    }

    fn decode_inner(
        &self,
        token: &str,
        kind: PaginationKind,
        size: u32,
    ) -> Result<Continuation, InvalidCursor> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| InvalidCursor("not base64url"))?;
        let body: TokenBody =
            serde_json::from_slice(&bytes).map_err(|_| InvalidCursor("malformed body"))?;

        if body.v != TOKEN_VERSION {
            return Err(InvalidCursor("unknown token version"));
        }
        if body.k != kind {
            return Err(InvalidCursor("token belongs to another provider kind"));
        }
        if body.s != size {
            return Err(InvalidCursor("page size changed mid-iteration"));
        }

        match (body.p, body.c, body.t) {
            (Some(0), None, None) => Err(InvalidCursor("page 0")),
            (Some(page), None, None) => Ok(Continuation::Page(page)),
            (None, Some(raw), Some(tag)) => {
                let tag =
                    blake3::Hash::from_hex(&tag).map_err(|_| InvalidCursor("malformed tag"))?;
                // `Hash` equality is constant-time.
                if tag != self.tag(kind, size, &raw) {
                    return Err(InvalidCursor("integrity tag mismatch"));
                }
                Ok(Continuation::Cursor(raw))
            }
            _ => Err(InvalidCursor("malformed body")),
        }
    }

    fn tag(&self, kind: PaginationKind, size: u32, raw: &str) -> blake3::Hash {
        let mut input = Vec::with_capacity(raw.len() + 5);
        input.push(kind.tag_byte());
        input.extend_from_slice(&size.to_le_bytes());
        input.extend_from_slice(raw.as_bytes());
        blake3::keyed_hash(&self.key, &input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord() -> PaginationCoordinator {
        PaginationCoordinator::new("test-secret")
    }

    fn forge(body: serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(body.to_string())
    }

    #[test]
    fn cursor_token_is_bound_to_size() {
        let c = coord();
        let token = c.encode(PaginationKind::Cursor, &Continuation::Cursor("40".into()), 20);
        assert_eq!(
            c.decode(token.as_str(), PaginationKind::Cursor, 20),
            Ok(Continuation::Cursor("40".into()))
        );
        assert!(c.decode(token.as_str(), PaginationKind::Cursor, 10).is_err());
    }

    #[test]
    fn page_token_carries_page_and_size() {
        let c = coord();
        let token = c.encode(PaginationKind::PageNumber, &Continuation::Page(3), 25);
        assert_eq!(
            c.decode(token.as_str(), PaginationKind::PageNumber, 25),
            Ok(Continuation::Page(3))
        );
        assert!(c.decode(token.as_str(), PaginationKind::PageNumber, 20).is_err());
    }

    #[test]
    fn tampered_cursor_is_rejected() {
        let c = coord();
        let token = c.encode(PaginationKind::Cursor, &Continuation::Cursor("40".into()), 20);
        let bytes = URL_SAFE_NO_PAD.decode(token.as_str()).unwrap();
        let mut body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        body["c"] = "80".into();
        assert_eq!(
            c.decode(&forge(body), PaginationKind::Cursor, 20),
            Err(InvalidCursor("integrity tag mismatch"))
        );
    }

    #[test]
    fn truncated_or_non_hex_tags_are_rejected() {
        let c = coord();
        let token = c.encode(PaginationKind::Cursor, &Continuation::Cursor("40".into()), 20);
        let bytes = URL_SAFE_NO_PAD.decode(token.as_str()).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let full = body["t"].as_str().unwrap().to_string();
        assert_eq!(full.len(), 64);

        let mut short = body.clone();
        short["t"] = full[..16].into();
        assert_eq!(
            c.decode(&forge(short), PaginationKind::Cursor, 20),
            Err(InvalidCursor("malformed tag"))
        );

        let mut flipped = body;
        let last = if full.ends_with('0') { "1" } else { "0" };
        flipped["t"] = format!("{}{last}", &full[..63]).into();
        assert_eq!(
            c.decode(&forge(flipped), PaginationKind::Cursor, 20),
            Err(InvalidCursor("integrity tag mismatch"))
        );
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let token = PaginationCoordinator::new("a").encode(
            PaginationKind::Cursor,
            &Continuation::Cursor("x".into()),
            20,
        );
        assert!(
            PaginationCoordinator::new("b")
                .decode(token.as_str(), PaginationKind::Cursor, 20)
                .is_err()
        );
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let c = coord();
        let token = c.encode(PaginationKind::PageNumber, &Continuation::Page(2), 20);
        assert_eq!(
            c.decode(token.as_str(), PaginationKind::Cursor, 20),
            Err(InvalidCursor("token belongs to another provider kind"))
        );
    }

    #[test]
    fn garbage_version_and_page_zero_are_rejected() {
        let c = coord();
        assert!(c.decode("%%%", PaginationKind::PageNumber, 20).is_err());
        assert!(c.decode(&forge(serde_json::json!([1, 2])), PaginationKind::PageNumber, 20).is_err());

        let future = forge(serde_json::json!({"v": 9, "k": "page_number", "s": 20, "p": 2}));
        assert_eq!(
            c.decode(&future, PaginationKind::PageNumber, 20),
            Err(InvalidCursor("unknown token version"))
        );

        let zero = forge(serde_json::json!({"v": 1, "k": "page_number", "s": 20, "p": 0}));
        assert_eq!(
            c.decode(&zero, PaginationKind::PageNumber, 20),
            Err(InvalidCursor("page 0"))
        );
    }
}
