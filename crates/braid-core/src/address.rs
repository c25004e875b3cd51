//! Overlay address composition and the subclient tag codec
//!
//! A logical address has the form `<identifier>.<publicKey>`. Each subclient
//! of a logical peer is reachable at the same address tagged with its index:
//! `__<n>__.<identifier>.<publicKey>`. Index `-1` denotes the untagged
//! original subclient.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Index reserved for the untagged original subclient.
pub const ORIGINAL_INDEX: i32 = -1;

/// Render the tag component for a subclient index. The original subclient
/// has no tag.
pub fn tag_for_index(index: i32) -> String {
    if index == ORIGINAL_INDEX {
        String::new()
    } else {
        format!("__{index}__")
    }
}

/// Parse a tag component back into a subclient index. The empty tag maps to
/// the original subclient.
pub fn tag_index(tag: &str) -> Option<i32> {
    if tag.is_empty() {
        return Some(ORIGINAL_INDEX);
    }
    let digits = tag.strip_prefix("__")?.strip_suffix("__")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Prefix `base` with the tag for `index`. Index `-1` leaves it untouched,
/// and an empty base yields the bare tag.
pub fn add_tag(base: &str, index: i32) -> String {
    if index == ORIGINAL_INDEX {
        return base.to_string();
    }
    add_tag_prefix(base, &tag_for_index(index))
}

/// Prefix an address with an already-rendered tag component. An empty tag
/// leaves the address untouched.
pub fn add_tag_prefix(addr: &str, tag: &str) -> String {
    if tag.is_empty() {
        addr.to_string()
    } else if addr.is_empty() {
        tag.to_string()
    } else {
        format!("{tag}.{addr}")
    }
}

/// Split a subclient tag off the front of an address. Returns the remainder
/// and the matched tag, or the whole address and an empty tag when the
/// leading dot-separated component is not of the form `__<digits>__`.
pub fn strip_tag(addr: &str) -> (&str, &str) {
    if let Some((head, rest)) = addr.split_once('.') {
        if is_tag(head) {
            return (rest, head);
        }
    }
    (addr, "")
}

fn is_tag(component: &str) -> bool {
    component
        .strip_prefix("__")
        .and_then(|s| s.strip_suffix("__"))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Compose a logical overlay address from an identifier and a public key.
/// An empty identifier collapses to the bare key.
pub fn make_address(identifier: &str, public_key: &str) -> String {
    if identifier.is_empty() {
        public_key.to_string()
    } else {
        format!("{identifier}.{public_key}")
    }
}

// ----------------------------------------------------------------------------
// Address
// ----------------------------------------------------------------------------

/// A logical overlay address as presented to applications (never tagged).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The overlay this address belongs to.
    pub fn network(&self) -> &'static str {
        "braid"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Address {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip_for_nonnegative_indices() {
        for n in [0, 1, 7, 12, 130] {
            let tagged = add_tag("alice.abcd", n);
            assert_eq!(strip_tag(&tagged), ("alice.abcd", format!("__{n}__").as_str()));
        }
    }

    #[test]
    fn original_index_leaves_address_untagged() {
        let tagged = add_tag("alice.abcd", ORIGINAL_INDEX);
        assert_eq!(tagged, "alice.abcd");
        assert_eq!(strip_tag(&tagged), ("alice.abcd", ""));
    }

    #[test]
    fn empty_base_yields_bare_tag() {
        assert_eq!(add_tag("", 3), "__3__");
        assert_eq!(add_tag("", ORIGINAL_INDEX), "");
    }

    #[test]
    fn strip_ignores_lookalike_components() {
        for addr in ["__x__.alice", "____.alice", "__12_.alice", "_12__.alice", "alice.bob"] {
            assert_eq!(strip_tag(addr), (addr, ""));
        }
    }

    #[test]
    fn strip_without_separator_is_identity() {
        assert_eq!(strip_tag("__3__"), ("__3__", ""));
        assert_eq!(strip_tag("plainkey"), ("plainkey", ""));
    }

    #[test]
    fn tag_index_parses_rendered_tags() {
        assert_eq!(tag_index(""), Some(ORIGINAL_INDEX));
        assert_eq!(tag_index("__0__"), Some(0));
        assert_eq!(tag_index("__42__"), Some(42));
        assert_eq!(tag_index("__x__"), None);
        assert_eq!(tag_index("____"), None);
    }

    #[test]
    fn make_address_skips_empty_identifier() {
        assert_eq!(make_address("alice", "abcd"), "alice.abcd");
        assert_eq!(make_address("", "abcd"), "abcd");
    }
}
