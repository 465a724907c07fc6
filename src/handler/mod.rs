// Copyright (c) 2025-2026 naskel.com
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Address-to-callback registry with full-match or prefix-match dispatch.
//!
//! A handler's "opaque info" (a `void *` in the language this core was
//! modeled on) is represented the idiomatic Rust way: callers capture
//! whatever state they need directly in the closure's environment (e.g. an
//! `Rc<RefCell<...>>`) rather than threading a separate untyped pointer
//! through every call.

use crate::wire::Decoder;

/// A user-registered message handler. Boxed so the table can hold handlers
/// with heterogeneous captured state.
pub type HandlerCallback = Box<dyn FnMut(&str, &str, &mut Decoder<'_>) + Send>;

/// Endpoint-internal handlers that need direct access to endpoint state
/// (bridge id, clock sync) rather than an opaque callback. Dispatched by the
/// endpoint itself; never exposed through the public `method_new` API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    /// `!_o2/id (i)` — host assigns us a bridge id.
    Id,
    /// `!_o2/cs/put (it)` — clock ping reply.
    ClockPut,
}

pub(crate) enum Action {
    Builtin(Builtin),
    User(HandlerCallback),
}

struct Entry {
    address: String,
    typespec: Option<String>,
    full: bool,
    action: Action,
}

/// Ordered sequence of handler entries; dispatch policy is first-match-wins.
#[derive(Default)]
pub struct HandlerTable {
    entries: Vec<Entry>,
}

/// Strip exactly one leading `/` or `!` from an address, matching
/// registration semantics (both sigils are accepted; the table compares the
/// bare path).
pub(crate) fn strip_sigil(address: &str) -> &str {
    address
        .strip_prefix('/')
        .or_else(|| address.strip_prefix('!'))
        .unwrap_or(address)
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user handler. Mirrors the public `method_new` API.
    pub fn method_new(
        &mut self,
        path: &str,
        typespec: Option<&str>,
        full: bool,
        handler: HandlerCallback,
    ) {
        self.entries.push(Entry {
            address: strip_sigil(path).to_string(),
            typespec: typespec.map(str::to_string),
            full,
            action: Action::User(handler),
        });
    }

    pub(crate) fn register_builtin(
        &mut self,
        path: &str,
        typespec: &str,
        full: bool,
        builtin: Builtin,
    ) {
        self.entries.push(Entry {
            address: strip_sigil(path).to_string(),
            typespec: Some(typespec.to_string()),
            full,
            action: Action::Builtin(builtin),
        });
    }

    fn matches(entry: &Entry, address: &str, typespec: &str) -> bool {
        if let Some(want_ts) = &entry.typespec {
            if want_ts != typespec {
                return false;
            }
        }
        if entry.full {
            entry.address == address
        } else {
            match address.strip_prefix(entry.address.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            }
        }
    }

    /// Find the index of the first matching entry, if any. `address` and
    /// `typespec` are the already-stripped, already-parsed inbound values.
    pub(crate) fn find_match(&self, address: &str, typespec: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| Self::matches(e, address, typespec))
    }

    pub(crate) fn builtin_at(&self, idx: usize) -> Option<Builtin> {
        match self.entries.get(idx).map(|e| &e.action) {
            Some(Action::Builtin(b)) => Some(*b),
            _ => None,
        }
    }

    pub(crate) fn invoke_user_at(
        &mut self,
        idx: usize,
        address: &str,
        typespec: &str,
        decoder: &mut Decoder<'_>,
    ) {
        if let Some(Action::User(cb)) = self.entries.get_mut(idx).map(|e| &mut e.action) {
            cb(address, typespec, decoder);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn strips_single_leading_sigil() {
        assert_eq!(strip_sigil("/a/b"), "a/b");
        assert_eq!(strip_sigil("!a/b"), "a/b");
        assert_eq!(strip_sigil("a/b"), "a/b");
    }

    #[test]
    fn prefix_match_respects_node_boundary() {
        let mut table = HandlerTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        table.method_new(
            "/a/b",
            None,
            false,
            Box::new(move |_a, _t, _d| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(table.find_match("a/b", "").is_some());
        assert!(table.find_match("a/b/c", "").is_some());
        assert!(table.find_match("a/b/c/d", "").is_some());
        assert!(table.find_match("a/bc", "").is_none());
        assert!(table.find_match("a", "").is_none());
    }

    #[test]
    fn full_match_requires_exact_address() {
        let mut table = HandlerTable::new();
        table.method_new("/x/y", None, true, Box::new(|_, _, _| {}));
        assert!(table.find_match("x/y", "").is_some());
        assert!(table.find_match("x/y/z", "").is_none());
    }

    #[test]
    fn typespec_is_matched_when_declared() {
        let mut table = HandlerTable::new();
        table.method_new("/x", Some("ii"), true, Box::new(|_, _, _| {}));
        assert!(table.find_match("x", "ii").is_some());
        assert!(table.find_match("x", "i").is_none());
    }

    #[test]
    fn first_registered_match_wins() {
        let mut table = HandlerTable::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        table.method_new(
            "/a",
            None,
            false,
            Box::new(move |_, _, _| o1.lock().unwrap().push(1)),
        );
        table.method_new(
            "/a/b",
            None,
            false,
            Box::new(move |_, _, _| o2.lock().unwrap().push(2)),
        );

        let idx = table.find_match("a/b", "").unwrap();
        assert_eq!(idx, 0); // the broader /a prefix, registered first, wins
    }

    #[test]
    fn no_match_returns_none() {
        let table = HandlerTable::new();
        assert!(table.find_match("nope", "").is_none());
    }
}
