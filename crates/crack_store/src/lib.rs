//! Library view of the storage node: exposes the cracking engine and the
//! generated RPC bindings so tests and embedders can reuse them.

include!("main.rs");
