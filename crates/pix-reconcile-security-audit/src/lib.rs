//! Static checks over the workspace sources. The crate exposes nothing;
//! see `tests/security_invariants.rs`.
