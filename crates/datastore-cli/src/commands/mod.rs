//! Command implementations.

pub(crate) mod cleanup;
pub(crate) mod keys;
pub(crate) mod transfer;
