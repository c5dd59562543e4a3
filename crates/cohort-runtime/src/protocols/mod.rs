//! Protocols shipped with the runtime.

pub mod count;
