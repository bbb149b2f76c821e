//! Site selection.

pub mod selector;
