//! Libris application library
//!
//! Hosts the catalog modules mounted by the `libris-app` binary.

pub mod modules;

pub use modules::register_all;
