//! Host platform queries used by path variable substitution.

pub mod paths;
