//! Tools for running a fast finality committee locally.
mod config;
pub mod localnet;

#[cfg(test)]
mod tests;

pub use config::{decode_json, encode_json, AppConfig, DeparturesConfig, LeaderSelection, MemberConfig};
