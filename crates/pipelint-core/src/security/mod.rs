//! Security rules: credential scanning, dangerous shell usage, image pinning
//! and GitHub token scoping.

pub mod commands;
pub mod entropy;
pub mod injection;
pub mod permissions;
pub mod secrets;
pub mod supply_chain;
