#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod channel;
pub mod config;
pub mod nodes;
pub mod query;
pub mod scalar;
#[cfg(test)]
mod testutil;

pub use config::ExecConfig;
pub use query::{ExtensionRegistry, Interpreter};
