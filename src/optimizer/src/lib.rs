#[macro_use]
extern crate log;

pub use rewriter::Rewriter;
pub use rules::{CalcSplit, FilterIntoScan, ProjectIntoScan, RewriteRule};
mod rewriter;
mod rules;
