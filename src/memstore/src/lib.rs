#[macro_use]
extern crate log;

pub mod csv_utils;
pub mod table;

pub use table::{MemTable, ScanMode};
