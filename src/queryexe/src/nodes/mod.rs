pub use self::aggregate::Aggregate;
pub use self::filter::Filter;
pub use self::join::Join;
pub use self::project::Project;
pub use self::scan::TableScan;
pub use self::sort::Sort;
pub use self::union::Union;
pub use self::values::Values;
pub use self::window::Window;

mod aggregate;
mod filter;
mod join;
mod project;
mod scan;
mod sort;
mod union;
mod values;
mod window;
