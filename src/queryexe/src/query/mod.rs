pub use compiler::{Edge, ExtensionFactory, ExtensionRegistry};
pub use interpreter::Interpreter;
mod compiler;
mod interpreter;
