//! The Elk compiler front-end: lexing, parsing, bytecode lowering, skip
//! analysis and module archive assembly for the external execution engine.

pub mod ast;
pub mod compiler;
pub mod logger;
pub mod runspec;
pub mod serialization;
pub mod utils;

pub use compiler::{CompileOptions, compile};
pub use runspec::runspec;
