// Assembling
mod air;
pub mod assembler;
pub use assembler::{assemble, AsmOptions, Assembly, Image, ListingRow};
pub mod bits;
mod encoder;
pub mod isa;
mod lexer;
mod parser;
mod span;
pub mod symbol;

// Running
pub mod boot;
pub mod bus;
pub mod console;
pub mod runtime;
pub use runtime::{Exit, Processor, RunFlag};

pub mod env;
pub mod error;
pub mod output;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;
