//! Stack file parsing and value substitution

mod stack_file;
mod substitution;

pub use stack_file::*;
pub use substitution::*;
