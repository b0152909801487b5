//! Shared utilities for the coramc compiler.
mod errors;
mod global_sym;
mod id;
mod math;
mod namegenerator;
mod out_file;

pub use errors::{CoramResult, Error};
pub use global_sym::GSym;
pub use id::Id;
pub use math::{bits_needed_for, clog2, gcd};
pub use namegenerator::NameGenerator;
pub use out_file::OutputFile;
