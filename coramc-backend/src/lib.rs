//! Code generation for compiled control threads.
//!
//! [`lower`] finishes a compiled machine for hardware: idle-state
//! deasserts, trace statements, and the terminating handshake. The
//! [`Backend`] trait then writes the finished machine out; [`VerilogBackend`]
//! is the only backend today.

mod lower;
mod traits;
mod verilog;

pub use lower::lower;
pub use traits::Backend;
pub use verilog::{VerilogBackend, EXT_ADDR_WIDTH, SIGNAL_WIDTH};
