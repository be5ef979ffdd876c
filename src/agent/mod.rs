//! A single coding-agent subprocess and everything needed to drive it.
//!
//! [`runtime::Agent`] owns the lifecycle; the other modules are its parts:
//! command construction, the process seam, stream-json decoding, the pause
//! gate, the bounded output buffer and usage accounting.

pub mod command;
pub mod gate;
pub mod output;
pub mod process;
pub mod runtime;
pub mod stream;
pub mod types;
pub mod usage;
