//! Signal-to-target compilation.
//!
//! Orchestrates every per-source [`SignalLedger`](crate::signal::SignalLedger)
//! plus the current risk state into one merged target list per cycle.

mod compiler;

pub use compiler::AllocationCompiler;
