//! Core building blocks for the boreal ID service.
//!
//! A boreal ID is a 64-bit integer packing a millisecond timestamp, a
//! 10-bit worker ID and a 12-bit per-millisecond sequence. This crate
//! provides the bit-layout codec, the clock abstraction and the
//! [`Generator`] that issues strictly increasing IDs. It performs no I/O;
//! the network front-ends live in `boreal-server`.

mod clock;
mod error;
mod generator;
mod id;

pub use crate::clock::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::id::*;
