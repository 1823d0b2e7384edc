//! Transfer engine
//!
//! Building blocks the transfer manager composes:
//! - FIFO admission gate bounding in-flight work
//! - Per-call cancellation scope with optional deadline
//! - Ordered fan-out over a `JoinSet` with indexed result slots
//! - Byte-range planning and the positional-write output file

mod admission;
mod chunk_plan;
mod fan_out;
mod output_file;
mod scope;

pub use admission::*;
pub use chunk_plan::*;
pub use fan_out::*;
pub use output_file::*;
pub use scope::*;
