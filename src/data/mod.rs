//! Data structures exchanged with streams.

pub mod buffer;
pub mod result;
pub mod selector;

pub use buffer::{DataInput, DataOutput};
pub use result::{MultiResult, SinkSlot};
pub use selector::{SinkSelector, SourceSelector};
