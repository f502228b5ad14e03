pub mod arena;

pub use arena::{ScratchArena, ScratchBuffer, DEFAULT_SCRATCH_CAPACITY};
