//! Persistence Adapters
//!
//! Implementations of the [`Repository`](crate::application::ports::Repository)
//! port.

mod in_memory;

pub use in_memory::InMemoryRepository;
