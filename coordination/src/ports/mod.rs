//! Ports to external collaborators: persistence and language models.

pub mod llm;
pub mod memory;

pub use llm::{LlmError, LlmPort};
pub use memory::{keys, InMemoryStore, MemoryError, MemoryPort, MemoryRecord, MemoryResult};
