//! History backends
//!
//! The real chat-log store lives outside this crate; it plugs in through
//! [`HistoryBackend`](crate::core::traits::HistoryBackend).

pub mod memory;

pub use memory::MemoryBackend;
