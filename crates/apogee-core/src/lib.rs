//! Apogee core: the account pool, the dispatch engine and the protocol
//! transformers that sit between the client dialects and the upstream.

pub mod dispatch;
pub mod mappers;
pub mod pool;
pub mod sse;
pub mod upstream;

pub use dispatch::Dispatcher;
