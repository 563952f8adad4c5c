//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter        | Implements       | Connects to                 |
//! |----------------|------------------|-----------------------------|
//! | `event_bus`    | EventSink        | bounded embassy-sync channel|
//! | `log_sink`     | EventSink        | `log` facade                |
//! | `memory_store` | PersistencePort  | in-memory postcard blobs    |

pub mod event_bus;
pub mod log_sink;
pub mod memory_store;
