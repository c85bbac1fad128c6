//! Lifecycle events for EDRR cycles.
//!
//! The coordinator publishes one event per lifecycle change on a Tokio
//! broadcast bus. Subscribers that lag past the channel capacity miss
//! events; nothing is persisted.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Coordinator  │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{CycleSubscription, EventBus, EventFilter, SharedEventBus};
pub use types::EdrrEvent;
