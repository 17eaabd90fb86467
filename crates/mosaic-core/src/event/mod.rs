//! Typed, in-process publish/subscribe for host events.
//!
//! The bus ([`EventBus`]) delivers [`PluginEvent`]s synchronously in the
//! publisher's calling path. One listener's failure never prevents delivery
//! to the others.

pub mod bus;
pub mod types;

pub use bus::{EventBus, ListenerId};
pub use types::{EventRecord, PluginEvent};

#[cfg(test)]
mod tests;
