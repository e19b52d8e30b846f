//! Services

pub mod events;

pub use events::{Accepted, DynamicEventInput, EventService};
