// src/lib.rs

// Import the top-level `accord` module.
pub mod accord;

// Re-export the module tree at the crate root so callers can write
// `accord::engine::...` instead of `accord::accord::engine::...`.
pub use crate::accord::clients;
pub use crate::accord::config;
pub use crate::accord::encoder;
pub use crate::accord::engine;
pub use crate::accord::errors;
pub use crate::accord::events;
pub use crate::accord::models;
pub use crate::accord::profile;
pub use crate::accord::reasoning;
pub use crate::accord::registry;
pub use crate::accord::resonance;
pub use crate::accord::scenes;
#[cfg(feature = "http-server")]
pub use crate::accord::server;
pub use crate::accord::session_store;
pub use crate::accord::skills;
pub use crate::accord::trace;
pub use crate::accord::vectors;

// Re-exporting key items for easier external access.
pub use crate::accord::engine::{EngineDeps, NegotiationEngine};
pub use crate::accord::session_store::SessionStore;
