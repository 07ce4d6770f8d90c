//! Domain layer: core messaging entities and business rules.

pub mod conversation;
pub mod message;
pub mod status;
pub mod typing;
