//! Middleware for API servers that announce their mutations.

pub mod emit;

pub use emit::{emit_after_response, Actor, EmitAfterResponse, EntityEmitters, RequestContext};
