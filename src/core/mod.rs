// Core cross-cutting concerns

pub mod errors;
pub mod metrics;
