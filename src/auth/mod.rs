// Authentication: tokens, passwords, middleware, audit trail

pub mod audit;
pub mod middleware;
pub mod password;
pub mod token;

pub use audit::{AuthEvent, SecurityEventLogger};
pub use middleware::{auth_middleware, AuthState};
pub use token::{SessionToken, TokenHash};
