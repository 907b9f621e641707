pub mod jwt;
pub mod middleware;

pub use jwt::{JwtManager, Role};
pub use middleware::{auth_middleware, require_admin};
