pub mod admin;

pub use admin::{AdminGuard, ADMIN_TOKEN_HEADER};
