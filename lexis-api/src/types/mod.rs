//! API Request and Response Types
//!
//! Data Transfer Objects for the Lexis HTTP API. Domain entities (`Word`,
//! `Card`, `User`) are serialised as-is from `lexis-core`; these types wrap
//! them for specific endpoints.

mod cards;
mod users;

pub use cards::*;
pub use users::*;
