//! Service Layer
//!
//! Business logic between the HTTP handlers and the review cache / card
//! store. Handlers stay thin and map results to responses.

mod card_service;

pub use card_service::*;
