//! Application services layer.

pub mod error;
pub mod icons;
pub mod reactions;
pub mod repos;
pub mod users;
