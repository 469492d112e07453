pub mod events;
pub mod factories;
pub mod models;
pub mod test_utils;
