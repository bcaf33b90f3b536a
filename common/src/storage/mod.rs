pub mod intents;
pub mod store;
