pub mod admin;
pub mod queue;
pub mod workers;
