pub mod agent;
pub mod conversation;
pub mod delayed_task;
pub mod message;
pub mod secret;
pub mod status;
pub mod worker;
