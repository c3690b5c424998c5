pub mod agent_profile_repo;
pub mod conversation_repo;
pub mod delayed_task_repo;
pub mod message_repo;
pub mod secret_repo;
pub mod snapshot_repo;
pub mod worker_repo;
