pub mod assignment;
pub mod audit;
pub mod conversations;
pub mod forms;
pub mod llm;
pub mod metrics;
pub mod patients;
pub mod profiles;
pub mod protocols;
pub mod recovery;
pub mod role_router;
pub mod task_scheduler;
pub mod tasks;
