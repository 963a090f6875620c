pub mod auth;
pub mod conversation;
pub mod form;
pub mod patient;
pub mod profile;
pub mod protocol;
pub mod task;
