pub mod alerts;
pub mod extraction;
pub mod responses;
pub mod validation;
