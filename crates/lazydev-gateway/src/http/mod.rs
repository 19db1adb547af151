pub mod health;
pub mod jobs;
pub mod login;
pub mod upload;
