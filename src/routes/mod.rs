pub mod groups;
pub mod health;
pub mod members;
pub mod projects;
pub mod tasks;
