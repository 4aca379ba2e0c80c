pub mod group;
pub mod membership;
pub mod project;
pub mod task;
