pub mod agent;
pub mod backup;
pub mod job;
pub mod repo;
pub mod retention;
