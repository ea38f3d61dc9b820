pub mod job_repo;

pub use job_repo::{JobRepo, PgJobRegistry};
