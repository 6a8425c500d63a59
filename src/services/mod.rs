pub mod crypto;
pub mod estimates;
pub mod job_costing;
pub mod linking;
pub mod quickbooks;
pub mod reports;
pub mod stages;
pub mod state;
pub mod sync;
pub mod tokens;
