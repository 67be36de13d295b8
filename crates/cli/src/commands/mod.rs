pub mod analyze;
pub mod costs;
pub mod execute;
