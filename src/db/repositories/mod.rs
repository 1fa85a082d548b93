pub mod inspections;
pub mod results;

pub use results::StatusCounts;
