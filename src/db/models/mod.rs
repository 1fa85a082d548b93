pub mod inspection;
pub mod result;

pub use inspection::{Inspection, InspectionProgress, InspectionStatus};
pub use result::{AiMeta, ResultStatus, SpecResult};
