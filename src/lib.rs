pub mod dof_object;
pub mod layout;
pub mod numbering;
pub mod packed;
pub mod types;
pub mod utilities;

pub use dof_object::DofObject;
pub use types::{DofIdType, ProcessorIdType, INVALID_ID, INVALID_PROCESSOR_ID};
