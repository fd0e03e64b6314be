//! Copy operation task: byte-accurate progress tracking over files and
//! directory trees.

mod executor;
mod info;

pub use executor::{COPY_TASK_KIND, CopyTask};
pub use info::CopyOperationInfo;
