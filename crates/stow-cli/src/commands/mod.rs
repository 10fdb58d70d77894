pub mod common;
pub mod completions;
pub mod delete;
pub mod list;
pub mod note;
pub mod status;
pub mod sync;
pub mod task;
pub mod timer;
