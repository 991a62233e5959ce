pub mod duration_serde;
pub mod timer;

pub use timer::Deadline;
