//! Service lifecycle: status machine, per-service driver, and process tree
//! containment.

mod runtime;
mod status;

pub mod process_tree;

pub use runtime::ServiceRuntime;
pub use status::{Status, StatusEvent, STATUS_BUS_CAPACITY};
