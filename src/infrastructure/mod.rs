//! Infrastructure layer: filesystem generator and path list input
//!
//! This layer owns every piece of I/O the engine is fed from.

pub mod error;
pub mod fs_generator;
pub mod path_list;

pub use error::{InfraError, InfraResult};
pub use fs_generator::FsGenerator;
pub use path_list::{parse_path_list, read_path_list};
