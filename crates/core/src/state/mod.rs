pub mod db;
pub mod io;

pub use db::ConductorDb;
pub use io::{get_runtime_path, load_or_default, write_json, FallbackReason, Loaded};
