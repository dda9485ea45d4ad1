pub mod download;
pub mod global_variables;
pub mod ign;
