//! laze reads a tree of YAML project declarations (contexts, builders,
//! rules, modules, apps) and generates a Ninja build file from them.

pub mod download;
pub mod error;
pub mod executor;
pub mod generator;
pub mod model;
pub mod ninja;
pub mod project;
pub mod scaffold;
pub mod solver;
pub mod util;
pub mod vars;

/// Name of the per-directory project declaration file.
pub const PROJECT_FILENAME: &str = "laze.yml";
