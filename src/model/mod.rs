pub mod context;
pub mod module;
pub mod rule;

pub use context::{Context, ContextBag, ContextId};
pub use module::{AppSpec, Module, ModuleId};
pub use rule::{ActionCache, Rule, RuleId, RuleSet};

use std::path::Path;

/// Common surface of every parsed declaration.
pub trait Declaration {
    fn name(&self) -> &str;
    fn relpath(&self) -> &Path;
}
