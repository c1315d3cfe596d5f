pub mod loader;
pub mod model;
pub mod settings;
pub mod validate;

use std::path::Path;

pub use model::*;
pub use settings::{RetrySettings, Settings, VariantRuleConfig};
pub use validate::validate;

use crate::error::Result;

/// Loads a descriptor and checks its cross-field invariants.
pub fn load_validated(path: &Path) -> Result<ReleaseConfig> {
    let cfg = loader::load(path)?;
    validate(&cfg)?;
    log_status!(
        "config",
        "Loaded '{}' ({} phases, {} packages)",
        cfg.name,
        cfg.phases.len(),
        cfg.packages.len()
    );
    Ok(cfg)
}
