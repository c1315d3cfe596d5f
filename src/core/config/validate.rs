use std::collections::BTreeSet;

use super::model::{AutoUndeploy, ReleaseConfig, TaskSpec};
use crate::error::{Error, Result};

/// Checks the cross-field invariants the compiler relies on.
///
/// Field presence and enum spellings are already enforced while loading;
/// this pass reports the first conflict between otherwise valid fields.
pub fn validate(cfg: &ReleaseConfig) -> Result<()> {
    if cfg.name.trim().is_empty() {
        return Err(Error::config_missing_field("general_info.name_release", None));
    }
    if cfg.folder_path.trim().is_empty() {
        return Err(Error::config_missing_field("general_info.xlr_folder", None));
    }
    if cfg.application_id.trim().is_empty() {
        return Err(Error::config_missing_field("general_info.iua", None));
    }
    if cfg.phases.is_empty() {
        return Err(Error::config_missing_field(
            "general_info.phases",
            Some("at least one phase is required".to_string()),
        ));
    }

    let mut seen = BTreeSet::new();
    for phase in &cfg.phases {
        if !seen.insert(*phase) {
            return Err(Error::config_conflict(
                "general_info.phases",
                format!("Phase {} is listed more than once", phase),
                Some(phase.to_string()),
            ));
        }
    }

    for (phase, tasks) in &cfg.phase_tasks {
        if !cfg.has_phase(*phase) {
            return Err(Error::config_conflict(
                "Phases",
                format!("Tasks are declared for {} which is not in general_info.phases", phase),
                Some(phase.to_string()),
            ));
        }
        for task in tasks {
            if let TaskSpec::ToolDeploy { packages, group } = task {
                for package in packages {
                    check_declared(cfg, package, &format!("Phases.{}.{}", phase, group))?;
                }
            }
        }
    }

    if let Some(jenkins) = &cfg.jenkins {
        for package in jenkins.jobs.keys() {
            check_declared(cfg, package, "jenkins.jenkinsjob")?;
        }
    }

    for (name, spec) in &cfg.packages {
        if let AutoUndeploy::After(deps) = &spec.auto_undeploy {
            for dep in deps {
                check_declared(
                    cfg,
                    dep,
                    &format!("template_liste_package.{}.auto_undeploy", name),
                )?;
            }
        }
    }

    Ok(())
}

fn check_declared(cfg: &ReleaseConfig, package: &str, field: &str) -> Result<()> {
    if cfg.packages.contains_key(package) {
        return Ok(());
    }
    Err(Error::config_conflict(
        field,
        format!("Package '{}' is not declared in template_liste_package", package),
        Some(package.to_string()),
    ))
}
