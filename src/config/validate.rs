// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{PipeloopError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::PipeloopError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Check a raw config for semantic errors without converting it.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_stages(cfg)?;
    validate_pipeline(cfg)?;
    validate_health(cfg)?;
    validate_control(cfg)?;
    validate_stages(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> PipeloopError {
    PipeloopError::ConfigError(msg.into())
}

fn ensure_has_stages(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stages.is_empty() {
        return Err(config_error(
            "config must contain at least one [[stage]] entry",
        ));
    }
    Ok(())
}

fn validate_pipeline(cfg: &RawConfigFile) -> Result<()> {
    let p = &cfg.pipeline;

    if p.interval.is_zero() {
        return Err(config_error("[pipeline].interval must be greater than 0"));
    }
    if p.failure_threshold == 0 {
        return Err(config_error(
            "[pipeline].failure_threshold must be >= 1 (got 0)",
        ));
    }
    match p.backoff_delay {
        Some(delay) if delay.is_zero() => {
            return Err(config_error("[pipeline].backoff_delay must be greater than 0"));
        }
        None if p.backoff_multiplier == 0 => {
            return Err(config_error(
                "[pipeline].backoff_multiplier must be >= 1 (got 0)",
            ));
        }
        _ => {}
    }
    if p.stage_timeout.is_zero() {
        return Err(config_error("[pipeline].stage_timeout must be greater than 0"));
    }
    if p.items_key.trim().is_empty() {
        return Err(config_error("[pipeline].items_key must not be empty"));
    }
    Ok(())
}

fn validate_health(cfg: &RawConfigFile) -> Result<()> {
    let h = &cfg.health;

    if h.poll_interval.is_zero() {
        return Err(config_error("[health].poll_interval must be greater than 0"));
    }
    if h.success_rate_window == Some(0) {
        return Err(config_error(
            "[health].success_rate_window must be >= 1 when set",
        ));
    }
    if !(0.0..=1.0).contains(&h.success_rate_threshold) {
        return Err(config_error(format!(
            "[health].success_rate_threshold must be within 0.0..=1.0 (got {})",
            h.success_rate_threshold
        )));
    }
    if !(0.0..=100.0).contains(&h.resource_threshold) {
        return Err(config_error(format!(
            "[health].resource_threshold must be a percentage (got {})",
            h.resource_threshold
        )));
    }
    if h.staleness_factor == 0 {
        return Err(config_error("[health].staleness_factor must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_control(cfg: &RawConfigFile) -> Result<()> {
    if cfg.control.state_dir.trim().is_empty() {
        return Err(config_error("[control].state_dir must not be empty"));
    }
    if cfg.control.journal_entries == 0 {
        return Err(config_error(
            "[control].journal_entries must be >= 1 (got 0)",
        ));
    }
    Ok(())
}

fn validate_stages(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();

    for stage in cfg.stages.iter() {
        let name = stage.name.trim();
        if name.is_empty() {
            return Err(config_error("every [[stage]] needs a non-empty `name`"));
        }
        // Stage names double as artifact file names.
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(config_error(format!(
                "stage name '{}' must not contain path separators",
                stage.name
            )));
        }
        if !seen.insert(name.to_string()) {
            return Err(config_error(format!(
                "stage '{}' is defined more than once",
                stage.name
            )));
        }
        if stage.cmd.trim().is_empty() {
            return Err(config_error(format!(
                "stage '{}' has an empty `cmd`",
                stage.name
            )));
        }
        if stage.timeout == Some(Duration::ZERO) {
            return Err(config_error(format!(
                "stage '{}' has a zero timeout",
                stage.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(toml_src: &str) -> RawConfigFile {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = ConfigFile::try_from(raw(
            r#"
[[stage]]
name = "fetch"
cmd = "echo {}"
"#,
        ))
        .unwrap();

        assert_eq!(cfg.pipeline.interval, Duration::from_secs(60));
        assert_eq!(cfg.pipeline.failure_threshold, 5);
        assert_eq!(
            cfg.pipeline.effective_backoff_delay(),
            Duration::from_secs(300)
        );
        assert_eq!(cfg.health.min_cycles, 5);
        assert_eq!(cfg.stage_timeout(&cfg.stages[0]), Duration::from_secs(60));
    }

    #[test]
    fn explicit_backoff_delay_wins_over_multiplier() {
        let cfg = ConfigFile::try_from(raw(
            r#"
[pipeline]
interval = "10s"
backoff_multiplier = 3
backoff_delay = "2m"

[[stage]]
name = "fetch"
cmd = "true"
"#,
        ))
        .unwrap();
        assert_eq!(
            cfg.pipeline.effective_backoff_delay(),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn empty_stage_list_is_rejected() {
        let err = ConfigFile::try_from(raw("[pipeline]\nname = \"x\"\n")).unwrap_err();
        assert!(err.to_string().contains("at least one [[stage]]"));
    }

    #[test]
    fn duplicate_stage_names_are_rejected() {
        let err = ConfigFile::try_from(raw(
            r#"
[[stage]]
name = "a"
cmd = "true"

[[stage]]
name = "a"
cmd = "true"
"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = ConfigFile::try_from(raw(
            r#"
[pipeline]
failure_threshold = 0

[[stage]]
name = "a"
cmd = "true"
"#,
        ))
        .unwrap_err();
        assert!(matches!(err, PipeloopError::ConfigError(_)));
    }

    #[test]
    fn bad_duration_fails_deserialization() {
        let result: std::result::Result<RawConfigFile, _> = toml::from_str(
            r#"
[pipeline]
interval = "soon"
"#,
        );
        assert!(result.is_err());
    }
}
