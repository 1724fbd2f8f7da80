//! KDL configuration parser

use std::path::Path;

use crate::error::ConfigError;
use crate::model::*;

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl uses an older miette version, so extract offset/len manually
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "mouse" => {
                config.mouse = parse_device_match(node)?;
            }
            "keyboard" => {
                config.keyboard = parse_device_match(node)?;
            }
            "pointer" => {
                config.pointer = parse_pointer(node)?;
            }
            "queue" => {
                config.queue = parse_queue(node)?;
            }
            "recovery" => {
                config.recovery = parse_recovery(node)?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    if let Some(val) = first_string(child) {
                        global.log_level = val
                            .parse()
                            .map_err(|e| ConfigError::Invalid { message: e })?;
                    }
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_device_match(node: &kdl::KdlNode) -> Result<DeviceMatch, ConfigError> {
    let section = node.name().value();
    let mut result: Option<DeviceMatch> = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "vendor-product" => {
                    if let Some(val) = first_string(child) {
                        let parsed = val.parse().map_err(|e| ConfigError::Invalid {
                            message: format!("{}: {}", section, e),
                        })?;
                        result = Some(parsed);
                    }
                }
                name => {
                    tracing::warn!("Unknown {} config option: {}", section, name);
                }
            }
        }
    }

    result.ok_or_else(|| ConfigError::Invalid {
        message: format!(
            "{} section needs vendor-product (e.g., `vendor-product \"046d:c332\"`)",
            section
        ),
    })
}

fn parse_pointer(node: &kdl::KdlNode) -> Result<PointerConfig, ConfigError> {
    let mut pointer = PointerConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "dpi-scale" => {
                    if let Some(val) = first_number(child) {
                        if val <= 0.0 || !val.is_finite() {
                            return Err(ConfigError::Invalid {
                                message: format!("dpi-scale must be a positive number, got {}", val),
                            });
                        }
                        pointer.dpi_scale = val as f32;
                    }
                }
                name => {
                    tracing::warn!("Unknown pointer config option: {}", name);
                }
            }
        }
    }

    Ok(pointer)
}

fn parse_queue(node: &kdl::KdlNode) -> Result<QueueConfig, ConfigError> {
    let mut queue = QueueConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "capacity" => {
                    if let Some(val) = first_integer(child) {
                        if val < 2 {
                            return Err(ConfigError::Invalid {
                                message: format!("queue capacity must be at least 2, got {}", val),
                            });
                        }
                        queue.capacity = val as usize;
                    }
                }
                "overflow" => {
                    if let Some(val) = first_string(child) {
                        queue.overflow = val
                            .parse()
                            .map_err(|e| ConfigError::Invalid { message: e })?;
                    }
                }
                name => {
                    tracing::warn!("Unknown queue config option: {}", name);
                }
            }
        }
    }

    Ok(queue)
}

fn parse_recovery(node: &kdl::KdlNode) -> Result<RecoveryConfig, ConfigError> {
    let mut recovery = RecoveryConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "settle-ms" => {
                    if let Some(val) = first_integer(child) {
                        recovery.settle_ms = val as u64;
                    }
                }
                "backoff-ms" => {
                    if let Some(val) = first_integer(child) {
                        recovery.backoff_ms = val as u64;
                    }
                }
                name => {
                    tracing::warn!("Unknown recovery config option: {}", name);
                }
            }
        }
    }

    Ok(recovery)
}

fn first_string(node: &kdl::KdlNode) -> Option<&str> {
    node.entries().first().and_then(|e| e.value().as_string())
}

fn first_integer(node: &kdl::KdlNode) -> Option<i64> {
    node.entries().first().and_then(|e| e.value().as_i64())
}

/// Accept both `0.5` and `1` for numeric options.
fn first_number(node: &kdl::KdlNode) -> Option<f64> {
    let entry = node.entries().first()?;
    entry
        .value()
        .as_f64()
        .or_else(|| entry.value().as_i64().map(|v| v as f64))
}
