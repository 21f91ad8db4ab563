use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::types::RelayMode;

/// One relay command as it appears in the configuration file. Deployments
/// in the field use all of these shapes, so every one of them is accepted:
/// a bare integer, an integer array, `"0x.."`, `"0x..,0x.."`, or `"0b...."`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelayCommandSpec {
    Byte(u8),
    Bytes(Vec<u8>),
    Text(String),
}

/// The five configurable relay commands. Defaults assume the usual wiring
/// order fan / compressor / reversing valve / strip on bits 0..3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayCommandsConfig {
    pub off: RelayCommandSpec,
    pub fan_only: RelayCommandSpec,
    pub cool: RelayCommandSpec,
    pub heat: RelayCommandSpec,
    pub emergency: RelayCommandSpec,
}

impl Default for RelayCommandsConfig {
    fn default() -> Self {
        Self {
            off: RelayCommandSpec::Byte(0x00),
            fan_only: RelayCommandSpec::Byte(0x01),
            cool: RelayCommandSpec::Byte(0x03),
            heat: RelayCommandSpec::Byte(0x07),
            emergency: RelayCommandSpec::Byte(0x09),
        }
    }
}

/// A parsed relay command: the exact bytes handed to the hardware layer.
/// Built once at boot and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCommand(Vec<u8>);

impl RelayCommand {
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Canonical text form, accepted back by the parser unchanged.
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(|byte| format!("0x{byte:02X}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl RelayCommandSpec {
    pub fn parse(&self, name: &'static str) -> Result<RelayCommand, ConfigError> {
        let bytes = match self {
            Self::Byte(value) => vec![*value],
            Self::Bytes(values) => values.clone(),
            Self::Text(text) => parse_text(text).map_err(|reason| ConfigError::RelayCommand {
                name,
                reason,
            })?,
        };
        if bytes.is_empty() {
            return Err(ConfigError::RelayCommand {
                name,
                reason: "command must contain at least one byte".to_string(),
            });
        }
        Ok(RelayCommand(bytes))
    }
}

fn parse_text(text: &str) -> Result<Vec<u8>, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty command string".to_string());
    }

    if let Some(bits) = trimmed
        .strip_prefix("0b")
        .or_else(|| trimmed.strip_prefix("0B"))
    {
        let value = u8::from_str_radix(bits, 2)
            .map_err(|err| format!("bad binary literal {trimmed:?}: {err}"))?;
        return Ok(vec![value]);
    }

    trimmed.split(',').map(parse_item).collect()
}

fn parse_item(item: &str) -> Result<u8, String> {
    let item = item.trim();
    if let Some(hex) = item.strip_prefix("0x").or_else(|| item.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).map_err(|err| format!("bad hex literal {item:?}: {err}"))
    } else {
        item.parse::<u8>()
            .map_err(|err| format!("bad decimal literal {item:?}: {err}"))
    }
}

/// All five commands, parsed. The engine only ever indexes this set.
#[derive(Debug, Clone)]
pub struct RelayCommandSet {
    pub off: RelayCommand,
    pub fan_only: RelayCommand,
    pub cool: RelayCommand,
    pub heat: RelayCommand,
    pub emergency: RelayCommand,
}

impl RelayCommandSet {
    pub fn parse(config: &RelayCommandsConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            off: config.off.parse("off")?,
            fan_only: config.fan_only.parse("fan_only")?,
            cool: config.cool.parse("cool")?,
            heat: config.heat.parse("heat")?,
            emergency: config.emergency.parse("emergency")?,
        })
    }

    pub fn for_mode(&self, mode: RelayMode) -> &RelayCommand {
        match mode {
            RelayMode::Off => &self.off,
            RelayMode::FanOnly => &self.fan_only,
            RelayMode::Cool => &self.cool,
            RelayMode::Heat => &self.heat,
            RelayMode::Emergency => &self.emergency,
        }
    }
}
