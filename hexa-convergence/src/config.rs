//! Rig configuration file (hexa.toml)
//!
//! Bus, register map, torque polarity, motion parameters, actuator groups
//! and the optional retry and limit settings of a rig.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use hexa_actuator::{
    ActuatorBus, ActuatorId, BusError, EventSink, PositionRange, RegisterMap, ServoConfig,
    SharedBus, Speed, Tolerance, TorquePolarity,
};
use crate::controller::ControllerConfig;
use crate::error::ConfigError;
use crate::group::{Group, MoveCommand};
use crate::retry::{Backoff, BackoffStrategy, CancellationToken, RetryPolicy};

/// Name of the rig file looked up by default
pub const RIG_FILE: &str = "hexa.toml";

/// Rig configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    pub bus: BusSection,

    #[serde(default)]
    pub registers: RegisterSection,

    #[serde(default)]
    pub torque: TorquePolarity,

    pub motion: MotionSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub limits: LimitsSection,

    /// Groups in execution order
    pub groups: Vec<GroupSection>,
}

/// Serial bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSection {
    /// Device path (COM3, /dev/ttyUSB0, ...)
    pub device: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Register map: a named preset or an explicit table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterSection {
    Preset { preset: String },
    Explicit(RegisterMap),
}

impl Default for RegisterSection {
    fn default() -> Self {
        RegisterSection::Preset { preset: "ax12a".to_string() }
    }
}

impl RegisterSection {
    pub fn resolve(&self) -> Result<RegisterMap, ConfigError> {
        match self {
            RegisterSection::Preset { preset } if preset.eq_ignore_ascii_case("ax12a") => Ok(RegisterMap::ax12a()),
            RegisterSection::Preset { preset } => {
                Err(ConfigError::Invalid(format!("unknown register preset {:?}", preset)))
            }
            RegisterSection::Explicit(map) => Ok(*map),
        }
    }
}

/// Motion parameters, in device ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionSection {
    pub goal: u16,
    pub tolerance: u16,
    pub speed: u16,

    #[serde(default)]
    pub position_min: u16,

    #[serde(default = "default_position_max")]
    pub position_max: u16,
}

/// Retry settings; an empty section retries forever without delay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub strategy: BackoffStrategy,

    #[serde(default)]
    pub base_delay_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,

    #[serde(default = "default_true")]
    pub retry_device_faults: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: None,
            strategy: BackoffStrategy::None,
            base_delay_ms: 0,
            max_delay_ms: None,
            retry_device_faults: true,
        }
    }
}

/// Escape hatches for the poll loop; both disabled by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_polls: Option<u32>,
}

/// A named group of actuator ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSection {
    pub name: String,
    pub ids: Vec<u8>,
}

fn default_baud_rate() -> u32 {
    1_000_000
}

fn default_position_max() -> u16 {
    1023
}

fn default_true() -> bool {
    true
}

impl Default for RigConfig {
    /// Six-legged rig: three AX-12A servos per leg on COM3
    fn default() -> Self {
        let legs: [[u8; 3]; 6] = [[1, 3, 5], [2, 4, 6], [14, 16, 18], [8, 10, 12], [7, 9, 11], [13, 15, 17]];
        Self {
            bus: BusSection {
                device: "COM3".to_string(),
                baud_rate: default_baud_rate(),
            },
            registers: RegisterSection::default(),
            torque: TorquePolarity::default(),
            motion: MotionSection {
                goal: 500,
                tolerance: 15,
                speed: 100,
                position_min: 0,
                position_max: default_position_max(),
            },
            retry: RetrySection::default(),
            limits: LimitsSection::default(),
            groups: legs
                .iter()
                .enumerate()
                .map(|(i, ids)| GroupSection {
                    name: format!("leg {}", i + 1),
                    ids: ids.to_vec(),
                })
                .collect(),
        }
    }
}

impl RigConfig {
    /// Parse a rig configuration from TOML
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Load(format!("Failed to parse {}: {}", RIG_FILE, e)))
    }

    /// Load a rig configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Load(format!("Failed to serialize rig: {}", e)))
    }

    /// Write to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .map_err(|e| ConfigError::Load(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Check everything that must hold before the first bus transaction
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.device.trim().is_empty() {
            return Err(BusError::InvalidDevice(self.bus.device.clone()).into());
        }
        if self.bus.baud_rate == 0 {
            return Err(BusError::BaudRate(self.bus.baud_rate).into());
        }
        self.registers.resolve()?;
        if self.torque.enable == self.torque.disable {
            return Err(ConfigError::Invalid("torque enable and disable values must differ".into()));
        }

        self.move_command()?.validate(&self.range()?)?;
        self.controller_config()?.validate()?;

        if self.groups.is_empty() {
            return Err(ConfigError::Invalid("at least one group is required".into()));
        }
        let mut assigned = HashSet::new();
        for (name, ids) in self.group_ids()? {
            if ids.is_empty() {
                return Err(ConfigError::EmptyGroup(name));
            }
            let mut local = HashSet::new();
            for id in ids {
                if !local.insert(id) {
                    return Err(ConfigError::DuplicateActuator { group: name, id });
                }
                if !assigned.insert(id) {
                    return Err(ConfigError::SharedActuator(id));
                }
            }
        }
        Ok(())
    }

    pub fn range(&self) -> Result<PositionRange, ConfigError> {
        Ok(PositionRange::new(self.motion.position_min, self.motion.position_max)?)
    }

    pub fn move_command(&self) -> Result<MoveCommand, ConfigError> {
        let goal = self.range()?.check(self.motion.goal)?;
        Ok(MoveCommand::new(
            goal,
            Tolerance::new(self.motion.tolerance),
            Speed::new(self.motion.speed),
        ))
    }

    pub fn servo_config(&self) -> Result<ServoConfig, ConfigError> {
        Ok(ServoConfig {
            registers: self.registers.resolve()?,
            polarity: self.torque,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.retry.base_delay_ms);
        let mut backoff = match self.retry.strategy {
            BackoffStrategy::None => Backoff::none(),
            BackoffStrategy::Fixed => Backoff::fixed(base),
            BackoffStrategy::Linear => Backoff::linear(base),
            BackoffStrategy::Exponential => Backoff::exponential(base),
        };
        if let Some(max) = self.retry.max_delay_ms {
            backoff = backoff.with_max(Duration::from_millis(max));
        }

        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff,
            retry_device_faults: self.retry.retry_device_faults,
        }
    }

    pub fn controller_config(&self) -> Result<ControllerConfig, ConfigError> {
        Ok(ControllerConfig {
            retry: self.retry_policy(),
            range: self.range()?,
            timeout: self.limits.timeout_ms.map(Duration::from_millis),
            max_polls: self.limits.max_polls,
            cancel: None,
        })
    }

    /// Same as [`controller_config`](Self::controller_config), cancellable through `token`
    pub fn controller_config_with_cancel(&self, token: CancellationToken) -> Result<ControllerConfig, ConfigError> {
        Ok(ControllerConfig {
            cancel: Some(token),
            ..self.controller_config()?
        })
    }

    /// Validated ids per group, in file order
    pub fn group_ids(&self) -> Result<Vec<(String, Vec<ActuatorId>)>, ConfigError> {
        self.groups
            .iter()
            .map(|group| -> Result<(String, Vec<ActuatorId>), ConfigError> {
                let ids = group
                    .ids
                    .iter()
                    .map(|&raw| ActuatorId::new(raw))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((group.name.clone(), ids))
            })
            .collect()
    }

    /// One group per configured entry (legs, moved one at a time)
    pub fn build_groups<B: ActuatorBus>(&self, bus: &SharedBus<B>, events: &EventSink) -> Result<Vec<Group<B>>, ConfigError> {
        let config = self.servo_config()?;
        self.group_ids()?
            .into_iter()
            .map(|(name, ids)| Group::from_ids(name, &ids, bus, config, events))
            .collect()
    }

    /// Every configured actuator in a single group (whole-body move)
    pub fn whole_body<B: ActuatorBus>(&self, bus: &SharedBus<B>, events: &EventSink) -> Result<Group<B>, ConfigError> {
        let ids: Vec<ActuatorId> = self.group_ids()?.into_iter().flat_map(|(_, ids)| ids).collect();
        Group::from_ids("body", &ids, bus, self.servo_config()?, events)
    }

    /// Every configured id, in group order
    pub fn actuator_ids(&self) -> Result<Vec<ActuatorId>, ConfigError> {
        Ok(self.group_ids()?.into_iter().flat_map(|(_, ids)| ids).collect())
    }
}
