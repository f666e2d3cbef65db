//! Grupos de atuadores e comandos de movimento

use std::collections::HashSet;
use std::fmt;
use serde::{Deserialize, Serialize};
use hexa_actuator::{
    ActuatorBus, ActuatorId, EventSink, Position, PositionRange, RangeError, ServoActuator,
    ServoConfig, SharedBus, Speed, Tolerance,
};
use crate::error::ConfigError;

/// Sequência ordenada e nomeada de atuadores que convergem juntos
///
/// Montada uma vez a partir da configuração; nunca vazia e sem ids repetidos.
pub struct Group<B: ActuatorBus> {
    name: String,
    actuators: Vec<ServoActuator<B>>,
}

impl<B: ActuatorBus> Group<B> {
    pub fn new(name: impl Into<String>, actuators: Vec<ServoActuator<B>>) -> Result<Self, ConfigError> {
        let name = name.into();
        if actuators.is_empty() {
            return Err(ConfigError::EmptyGroup(name));
        }

        let mut seen = HashSet::new();
        for actuator in &actuators {
            if !seen.insert(actuator.id()) {
                return Err(ConfigError::DuplicateActuator { group: name, id: actuator.id() });
            }
        }

        Ok(Self { name, actuators })
    }

    /// Cria um proxy por id, todos sobre o mesmo barramento e sink
    pub fn from_ids(
        name: impl Into<String>,
        ids: &[ActuatorId],
        bus: &SharedBus<B>,
        config: ServoConfig,
        events: &EventSink,
    ) -> Result<Self, ConfigError> {
        let actuators = ids
            .iter()
            .map(|&id| ServoActuator::new(id, bus.clone(), config, events.clone()))
            .collect();
        Self::new(name, actuators)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actuators(&self) -> &[ServoActuator<B>] {
        &self.actuators
    }

    /// Ids na ordem do grupo
    pub fn ids(&self) -> Vec<ActuatorId> {
        self.actuators.iter().map(ServoActuator::id).collect()
    }

    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }
}

impl<B: ActuatorBus> fmt::Debug for Group<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("ids", &self.ids())
            .finish()
    }
}

/// Goal reconhecido por atuador, imutável durante o movimento
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Goal {
    entries: Vec<(ActuatorId, Position)>,
}

impl Goal {
    pub fn get(&self, id: ActuatorId) -> Option<Position> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == id)
            .map(|(_, position)| *position)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActuatorId, Position)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(ActuatorId, Position)> for Goal {
    fn from_iter<I: IntoIterator<Item = (ActuatorId, Position)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

/// Parâmetros de um movimento de grupo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCommand {
    pub goal: Position,
    pub tolerance: Tolerance,
    pub speed: Speed,
}

impl MoveCommand {
    pub fn new(goal: Position, tolerance: Tolerance, speed: Speed) -> Self {
        Self { goal, tolerance, speed }
    }

    /// Valida contra a faixa do modelo de atuador
    pub fn validate(&self, range: &PositionRange) -> Result<(), ConfigError> {
        range.check(self.goal.ticks())?;
        if self.speed.value() > Speed::AX12A_MAX {
            return Err(RangeError {
                what: "speed",
                value: self.speed.value() as i64,
                min: 0,
                max: Speed::AX12A_MAX as i64,
            }
            .into());
        }
        if self.tolerance.ticks() > range.span() {
            return Err(RangeError {
                what: "tolerance",
                value: self.tolerance.ticks() as i64,
                min: 0,
                max: range.span() as i64,
            }
            .into());
        }
        Ok(())
    }
}

/// Estado de um atuador ao longo do movimento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorPhase {
    Idle,
    Armed,
    GoalSent,
    Polling,
    Correcting,
    Arrived,
    Disarmed,
}

impl fmt::Display for ActuatorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActuatorPhase::Idle => "idle",
            ActuatorPhase::Armed => "armed",
            ActuatorPhase::GoalSent => "goal_sent",
            ActuatorPhase::Polling => "polling",
            ActuatorPhase::Correcting => "correcting",
            ActuatorPhase::Arrived => "arrived",
            ActuatorPhase::Disarmed => "disarmed",
        };
        write!(f, "{}", name)
    }
}

/// Fase do movimento de grupo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Arm,
    Command,
    Poll,
    Disarm,
    Report,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Arm => "arm",
            Phase::Command => "command",
            Phase::Poll => "poll",
            Phase::Disarm => "disarm",
            Phase::Report => "report",
        };
        write!(f, "{}", name)
    }
}
