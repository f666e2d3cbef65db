//! Tipos de dados para atuadores no barramento
//!
//! Posições e velocidades estão sempre em unidades do dispositivo (ticks);
//! nenhuma conversão para ângulo acontece aqui.

use std::fmt;
use serde::{Deserialize, Serialize};
use crate::error::RangeError;

/// Identificador de um atuador no barramento
///
/// Atribuído pela configuração. `0` e os ids de broadcast (`254`, `255`)
/// são rejeitados.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ActuatorId(u8);

impl ActuatorId {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 253;

    pub fn new(raw: u8) -> Result<Self, RangeError> {
        if !(Self::MIN..=Self::MAX).contains(&raw) {
            return Err(RangeError {
                what: "actuator id",
                value: raw as i64,
                min: Self::MIN as i64,
                max: Self::MAX as i64,
            });
        }
        Ok(Self(raw))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for ActuatorId {
    type Error = RangeError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<ActuatorId> for u8 {
    fn from(id: ActuatorId) -> Self {
        id.0
    }
}

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Posição em ticks do dispositivo
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(u16);

impl Position {
    pub const fn new(ticks: u16) -> Self {
        Self(ticks)
    }

    pub fn ticks(&self) -> u16 {
        self.0
    }

    /// Distância absoluta entre duas posições
    pub fn distance(&self, other: Position) -> u16 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Faixa de posições aceita pelo modelo de atuador
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRange {
    pub min: Position,
    pub max: Position,
}

impl PositionRange {
    pub fn new(min: u16, max: u16) -> Result<Self, RangeError> {
        if min > max {
            return Err(RangeError {
                what: "position_min",
                value: min as i64,
                min: 0,
                max: max as i64,
            });
        }
        Ok(Self { min: Position(min), max: Position(max) })
    }

    /// Faixa do AX-12A (0..=1023)
    pub const fn ax12a() -> Self {
        Self { min: Position(0), max: Position(1023) }
    }

    pub fn contains(&self, position: Position) -> bool {
        position >= self.min && position <= self.max
    }

    /// Valida uma posição vinda de configuração
    pub fn check(&self, ticks: u16) -> Result<Position, RangeError> {
        let position = Position(ticks);
        if !self.contains(position) {
            return Err(RangeError {
                what: "position",
                value: ticks as i64,
                min: self.min.0 as i64,
                max: self.max.0 as i64,
            });
        }
        Ok(position)
    }

    pub fn clamp(&self, position: Position) -> Position {
        Position(position.0.clamp(self.min.0, self.max.0))
    }

    /// Amplitude da faixa em ticks
    pub fn span(&self) -> u16 {
        self.max.0 - self.min.0
    }
}

impl Default for PositionRange {
    fn default() -> Self {
        Self::ax12a()
    }
}

/// Velocidade de movimento em unidades do dispositivo
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Speed(u16);

impl Speed {
    /// Velocidade máxima do AX-12A
    pub const AX12A_MAX: u16 = 1023;

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tolerância de convergência: chegou quando `|atual - alvo| <= T`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tolerance(u16);

impl Tolerance {
    pub const fn new(ticks: u16) -> Self {
        Self(ticks)
    }

    pub fn ticks(&self) -> u16 {
        self.0
    }

    /// Verifica se `current` está dentro da tolerância de `goal`
    pub fn admits(&self, current: Position, goal: Position) -> bool {
        current.distance(goal) <= self.0
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "±{}", self.0)
    }
}

/// Valores escritos no registrador de torque
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorquePolarity {
    pub enable: u16,
    pub disable: u16,
}

impl TorquePolarity {
    pub fn value(&self, enabled: bool) -> u16 {
        if enabled { self.enable } else { self.disable }
    }
}

impl Default for TorquePolarity {
    fn default() -> Self {
        Self { enable: 1, disable: 0 }
    }
}
