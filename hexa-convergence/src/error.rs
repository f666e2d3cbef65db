//! Erros do controlador de convergência

use std::fmt;
use thiserror::Error;
use hexa_actuator::{ActuatorError, ActuatorId, BusError, RangeError};
use crate::group::Phase;
use crate::retry::RetryAbort;

pub type ControlResult<T> = Result<T, ControlError>;

/// Configuração inválida, rejeitada antes de qualquer transação
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Dispositivo ou baud rate inválido
    #[error("Invalid bus settings: {0}")]
    Bus(#[from] BusError),

    /// Grupo sem atuadores
    #[error("Group {0:?} has no actuators")]
    EmptyGroup(String),

    /// Mesmo id repetido dentro de um grupo
    #[error("Actuator {id} appears more than once in group {group:?}")]
    DuplicateActuator { group: String, id: ActuatorId },

    /// Mesmo id em mais de um grupo
    #[error("Actuator {0} is assigned to more than one group")]
    SharedActuator(ActuatorId),

    /// Id, posição, velocidade ou tolerância fora da faixa
    #[error("Out of range: {0}")]
    OutOfRange(#[from] RangeError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Falha ao ler ou interpretar o arquivo do rig
    #[error("Failed to load rig file: {0}")]
    Load(String),
}

/// Motivo do abandono de um movimento
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Limite de tentativas de uma operação esgotado
    AttemptsExhausted { attempts: u32, last_error: ActuatorError },
    /// Falha de dispositivo com retry desabilitado para esse balde
    DeviceFault(ActuatorError),
    Cancelled,
    TimedOut,
    /// Limite de iterações do loop de polling atingido
    PollLimit { polls: u32 },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::AttemptsExhausted { attempts, last_error } => {
                write!(f, "gave up after {} attempts ({})", attempts, last_error)
            }
            AbortReason::DeviceFault(err) => write!(f, "{}", err),
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::TimedOut => write!(f, "timed out"),
            AbortReason::PollLimit { polls } => write!(f, "not converged after {} polls", polls),
        }
    }
}

impl From<RetryAbort> for AbortReason {
    fn from(abort: RetryAbort) -> Self {
        match abort {
            RetryAbort::Exhausted { attempts, last_error } => {
                AbortReason::AttemptsExhausted { attempts, last_error }
            }
            RetryAbort::DeviceFault(err) => AbortReason::DeviceFault(err),
            RetryAbort::Cancelled => AbortReason::Cancelled,
            RetryAbort::TimedOut => AbortReason::TimedOut,
        }
    }
}

/// Movimento abandonado por um limite configurado
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Group {group:?} aborted during {phase}: {reason} ({} actuator(s) remaining)", .actuators_remaining.len())]
pub struct ConvergenceError {
    pub group: String,
    pub reason: AbortReason,
    pub phase: Phase,
    /// Atuadores que não completaram a fase em que o movimento parou
    pub actuators_remaining: Vec<ActuatorId>,
}

/// Erros do controlador
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    /// Thread de um grupo concorrente entrou em pânico
    #[error("Worker for group {0:?} panicked")]
    WorkerPanicked(String),
}

impl ControlError {
    /// Erro de convergência, se for o caso
    pub fn as_convergence(&self) -> Option<&ConvergenceError> {
        match self {
            ControlError::Convergence(err) => Some(err),
            _ => None,
        }
    }
}
