//! Eventos de status por operação
//!
//! Cada chamada do proxy produz exatamente um [`ActuatorEvent`] com o id do
//! atuador, a operação e o resultado. O [`EventSink`] guarda um histórico
//! limitado e repassa os eventos aos handlers inscritos.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use serde::{Deserialize, Serialize};
use crate::error::ActuatorError;
use crate::types::{ActuatorId, Position, Speed};

/// Operação do proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    SetTorque { enabled: bool },
    SetSpeed { speed: Speed },
    SetGoal { position: Position },
    GetGoal,
    GetPosition,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SetTorque { .. } => "set_torque",
            Operation::SetSpeed { .. } => "set_speed",
            Operation::SetGoal { .. } => "set_goal",
            Operation::GetGoal => "get_goal",
            Operation::GetPosition => "get_position",
        }
    }

    pub fn is_set_goal(&self) -> bool {
        matches!(self, Operation::SetGoal { .. })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::SetTorque { enabled: true } => write!(f, "torque enable"),
            Operation::SetTorque { enabled: false } => write!(f, "torque disable"),
            Operation::SetSpeed { speed } => write!(f, "speed set to {}", speed),
            Operation::SetGoal { position } => write!(f, "goal set to {}", position),
            Operation::GetGoal => write!(f, "goal position"),
            Operation::GetPosition => write!(f, "current position"),
        }
    }
}

/// Resultado classificado de uma transação
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Sucesso; leituras carregam o valor lido
    Success { value: Option<Position> },
    TransportFailure { cause: String },
    DeviceFault { code: u8, cause: String },
}

impl Outcome {
    pub fn from_error(err: &ActuatorError) -> Self {
        match err {
            ActuatorError::Transport(cause) => Outcome::TransportFailure { cause: cause.clone() },
            ActuatorError::DeviceFault { code, description } => Outcome::DeviceFault {
                code: *code,
                cause: description.clone(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::TransportFailure { .. } => "transport_failure",
            Outcome::DeviceFault { .. } => "device_fault",
        }
    }
}

/// Evento de status emitido por operação do proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorEvent {
    /// Número de sequência monotônico dentro do sink
    pub sequence: u64,
    pub actuator: ActuatorId,
    pub operation: Operation,
    pub outcome: Outcome,
}

impl fmt::Display for ActuatorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Success { value: Some(value) } => {
                write!(f, "Servo ID {} {}: {}", self.actuator, self.operation, value)
            }
            Outcome::Success { value: None } => {
                write!(f, "Servo ID {} {}", self.actuator, self.operation)
            }
            Outcome::TransportFailure { cause } | Outcome::DeviceFault { cause, .. } => {
                write!(f, "Servo ID {} {} failed: {}", self.actuator, self.operation.name(), cause)
            }
        }
    }
}

/// Filtro de eventos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFilter {
    All,
    /// Eventos de um atuador
    Actuator(ActuatorId),
    /// Apenas comandos de goal
    SetGoal,
    /// Falhas de transporte ou de dispositivo
    Failures,
}

impl EventFilter {
    pub fn matches(&self, event: &ActuatorEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Actuator(id) => event.actuator == *id,
            EventFilter::SetGoal => event.operation.is_set_goal(),
            EventFilter::Failures => !event.outcome.is_success(),
        }
    }
}

/// Handler de eventos (callback)
pub type EventHandler = Arc<dyn Fn(&ActuatorEvent) + Send + Sync>;

/// Destino dos eventos de status
#[derive(Clone)]
pub struct EventSink {
    handlers: Arc<Mutex<Vec<(EventFilter, EventHandler)>>>,
    history: Arc<Mutex<VecDeque<ActuatorEvent>>>,
    max_history: usize,
    sequence: Arc<AtomicU64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventSink {
    pub fn new() -> Self {
        Self::with_history(1024)
    }

    /// Histórico limitado a `max_history` eventos (0 = sem histórico)
    pub fn with_history(max_history: usize) -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
            history: Arc::new(Mutex::new(VecDeque::new())),
            max_history,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe<F>(&self, filter: EventFilter, handler: F)
    where
        F: Fn(&ActuatorEvent) + Send + Sync + 'static,
    {
        lock(&self.handlers).push((filter, Arc::new(handler)));
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).len()
    }

    /// Registra e distribui um evento
    pub fn emit(&self, actuator: ActuatorId, operation: Operation, outcome: Outcome) -> ActuatorEvent {
        let event = ActuatorEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            actuator,
            operation,
            outcome,
        };

        if self.max_history > 0 {
            let mut history = lock(&self.history);
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        // Handlers rodam fora do lock para poderem consultar o sink.
        let handlers: Vec<(EventFilter, EventHandler)> = lock(&self.handlers).clone();
        for (filter, handler) in handlers {
            if filter.matches(&event) {
                handler(&event);
            }
        }

        event
    }

    pub fn history(&self) -> Vec<ActuatorEvent> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Eventos do histórico que passam pelo filtro
    pub fn filtered(&self, filter: EventFilter) -> Vec<ActuatorEvent> {
        lock(&self.history)
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect()
    }

    /// Total de eventos emitidos (inclui os que saíram do histórico)
    pub fn emitted(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("max_history", &self.max_history)
            .field("history_len", &lock(&self.history).len())
            .field("emitted", &self.emitted())
            .finish()
    }
}
