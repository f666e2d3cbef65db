//! # 🦾 hexa-actuator — Proxy de atuador
//!
//! Camada folha do HEXA: representa cada servo físico no barramento serial e
//! traduz intenções tipadas (torque, velocidade, goal, leitura de posição) em
//! transações de registrador.
//!
//! ## Arquitetura
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          ServoActuator (proxy)          │
//! │  set_torque  set_speed  set_goal        │
//! │  get_goal    get_position               │
//! └───────────────┬─────────────────────────┘
//!                 │ 1 transação + 1 evento por chamada
//!        ┌────────┴────────┐
//!        │    SharedBus    │ ← Connection (fecha no drop)
//!        └────────┬────────┘
//!                 ↓
//!     ActuatorBus (serial real | SimulatedBus)
//! ```
//!
//! ## Classificação de resultados
//!
//! Toda transação termina em um de três baldes:
//!
//! - **sucesso**
//! - **falha de transporte**: sem resposta válida (timeout, checksum)
//! - **falha de dispositivo**: resposta válida com byte de erro diferente de zero
//!
//! As duas falhas chegam ao chamador como [`ActuatorError`]. O resultado de
//! cada chamada também vira um [`ActuatorEvent`] estruturado no
//! [`EventSink`] e um registro `tracing` com os mesmos campos.
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use hexa_actuator::{ActuatorId, EventSink, Position, ServoActuator, ServoConfig, SharedBus, SimulatedBus};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let id = ActuatorId::new(1)?;
//! let bus = SharedBus::new(SimulatedBus::ax12a().with_servo(id, Position::new(0)));
//! let servo = ServoActuator::new(id, bus, ServoConfig::default(), EventSink::new());
//!
//! servo.set_torque(true)?;
//! servo.set_goal(Position::new(500))?;
//! assert_eq!(servo.get_goal()?, Position::new(500));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod types;
pub mod bus;
pub mod events;
pub mod servo;
pub mod sim;

pub use error::{ActuatorError, ActuatorResult, BusError, HardwareError, RangeError};
pub use types::{ActuatorId, Position, PositionRange, Speed, Tolerance, TorquePolarity};
pub use bus::{ActuatorBus, BusDriver, Connection, Register, RegisterMap, RegisterWidth, SharedBus};
pub use events::{ActuatorEvent, EventFilter, EventHandler, EventSink, Operation, Outcome};
pub use servo::{ServoActuator, ServoConfig};
pub use sim::{Access, DEFAULT_LOG_LIMIT, FaultKind, FaultRule, Motion, SimulatedBus, SimulatedDriver, Transaction};
