//! # 🎯 hexa-convergence — Controlador de convergência
//!
//! Coordena grupos de atuadores até que todos cheguem ao goal, aplicando
//! entrega pelo menos uma vez a cada comando.
//!
//! ## Arquitetura
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConvergenceController                       │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │  Arm → Command → Poll ⇄ Correct → Disarm → Report     │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │  RetryPolicy (tentativas | backoff | cancelamento)    │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └────────────────────────────┬────────────────────────────────┘
//!                              ↓
//!                 Group → ServoActuator (hexa-actuator)
//! ```
//!
//! ## Exemplo
//!
//! ```rust
//! use hexa_actuator::{EventSink, SharedBus, SimulatedBus};
//! use hexa_convergence::{ConvergenceController, RigConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rig = RigConfig::default();
//! let mut sim = SimulatedBus::ax12a();
//! for id in rig.actuator_ids()? {
//!     sim.add_servo(id, hexa_actuator::Position::new(0));
//! }
//! let bus = SharedBus::new(sim);
//! let groups = rig.build_groups(&bus, &EventSink::new())?;
//!
//! let controller = ConvergenceController::new(rig.controller_config()?);
//! let reports = controller.run_groups(&groups, rig.move_command()?)?;
//! assert_eq!(reports.len(), 6);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod retry;
pub mod group;
pub mod controller;
pub mod config;

pub use error::{AbortReason, ConfigError, ControlError, ControlResult, ConvergenceError};
pub use retry::{Attempt, Backoff, BackoffStrategy, CancellationToken, RetryAbort, RetryPolicy, Watchdog};
pub use group::{ActuatorPhase, Goal, Group, MoveCommand, Phase};
pub use controller::{ActuatorReport, ControllerConfig, ConvergenceController, ConvergenceReport};
pub use config::{
    BusSection, GroupSection, LimitsSection, MotionSection, RegisterSection, RetrySection, RigConfig, RIG_FILE,
};
