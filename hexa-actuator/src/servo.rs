//! Proxy de servo no barramento
//!
//! O estado verdadeiro (torque, velocidade, posição) vive no dispositivo.
//! Toda leitura é autoritativa e toda escrita é um comando; o proxy não
//! guarda cache.

use std::fmt;
use serde::{Deserialize, Serialize};
use crate::bus::{ActuatorBus, RegisterMap, SharedBus};
use crate::error::ActuatorResult;
use crate::events::{EventSink, Operation, Outcome};
use crate::types::{ActuatorId, Position, Speed, TorquePolarity};

/// Configuração do modelo de servo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServoConfig {
    pub registers: RegisterMap,
    pub polarity: TorquePolarity,
}

/// Handle de um atuador físico
///
/// Cada operação emite exatamente uma transação e um evento de status.
pub struct ServoActuator<B: ActuatorBus> {
    id: ActuatorId,
    bus: SharedBus<B>,
    config: ServoConfig,
    events: EventSink,
}

impl<B: ActuatorBus> Clone for ServoActuator<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            bus: self.bus.clone(),
            config: self.config,
            events: self.events.clone(),
        }
    }
}

impl<B: ActuatorBus> fmt::Debug for ServoActuator<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServoActuator")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}

impl<B: ActuatorBus> ServoActuator<B> {
    pub fn new(id: ActuatorId, bus: SharedBus<B>, config: ServoConfig, events: EventSink) -> Self {
        Self { id, bus, config, events }
    }

    pub fn id(&self) -> ActuatorId {
        self.id
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Liga ou desliga o torque
    pub fn set_torque(&self, enabled: bool) -> ActuatorResult<()> {
        let register = self.config.registers.torque_enable;
        let value = self.config.polarity.value(enabled);
        let result = self.bus.write(self.id, register, value);
        self.report(Operation::SetTorque { enabled }, result, |_| None)
    }

    /// Define a velocidade de movimento
    pub fn set_speed(&self, speed: Speed) -> ActuatorResult<()> {
        let register = self.config.registers.moving_speed;
        let result = self.bus.write(self.id, register, speed.value());
        self.report(Operation::SetSpeed { speed }, result, |_| None)
    }

    /// Envia posição alvo
    pub fn set_goal(&self, position: Position) -> ActuatorResult<()> {
        let register = self.config.registers.goal_position;
        let result = self.bus.write(self.id, register, position.ticks());
        self.report(Operation::SetGoal { position }, result, |_| None)
    }

    /// Lê a posição alvo reconhecida pelo dispositivo
    pub fn get_goal(&self) -> ActuatorResult<Position> {
        let register = self.config.registers.goal_position;
        let result = self.bus.read(self.id, register).map(Position::new);
        self.report(Operation::GetGoal, result, |p| Some(*p))
    }

    /// Lê a posição atual
    pub fn get_position(&self) -> ActuatorResult<Position> {
        let register = self.config.registers.present_position;
        let result = self.bus.read(self.id, register).map(Position::new);
        self.report(Operation::GetPosition, result, |p| Some(*p))
    }

    fn report<T>(
        &self,
        operation: Operation,
        result: ActuatorResult<T>,
        value: impl Fn(&T) -> Option<Position>,
    ) -> ActuatorResult<T> {
        let outcome = match &result {
            Ok(v) => Outcome::Success { value: value(v) },
            Err(err) => Outcome::from_error(err),
        };

        match &outcome {
            Outcome::Success { value } => tracing::info!(
                actuator = self.id.get(),
                operation = operation.name(),
                outcome = outcome.label(),
                value = value.map(|p| p.ticks()),
                "Servo ID {} {}",
                self.id,
                operation
            ),
            Outcome::TransportFailure { cause } | Outcome::DeviceFault { cause, .. } => tracing::warn!(
                actuator = self.id.get(),
                operation = operation.name(),
                outcome = outcome.label(),
                "Servo ID {} {}",
                self.id,
                cause
            ),
        }

        self.events.emit(self.id, operation, outcome);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventFilter;
    use crate::sim::{FaultRule, SimulatedBus};

    fn id(raw: u8) -> ActuatorId {
        ActuatorId::new(raw).unwrap()
    }

    fn servo_on(bus: SimulatedBus, raw: u8) -> (ServoActuator<SimulatedBus>, SharedBus<SimulatedBus>) {
        let shared = SharedBus::new(bus);
        let servo = ServoActuator::new(id(raw), shared.clone(), ServoConfig::default(), EventSink::new());
        (servo, shared)
    }

    #[test]
    fn test_set_torque_writes_polarity() {
        let (servo, bus) = servo_on(SimulatedBus::ax12a().with_servo(id(1), Position::new(0)), 1);
        servo.set_torque(true).unwrap();
        assert!(bus.with_bus(|b| b.torque_enabled(id(1))).unwrap());
        servo.set_torque(false).unwrap();
        assert!(!bus.with_bus(|b| b.torque_enabled(id(1))).unwrap());
    }

    #[test]
    fn test_custom_polarity() {
        let polarity = TorquePolarity { enable: 0, disable: 1 };
        let sim = SimulatedBus::ax12a()
            .with_polarity(polarity)
            .with_servo(id(2), Position::new(0));
        let shared = SharedBus::new(sim);
        let config = ServoConfig { polarity, ..Default::default() };
        let servo = ServoActuator::new(id(2), shared.clone(), config, EventSink::new());

        servo.set_torque(true).unwrap();
        let writes = shared.with_bus(|b| b.writes(id(2), RegisterMap::ax12a().torque_enable));
        assert_eq!(writes, vec![0]);
    }

    #[test]
    fn test_goal_round_trip() {
        let (servo, _) = servo_on(SimulatedBus::ax12a().with_servo(id(3), Position::new(0)), 3);
        servo.set_goal(Position::new(500)).unwrap();
        assert_eq!(servo.get_goal().unwrap(), Position::new(500));
    }

    #[test]
    fn test_position_zero_is_a_value() {
        let (servo, _) = servo_on(SimulatedBus::ax12a().with_servo(id(4), Position::new(0)), 4);
        assert_eq!(servo.get_position().unwrap(), Position::new(0));
    }

    #[test]
    fn test_every_call_emits_one_event() {
        let (servo, _) = servo_on(SimulatedBus::ax12a().with_servo(id(1), Position::new(0)), 1);
        servo.set_torque(true).unwrap();
        servo.set_speed(Speed::new(100)).unwrap();
        servo.set_goal(Position::new(500)).unwrap();
        servo.get_goal().unwrap();
        servo.get_position().unwrap();

        let ops: Vec<&str> = servo.events().history().iter().map(|e| e.operation.name()).collect();
        assert_eq!(ops, vec!["set_torque", "set_speed", "set_goal", "get_goal", "get_position"]);
    }

    #[test]
    fn test_failures_are_classified() {
        let sim = SimulatedBus::ax12a()
            .with_servo(id(1), Position::new(0))
            .with_fault(FaultRule::transport().on(id(1)).times(1))
            .with_fault(FaultRule::device(0x20).on(id(1)).times(1));
        let (servo, _) = servo_on(sim, 1);

        let first = servo.get_position().unwrap_err();
        assert!(first.is_transport());
        let second = servo.get_position().unwrap_err();
        assert!(second.is_device_fault());
        assert!(servo.get_position().is_ok());

        let failures = servo.events().filtered(EventFilter::Failures);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].outcome.label(), "transport_failure");
        assert_eq!(failures[1].outcome.label(), "device_fault");
    }

    #[test]
    fn test_unknown_actuator_times_out() {
        let (servo, _) = servo_on(SimulatedBus::ax12a(), 9);
        let err = servo.get_position().unwrap_err();
        assert!(err.is_transport());
    }
}
