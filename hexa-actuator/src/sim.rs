//! Barramento simulado para testes sem hardware
//!
//! Mantém uma tabela de registradores por atuador, um modelo de movimento
//! avançado a cada leitura da posição atual, regras de injeção de falha e um
//! log limitado das transações mais recentes.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use crate::bus::{ActuatorBus, BusDriver, Register, RegisterMap};
use crate::error::{ActuatorError, ActuatorResult, BusError, HardwareError};
use crate::types::{ActuatorId, Position, PositionRange, TorquePolarity};

/// Como a posição atual evolui a cada leitura
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Motion {
    /// Chega ao alvo na primeira leitura com torque ligado
    Instant,
    /// Anda no máximo `n` ticks em direção ao alvo por leitura
    Step(u16),
    /// Devolve as leituras roteirizadas em ordem e mantém a última
    Script(VecDeque<u16>),
    /// Nunca se move
    Stuck,
}

impl Motion {
    pub fn script(readings: impl IntoIterator<Item = u16>) -> Self {
        Motion::Script(readings.into_iter().collect())
    }
}

/// Tipo de falha injetada
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Sem pacote de status
    Transport,
    /// Pacote de status com o byte de erro dado
    Device(u8),
}

/// Direção da transação
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

/// Regra de injeção de falha
///
/// Campos `None` casam com qualquer valor. `remaining = None` falha para sempre.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRule {
    pub kind: FaultKind,
    pub actuator: Option<ActuatorId>,
    pub address: Option<u16>,
    pub access: Option<Access>,
    pub value: Option<u16>,
    pub remaining: Option<u32>,
}

impl FaultRule {
    pub fn transport() -> Self {
        Self::new(FaultKind::Transport)
    }

    pub fn device(code: u8) -> Self {
        Self::new(FaultKind::Device(code))
    }

    fn new(kind: FaultKind) -> Self {
        Self {
            kind,
            actuator: None,
            address: None,
            access: None,
            value: None,
            remaining: None,
        }
    }

    pub fn on(mut self, id: ActuatorId) -> Self {
        self.actuator = Some(id);
        self
    }

    pub fn at(mut self, register: Register) -> Self {
        self.address = Some(register.address);
        self
    }

    pub fn reads(mut self) -> Self {
        self.access = Some(Access::Read);
        self
    }

    pub fn writes(mut self) -> Self {
        self.access = Some(Access::Write);
        self
    }

    /// Casa apenas escritas deste valor
    pub fn writing(mut self, value: u16) -> Self {
        self.access = Some(Access::Write);
        self.value = Some(value);
        self
    }

    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }

    pub fn forever(mut self) -> Self {
        self.remaining = None;
        self
    }

    fn matches(&self, id: ActuatorId, address: u16, access: Access, value: Option<u16>) -> bool {
        if self.remaining == Some(0) {
            return false;
        }
        self.actuator.is_none_or(|a| a == id)
            && self.address.is_none_or(|a| a == address)
            && self.access.is_none_or(|a| a == access)
            && self.value.is_none_or(|v| Some(v) == value)
    }
}

/// Transações mantidas no log por padrão
pub const DEFAULT_LOG_LIMIT: usize = 4096;

/// Entrada do log de transações
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub actuator: ActuatorId,
    pub access: Access,
    pub address: u16,
    /// Valor escrito, ou lido em caso de sucesso
    pub value: Option<u16>,
    pub fault: Option<FaultKind>,
}

#[derive(Debug, Clone)]
struct SimServo {
    torque: u16,
    speed: u16,
    goal: u16,
    present: u16,
    motion: Motion,
}

/// Barramento simulado
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    registers: RegisterMap,
    polarity: TorquePolarity,
    range: PositionRange,
    clamp_goals: bool,
    servos: BTreeMap<ActuatorId, SimServo>,
    faults: Vec<FaultRule>,
    log: VecDeque<Transaction>,
    log_limit: usize,
    closed: bool,
}

impl SimulatedBus {
    pub fn new(registers: RegisterMap) -> Self {
        Self {
            registers,
            polarity: TorquePolarity::default(),
            range: PositionRange::ax12a(),
            clamp_goals: false,
            servos: BTreeMap::new(),
            faults: Vec::new(),
            log: VecDeque::new(),
            log_limit: DEFAULT_LOG_LIMIT,
            closed: false,
        }
    }

    /// Barramento com a tabela do AX-12A
    pub fn ax12a() -> Self {
        Self::new(RegisterMap::ax12a())
    }

    pub fn with_servo(mut self, id: ActuatorId, start: Position) -> Self {
        self.add_servo(id, start);
        self
    }

    pub fn with_motion(mut self, id: ActuatorId, motion: Motion) -> Self {
        self.set_motion(id, motion);
        self
    }

    pub fn with_fault(mut self, rule: FaultRule) -> Self {
        self.inject(rule);
        self
    }

    pub fn with_polarity(mut self, polarity: TorquePolarity) -> Self {
        self.polarity = polarity;
        self
    }

    /// Faixa de posições do modelo simulado
    pub fn with_range(mut self, range: PositionRange) -> Self {
        self.range = range;
        self
    }

    /// Mantém só as `limit` transações mais recentes no log
    pub fn with_log_limit(mut self, limit: usize) -> Self {
        self.log_limit = limit;
        while self.log.len() > limit {
            self.log.pop_front();
        }
        self
    }

    /// Grampeia goals fora da faixa em vez de responder com erro de range
    pub fn clamping_goals(mut self) -> Self {
        self.clamp_goals = true;
        self
    }

    pub fn add_servo(&mut self, id: ActuatorId, start: Position) {
        self.servos.insert(
            id,
            SimServo {
                torque: self.polarity.disable,
                speed: 0,
                goal: start.ticks(),
                present: start.ticks(),
                motion: Motion::Instant,
            },
        );
    }

    pub fn set_motion(&mut self, id: ActuatorId, motion: Motion) {
        if let Some(servo) = self.servos.get_mut(&id) {
            servo.motion = motion;
        }
    }

    pub fn inject(&mut self, rule: FaultRule) {
        self.faults.push(rule);
    }

    /// Remove todas as regras de falha
    pub fn heal(&mut self) {
        self.faults.clear();
    }

    /// Transações ainda no log, da mais antiga para a mais recente
    pub fn transactions(&self) -> Vec<Transaction> {
        self.log.iter().cloned().collect()
    }

    /// Valores escritos com sucesso ou não em um registrador
    pub fn writes(&self, id: ActuatorId, register: Register) -> Vec<u16> {
        self.log
            .iter()
            .filter(|t| t.actuator == id && t.access == Access::Write && t.address == register.address)
            .filter_map(|t| t.value)
            .collect()
    }

    /// Número de tentativas de transação para um atuador e registrador
    pub fn attempts(&self, id: ActuatorId, register: Register, access: Access) -> usize {
        self.log
            .iter()
            .filter(|t| t.actuator == id && t.access == access && t.address == register.address)
            .count()
    }

    pub fn present_position(&self, id: ActuatorId) -> Option<Position> {
        self.servos.get(&id).map(|s| Position::new(s.present))
    }

    pub fn goal_position(&self, id: ActuatorId) -> Option<Position> {
        self.servos.get(&id).map(|s| Position::new(s.goal))
    }

    pub fn torque_enabled(&self, id: ActuatorId) -> Option<bool> {
        self.servos.get(&id).map(|s| s.torque == self.polarity.enable)
    }

    pub fn speed(&self, id: ActuatorId) -> Option<u16> {
        self.servos.get(&id).map(|s| s.speed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn check_fault(&mut self, id: ActuatorId, address: u16, access: Access, value: Option<u16>) -> Option<FaultKind> {
        let rule = self
            .faults
            .iter_mut()
            .find(|rule| rule.matches(id, address, access, value))?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.kind)
    }

    fn fail(kind: FaultKind) -> ActuatorError {
        match kind {
            FaultKind::Transport => ActuatorError::transport("[TxRxResult] There is no status packet!"),
            FaultKind::Device(code) => ActuatorError::device_fault(code),
        }
    }

    fn advance(servo: &mut SimServo, torque_on: bool) {
        match &mut servo.motion {
            Motion::Instant => {
                if torque_on {
                    servo.present = servo.goal;
                }
            }
            Motion::Step(step) => {
                if torque_on {
                    let step = *step;
                    servo.present = if servo.present < servo.goal {
                        servo.present.saturating_add(step).min(servo.goal)
                    } else {
                        servo.present.saturating_sub(step).max(servo.goal)
                    };
                }
            }
            Motion::Script(readings) => {
                if let Some(next) = readings.pop_front() {
                    servo.present = next;
                }
            }
            Motion::Stuck => {}
        }
    }

    fn record(&mut self, actuator: ActuatorId, access: Access, address: u16, value: Option<u16>, fault: Option<FaultKind>) {
        if self.log_limit == 0 {
            return;
        }
        self.log.push_back(Transaction { actuator, access, address, value, fault });
        while self.log.len() > self.log_limit {
            self.log.pop_front();
        }
    }
}

impl ActuatorBus for SimulatedBus {
    fn write_register(&mut self, id: ActuatorId, register: Register, value: u16) -> ActuatorResult<()> {
        if self.closed {
            return Err(ActuatorError::transport("port is closed"));
        }
        if let Some(kind) = self.check_fault(id, register.address, Access::Write, Some(value)) {
            self.record(id, Access::Write, register.address, Some(value), Some(kind));
            return Err(Self::fail(kind));
        }
        self.record(id, Access::Write, register.address, Some(value), None);

        let registers = self.registers;
        let range = self.range;
        let clamp = self.clamp_goals;
        let Some(servo) = self.servos.get_mut(&id) else {
            return Err(Self::fail(FaultKind::Transport));
        };
        if value > register.width.max_value() {
            return Err(ActuatorError::device_fault(HardwareError::RANGE));
        }

        if register == registers.torque_enable {
            servo.torque = value;
        } else if register == registers.moving_speed {
            servo.speed = value;
        } else if register == registers.goal_position {
            let position = Position::new(value);
            if range.contains(position) {
                servo.goal = value;
            } else if clamp {
                servo.goal = range.clamp(position).ticks();
            } else {
                return Err(ActuatorError::device_fault(HardwareError::RANGE));
            }
        } else {
            return Err(ActuatorError::device_fault(HardwareError::INSTRUCTION));
        }
        Ok(())
    }

    fn read_register(&mut self, id: ActuatorId, register: Register) -> ActuatorResult<u16> {
        if self.closed {
            return Err(ActuatorError::transport("port is closed"));
        }
        if let Some(kind) = self.check_fault(id, register.address, Access::Read, None) {
            self.record(id, Access::Read, register.address, None, Some(kind));
            return Err(Self::fail(kind));
        }

        let registers = self.registers;
        let enable = self.polarity.enable;
        let value = match self.servos.get_mut(&id) {
            None => Err(Self::fail(FaultKind::Transport)),
            Some(servo) if register == registers.present_position => {
                let torque_on = servo.torque == enable;
                Self::advance(servo, torque_on);
                Ok(servo.present)
            }
            Some(servo) if register == registers.goal_position => Ok(servo.goal),
            Some(servo) if register == registers.torque_enable => Ok(servo.torque),
            Some(servo) if register == registers.moving_speed => Ok(servo.speed),
            Some(_) => Err(ActuatorError::device_fault(HardwareError::INSTRUCTION)),
        };

        self.record(id, Access::Read, register.address, value.as_ref().ok().copied(), None);
        value
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Driver que entrega um barramento simulado pré-montado
///
/// Só pode ser aberto uma vez, como uma porta serial exclusiva.
#[derive(Debug)]
pub struct SimulatedDriver {
    bus: Mutex<Option<SimulatedBus>>,
}

impl SimulatedDriver {
    pub fn new(bus: SimulatedBus) -> Self {
        Self { bus: Mutex::new(Some(bus)) }
    }
}

impl BusDriver for SimulatedDriver {
    type Bus = SimulatedBus;

    fn open(&self, device: &str, _baud_rate: u32) -> Result<SimulatedBus, BusError> {
        let mut slot = self.bus.lock().map_err(|e| BusError::OpenFailed {
            device: device.to_string(),
            reason: e.to_string(),
        })?;
        slot.take().ok_or_else(|| BusError::OpenFailed {
            device: device.to_string(),
            reason: "port already in use".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u8) -> ActuatorId {
        ActuatorId::new(raw).unwrap()
    }

    const MAP: RegisterMap = RegisterMap::ax12a();

    #[test]
    fn test_step_motion_needs_torque() {
        let mut bus = SimulatedBus::ax12a()
            .with_servo(id(1), Position::new(0))
            .with_motion(id(1), Motion::Step(200));

        bus.write_register(id(1), MAP.goal_position, 500).unwrap();
        assert_eq!(bus.read_register(id(1), MAP.present_position).unwrap(), 0);

        bus.write_register(id(1), MAP.torque_enable, 1).unwrap();
        assert_eq!(bus.read_register(id(1), MAP.present_position).unwrap(), 200);
        assert_eq!(bus.read_register(id(1), MAP.present_position).unwrap(), 400);
        assert_eq!(bus.read_register(id(1), MAP.present_position).unwrap(), 500);
        assert_eq!(bus.read_register(id(1), MAP.present_position).unwrap(), 500);
    }

    #[test]
    fn test_step_motion_downwards() {
        let mut bus = SimulatedBus::ax12a()
            .with_servo(id(1), Position::new(900))
            .with_motion(id(1), Motion::Step(300));
        bus.write_register(id(1), MAP.torque_enable, 1).unwrap();
        bus.write_register(id(1), MAP.goal_position, 500).unwrap();
        assert_eq!(bus.read_register(id(1), MAP.present_position).unwrap(), 600);
        assert_eq!(bus.read_register(id(1), MAP.present_position).unwrap(), 500);
    }

    #[test]
    fn test_script_holds_last_reading() {
        let mut bus = SimulatedBus::ax12a()
            .with_servo(id(2), Position::new(0))
            .with_motion(id(2), Motion::script([200, 600]));
        assert_eq!(bus.read_register(id(2), MAP.present_position).unwrap(), 200);
        assert_eq!(bus.read_register(id(2), MAP.present_position).unwrap(), 600);
        assert_eq!(bus.read_register(id(2), MAP.present_position).unwrap(), 600);
    }

    #[test]
    fn test_finite_fault_then_success() {
        let mut bus = SimulatedBus::ax12a()
            .with_servo(id(1), Position::new(0))
            .with_fault(FaultRule::transport().on(id(1)).at(MAP.goal_position).times(2));

        assert!(bus.write_register(id(1), MAP.goal_position, 500).is_err());
        assert!(bus.write_register(id(1), MAP.goal_position, 500).is_err());
        assert!(bus.write_register(id(1), MAP.goal_position, 500).is_ok());
        assert_eq!(bus.attempts(id(1), MAP.goal_position, Access::Write), 3);
        assert_eq!(bus.goal_position(id(1)), Some(Position::new(500)));
    }

    #[test]
    fn test_transaction_log_keeps_most_recent() {
        let mut bus = SimulatedBus::ax12a()
            .with_servo(id(1), Position::new(0))
            .with_log_limit(3)
            .with_fault(FaultRule::transport().on(id(1)).at(MAP.goal_position).times(1));

        bus.write_register(id(1), MAP.torque_enable, 1).unwrap();
        assert!(bus.write_register(id(1), MAP.goal_position, 300).is_err());
        bus.write_register(id(1), MAP.goal_position, 300).unwrap();
        assert_eq!(bus.read_register(id(1), MAP.present_position).unwrap(), 300);

        let log = bus.transactions();
        assert_eq!(log.len(), 3);
        assert_eq!(
            log[0],
            Transaction {
                actuator: id(1),
                access: Access::Write,
                address: MAP.goal_position.address,
                value: Some(300),
                fault: Some(FaultKind::Transport),
            }
        );
        assert_eq!(log[1].fault, None);
        assert_eq!(log[2].access, Access::Read);
        assert_eq!(log[2].value, Some(300));
        assert_eq!(bus.present_position(id(1)), Some(Position::new(300)));
    }

    #[test]
    fn test_fault_matches_written_value() {
        let mut bus = SimulatedBus::ax12a()
            .with_servo(id(1), Position::new(0))
            .with_fault(FaultRule::device(HardwareError::OVERLOAD).at(MAP.torque_enable).writing(1));

        assert!(bus.write_register(id(1), MAP.torque_enable, 0).is_ok());
        let err = bus.write_register(id(1), MAP.torque_enable, 1).unwrap_err();
        assert!(err.is_device_fault());
    }

    #[test]
    fn test_out_of_range_goal() {
        let mut bus = SimulatedBus::ax12a().with_servo(id(1), Position::new(0));
        let err = bus.write_register(id(1), MAP.goal_position, 2000).unwrap_err();
        assert_eq!(err, ActuatorError::device_fault(HardwareError::RANGE));
    }

    #[test]
    fn test_clamping_goals() {
        let mut bus = SimulatedBus::ax12a()
            .with_range(PositionRange::new(100, 900).unwrap())
            .clamping_goals()
            .with_servo(id(1), Position::new(500));
        bus.write_register(id(1), MAP.goal_position, 950).unwrap();
        assert_eq!(bus.read_register(id(1), MAP.goal_position).unwrap(), 900);
    }

    #[test]
    fn test_byte_register_overflow() {
        let mut bus = SimulatedBus::ax12a().with_servo(id(1), Position::new(0));
        assert!(bus.write_register(id(1), MAP.torque_enable, 256).is_err());
    }

    #[test]
    fn test_closed_bus_fails() {
        let mut bus = SimulatedBus::ax12a().with_servo(id(1), Position::new(0));
        bus.close();
        assert!(bus.is_closed());
        assert!(bus.read_register(id(1), MAP.present_position).unwrap_err().is_transport());
    }

    #[test]
    fn test_driver_opens_once() {
        let driver = SimulatedDriver::new(SimulatedBus::ax12a());
        assert!(driver.open("sim", 1_000_000).is_ok());
        assert!(matches!(driver.open("sim", 1_000_000), Err(BusError::OpenFailed { .. })));
    }

    #[test]
    fn test_heal_clears_faults() {
        let mut bus = SimulatedBus::ax12a()
            .with_servo(id(1), Position::new(0))
            .with_fault(FaultRule::transport().forever());
        assert!(bus.read_register(id(1), MAP.goal_position).is_err());
        bus.heal();
        assert!(bus.read_register(id(1), MAP.goal_position).is_ok());
    }
}
