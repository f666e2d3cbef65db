//! Abstração do barramento de atuadores
//!
//! O barramento é half-duplex: uma requisição em voo por vez. [`SharedBus`]
//! serializa o acesso de todos os proxies e [`Connection`] garante que o
//! barramento seja fechado em qualquer caminho de saída.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use serde::{Deserialize, Serialize};
use crate::error::{ActuatorError, ActuatorResult, BusError};
use crate::types::ActuatorId;

/// Largura de um registrador na tabela de controle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RegisterWidth {
    /// 1 byte
    Byte,
    /// 2 bytes
    Word,
}

impl RegisterWidth {
    pub fn bytes(&self) -> u8 {
        match self {
            RegisterWidth::Byte => 1,
            RegisterWidth::Word => 2,
        }
    }

    /// Maior valor representável
    pub fn max_value(&self) -> u16 {
        match self {
            RegisterWidth::Byte => u8::MAX as u16,
            RegisterWidth::Word => u16::MAX,
        }
    }
}

impl TryFrom<u8> for RegisterWidth {
    type Error = String;

    fn try_from(bytes: u8) -> Result<Self, Self::Error> {
        match bytes {
            1 => Ok(RegisterWidth::Byte),
            2 => Ok(RegisterWidth::Word),
            other => Err(format!("register width must be 1 or 2 bytes, got {}", other)),
        }
    }
}

impl From<RegisterWidth> for u8 {
    fn from(width: RegisterWidth) -> Self {
        width.bytes()
    }
}

/// Endereço e largura de um campo lógico
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Register {
    pub address: u16,
    pub width: RegisterWidth,
}

impl Register {
    pub const fn byte(address: u16) -> Self {
        Self { address, width: RegisterWidth::Byte }
    }

    pub const fn word(address: u16) -> Self {
        Self { address, width: RegisterWidth::Word }
    }
}

/// Tabela de registradores consumida pelo proxy
///
/// Específica do modelo de atuador; vem da configuração.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMap {
    pub torque_enable: Register,
    pub goal_position: Register,
    pub present_position: Register,
    pub moving_speed: Register,
}

impl RegisterMap {
    /// Tabela de controle do AX-12A (protocolo 1.0)
    pub const fn ax12a() -> Self {
        Self {
            torque_enable: Register::byte(24),
            goal_position: Register::word(30),
            present_position: Register::word(36),
            moving_speed: Register::word(32),
        }
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::ax12a()
    }
}

/// Transações de registrador sobre o barramento
///
/// Cada chamada é exatamente uma transação requisição/resposta.
pub trait ActuatorBus: Send {
    /// Escreve `value` no registrador do atuador `id`
    fn write_register(&mut self, id: ActuatorId, register: Register, value: u16) -> ActuatorResult<()>;

    /// Lê o registrador do atuador `id`
    fn read_register(&mut self, id: ActuatorId, register: Register) -> ActuatorResult<u16>;

    /// Libera o transporte subjacente
    fn close(&mut self) {}
}

impl<B: ActuatorBus + ?Sized> ActuatorBus for Box<B> {
    fn write_register(&mut self, id: ActuatorId, register: Register, value: u16) -> ActuatorResult<()> {
        (**self).write_register(id, register, value)
    }

    fn read_register(&mut self, id: ActuatorId, register: Register) -> ActuatorResult<u16> {
        (**self).read_register(id, register)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Abre barramentos a partir de um identificador de dispositivo
pub trait BusDriver {
    type Bus: ActuatorBus;

    fn open(&self, device: &str, baud_rate: u32) -> Result<Self::Bus, BusError>;
}

struct BusSlot<B> {
    bus: B,
    open: bool,
    transactions: u64,
}

/// Handle compartilhado para o barramento
///
/// Clones apontam para o mesmo barramento; cada transação segura o lock
/// durante exatamente uma requisição/resposta.
pub struct SharedBus<B> {
    slot: Arc<Mutex<BusSlot<B>>>,
}

impl<B> Clone for SharedBus<B> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot) }
    }
}

impl<B: ActuatorBus> SharedBus<B> {
    pub fn new(bus: B) -> Self {
        Self {
            slot: Arc::new(Mutex::new(BusSlot { bus, open: true, transactions: 0 })),
        }
    }

    // A panicked holder leaves the bus itself intact.
    fn lock(&self) -> MutexGuard<'_, BusSlot<B>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Escrita serializada
    pub fn write(&self, id: ActuatorId, register: Register, value: u16) -> ActuatorResult<()> {
        let mut slot = self.lock();
        if !slot.open {
            return Err(ActuatorError::transport("port is closed"));
        }
        slot.transactions += 1;
        slot.bus.write_register(id, register, value)
    }

    /// Leitura serializada
    pub fn read(&self, id: ActuatorId, register: Register) -> ActuatorResult<u16> {
        let mut slot = self.lock();
        if !slot.open {
            return Err(ActuatorError::transport("port is closed"));
        }
        slot.transactions += 1;
        slot.bus.read_register(id, register)
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Total de transações tentadas desde a abertura
    pub fn transaction_count(&self) -> u64 {
        self.lock().transactions
    }

    /// Acesso direto ao barramento (inspeção em testes e simulação)
    pub fn with_bus<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        let mut slot = self.lock();
        f(&mut slot.bus)
    }

    fn close(&self) {
        let mut slot = self.lock();
        if slot.open {
            slot.open = false;
            slot.bus.close();
        }
    }
}

impl<B> fmt::Debug for SharedBus<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBus")
            .field("handles", &Arc::strong_count(&self.slot))
            .finish()
    }
}

/// Conexão com o barramento, fechada ao sair de escopo
pub struct Connection<B: ActuatorBus> {
    bus: SharedBus<B>,
    device: String,
    baud_rate: u32,
}

impl<B: ActuatorBus> Connection<B> {
    /// Abre o dispositivo através do driver
    pub fn open<D>(driver: &D, device: &str, baud_rate: u32) -> Result<Self, BusError>
    where
        D: BusDriver<Bus = B>,
    {
        if device.trim().is_empty() {
            return Err(BusError::InvalidDevice(device.to_string()));
        }
        if baud_rate == 0 {
            return Err(BusError::BaudRate(baud_rate));
        }

        let bus = driver.open(device, baud_rate)?;
        tracing::info!(device, baud_rate, "Succeeded to open the port");
        Ok(Self::from_bus(bus, device, baud_rate))
    }

    /// Envolve um barramento já aberto
    pub fn from_bus(bus: B, device: &str, baud_rate: u32) -> Self {
        Self {
            bus: SharedBus::new(bus),
            device: device.to_string(),
            baud_rate,
        }
    }

    /// Novo handle para o barramento
    pub fn bus(&self) -> SharedBus<B> {
        self.bus.clone()
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Fecha explicitamente (equivalente a `drop`)
    pub fn close(self) {}
}

impl<B: ActuatorBus> Drop for Connection<B> {
    fn drop(&mut self) {
        self.bus.close();
        tracing::info!(device = %self.device, "port closed");
    }
}

impl<B: ActuatorBus> fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("device", &self.device)
            .field("baud_rate", &self.baud_rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct EchoBus {
        value: u16,
        closed: Arc<AtomicBool>,
    }

    impl ActuatorBus for EchoBus {
        fn write_register(&mut self, _id: ActuatorId, _register: Register, value: u16) -> ActuatorResult<()> {
            self.value = value;
            Ok(())
        }

        fn read_register(&mut self, _id: ActuatorId, _register: Register) -> ActuatorResult<u16> {
            Ok(self.value)
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct EchoDriver {
        closed: Arc<AtomicBool>,
    }

    impl BusDriver for EchoDriver {
        type Bus = EchoBus;

        fn open(&self, _device: &str, _baud_rate: u32) -> Result<EchoBus, BusError> {
            Ok(EchoBus { value: 0, closed: self.closed.clone() })
        }
    }

    fn id(raw: u8) -> ActuatorId {
        ActuatorId::new(raw).unwrap()
    }

    #[test]
    fn test_register_width() {
        assert_eq!(RegisterWidth::Byte.bytes(), 1);
        assert_eq!(RegisterWidth::Word.max_value(), u16::MAX);
        assert!(RegisterWidth::try_from(3).is_err());
    }

    #[test]
    fn test_ax12a_map() {
        let map = RegisterMap::ax12a();
        assert_eq!(map.torque_enable, Register::byte(24));
        assert_eq!(map.goal_position, Register::word(30));
        assert_eq!(map.present_position, Register::word(36));
        assert_eq!(map.moving_speed, Register::word(32));
    }

    #[test]
    fn test_shared_bus_counts_transactions() {
        let closed = Arc::new(AtomicBool::new(false));
        let bus = SharedBus::new(EchoBus { value: 0, closed });
        let other = bus.clone();

        bus.write(id(1), Register::word(30), 512).unwrap();
        assert_eq!(other.read(id(1), Register::word(30)).unwrap(), 512);
        assert_eq!(bus.transaction_count(), 2);
    }

    #[test]
    fn test_connection_open_validates() {
        let driver = EchoDriver { closed: Arc::new(AtomicBool::new(false)) };
        assert_eq!(
            Connection::open(&driver, "  ", 1_000_000).unwrap_err(),
            BusError::InvalidDevice("  ".into())
        );
        assert_eq!(
            Connection::open(&driver, "/dev/ttyUSB0", 0).unwrap_err(),
            BusError::BaudRate(0)
        );
    }

    #[test]
    fn test_connection_closes_on_drop() {
        let closed = Arc::new(AtomicBool::new(false));
        let driver = EchoDriver { closed: closed.clone() };
        let conn = Connection::open(&driver, "COM3", 1_000_000).unwrap();
        let bus = conn.bus();
        assert!(bus.is_open());

        drop(conn);

        assert!(closed.load(Ordering::SeqCst));
        assert!(!bus.is_open());
        let err = bus.read(id(1), Register::word(36)).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_connection_closes_once() {
        let closed = Arc::new(AtomicBool::new(false));
        let driver = EchoDriver { closed: closed.clone() };
        let conn = Connection::open(&driver, "COM3", 1_000_000).unwrap();
        conn.close();
        assert!(closed.load(Ordering::SeqCst));
    }
}
