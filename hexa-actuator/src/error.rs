//! Erros da camada de atuador

use thiserror::Error;

pub type ActuatorResult<T> = Result<T, ActuatorError>;

/// Falha de uma única transação no barramento.
///
/// Os dois casos correspondem aos dois baldes de falha do protocolo: nenhuma
/// resposta válida (transporte) ou resposta válida com código de erro de
/// hardware diferente de zero (falha do dispositivo).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActuatorError {
    /// Resposta ausente ou corrompida (timeout, checksum, porta fechada)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Resposta válida carregando código de erro de hardware
    #[error("Device fault 0x{code:02x}: {description}")]
    DeviceFault { code: u8, description: String },
}

impl ActuatorError {
    /// Cria falha de transporte
    pub fn transport(cause: impl Into<String>) -> Self {
        ActuatorError::Transport(cause.into())
    }

    /// Cria falha de dispositivo decodificando os bits de erro
    pub fn device_fault(code: u8) -> Self {
        ActuatorError::DeviceFault {
            code,
            description: HardwareError(code).describe(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ActuatorError::Transport(_))
    }

    pub fn is_device_fault(&self) -> bool {
        matches!(self, ActuatorError::DeviceFault { .. })
    }

    /// Causa legível, sem o prefixo do balde
    pub fn cause(&self) -> &str {
        match self {
            ActuatorError::Transport(cause) => cause,
            ActuatorError::DeviceFault { description, .. } => description,
        }
    }
}

/// Byte de erro de hardware do pacote de status (protocolo 1.0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareError(pub u8);

impl HardwareError {
    pub const INPUT_VOLTAGE: u8 = 0x01;
    pub const ANGLE_LIMIT: u8 = 0x02;
    pub const OVERHEATING: u8 = 0x04;
    pub const RANGE: u8 = 0x08;
    pub const CHECKSUM: u8 = 0x10;
    pub const OVERLOAD: u8 = 0x20;
    pub const INSTRUCTION: u8 = 0x40;

    const NAMES: [(u8, &'static str); 7] = [
        (Self::INPUT_VOLTAGE, "input voltage error"),
        (Self::ANGLE_LIMIT, "angle limit error"),
        (Self::OVERHEATING, "overheat error"),
        (Self::RANGE, "out of range error"),
        (Self::CHECKSUM, "checksum error"),
        (Self::OVERLOAD, "overload error"),
        (Self::INSTRUCTION, "instruction code error"),
    ];

    pub fn contains(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Lista os bits ativos em texto
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| (*name).to_string())
            .collect();

        let known = Self::NAMES.iter().fold(0u8, |acc, (flag, _)| acc | flag);
        let unknown = self.0 & !known;
        if unknown != 0 {
            parts.push(format!("unknown error bits 0x{:02x}", unknown));
        }

        if parts.is_empty() {
            "no error".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Valor fora do domínio aceito por um tipo
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{what} {value} outside {min}..={max}")]
pub struct RangeError {
    pub what: &'static str,
    pub value: i64,
    pub min: i64,
    pub max: i64,
}

/// Erros ao abrir a conexão com o barramento
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Identificador de dispositivo vazio ou malformado
    #[error("Invalid device identifier: {0:?}")]
    InvalidDevice(String),

    /// Baud rate não suportado
    #[error("Failed to change the baudrate to {0}")]
    BaudRate(u32),

    /// Porta não pôde ser aberta
    #[error("Failed to open the port {device}: {reason}")]
    OpenFailed { device: String, reason: String },
}
