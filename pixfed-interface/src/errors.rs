//! Errors of the FED interface
//!

use std::error::Error;
use std::fmt;

use pixfed_lib::SettingsError;

use crate::access::RegisterError;

/// What went wrong in a line of a Fitel
/// register map file
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RegMapErrorKind {
  /// The file could not be read at all
  Io,
  MissingField,
  /// Not a number, or does not fit into a byte
  BadNumber,
  UnknownPermission,
  DuplicateName,
}

/// Diagnostic for a malformed register map
#[derive(Debug, Clone, PartialEq)]
pub struct RegMapError {
  /// 1-based line number, 0 if the file
  /// could not be opened
  pub line  : usize,
  /// Name of the offending column
  pub field : &'static str,
  pub kind  : RegMapErrorKind,
}

impl fmt::Display for RegMapError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<RegMapError: {:?} in line {}, field '{}'>", self.kind, self.line, self.field)
  }
}

impl Error for RegMapError {
}

#[derive(Debug, Clone, PartialEq)]
pub enum FEDError {
  /// The register access failed on the bus
  Transport(RegisterError),
  /// The register protocol was broken, e.g. a write
  /// to a read-only Fitel register
  ProtocolViolation,
  /// A Fitel word which belongs to another slot
  SlotMismatch,
  /// A selector (bank, channel, slot) which does
  /// not exist
  InvalidArgument,
  /// A size beyond what the hardware can do
  OutOfRange,
  /// The Fitel I2C engine did not acknowledge
  NoAcknowledge,
  /// Readback after configuration differs from
  /// what was written, the argument is the number
  /// of mismatching registers
  VerificationFailed(usize),
  /// An upload is (still) ongoing
  UploadInProgress,
  /// No firmware manager is attached
  NoFirmwareManager,
  RegMap(RegMapError),
  Settings(SettingsError),
}

impl fmt::Display for FEDError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      FEDError::Transport(err)          => format!("Transport {}", err),
      FEDError::ProtocolViolation       => String::from("ProtocolViolation"),
      FEDError::SlotMismatch            => String::from("SlotMismatch"),
      FEDError::InvalidArgument         => String::from("InvalidArgument"),
      FEDError::OutOfRange              => String::from("OutOfRange"),
      FEDError::NoAcknowledge           => String::from("NoAcknowledge"),
      FEDError::VerificationFailed(n)   => format!("VerificationFailed ({n} registers)"),
      FEDError::UploadInProgress        => String::from("UploadInProgress"),
      FEDError::NoFirmwareManager       => String::from("NoFirmwareManager"),
      FEDError::RegMap(err)             => format!("RegMap {}", err),
      FEDError::Settings(err)           => format!("Settings {}", err),
    };
    write!(f, "<FEDError: {}>", repr)
  }
}

impl FEDError {
  /// The bus or the register protocol broke down,
  /// nothing further should be sent to the board
  pub fn is_fatal(&self) -> bool {
    matches!(self, FEDError::Transport(_) | FEDError::ProtocolViolation)
  }
}

impl Error for FEDError {
}

impl From<RegisterError> for FEDError {
  fn from(err : RegisterError) -> Self {
    FEDError::Transport(err)
  }
}

impl From<RegMapError> for FEDError {
  fn from(err : RegMapError) -> Self {
    FEDError::RegMap(err)
  }
}

impl From<SettingsError> for FEDError {
  fn from(err : SettingsError) -> Self {
    FEDError::Settings(err)
  }
}
