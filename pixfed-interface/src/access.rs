//! Access to the board registers
//!
//! The FED interface never talks to the bus itself.
//! Whoever owns the transport (uTCA/IPBus, VME, a
//! simulation) implements `RegisterAccess` and lends
//! it to a `FEDController`.
//!
//! Transactions are synchronous. A transport error is
//! handed back to the caller as it is - retries are the
//! business of the bounded polls in the drain, not of
//! the transport.
//!

use std::error::Error;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RegisterError {
  /// The transaction failed on the bus
  BusFailure,
  RegisterTimeOut,
  /// The transport does not know a register
  /// with this name
  UnknownRegister,
}

impl fmt::Display for RegisterError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let etype = match self {
      RegisterError::BusFailure      => "BusFailure",
      RegisterError::RegisterTimeOut => "RegisterTimeOut",
      RegisterError::UnknownRegister => "UnknownRegister",
    };
    write!(f, "<RegisterError: {}>", etype)
  }
}

impl Error for RegisterError {
}

/// Read and write named registers of a board
pub trait RegisterAccess {
  /// Get a single 32bit word
  fn read(&mut self, reg : &str) -> Result<u32, RegisterError>;

  fn write(&mut self, reg : &str, value : u32) -> Result<(), RegisterError>;

  /// Read nwords from the same node (fifos) or
  /// consecutive addresses (memories), depending
  /// on the node
  fn read_block(&mut self, reg : &str, nwords : usize) -> Result<Vec<u32>, RegisterError>;

  fn write_block(&mut self, reg : &str, data : &[u32]) -> Result<(), RegisterError>;
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &mut T {
  fn read(&mut self, reg : &str) -> Result<u32, RegisterError> {
    (**self).read(reg)
  }

  fn write(&mut self, reg : &str, value : u32) -> Result<(), RegisterError> {
    (**self).write(reg, value)
  }

  fn read_block(&mut self, reg : &str, nwords : usize) -> Result<Vec<u32>, RegisterError> {
    (**self).read_block(reg, nwords)
  }

  fn write_block(&mut self, reg : &str, data : &[u32]) -> Result<(), RegisterError> {
    (**self).write_block(reg, data)
  }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Box<T> {
  fn read(&mut self, reg : &str) -> Result<u32, RegisterError> {
    (**self).read(reg)
  }

  fn write(&mut self, reg : &str, value : u32) -> Result<(), RegisterError> {
    (**self).write(reg, value)
  }

  fn read_block(&mut self, reg : &str, nwords : usize) -> Result<Vec<u32>, RegisterError> {
    (**self).read_block(reg, nwords)
  }

  fn write_block(&mut self, reg : &str, data : &[u32]) -> Result<(), RegisterError> {
    (**self).write_block(reg, data)
  }
}

/// Write 1 and then 0 to a register, e.g. to
/// issue a reset
pub fn pulse<R: RegisterAccess + ?Sized>(bus : &mut R, reg : &str) -> Result<(), RegisterError> {
  trace!("Pulse {reg}");
  bus.write(reg, 1)?;
  bus.write(reg, 0)?;
  Ok(())
}

/// Combine a 48bit quantity which is split
/// over two registers (32 low bits, 16 high bits)
pub fn read_split_48<R: RegisterAccess + ?Sized>(bus : &mut R,
                                                 lo  : &str,
                                                 hi  : &str) -> Result<u64, RegisterError> {
  let lo_val = bus.read(lo)?;
  let hi_val = bus.read(hi)?;
  let mut value : u64 = 0;
  value |= ((hi_val & 0xffff) as u64) << 32;
  value |= lo_val as u64;
  Ok(value)
}
