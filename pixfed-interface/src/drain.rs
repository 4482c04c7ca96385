//! Get data out of the board
//!
//! The FED buffers its output in a number of fifos
//! (error, TBM, temperature, TTS, spy, transparent)
//! and, for the DAQ path, in two DDR banks which are
//! filled and read out in turn.
//!
//! All waiting happens in bounded polls. Running out
//! of tries is not an error, the polls just answer
//! `false`.
//!

use std::fmt;
use std::thread;
use std::time::Duration;

use pixfed_lib::PollSettings;
use pixfed_lib::constants::DDR_MAX_BLOCK_SIZE;

use crate::access::RegisterAccess;
use crate::errors::FEDError;
use crate::registers::*;

/// Upper bound for the number of block reads
/// while draining a fifo which keeps filling
pub const MAX_DRAIN_ROUNDS : usize = 1024;

/// The backoff between polls does not grow
/// beyond this multiple of the poll interval
const MAX_BACKOFF_FACTOR   : u32 = 64;

/// One of the two DDR banks
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DdrBank {
  Ddr0,
  Ddr1,
}

impl DdrBank {
  /// The bank which is not self
  pub fn other(&self) -> DdrBank {
    match self {
      DdrBank::Ddr0 => DdrBank::Ddr1,
      DdrBank::Ddr1 => DdrBank::Ddr0,
    }
  }

  pub fn data_reg(&self) -> &'static str {
    match self {
      DdrBank::Ddr0 => DDR0,
      DdrBank::Ddr1 => DDR1,
    }
  }

  pub fn ctrl_sel_reg(&self) -> &'static str {
    match self {
      DdrBank::Ddr0 => DDR0_CTRL_SEL,
      DdrBank::Ddr1 => DDR1_CTRL_SEL,
    }
  }

  pub fn full_reg(&self) -> &'static str {
    match self {
      DdrBank::Ddr0 => DDR0_FULL,
      DdrBank::Ddr1 => DDR1_FULL,
    }
  }

  pub fn end_readout_reg(&self) -> &'static str {
    match self {
      DdrBank::Ddr0 => DDR0_END_READOUT,
      DdrBank::Ddr1 => DDR1_END_READOUT,
    }
  }
}

impl TryFrom<u32> for DdrBank {
  type Error = FEDError;

  fn try_from(value : u32) -> Result<Self, Self::Error> {
    match value {
      0 => Ok(DdrBank::Ddr0),
      1 => Ok(DdrBank::Ddr1),
      _ => Err(FEDError::InvalidArgument),
    }
  }
}

impl fmt::Display for DdrBank {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      DdrBank::Ddr0 => "DDR0",
      DdrBank::Ddr1 => "DDR1",
    };
    write!(f, "{}", repr)
  }
}

/// The fifos of the board which can be read
/// with a word counter
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FifoKind {
  Fifo1,
  Error,
  TBM,
  Temperature,
  TTS,
  Spy,
  Transparent,
  SlinkSpy,
}

impl FifoKind {
  pub const ALL : [FifoKind;8] = [
    FifoKind::Fifo1,
    FifoKind::Error,
    FifoKind::TBM,
    FifoKind::Temperature,
    FifoKind::TTS,
    FifoKind::Spy,
    FifoKind::Transparent,
    FifoKind::SlinkSpy,
  ];

  pub fn data_reg(&self) -> &'static str {
    match self {
      FifoKind::Fifo1       => FIFO1,
      FifoKind::Error       => ERROR_FIFO,
      FifoKind::TBM         => TBM_FIFO,
      FifoKind::Temperature => TEMP_FIFO,
      FifoKind::TTS         => TTS_FIFO,
      FifoKind::Spy         => SPY_FIFO,
      FifoKind::Transparent => TRANSPARENT_FIFO,
      FifoKind::SlinkSpy    => SLINK_SPY_FIFO,
    }
  }

  /// The register holding the number of
  /// words in the fifo
  pub fn count_reg(&self) -> &'static str {
    match self {
      FifoKind::Fifo1       => FIFO1_COUNT,
      FifoKind::Error       => ERROR_FIFO_COUNT,
      FifoKind::TBM         => TBM_FIFO_COUNT,
      FifoKind::Temperature => TEMP_FIFO_COUNT,
      FifoKind::TTS         => TTS_FIFO_COUNT,
      FifoKind::Spy         => SPY_FIFO_COUNT,
      FifoKind::Transparent => TRANSPARENT_FIFO_COUNT,
      FifoKind::SlinkSpy    => SLINK_SPY_FIFO_COUNT,
    }
  }
}

impl fmt::Display for FifoKind {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      FifoKind::Fifo1       => "Fifo1",
      FifoKind::Error       => "ErrorFifo",
      FifoKind::TBM         => "TBMFifo",
      FifoKind::Temperature => "TemperatureFifo",
      FifoKind::TTS         => "TTSFifo",
      FifoKind::Spy         => "SpyFifo",
      FifoKind::Transparent => "TransparentFifo",
      FifoKind::SlinkSpy    => "SlinkSpyFifo",
    };
    write!(f, "{}", repr)
  }
}

/// Combine pairs of 32bit words to 64bit Slink
/// words, the first word of a pair is the upper half
pub fn pack_slink64(words : &[u32]) -> Vec<u64> {
  if words.len() % 2 != 0 {
    warn!("Odd number of Slink spy words ({}), dropping the last one!", words.len());
  }
  words.chunks_exact(2)
       .map(|pair| ((pair[0] as u64) << 32) | pair[1] as u64)
       .collect()
}

/// Polls and readout of the board memories
///
/// Keeps track of the DDR bank which will be
/// filled by the next acquisition.
#[derive(Debug, Clone)]
pub struct AcquisitionDrain {
  bank           : DdrBank,
  n_acq          : u64,
  poll_interval  : Duration,
  /// tries for a bank to be filled during read_data
  pub whole_event_tries : u32,
  /// tries for the bank to be released after readout
  pub release_tries     : u32,
}

impl AcquisitionDrain {
  pub fn new() -> Self {
    Self::with_polling(&PollSettings::new())
  }

  pub fn with_polling(polling : &PollSettings) -> Self {
    Self {
      bank              : DdrBank::Ddr0,
      n_acq             : 0,
      poll_interval     : Duration::from_micros(polling.poll_interval_us),
      whole_event_tries : polling.whole_event_tries,
      release_tries     : polling.upload_tries,
    }
  }

  pub fn set_polling(&mut self, polling : &PollSettings) {
    self.poll_interval     = Duration::from_micros(polling.poll_interval_us);
    self.whole_event_tries = polling.whole_event_tries;
    self.release_tries     = polling.upload_tries;
  }

  pub fn bank(&self) -> DdrBank {
    self.bank
  }

  /// Number of completed DDR readouts
  pub fn n_acquisitions(&self) -> u64 {
    self.n_acq
  }

  /// Read reg up to max_tries times until accept
  /// says yes. The wait between two reads grows
  /// with every try.
  pub fn poll_flag<R, F>(&self,
                         bus       : &mut R,
                         reg       : &str,
                         max_tries : u32,
                         accept    : F) -> Result<bool, FEDError>
    where R : RegisterAccess + ?Sized,
          F : Fn(u32) -> bool {
    let mut backoff = 1u32;
    for n_try in 0..max_tries {
      let value = bus.read(reg)?;
      if accept(value) {
        trace!("{} ready after {} tries", reg, n_try + 1);
        return Ok(true);
      }
      if n_try + 1 < max_tries && !self.poll_interval.is_zero() {
        thread::sleep(self.poll_interval.saturating_mul(backoff));
        backoff = (backoff * 2).min(MAX_BACKOFF_FACTOR);
      }
    }
    debug!("{} not ready after {} tries", reg, max_tries);
    Ok(false)
  }

  /// Wait for the currently selected DDR bank
  /// to hold a complete event
  pub fn is_whole_event<R: RegisterAccess + ?Sized>(&self, bus : &mut R, max_tries : u32)
    -> Result<bool, FEDError> {
    self.poll_flag(bus, self.bank.full_reg(), max_tries, |v| v & 0x1 == 1)
  }

  pub fn is_new_event<R: RegisterAccess + ?Sized>(&self, bus : &mut R, max_tries : u32)
    -> Result<bool, FEDError> {
    self.poll_flag(bus, NEW_EVENT, max_tries, |v| v & 0x1 == 1)
  }

  /// Wait for an ongoing flash upload to finish
  ///
  /// Returns true if the board is *still* uploading
  /// after max_tries.
  pub fn check_if_uploading<R: RegisterAccess + ?Sized>(&self, bus : &mut R, max_tries : u32)
    -> Result<bool, FEDError> {
    let done = self.poll_flag(bus, FLASH_UPLOADING, max_tries, |v| v & 0x1 == 0)?;
    if !done {
      warn!("Board is still uploading after {} tries!", max_tries);
    }
    Ok(!done)
  }

  /// Number of words currently in a fifo
  pub fn fifo_count<R: RegisterAccess + ?Sized>(&self, bus : &mut R, kind : FifoKind)
    -> Result<usize, FEDError> {
    Ok(bus.read(kind.count_reg())? as usize)
  }

  /// Read whatever is in a fifo right now, a
  /// single block read at most
  pub fn read_fifo<R: RegisterAccess + ?Sized>(&self, bus : &mut R, kind : FifoKind)
    -> Result<Vec<u32>, FEDError> {
    let nwords = self.fifo_count(bus, kind)?;
    if nwords == 0 {
      return Ok(Vec::new());
    }
    Ok(bus.read_block(kind.data_reg(), nwords)?)
  }

  /// Empty a fifo into buffer
  ///
  /// Reads blocks as long as the fifo reports data
  /// (at most MAX_DRAIN_ROUNDS blocks) and returns
  /// the number of words which have been appended.
  /// An empty fifo costs exactly one register read.
  pub fn drain_fifo<R: RegisterAccess + ?Sized>(&self,
                                                bus    : &mut R,
                                                kind   : FifoKind,
                                                buffer : &mut Vec<u32>) -> Result<usize, FEDError> {
    let mut drained = 0usize;
    for _ in 0..MAX_DRAIN_ROUNDS {
      let nwords = self.fifo_count(bus, kind)?;
      if nwords == 0 {
        break;
      }
      let mut block = bus.read_block(kind.data_reg(), nwords)?;
      drained += block.len();
      buffer.append(&mut block);
    }
    if drained > 0 {
      debug!("Drained {} words from {}", drained, kind);
    }
    Ok(drained)
  }

  /// Drain the Slink spy fifo and combine the
  /// words to 64bit Slink words
  pub fn spy_slink64<R: RegisterAccess + ?Sized>(&self, bus : &mut R) -> Result<Vec<u64>, FEDError> {
    let mut words = Vec::<u32>::new();
    self.drain_fifo(bus, FifoKind::SlinkSpy, &mut words)?;
    Ok(pack_slink64(&words))
  }

  /// Choose the DDR bank for the next readout
  /// (0 or 1)
  pub fn select_daq_ddr(&mut self, index : u32) -> Result<(), FEDError> {
    self.bank = DdrBank::try_from(index)?;
    debug!("Selected {} for the next readout", self.bank);
    Ok(())
  }

  /// Read one block from the selected DDR bank
  ///
  /// Waits for the bank to be filled, takes over the
  /// memory controller, reads block_size words and
  /// hands the bank back to the firmware. The next
  /// call reads from the other bank.
  ///
  /// If the bank does not fill in time, nothing is
  /// read and the returned block is empty.
  pub fn read_data<R: RegisterAccess + ?Sized>(&mut self, bus : &mut R, block_size : u32)
    -> Result<Vec<u32>, FEDError> {
    if block_size == 0 || block_size > DDR_MAX_BLOCK_SIZE {
      error!("Block size {} is not within 1..={}!", block_size, DDR_MAX_BLOCK_SIZE);
      return Err(FEDError::OutOfRange);
    }
    if !self.is_whole_event(bus, self.whole_event_tries)? {
      warn!("{} did not fill, no data!", self.bank);
      return Ok(Vec::new());
    }
    let bank = self.bank;
    bus.write(bank.ctrl_sel_reg(), 1)?;
    let data = bus.read_block(bank.data_reg(), block_size as usize)?;
    bus.write(bank.ctrl_sel_reg(), 0)?;
    bus.write(bank.end_readout_reg(), 1)?;
    if !self.poll_flag(bus, bank.full_reg(), self.release_tries, |v| v & 0x1 == 0)? {
      warn!("{} has not been released by the firmware!", bank);
    }
    bus.write(bank.end_readout_reg(), 0)?;
    self.n_acq += 1;
    self.bank   = bank.other();
    trace!("Read {} words from {}, acquisition {}", data.len(), bank, self.n_acq);
    Ok(data)
  }
}

impl Default for AcquisitionDrain {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sim::{SimBoard, BusOp};

  fn drain() -> AcquisitionDrain {
    let mut polling = PollSettings::new();
    polling.poll_interval_us = 0;
    AcquisitionDrain::with_polling(&polling)
  }

  #[test]
  fn whole_event_budget() {
    let mut board = SimBoard::new();
    board.set_register(DDR0_FULL, 0);
    let drain = drain();
    assert_eq!(drain.is_whole_event(&mut board, 5), Ok(false));
    assert_eq!(board.read_count(DDR0_FULL), 5);
  }

  #[test]
  fn whole_event_ready() {
    let mut board = SimBoard::new();
    board.script_reads(DDR0_FULL, &[0, 0, 1]);
    let drain = drain();
    assert_eq!(drain.is_whole_event(&mut board, 10), Ok(true));
    assert_eq!(board.read_count(DDR0_FULL), 3);
  }

  #[test]
  fn empty_error_fifo() {
    let mut board = SimBoard::new();
    let drain = drain();
    let mut buffer = Vec::<u32>::new();
    assert_eq!(drain.drain_fifo(&mut board, FifoKind::Error, &mut buffer), Ok(0));
    assert!(buffer.is_empty());
    assert!(!board.log().iter().any(|op| matches!(op, BusOp::ReadBlock(_, _))));
  }

  #[test]
  fn drain_appends() {
    let mut board = SimBoard::new();
    board.push_fifo(TBM_FIFO, &[1, 2, 3]);
    let drain = drain();
    let mut buffer = vec![42];
    assert_eq!(drain.drain_fifo(&mut board, FifoKind::TBM, &mut buffer), Ok(3));
    assert_eq!(buffer, vec![42, 1, 2, 3]);
    assert_eq!(board.register(TBM_FIFO_COUNT), 0);
  }

  #[test]
  fn slink_words() {
    assert_eq!(pack_slink64(&[0x1, 0x2, 0xdead_beef]), vec![0x0000_0001_0000_0002]);
  }

  #[test]
  fn bank_selection() {
    let mut drain = drain();
    assert_eq!(drain.select_daq_ddr(2), Err(FEDError::InvalidArgument));
    assert_eq!(drain.bank(), DdrBank::Ddr0);
    assert_eq!(drain.select_daq_ddr(1), Ok(()));
    assert_eq!(drain.bank(), DdrBank::Ddr1);
  }

  #[test]
  fn oversized_block() {
    let mut board = SimBoard::new();
    let mut drain = drain();
    assert_eq!(drain.read_data(&mut board, DDR_MAX_BLOCK_SIZE + 1), Err(FEDError::OutOfRange));
    assert_eq!(drain.read_data(&mut board, 0), Err(FEDError::OutOfRange));
    assert!(board.log().is_empty());
  }

  #[test]
  fn double_buffering() {
    let mut board = SimBoard::new();
    board.fill_ddr(DdrBank::Ddr0, &[7, 8, 9, 10]);
    let mut drain = drain();
    let data = drain.read_data(&mut board, 4).unwrap();
    assert_eq!(data, vec![7, 8, 9, 10]);
    assert_eq!(drain.bank(), DdrBank::Ddr1);
    assert_eq!(drain.n_acquisitions(), 1);
    assert_eq!(board.register(DDR0_FULL), 0);
    assert_eq!(board.register(DDR0_END_READOUT), 0);
    // bank 1 has not been filled
    drain.whole_event_tries = 3;
    assert_eq!(drain.read_data(&mut board, 4), Ok(Vec::new()));
    assert_eq!(drain.bank(), DdrBank::Ddr1);
  }
}
