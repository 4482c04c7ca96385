//! A pixel FED in memory
//!
//! `SimBoard` answers register transactions the way
//! the firmware does, as far as this crate cares:
//!
//! * a register file, with scripted read sequences
//! * fifos with their word counters
//! * two DDR banks with full flag and end of readout
//! * the Fitel I2C engine (transmit fifo, request,
//!   acknowledge, receive fifo) and the Fitel registers
//!   behind it
//! * channel disable registers which are reflected in
//!   the channel enable status
//!
//! Failures can be injected per register, per Fitel
//! slot (no acknowledge) and per Fitel address (writes
//! are lost). Every transaction is logged.
//!

use std::collections::{
    HashMap,
    HashSet,
    VecDeque,
};

use pixfed_lib::constants::N_FITELS;

use crate::access::{
    RegisterAccess,
    RegisterError,
};
use crate::drain::{
    DdrBank,
    FifoKind,
};
use crate::firmware::FirmwareManager;
use crate::fitel::split_fitel_word;
use crate::fitel::FitelSlot;
use crate::registers::*;

/// A transaction as seen by the board
#[derive(Debug, Clone, PartialEq)]
pub enum BusOp {
  Read(String),
  Write(String, u32),
  ReadBlock(String, usize),
  WriteBlock(String, Vec<u32>),
}

#[derive(Debug, Clone)]
pub struct SimBoard {
  registers      : HashMap<String, u32>,
  scripted       : HashMap<String, VecDeque<u32>>,
  fifos          : HashMap<String, VecDeque<u32>>,
  ddr            : HashMap<String, Vec<u32>>,
  fitel_regs     : [[u8;256];N_FITELS],
  fitel_tx       : Vec<u32>,
  fitel_rx       : VecDeque<u32>,
  /// Fitel slots which answer every request with an error
  fitel_nack     : HashSet<usize>,
  /// (slot, address) which ignore writes
  fitel_stuck    : HashSet<(usize, u8)>,
  /// Fitel slots whose replies carry the wrong address
  fitel_garbled  : HashSet<usize>,
  failing        : HashMap<String, RegisterError>,
  read_counts    : HashMap<String, usize>,
  log            : Vec<BusOp>,
}

impl SimBoard {
  /// A board with all channels enabled and nothing
  /// in its memories
  pub fn new() -> Self {
    let mut board = Self {
      registers      : HashMap::new(),
      scripted       : HashMap::new(),
      fifos          : HashMap::new(),
      ddr            : HashMap::new(),
      fitel_regs     : [[0;256];N_FITELS],
      fitel_tx       : Vec::new(),
      fitel_rx       : VecDeque::new(),
      fitel_nack     : HashSet::new(),
      fitel_stuck    : HashSet::new(),
      fitel_garbled  : HashSet::new(),
      failing        : HashMap::new(),
      read_counts    : HashMap::new(),
      log            : Vec::new(),
    };
    board.registers.insert(String::from(CH_ENABLE_LO), 0xffff_ffff);
    board.registers.insert(String::from(CH_ENABLE_HI), 0xffff);
    // "PFED"
    board.registers.insert(String::from(BOARD_ID), 0x5046_4544);
    board
  }

  /// Current content of a register, 0 if it was
  /// never written
  pub fn register(&self, reg : &str) -> u32 {
    if let Some(fifo) = self.fifo_for_count(reg) {
      return self.fifos.get(fifo).map_or(0, |q| q.len() as u32);
    }
    self.registers.get(reg).copied().unwrap_or(0)
  }

  /// Set a register without logging a transaction
  pub fn set_register(&mut self, reg : &str, value : u32) {
    self.registers.insert(String::from(reg), value);
  }

  /// The next reads of reg return values (in this
  /// order) before the register file is used again
  pub fn script_reads(&mut self, reg : &str, values : &[u32]) {
    self.scripted.entry(String::from(reg))
                 .or_default()
                 .extend(values.iter().copied());
  }

  /// Append words to the fifo with data node reg
  pub fn push_fifo(&mut self, reg : &str, words : &[u32]) {
    self.fifos.entry(String::from(reg))
              .or_default()
              .extend(words.iter().copied());
  }

  /// Put data into a DDR bank and raise its full flag
  pub fn fill_ddr(&mut self, bank : DdrBank, data : &[u32]) {
    self.ddr.insert(String::from(bank.data_reg()), data.to_vec());
    self.set_register(bank.full_reg(), 1);
  }

  /// Flip the reported enable bit of a channel,
  /// as an SEU would do
  pub fn flip_enable_bit(&mut self, ch : usize) {
    let (reg, bit) = if ch < 32 {
      (CH_ENABLE_LO, ch)
    } else {
      (CH_ENABLE_HI, ch - 32)
    };
    let value = self.register(reg) ^ (1 << bit);
    self.set_register(reg, value);
  }

  /// Every access to reg fails with err
  pub fn fail_register(&mut self, reg : &str, err : RegisterError) {
    self.failing.insert(String::from(reg), err);
  }

  pub fn heal_register(&mut self, reg : &str) {
    self.failing.remove(reg);
  }

  /// The Fitel in slot will not acknowledge
  pub fn fitel_nack(&mut self, slot : FitelSlot) {
    self.fitel_nack.insert(slot.index());
  }

  /// Writes to address of the Fitel in slot are lost
  pub fn fitel_stuck(&mut self, slot : FitelSlot, address : u8) {
    self.fitel_stuck.insert((slot.index(), address));
  }

  /// Replies of the Fitel in slot carry the next
  /// address instead of the requested one
  pub fn fitel_garble(&mut self, slot : FitelSlot) {
    self.fitel_garbled.insert(slot.index());
  }

  pub fn fitel_register(&self, slot : FitelSlot, address : u8) -> u8 {
    self.fitel_regs[slot.index()][address as usize]
  }

  pub fn set_fitel_register(&mut self, slot : FitelSlot, address : u8, value : u8) {
    self.fitel_regs[slot.index()][address as usize] = value;
  }

  pub fn log(&self) -> &[BusOp] {
    &self.log
  }

  pub fn clear_log(&mut self) {
    self.log.clear();
    self.read_counts.clear();
  }

  /// Single register reads of reg so far
  pub fn read_count(&self, reg : &str) -> usize {
    self.read_counts.get(reg).copied().unwrap_or(0)
  }

  /// All values written to reg, in order
  pub fn writes_to(&self, reg : &str) -> Vec<u32> {
    self.log.iter().filter_map(|op| match op {
      BusOp::Write(name, value) if name == reg => Some(*value),
      _ => None,
    }).collect()
  }

  fn record(&mut self, op : BusOp) {
    cfg_if::cfg_if! {
      if #[cfg(feature = "sim-trace")] {
        trace!("SimBoard {:?}", op);
      }
    }
    self.log.push(op);
  }

  fn check_failing(&self, reg : &str) -> Result<(), RegisterError> {
    match self.failing.get(reg) {
      Some(err) => Err(*err),
      None      => Ok(()),
    }
  }

  fn fifo_for_count(&self, reg : &str) -> Option<&'static str> {
    FifoKind::ALL.iter()
                 .find(|kind| kind.count_reg() == reg)
                 .map(|kind| kind.data_reg())
  }

  fn fitel_request(&mut self, request : u32) {
    match request {
      FITEL_REQ_WRITE => {
        let mut ack = FITEL_ACK_DONE;
        for word in self.fitel_tx.clone() {
          let (fmc, fitel, _, address, value) = split_fitel_word(word);
          let slot = match FitelSlot::from_ids(fmc, fitel) {
            Ok(slot) => slot.index(),
            Err(_)   => {
              ack = FITEL_ACK_ERROR;
              continue;
            }
          };
          if self.fitel_nack.contains(&slot) {
            ack = FITEL_ACK_ERROR;
            continue;
          }
          if !self.fitel_stuck.contains(&(slot, address)) {
            self.fitel_regs[slot][address as usize] = value;
          }
        }
        self.set_register(FITEL_I2C_ACK, ack);
      }
      FITEL_REQ_READ => {
        let mut ack = FITEL_ACK_DONE;
        for word in self.fitel_tx.clone() {
          let (fmc, fitel, _, address, _) = split_fitel_word(word);
          let slot = match FitelSlot::from_ids(fmc, fitel) {
            Ok(slot) => slot.index(),
            Err(_)   => {
              ack = FITEL_ACK_ERROR;
              continue;
            }
          };
          if self.fitel_nack.contains(&slot) {
            ack = FITEL_ACK_ERROR;
            continue;
          }
          let value = self.fitel_regs[slot][address as usize] as u32;
          let mut reply = (word & 0xffff_ff00) | value;
          if self.fitel_garbled.contains(&slot) {
            reply = (reply & 0xffff_00ff) | ((address.wrapping_add(1) as u32) << 8);
          }
          self.fitel_rx.push_back(reply);
        }
        self.set_register(FITEL_I2C_ACK, ack);
      }
      _ => {
        // release
        self.fitel_tx.clear();
        self.set_register(FITEL_I2C_ACK, FITEL_ACK_IDLE);
      }
    }
  }

  fn apply_write(&mut self, reg : &str, value : u32) {
    self.set_register(reg, value);
    match reg {
      CH_DISABLE_LO => self.set_register(CH_ENABLE_LO, !value),
      CH_DISABLE_HI => self.set_register(CH_ENABLE_HI, !value & 0xffff),
      FITEL_CONFIG_REQ => self.fitel_request(value),
      DDR0_END_READOUT | DDR1_END_READOUT if value == 1 => {
        let full = if reg == DDR0_END_READOUT { DDR0_FULL } else { DDR1_FULL };
        self.set_register(full, 0);
      }
      _ => (),
    }
  }
}

impl Default for SimBoard {
  fn default() -> Self {
    Self::new()
  }
}

impl RegisterAccess for SimBoard {
  fn read(&mut self, reg : &str) -> Result<u32, RegisterError> {
    self.record(BusOp::Read(String::from(reg)));
    *self.read_counts.entry(String::from(reg)).or_insert(0) += 1;
    self.check_failing(reg)?;
    if let Some(queue) = self.scripted.get_mut(reg) {
      if let Some(value) = queue.pop_front() {
        return Ok(value);
      }
    }
    Ok(self.register(reg))
  }

  fn write(&mut self, reg : &str, value : u32) -> Result<(), RegisterError> {
    self.record(BusOp::Write(String::from(reg), value));
    self.check_failing(reg)?;
    self.apply_write(reg, value);
    Ok(())
  }

  fn read_block(&mut self, reg : &str, nwords : usize) -> Result<Vec<u32>, RegisterError> {
    self.record(BusOp::ReadBlock(String::from(reg), nwords));
    self.check_failing(reg)?;
    if reg == FITEL_RX_FIFO {
      let n = nwords.min(self.fitel_rx.len());
      return Ok(self.fitel_rx.drain(..n).collect());
    }
    if let Some(fifo) = self.fifos.get_mut(reg) {
      let n = nwords.min(fifo.len());
      return Ok(fifo.drain(..n).collect());
    }
    let mut data = self.ddr.get(reg).cloned().unwrap_or_default();
    data.resize(nwords, 0);
    Ok(data)
  }

  fn write_block(&mut self, reg : &str, data : &[u32]) -> Result<(), RegisterError> {
    self.record(BusOp::WriteBlock(String::from(reg), data.to_vec()));
    self.check_failing(reg)?;
    if reg == FITEL_TX_FIFO {
      self.fitel_tx = data.to_vec();
    }
    Ok(())
  }
}

/// The flash of a board in memory, holding
/// firmware images by name
#[derive(Debug, Clone, Default)]
pub struct SimFlash {
  configs : Vec<String>,
  active  : Option<String>,
}

impl SimFlash {
  pub fn new(configs : &[&str]) -> Self {
    Self {
      configs : configs.iter().map(|c| String::from(*c)).collect(),
      active  : None,
    }
  }

  /// The image the FPGA was last configured from
  pub fn active(&self) -> Option<&str> {
    self.active.as_deref()
  }
}

impl FirmwareManager for SimFlash {
  fn flash_prom(&mut self, config : &str, path : &str) -> Result<(), RegisterError> {
    debug!("Flashing {} from {}", config, path);
    if !self.configs.iter().any(|c| c == config) {
      self.configs.push(String::from(config));
    }
    Ok(())
  }

  fn jump_to_fpga_config(&mut self, config : &str) -> Result<(), RegisterError> {
    if !self.configs.iter().any(|c| c == config) {
      return Err(RegisterError::UnknownRegister);
    }
    self.active = Some(String::from(config));
    Ok(())
  }

  fn get_fpga_config_list(&mut self) -> Result<Vec<String>, RegisterError> {
    Ok(self.configs.clone())
  }

  fn delete_fpga_config(&mut self, config : &str) -> Result<(), RegisterError> {
    let n_before = self.configs.len();
    self.configs.retain(|c| c != config);
    if self.configs.len() == n_before {
      return Err(RegisterError::UnknownRegister);
    }
    Ok(())
  }

  fn download_fpga_config(&mut self, config : &str, path : &str) -> Result<(), RegisterError> {
    if !self.configs.iter().any(|c| c == config) {
      return Err(RegisterError::UnknownRegister);
    }
    debug!("Downloading {} to {}", config, path);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fitel::{
    encode_fitel_reg,
    FitelOp,
    FitelRegItem,
    Permission,
  };

  #[test]
  fn disable_is_reflected_in_enable() {
    let mut board = SimBoard::new();
    board.write(CH_DISABLE_LO, 0x1).unwrap();
    board.write(CH_DISABLE_HI, 0x8000).unwrap();
    assert_eq!(board.read(CH_ENABLE_LO), Ok(0xffff_fffe));
    assert_eq!(board.read(CH_ENABLE_HI), Ok(0x7fff));
  }

  #[test]
  fn scripted_reads_come_first() {
    let mut board = SimBoard::new();
    board.set_register(NEW_EVENT, 1);
    board.script_reads(NEW_EVENT, &[0, 0]);
    assert_eq!(board.read(NEW_EVENT), Ok(0));
    assert_eq!(board.read(NEW_EVENT), Ok(0));
    assert_eq!(board.read(NEW_EVENT), Ok(1));
    assert_eq!(board.read_count(NEW_EVENT), 3);
  }

  #[test]
  fn injected_failure() {
    let mut board = SimBoard::new();
    board.fail_register(FED_ID, RegisterError::BusFailure);
    assert_eq!(board.write(FED_ID, 3), Err(RegisterError::BusFailure));
    board.heal_register(FED_ID);
    assert_eq!(board.write(FED_ID, 3), Ok(()));
    assert_eq!(board.register(FED_ID), 3);
  }

  #[test]
  fn fitel_engine() {
    let mut board = SimBoard::new();
    let slot = FitelSlot::FMC1_FITEL0;
    let item = FitelRegItem::new(0x21, 0x5a, Permission::ReadWrite);
    let words = encode_fitel_reg(&item, slot, FitelOp::Write).unwrap();
    board.write_block(FITEL_TX_FIFO, &words).unwrap();
    board.write(FITEL_CONFIG_REQ, FITEL_REQ_WRITE).unwrap();
    assert_eq!(board.read(FITEL_I2C_ACK), Ok(FITEL_ACK_DONE));
    assert_eq!(board.fitel_register(slot, 0x21), 0x5a);
    board.write(FITEL_CONFIG_REQ, FITEL_REQ_RELEASE).unwrap();
    assert_eq!(board.read(FITEL_I2C_ACK), Ok(FITEL_ACK_IDLE));

    // the reply has what the Fitel holds, not the request payload
    board.set_fitel_register(slot, 0x21, 0x33);
    let words = encode_fitel_reg(&item, slot, FitelOp::Read).unwrap();
    board.write_block(FITEL_TX_FIFO, &words).unwrap();
    board.write(FITEL_CONFIG_REQ, FITEL_REQ_READ).unwrap();
    let rx = board.read_block(FITEL_RX_FIFO, 1).unwrap();
    assert_eq!(rx.len(), 1);
    assert_eq!(rx[0] & 0xff, 0x33);
  }

  #[test]
  fn garbled_fitel_replies() {
    let mut board = SimBoard::new();
    let slot = FitelSlot::FMC0_FITEL1;
    board.fitel_garble(slot);
    let item = FitelRegItem::new(0x21, 0x00, Permission::Read);
    let words = encode_fitel_reg(&item, slot, FitelOp::Read).unwrap();
    board.write_block(FITEL_TX_FIFO, &words).unwrap();
    board.write(FITEL_CONFIG_REQ, FITEL_REQ_READ).unwrap();
    let rx = board.read_block(FITEL_RX_FIFO, 1).unwrap();
    assert_eq!((rx[0] >> 8) & 0xff, 0x22);
  }

  #[test]
  fn flash() {
    let mut flash = SimFlash::new(&["golden"]);
    flash.flash_prom("user", "/tmp/user.bin").unwrap();
    assert_eq!(flash.get_fpga_config_list(), Ok(vec![String::from("golden"), String::from("user")]));
    assert_eq!(flash.jump_to_fpga_config("nope"), Err(RegisterError::UnknownRegister));
    flash.jump_to_fpga_config("user").unwrap();
    assert_eq!(flash.active(), Some("user"));
    flash.delete_fpga_config("golden").unwrap();
    assert_eq!(flash.delete_fpga_config("golden"), Err(RegisterError::UnknownRegister));
  }
}
