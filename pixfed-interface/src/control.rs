//! Control of a single pixel FED
//!
//! The `FEDController` owns everything which describes
//! the state of one board: its configuration card, the 4
//! Fitel register maps and the channel health monitor.
//! The register access is lent to it by whoever owns
//! the transport.
//!
//! For the mapping of register names, see `registers.rs`
//!

use std::fmt;
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
};
use std::thread;
use std::time::Duration;

use pixfed_lib::FEDCard;
use pixfed_lib::constants::{
    NCHN,
    N_FITELS,
    CHANNEL_MASK_ALL,
};

use crate::access::{
    pulse,
    read_split_48,
    RegisterAccess,
    RegisterError,
};
use crate::drain::{
    AcquisitionDrain,
    FifoKind,
};
use crate::errors::FEDError;
use crate::firmware::FirmwareManager;
use crate::fitel::{
    decode_fitel_reg,
    encode_fitel_reg,
    fitel_adc_to_volt,
    load_fitel_regmap,
    FitelMaps,
    FitelOp,
    FitelRegMap,
    FitelSlot,
};
use crate::health::{
    ChannelHealthMonitor,
    EnableBits,
    HealthReport,
};
use crate::registers::*;

/// Fitel registers with this name prefix are
/// the RSSI ADCs
pub const FITEL_ADC_PREFIX : &str = "ADC";

/// What happened to the individual Fitel slots
/// during setup
#[derive(Debug, Clone, PartialEq)]
pub struct SetupReport {
  /// None if the slot was configured, otherwise
  /// the reason why not
  pub slots          : [Option<FEDError>;N_FITELS],
  /// Number of Fitel registers written per slot
  pub n_written      : [usize;N_FITELS],
  /// Expected channel enable bits after setup
  pub enable_bits    : EnableBits,
}

impl SetupReport {
  pub fn new() -> Self {
    Self {
      slots       : [None, None, None, None],
      n_written   : [0;N_FITELS],
      enable_bits : EnableBits::new(),
    }
  }

  /// All Fitel slots have been configured
  pub fn is_ok(&self) -> bool {
    self.slots.iter().all(|s| s.is_none())
  }

  pub fn failed_slots(&self) -> Vec<(FitelSlot, FEDError)> {
    FitelSlot::ALL.iter()
                  .filter_map(|slot| self.slots[slot.index()].clone().map(|err| (*slot, err)))
                  .collect()
  }
}

impl Default for SetupReport {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for SetupReport {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<SetupReport:");
    for slot in FitelSlot::ALL {
      match &self.slots[slot.index()] {
        None      => repr += &(format!("\n  {} : OK ({} registers)", slot, self.n_written[slot.index()])),
        Some(err) => repr += &(format!("\n  {} : FAILED {}", slot, err)),
      }
    }
    repr += &(format!("\n  enable bits  : {}", self.enable_bits));
    write!(f, "{}>", repr)
  }
}

/// Identification of the board and its firmware
#[derive(Debug, Clone, PartialEq)]
pub struct BoardInfo {
  pub board_type     : String,
  /// 0xYYMMDD
  pub fw_date_user   : u32,
  pub fw_date_system : u32,
  pub fmc_powered    : bool,
  pub n_pll_locks    : u32,
  pub event_counter  : u32,
}

impl fmt::Display for BoardInfo {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<BoardInfo:");
    repr += &(format!("\n  board type     : {}", self.board_type));
    repr += &(format!("\n  user fw        : {:06x}", self.fw_date_user));
    repr += &(format!("\n  system fw      : {:06x}", self.fw_date_system));
    repr += &(format!("\n  FMCs powered   : {}", self.fmc_powered));
    repr += &(format!("\n  PLL locks      : {}", self.n_pll_locks));
    repr += &(format!("\n  event counter  : {}", self.event_counter));
    write!(f, "{}>", repr)
  }
}

pub struct FEDController<R: RegisterAccess> {
  bus        : R,
  card       : FEDCard,
  configured : bool,
  fitel_maps : FitelMaps,
  health     : Arc<Mutex<ChannelHealthMonitor>>,
  drain      : AcquisitionDrain,
  firmware   : Option<Box<dyn FirmwareManager + Send>>,
}

impl<R: RegisterAccess> FEDController<R> {

  pub fn new(bus : R) -> Self {
    let card = FEDCard::new();
    let drain = AcquisitionDrain::with_polling(&card.polling);
    Self {
      bus,
      card,
      configured : false,
      fitel_maps : FitelMaps::new(),
      health     : Arc::new(Mutex::new(ChannelHealthMonitor::new())),
      drain,
      firmware   : None,
    }
  }

  /// Delegate firmware management to manager
  pub fn with_firmware_manager(mut self, manager : Box<dyn FirmwareManager + Send>) -> Self {
    self.firmware = Some(manager);
    self
  }

  pub fn set_firmware_manager(&mut self, manager : Box<dyn FirmwareManager + Send>) {
    self.firmware = Some(manager);
  }

  pub fn bus(&self) -> &R {
    &self.bus
  }

  pub fn bus_mut(&mut self) -> &mut R {
    &mut self.bus
  }

  /// Give the register access back
  pub fn into_bus(self) -> R {
    self.bus
  }

  pub fn card(&self) -> &FEDCard {
    &self.card
  }

  /// Setup has run (with or without failing Fitels)
  /// and nothing has reloaded the FPGA since
  pub fn is_configured(&self) -> bool {
    self.configured
  }

  pub fn fitel_maps(&self) -> &FitelMaps {
    &self.fitel_maps
  }

  pub fn fitel_map(&self, slot : FitelSlot) -> &FitelRegMap {
    &self.fitel_maps[slot]
  }

  pub fn drain(&self) -> &AcquisitionDrain {
    &self.drain
  }

  /// Write a register, tracing the value when
  /// the card asks for parameter traces
  fn write_param(&mut self, reg : &str, value : u32) -> Result<(), FEDError> {
    if self.card.print_level.traces_parameters() {
      info!("{:<40} <- {:#010x}", reg, value);
    }
    self.bus.write(reg, value)?;
    Ok(())
  }

  //========== Setup ======================
  //
  //=======================================

  /// Configure the board from card
  ///
  /// 1) The card is validated, an invalid card is
  ///    refused before any register is touched.
  /// 2) Board parameters and channel enables are
  ///    written. A transport error aborts the setup.
  /// 3) Every Fitel gets its register map loaded and
  ///    pushed (and read back if fitel_verify is set).
  ///    A failing Fitel is reported in the returned
  ///    `SetupReport`, the others are configured anyway.
  ///    A transport error or a protocol violation
  ///    aborts the setup instead.
  /// 4) The configuration is flagged as done and the
  ///    current channel enable bits are stored as the
  ///    reference for the SEU monitoring.
  pub fn setup(&mut self, card : &FEDCard) -> Result<SetupReport, FEDError> {
    card.validate()?;
    info!("Setting up FED {}", card.fed_id);
    self.card       = card.clone();
    self.configured = false;
    self.drain.set_polling(&card.polling);
    self.fitel_maps.clear();

    self.write_param(FED_ID,              card.fed_id)?;
    self.write_param(FED_CONTROL,         card.control_register)?;
    self.write_param(FED_MODE,            card.mode_register)?;
    self.write_param(PRIVATE_WORD,        card.private_word)?;
    self.write_param(TTC_CLOCK_DELAY,     card.timing.ttc_clock_delay)?;
    self.write_param(TBM_HEADER_TIMEOUT,  card.timing.tbm_header_timeout)?;
    self.write_param(TBM_TRAILER_TIMEOUT, card.timing.tbm_trailer_timeout)?;
    self.set_channel_enable_mask(card.channel_enable_mask)?;

    let mut report = SetupReport::new();
    for slot in FitelSlot::ALL {
      let result = match self.load_fitel_reg_map(slot) {
        Ok(_)    => self.configure_fitel(slot, card.fitel_verify),
        Err(err) => Err(err),
      };
      match result {
        Ok(n_written) => {
          report.n_written[slot.index()] = n_written;
          debug!("{} configured, {} registers", slot, n_written);
        }
        Err(err) if err.is_fatal() => {
          error!("Configuration of {} failed, aborting setup! {}", slot, err);
          self.fitel_maps[slot].clear();
          return Err(err);
        }
        Err(err) => {
          error!("Configuration of {} failed! {}", slot, err);
          self.fitel_maps[slot].clear();
          report.slots[slot.index()] = Some(err);
        }
      }
    }

    self.write_param(PC_CONFIG_OK, 1)?;
    self.configured = true;
    self.reset_enable_bits();
    report.enable_bits = self.store_enable_bits()?;
    if report.is_ok() {
      info!("FED {} configured, {} channels enabled", card.fed_id, report.enable_bits.count());
    } else {
      warn!("FED {} configured with failing Fitels {:?}", card.fed_id,
            report.failed_slots().iter().map(|(s, _)| s.to_string()).collect::<Vec<String>>());
    }
    Ok(report)
  }

  /// Load the register map of slot from the file
  /// given in the card
  ///
  /// Returns the number of registers in the map.
  pub fn load_fitel_reg_map(&mut self, slot : FitelSlot) -> Result<usize, FEDError> {
    let path = self.card.fitel_regmap_path(slot.index()).ok_or(FEDError::InvalidArgument)?;
    debug!("Loading register map for {} from {}", slot, path.display());
    let map = load_fitel_regmap(&path)?;
    let n_regs = map.len();
    self.fitel_maps[slot] = map;
    Ok(n_regs)
  }

  /// Push the register map of slot to the Fitel
  ///
  /// All writable registers are written in address
  /// order. With verify, all readable registers are
  /// read back, their values in the map are updated
  /// and every writable register has to read back
  /// what was written.
  ///
  /// Returns the number of written registers
  pub fn configure_fitel(&mut self, slot : FitelSlot, verify : bool) -> Result<usize, FEDError> {
    let mut items : Vec<(String, u8, u8, bool)> = self.fitel_maps[slot]
      .iter()
      .map(|(name, item)| (name.clone(), item.address, item.value, item.permission.writable()))
      .collect();
    items.sort_by_key(|(_, address, _, _)| *address);

    let mut words = Vec::<u32>::new();
    for (name, _, _, writable) in items.iter() {
      if *writable {
        words.extend(encode_fitel_reg(&self.fitel_maps[slot][name], slot, FitelOp::Write)?);
      }
    }
    let n_written = words.len();
    if n_written > 0 {
      self.write_fitel_block_reg(&words)?;
    }
    if !verify {
      return Ok(n_written);
    }

    let readable : Vec<&(String, u8, u8, bool)> = items.iter()
      .filter(|(name, _, _, _)| self.fitel_maps[slot][name].permission.readable())
      .collect();
    let mut requests = Vec::<u32>::new();
    for (name, _, _, _) in readable.iter() {
      requests.extend(encode_fitel_reg(&self.fitel_maps[slot][name], slot, FitelOp::Read)?);
    }
    if requests.is_empty() {
      return Ok(n_written);
    }
    let replies = self.read_fitel_block_reg(&requests)?;
    if replies.len() != requests.len() {
      error!("Requested {} registers from {}, got {}!", requests.len(), slot, replies.len());
      return Err(FEDError::ProtocolViolation);
    }
    let mut n_mismatch = 0usize;
    for ((name, _, written, writable), word) in readable.iter().zip(replies.iter()) {
      let item = match self.fitel_maps[slot].get_mut(name) {
        Some(item) => item,
        None       => continue,
      };
      let readback = decode_fitel_reg(item, slot, *word)?;
      if *writable && readback != *written {
        error!("{} register {} reads back {:#04x}, but {:#04x} was written!",
               slot, name, readback, written);
        n_mismatch += 1;
      }
    }
    if n_mismatch > 0 {
      return Err(FEDError::VerificationFailed(n_mismatch));
    }
    Ok(n_written)
  }

  //========== Fitel I2C ==================
  //
  //=======================================

  /// Send write requests to the Fitels
  pub fn write_fitel_block_reg(&mut self, words : &[u32]) -> Result<(), FEDError> {
    let tries = self.card.polling.i2c_ack_tries;
    self.bus.write_block(FITEL_TX_FIFO, words)?;
    self.bus.write(FITEL_CONFIG_REQ, FITEL_REQ_WRITE)?;
    let acknowledged = self.poll_i2c_acknowledge(tries)?;
    self.i2c_release(tries)?;
    if !acknowledged {
      return Err(FEDError::NoAcknowledge);
    }
    Ok(())
  }

  /// Send read requests to the Fitels and get the
  /// replies from the receive fifo
  pub fn read_fitel_block_reg(&mut self, words : &[u32]) -> Result<Vec<u32>, FEDError> {
    let tries = self.card.polling.i2c_ack_tries;
    self.bus.write_block(FITEL_TX_FIFO, words)?;
    self.bus.write(FITEL_CONFIG_REQ, FITEL_REQ_READ)?;
    if !self.poll_i2c_acknowledge(tries)? {
      self.i2c_release(tries)?;
      return Err(FEDError::NoAcknowledge);
    }
    let replies = self.bus.read_block(FITEL_RX_FIFO, words.len())?;
    self.i2c_release(tries)?;
    Ok(replies)
  }

  /// Wait for the I2C engine to finish a request
  ///
  /// True if it reports success, false on an error
  /// acknowledge or when it did not answer within
  /// tries polls.
  pub fn poll_i2c_acknowledge(&mut self, tries : u32) -> Result<bool, FEDError> {
    let interval = Duration::from_micros(self.card.polling.poll_interval_us);
    for n_try in 0..tries {
      match self.bus.read(FITEL_I2C_ACK)? & 0x3 {
        FITEL_ACK_DONE  => return Ok(true),
        FITEL_ACK_ERROR => {
          warn!("I2C transaction has not been acknowledged!");
          return Ok(false);
        }
        _ => {
          if n_try + 1 < tries {
            thread::sleep(interval);
          }
        }
      }
    }
    warn!("No I2C acknowledge after {} tries!", tries);
    Ok(false)
  }

  /// Release the I2C bus and wait for the engine
  /// to become idle
  pub fn i2c_release(&mut self, tries : u32) -> Result<bool, FEDError> {
    self.bus.write(FITEL_CONFIG_REQ, FITEL_REQ_RELEASE)?;
    let idle = self.drain.poll_flag(&mut self.bus, FITEL_I2C_ACK, tries, |v| v & 0x3 == FITEL_ACK_IDLE)?;
    if !idle {
      warn!("I2C engine did not go idle after release!");
    }
    Ok(idle)
  }

  /// Read the RSSI ADCs of a Fitel
  ///
  /// Returns false and no values if the Fitel did
  /// not acknowledge or has no ADC registers in
  /// its map.
  pub fn read_adc(&mut self, slot : FitelSlot) -> Result<(bool, Vec<f64>), FEDError> {
    let mut adcs : Vec<(String, u8)> = self.fitel_maps[slot]
      .iter()
      .filter(|(name, item)| name.starts_with(FITEL_ADC_PREFIX) && item.permission.readable())
      .map(|(name, item)| (name.clone(), item.address))
      .collect();
    if adcs.is_empty() {
      warn!("No ADC registers in the map of {}!", slot);
      return Ok((false, Vec::new()));
    }
    adcs.sort_by_key(|(_, address)| *address);
    let mut requests = Vec::<u32>::new();
    for (name, _) in adcs.iter() {
      requests.extend(encode_fitel_reg(&self.fitel_maps[slot][name], slot, FitelOp::Read)?);
    }
    let replies = match self.read_fitel_block_reg(&requests) {
      Ok(replies) => replies,
      Err(FEDError::NoAcknowledge) => return Ok((false, Vec::new())),
      Err(err) => return Err(err),
    };
    let mut volts = Vec::<f64>::with_capacity(replies.len());
    for ((name, _), word) in adcs.iter().zip(replies.iter()) {
      if let Some(item) = self.fitel_maps[slot].get_mut(name) {
        let raw = decode_fitel_reg(item, slot, *word)?;
        volts.push(fitel_adc_to_volt(raw));
      }
    }
    Ok((volts.len() == adcs.len(), volts))
  }

  //========== Channel health =============
  //
  //=======================================

  fn monitor(&self) -> MutexGuard<'_, ChannelHealthMonitor> {
    match self.health.lock() {
      Ok(moni) => moni,
      Err(poisoned) => {
        error!("Health monitor lock is poisoned, continuing with its last state!");
        poisoned.into_inner()
      }
    }
  }

  /// A handle on the health monitor, e.g. for
  /// dashboards. Lock it only briefly.
  pub fn health_handle(&self) -> Arc<Mutex<ChannelHealthMonitor>> {
    Arc::clone(&self.health)
  }

  /// The enable bits the board reports right now
  pub fn read_enable_bits(&mut self) -> Result<EnableBits, FEDError> {
    let mask = read_split_48(&mut self.bus, CH_ENABLE_LO, CH_ENABLE_HI)?;
    Ok(EnableBits::from_mask(mask))
  }

  /// Take the current enable bits as the reference
  pub fn store_enable_bits(&mut self) -> Result<EnableBits, FEDError> {
    let observed = self.read_enable_bits()?;
    self.monitor().store_enable_bits(observed);
    Ok(observed)
  }

  /// Read the enable bits and count SEUs
  pub fn check_fed_channel_seu(&mut self) -> Result<bool, FEDError> {
    let observed = self.read_enable_bits()?;
    Ok(self.monitor().check_channel_seu(observed))
  }

  pub fn check_seu_counters(&self, threshold : u32) -> bool {
    self.monitor().check_seu_counters(threshold)
  }

  pub fn reset_seu_count_and_degrade_state(&mut self) {
    self.monitor().reset_seu_count_and_degrade_state();
  }

  pub fn reset_enable_bits(&mut self) {
    self.monitor().reset_enable_bits();
  }

  pub fn run_degraded(&self) -> bool {
    self.monitor().run_degraded()
  }

  pub fn clear_degraded_state(&mut self) {
    self.monitor().clear_degraded_state();
  }

  /// One round of health checking
  ///
  /// Checks for SEUs and the counters against the
  /// threshold of the card. Only if the card asks for
  /// it (auto_degrade) the board is put into degraded
  /// mode when the threshold is exceeded.
  pub fn health_cycle(&mut self) -> Result<HealthReport, FEDError> {
    let seu_found      = self.check_fed_channel_seu()?;
    let threshold      = self.card.seu_threshold;
    let over_threshold = self.check_seu_counters(threshold);
    let mut degraded_now = false;
    if over_threshold && self.card.auto_degrade {
      self.reset_seu_count_and_degrade_state();
      degraded_now = true;
    }
    let moni = self.monitor();
    let mut report = HealthReport::new(self.card.fed_id, &moni);
    report.seu_found      = seu_found;
    report.over_threshold = over_threshold;
    report.degraded_now   = degraded_now;
    Ok(report)
  }

  //========== Resets =====================
  //
  //=======================================

  /// Reset the board logic and start over with
  /// the first DDR bank
  pub fn reset(&mut self) -> Result<(), FEDError> {
    self.reset_fed()?;
    self.drain.select_daq_ddr(0)?;
    Ok(())
  }

  /// Logic reset, counter clear and error fifo
  /// clear, in this order
  pub fn reset_fed(&mut self) -> Result<(), FEDError> {
    info!("Resetting FED {}", self.card.fed_id);
    pulse(&mut self.bus, LRES)?;
    pulse(&mut self.bus, CLRES)?;
    pulse(&mut self.bus, ERROR_FIFO_CLEAR)?;
    Ok(())
  }

  /// Reload the FPGA. The board has to be
  /// set up again afterwards.
  pub fn load_fpga(&mut self) -> Result<(), FEDError> {
    warn!("Reloading the FPGA of FED {}!", self.card.fed_id);
    self.bus.write(FPGA_RELOAD, 1)?;
    self.configured = false;
    Ok(())
  }

  pub fn reset_slink(&mut self) -> Result<(), FEDError> {
    pulse(&mut self.bus, SLINK_RESET)?;
    Ok(())
  }

  //========== Channels ===================
  //
  //=======================================

  /// Enable exactly the channels in mask
  ///
  /// The board is told which channels to *disable*,
  /// so the inverted mask is written.
  pub fn set_channel_enable_mask(&mut self, mask : u64) -> Result<(), FEDError> {
    if mask & !CHANNEL_MASK_ALL != 0 {
      error!("Channel mask {:#x} has bits beyond channel {}!", mask, NCHN - 1);
      return Err(FEDError::InvalidArgument);
    }
    let (lo, hi) = EnableBits::from_mask(!mask).to_registers();
    self.write_param(CH_DISABLE_LO, lo)?;
    self.write_param(CH_DISABLE_HI, hi)?;
    self.card.channel_enable_mask = mask;
    Ok(())
  }

  /// Enable the channels as given in the card
  pub fn enable_channels_from_card(&mut self) -> Result<(), FEDError> {
    self.set_channel_enable_mask(self.card.channel_enable_mask)
  }

  pub fn enable_channel(&mut self, ch : usize) -> Result<(), FEDError> {
    let mut bits = self.card_enable_bits(ch)?;
    bits.set(ch, true);
    self.set_channel_enable_mask(bits.mask())
  }

  pub fn disable_channel(&mut self, ch : usize) -> Result<(), FEDError> {
    let mut bits = self.card_enable_bits(ch)?;
    bits.set(ch, false);
    self.set_channel_enable_mask(bits.mask())
  }

  fn card_enable_bits(&self, ch : usize) -> Result<EnableBits, FEDError> {
    if ch >= NCHN {
      error!("There is no channel {}!", ch);
      return Err(FEDError::InvalidArgument);
    }
    Ok(EnableBits::from_mask(self.card.channel_enable_mask))
  }

  //========== Raw registers ==============
  //
  //=======================================

  /// Write the FED id from the card
  pub fn load_fed_id_register(&mut self) -> Result<(), FEDError> {
    self.write_param(FED_ID, self.card.fed_id)
  }

  pub fn set_fed_id_register(&mut self, fed_id : u32) -> Result<(), FEDError> {
    self.write_param(FED_ID, fed_id)?;
    self.card.fed_id = fed_id;
    Ok(())
  }

  pub fn get_fed_id_register(&mut self) -> Result<u32, FEDError> {
    Ok(self.bus.read(FED_ID)?)
  }

  /// Write the control register from the card
  pub fn load_control_register(&mut self) -> Result<(), FEDError> {
    self.write_param(FED_CONTROL, self.card.control_register)
  }

  pub fn set_control_register(&mut self, value : u32) -> Result<(), FEDError> {
    self.write_param(FED_CONTROL, value)?;
    self.card.control_register = value;
    Ok(())
  }

  pub fn get_control_register(&mut self) -> Result<u32, FEDError> {
    Ok(self.bus.read(FED_CONTROL)?)
  }

  /// Write the mode register from the card
  pub fn load_mode_register(&mut self) -> Result<(), FEDError> {
    self.write_param(FED_MODE, self.card.mode_register)
  }

  pub fn set_mode_register(&mut self, value : u32) -> Result<(), FEDError> {
    self.write_param(FED_MODE, value)?;
    self.card.mode_register = value;
    Ok(())
  }

  pub fn get_mode_register(&mut self) -> Result<u32, FEDError> {
    Ok(self.bus.read(FED_MODE)?)
  }

  pub fn set_private_word(&mut self, word : u32) -> Result<(), FEDError> {
    self.write_param(PRIVATE_WORD, word)?;
    self.card.private_word = word;
    Ok(())
  }

  pub fn read_event_counter(&mut self) -> Result<u32, FEDError> {
    Ok(self.bus.read(EVENT_COUNTER)?)
  }

  pub fn get_fifo_status(&mut self) -> Result<u32, FEDError> {
    Ok(self.bus.read(FIFO_STATUS)?)
  }

  pub fn link_full_flag(&mut self) -> Result<u32, FEDError> {
    Ok(self.bus.read(LINK_FULL_FLAG)?)
  }

  pub fn num_pll_locks(&mut self) -> Result<u32, FEDError> {
    Ok(self.bus.read(PLL_LOCKS)?)
  }

  pub fn get_fifo_fill_level(&mut self) -> Result<u32, FEDError> {
    Ok(self.bus.read(FIFO_FILL_LEVEL)?)
  }

  /// Channels which have been skipped by the
  /// event builder
  pub fn get_skipped_channels(&mut self) -> Result<EnableBits, FEDError> {
    let mask = read_split_48(&mut self.bus, SKIPPED_CH_LO, SKIPPED_CH_HI)?;
    Ok(EnableBits::from_mask(mask))
  }

  pub fn get_error_report(&mut self, ch : usize) -> Result<u32, FEDError> {
    self.channel_report(ERROR_REPORT_PREFIX, ch)
  }

  pub fn get_timeout_report(&mut self, ch : usize) -> Result<u32, FEDError> {
    self.channel_report(TIMEOUT_REPORT_PREFIX, ch)
  }

  fn channel_report(&mut self, prefix : &str, ch : usize) -> Result<u32, FEDError> {
    if ch >= NCHN {
      error!("There is no channel {}!", ch);
      return Err(FEDError::InvalidArgument);
    }
    Ok(self.bus.read(&channel_register(prefix, ch))?)
  }

  /// The (user, system) firmware dates as 0xYYMMDD
  pub fn get_firmware_date(&mut self) -> Result<(u32, u32), FEDError> {
    let user   = self.bus.read(FW_DATE_USER)?;
    let system = self.bus.read(FW_DATE_SYSTEM)?;
    Ok((user, system))
  }

  /// The board id register holds 4 ascii characters
  pub fn get_board_type(&mut self) -> Result<String, FEDError> {
    let id = self.bus.read(BOARD_ID)?;
    let board_type : String = id.to_be_bytes()
                                .iter()
                                .filter(|c| c.is_ascii_graphic())
                                .map(|c| *c as char)
                                .collect();
    Ok(board_type)
  }

  pub fn get_board_info(&mut self) -> Result<BoardInfo, FEDError> {
    let board_type = self.get_board_type()?;
    let (fw_date_user, fw_date_system) = self.get_firmware_date()?;
    let info = BoardInfo {
      board_type,
      fw_date_user,
      fw_date_system,
      fmc_powered    : self.bus.read(FMC_POWER)? & 0x1 == 1,
      n_pll_locks    : self.num_pll_locks()?,
      event_counter  : self.read_event_counter()?,
    };
    Ok(info)
  }

  pub fn enable_fmcs(&mut self) -> Result<(), FEDError> {
    info!("Powering FMCs");
    self.write_param(FMC_POWER, 1)
  }

  pub fn disable_fmcs(&mut self) -> Result<(), FEDError> {
    info!("Switching FMCs off");
    self.write_param(FMC_POWER, 0)
  }

  /// Drive the TTS outputs with a 4bit test pattern
  pub fn test_tts_bits(&mut self, pattern : u32) -> Result<(), FEDError> {
    if pattern > 0xf {
      error!("TTS pattern {:#x} does not fit into 4 bits!", pattern);
      return Err(FEDError::InvalidArgument);
    }
    self.write_param(TTS_TEST_VALUE, pattern)?;
    self.write_param(TTS_TEST_ENABLE, 1)?;
    Ok(())
  }

  pub fn disable_tts_test(&mut self) -> Result<(), FEDError> {
    self.write_param(TTS_TEST_ENABLE, 0)
  }

  pub fn set_xy(&mut self, x : u32, y : u32) -> Result<(), FEDError> {
    self.write_param(XY_X, x)?;
    self.write_param(XY_Y, y)?;
    Ok(())
  }

  pub fn get_xy_count(&mut self) -> Result<u32, FEDError> {
    Ok(self.bus.read(XY_COUNT)?)
  }

  pub fn reset_xy_count(&mut self) -> Result<(), FEDError> {
    pulse(&mut self.bus, XY_COUNT_RESET)?;
    Ok(())
  }

  pub fn get_num_fake_events(&mut self) -> Result<u32, FEDError> {
    Ok(self.bus.read(NUM_FAKE_EVENTS)?)
  }

  pub fn reset_num_fake_events(&mut self) -> Result<(), FEDError> {
    pulse(&mut self.bus, FAKE_EVENT_RESET)?;
    Ok(())
  }

  //========== Readout ====================
  //
  //=======================================

  pub fn enable_spy_memory(&mut self, enable : bool) -> Result<(), FEDError> {
    self.write_param(SPY_ENABLE, enable as u32)
  }

  pub fn is_whole_event(&mut self, max_tries : u32) -> Result<bool, FEDError> {
    self.drain.is_whole_event(&mut self.bus, max_tries)
  }

  pub fn is_new_event(&mut self, max_tries : u32) -> Result<bool, FEDError> {
    self.drain.is_new_event(&mut self.bus, max_tries)
  }

  /// Wait for an ongoing upload, true if it
  /// is still going on
  pub fn check_if_uploading(&mut self) -> Result<bool, FEDError> {
    let tries = self.card.polling.upload_tries;
    self.drain.check_if_uploading(&mut self.bus, tries)
  }

  pub fn drain_fifo(&mut self, kind : FifoKind, buffer : &mut Vec<u32>) -> Result<usize, FEDError> {
    self.drain.drain_fifo(&mut self.bus, kind, buffer)
  }

  pub fn drain_fifo1(&mut self, buffer : &mut Vec<u32>) -> Result<usize, FEDError> {
    self.drain_fifo(FifoKind::Fifo1, buffer)
  }

  pub fn drain_error_fifo(&mut self, buffer : &mut Vec<u32>) -> Result<usize, FEDError> {
    self.drain_fifo(FifoKind::Error, buffer)
  }

  pub fn drain_tbm_fifo(&mut self, buffer : &mut Vec<u32>) -> Result<usize, FEDError> {
    self.drain_fifo(FifoKind::TBM, buffer)
  }

  pub fn drain_temperature_fifo(&mut self, buffer : &mut Vec<u32>) -> Result<usize, FEDError> {
    self.drain_fifo(FifoKind::Temperature, buffer)
  }

  pub fn drain_tts_fifo(&mut self, buffer : &mut Vec<u32>) -> Result<usize, FEDError> {
    self.drain_fifo(FifoKind::TTS, buffer)
  }

  pub fn drain_spy_fifo(&mut self, buffer : &mut Vec<u32>) -> Result<usize, FEDError> {
    self.drain_fifo(FifoKind::Spy, buffer)
  }

  pub fn drain_transparent_fifo(&mut self, buffer : &mut Vec<u32>) -> Result<usize, FEDError> {
    self.drain_fifo(FifoKind::Transparent, buffer)
  }

  pub fn read_fifo1(&mut self) -> Result<Vec<u32>, FEDError> {
    self.drain.read_fifo(&mut self.bus, FifoKind::Fifo1)
  }

  pub fn read_spy_fifo(&mut self) -> Result<Vec<u32>, FEDError> {
    self.drain.read_fifo(&mut self.bus, FifoKind::Spy)
  }

  pub fn read_transparent_fifo(&mut self) -> Result<Vec<u32>, FEDError> {
    self.drain.read_fifo(&mut self.bus, FifoKind::Transparent)
  }

  pub fn spy_slink64(&mut self) -> Result<Vec<u64>, FEDError> {
    self.drain.spy_slink64(&mut self.bus)
  }

  pub fn select_daq_ddr(&mut self, index : u32) -> Result<(), FEDError> {
    self.drain.select_daq_ddr(index)
  }

  /// Read block_size words from the current DDR bank
  pub fn read_data(&mut self, block_size : u32) -> Result<Vec<u32>, FEDError> {
    self.drain.read_data(&mut self.bus, block_size)
  }

  //========== Firmware ===================
  //
  //=======================================

  /// Hand a request to the firmware manager, but
  /// not while an upload is going on
  fn with_firmware<T, F>(&mut self, request : F) -> Result<T, FEDError>
    where F : FnOnce(&mut (dyn FirmwareManager + Send)) -> Result<T, RegisterError> {
    if self.firmware.is_none() {
      error!("No firmware manager attached to FED {}!", self.card.fed_id);
      return Err(FEDError::NoFirmwareManager);
    }
    if self.check_if_uploading()? {
      return Err(FEDError::UploadInProgress);
    }
    match self.firmware.as_mut() {
      Some(manager) => Ok(request(&mut **manager)?),
      None          => Err(FEDError::NoFirmwareManager),
    }
  }

  pub fn flash_prom(&mut self, config : &str, path : &str) -> Result<(), FEDError> {
    info!("Flashing {} to {}", path, config);
    self.with_firmware(|fw| fw.flash_prom(config, path))
  }

  /// Reconfigure the FPGA from config. The board
  /// has to be set up again afterwards.
  pub fn jump_to_fpga_config(&mut self, config : &str) -> Result<(), FEDError> {
    info!("Jumping to FPGA configuration {}", config);
    self.with_firmware(|fw| fw.jump_to_fpga_config(config))?;
    self.configured = false;
    Ok(())
  }

  pub fn get_fpga_config_list(&mut self) -> Result<Vec<String>, FEDError> {
    self.with_firmware(|fw| fw.get_fpga_config_list())
  }

  pub fn delete_fpga_config(&mut self, config : &str) -> Result<(), FEDError> {
    warn!("Deleting FPGA configuration {}", config);
    self.with_firmware(|fw| fw.delete_fpga_config(config))
  }

  pub fn download_fpga_config(&mut self, config : &str, path : &str) -> Result<(), FEDError> {
    self.with_firmware(|fw| fw.download_fpga_config(config, path))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sim::SimBoard;

  fn controller() -> FEDController<SimBoard> {
    let mut fed = FEDController::new(SimBoard::new());
    fed.card.polling.poll_interval_us = 0;
    fed.drain.set_polling(&fed.card.polling);
    fed
  }

  #[test]
  fn channel_mask_is_inverted() {
    let mut fed = controller();
    fed.set_channel_enable_mask(0x0000_0000_0003).unwrap();
    assert_eq!(fed.bus().register(CH_DISABLE_LO), 0xffff_fffc);
    assert_eq!(fed.bus().register(CH_DISABLE_HI), 0xffff);
    assert_eq!(fed.read_enable_bits().unwrap(), EnableBits::from_mask(0x3));
    assert_eq!(fed.set_channel_enable_mask(1 << 48), Err(FEDError::InvalidArgument));
  }

  #[test]
  fn single_channels() {
    let mut fed = controller();
    fed.set_channel_enable_mask(CHANNEL_MASK_ALL).unwrap();
    fed.disable_channel(40).unwrap();
    assert_eq!(fed.card().channel_enable_mask, CHANNEL_MASK_ALL & !(1 << 40));
    assert_eq!(fed.bus().register(CH_DISABLE_HI), 1 << 8);
    fed.enable_channel(40).unwrap();
    assert_eq!(fed.bus().register(CH_DISABLE_HI), 0);
    assert_eq!(fed.enable_channel(48), Err(FEDError::InvalidArgument));
  }

  #[test]
  fn channel_reports() {
    let mut fed = controller();
    fed.bus_mut().set_register("pixfed_stat_regs.error_report_ch07", 0x42);
    assert_eq!(fed.get_error_report(7), Ok(0x42));
    assert_eq!(fed.get_timeout_report(48), Err(FEDError::InvalidArgument));
  }

  #[test]
  fn board_type() {
    let mut fed = controller();
    assert_eq!(fed.get_board_type(), Ok(String::from("PFED")));
  }

  #[test]
  fn tts_pattern() {
    let mut fed = controller();
    assert_eq!(fed.test_tts_bits(0x10), Err(FEDError::InvalidArgument));
    fed.test_tts_bits(0x5).unwrap();
    assert_eq!(fed.bus().register(TTS_TEST_VALUE), 0x5);
    assert_eq!(fed.bus().register(TTS_TEST_ENABLE), 1);
  }

  #[test]
  fn i2c_error_acknowledge() {
    let mut fed = controller();
    fed.bus_mut().set_register(FITEL_I2C_ACK, FITEL_ACK_ERROR);
    assert_eq!(fed.poll_i2c_acknowledge(3), Ok(false));
    assert_eq!(fed.bus().read_count(FITEL_I2C_ACK), 1);
  }

  #[test]
  fn i2c_no_answer() {
    let mut fed = controller();
    assert_eq!(fed.poll_i2c_acknowledge(4), Ok(false));
    assert_eq!(fed.bus().read_count(FITEL_I2C_ACK), 4);
  }

  #[test]
  fn i2c_no_sleep_after_last_try() {
    let mut fed = controller();
    fed.card.polling.poll_interval_us = 500_000;
    let start = std::time::Instant::now();
    assert_eq!(fed.poll_i2c_acknowledge(1), Ok(false));
    assert!(start.elapsed() < Duration::from_millis(250));
    assert_eq!(fed.bus().read_count(FITEL_I2C_ACK), 1);
  }

  #[test]
  fn no_firmware_manager() {
    let mut fed = controller();
    assert_eq!(fed.get_fpga_config_list(), Err(FEDError::NoFirmwareManager));
    assert!(fed.bus().log().is_empty());
  }
}
