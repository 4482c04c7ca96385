//! Board configuration card for a pixel FED
//!
//! The card is the declarative description of
//! how a single FED should be configured: which
//! channels are enabled, the timing parameters,
//! the Fitel register maps and the thresholds
//! for the SEU channel-health tracking.
//!
//! Cards are stored as toml (preferred) or json.
//!

use std::fs::File;
use std::io::{
    Write,
    Read,
};
use std::fmt;
use std::path::PathBuf;

use log::LevelFilter;

use crate::constants::{
  NCHN,
  N_FITELS,
  CHANNEL_MASK_ALL,
  DDR_MAX_BLOCK_SIZE,
  MAX_POLL_INTERVAL_US,
  MAX_MONI_INTERVAL,
  DEFAULT_BLOCK_SIZE,
  DEFAULT_SEU_THRESHOLD,
  DEFAULT_WHOLE_EVENT_TRIES,
  DEFAULT_NEW_EVENT_TRIES,
  DEFAULT_UPLOAD_TRIES,
  DEFAULT_I2C_ACK_TRIES,
  DEFAULT_POLL_INTERVAL_US,
  DEFAULT_FITEL_FN_BASE,
  DEFAULT_FITEL_FILES,
};
use crate::errors::SettingsError;

/// Verbosity of the FED interface
///
/// Replaces the global "print level" with a value
/// which travels with the card.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize)]
pub enum PrintLevel {
  /// Only report conditions which stop operations
  CriticalOnly,
  /// Report all errors
  Error,
  /// General information
  Info,
  /// Also trace every parameter written to the board
  ParamTrace,
}

impl PrintLevel {
  pub fn to_level_filter(&self) -> LevelFilter {
    match self {
      PrintLevel::CriticalOnly => LevelFilter::Error,
      PrintLevel::Error        => LevelFilter::Error,
      PrintLevel::Info         => LevelFilter::Info,
      PrintLevel::ParamTrace   => LevelFilter::Trace,
    }
  }

  /// Shall every register write be reported?
  pub fn traces_parameters(&self) -> bool {
    *self == PrintLevel::ParamTrace
  }
}

impl fmt::Display for PrintLevel {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      PrintLevel::CriticalOnly => "CriticalOnly",
      PrintLevel::Error        => "Error",
      PrintLevel::Info         => "Info",
      PrintLevel::ParamTrace   => "ParamTrace",
    };
    write!(f, "<PrintLevel: {}>", repr)
  }
}

/// Timing parameters which are written to the
/// board during setup
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TimingSettings {
  /// Delay of the TTC clock w.r.t. the FED clock
  /// (in units of the TTC fine delay)
  pub ttc_clock_delay     : u32,
  /// Number of clock cycles to wait for a TBM header
  pub tbm_header_timeout  : u32,
  /// Number of clock cycles to wait for a TBM trailer
  pub tbm_trailer_timeout : u32,
}

impl TimingSettings {
  pub fn new() -> Self {
    Self {
      ttc_clock_delay     : 0,
      tbm_header_timeout  : 0x100,
      tbm_trailer_timeout : 0x100,
    }
  }
}

impl Default for TimingSettings {
  fn default() -> Self {
    Self::new()
  }
}

/// Try budgets for the bounded polling loops
///
/// A poll which exhausts its budget is not an error,
/// the polled condition is simply "not yet met".
#[derive(Debug, Copy, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PollSettings {
  pub whole_event_tries : u32,
  pub new_event_tries   : u32,
  pub upload_tries      : u32,
  pub i2c_ack_tries     : u32,
  /// Sleep between consecutive polls
  pub poll_interval_us  : u64,
}

impl PollSettings {
  pub fn new() -> Self {
    Self {
      whole_event_tries : DEFAULT_WHOLE_EVENT_TRIES,
      new_event_tries   : DEFAULT_NEW_EVENT_TRIES,
      upload_tries      : DEFAULT_UPLOAD_TRIES,
      i2c_ack_tries     : DEFAULT_I2C_ACK_TRIES,
      poll_interval_us  : DEFAULT_POLL_INTERVAL_US,
    }
  }
}

impl Default for PollSettings {
  fn default() -> Self {
    Self::new()
  }
}

/// The configuration card of a single FED
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct FEDCard {
  /// The FED id as it will appear in the Slink header
  pub fed_id               : u32,
  /// Bit n set means channel n (0-47) is enabled
  pub channel_enable_mask  : u64,
  pub control_register     : u32,
  pub mode_register        : u32,
  /// Free word which will be written into the
  /// event trailer
  pub private_word         : u32,
  /// Directory containing the Fitel register map files
  pub fitel_fn_base        : String,
  /// One register map file per Fitel, in
  /// FMC0_Fitel0, FMC0_Fitel1, FMC1_Fitel0, FMC1_Fitel1
  /// order.
  pub fitel_regmap_files   : [String;N_FITELS],
  /// Read every Fitel register back after configuring
  /// and compare with what we wrote
  pub fitel_verify         : bool,
  /// A channel with more SEUs than this triggers
  /// the degraded mode
  pub seu_threshold        : u32,
  /// Let the monitoring loop put the board in
  /// degraded mode on its own once the threshold
  /// is exceeded. Otherwise only report.
  pub auto_degrade         : bool,
  pub print_level          : PrintLevel,
  /// Size of a DDR block read in 32bit words
  pub block_size           : u32,
  /// Interval of the SEU monitoring in seconds
  pub moni_interval        : f32,
  pub timing               : TimingSettings,
  pub polling              : PollSettings,
}

impl FEDCard {
  pub fn new() -> Self {
    Self {
      fed_id               : 0,
      channel_enable_mask  : CHANNEL_MASK_ALL,
      control_register     : 0,
      mode_register        : 0,
      private_word         : 0,
      fitel_fn_base        : String::from(DEFAULT_FITEL_FN_BASE),
      fitel_regmap_files   : DEFAULT_FITEL_FILES.map(String::from),
      fitel_verify         : true,
      seu_threshold        : DEFAULT_SEU_THRESHOLD,
      auto_degrade         : false,
      print_level          : PrintLevel::Info,
      block_size           : DEFAULT_BLOCK_SIZE,
      moni_interval        : 5.0,
      timing               : TimingSettings::new(),
      polling              : PollSettings::new(),
    }
  }

  /// Is channel ch (0-47) enabled in this card?
  pub fn channel_enabled(&self, ch : usize) -> bool {
    ch < NCHN && (self.channel_enable_mask >> ch) & 0x1 == 1
  }

  /// The number of enabled channels
  pub fn n_enabled_channels(&self) -> u32 {
    (self.channel_enable_mask & CHANNEL_MASK_ALL).count_ones()
  }

  /// The full path of the register map file of
  /// Fitel number `idx` (0-3)
  ///
  /// Absolute paths in the card are kept as
  /// they are, relative paths are resolved
  /// against fitel_fn_base
  pub fn fitel_regmap_path(&self, idx : usize) -> Option<PathBuf> {
    let fname = self.fitel_regmap_files.get(idx)?;
    let path  = PathBuf::from(fname);
    if path.is_absolute() {
      return Some(path);
    }
    Some(PathBuf::from(&self.fitel_fn_base).join(path))
  }

  /// Check that the card can be used to
  /// configure a board
  pub fn validate(&self) -> Result<(), SettingsError> {
    if self.channel_enable_mask & !CHANNEL_MASK_ALL != 0 {
      error!("Channel enable mask {:#x} has bits set beyond channel {}!", self.channel_enable_mask, NCHN - 1);
      return Err(SettingsError::InvalidCard);
    }
    if self.block_size == 0 || self.block_size > DDR_MAX_BLOCK_SIZE {
      error!("Block size {} is not in (0,{}]!", self.block_size, DDR_MAX_BLOCK_SIZE);
      return Err(SettingsError::InvalidCard);
    }
    if self.polling.whole_event_tries == 0
      || self.polling.new_event_tries == 0
      || self.polling.upload_tries    == 0
      || self.polling.i2c_ack_tries   == 0 {
      error!("All try budgets have to be > 0! {:?}", self.polling);
      return Err(SettingsError::InvalidCard);
    }
    for (k, fname) in self.fitel_regmap_files.iter().enumerate() {
      if fname.trim().is_empty() {
        error!("No register map file given for Fitel {k}!");
        return Err(SettingsError::InvalidCard);
      }
    }
    if self.polling.poll_interval_us > MAX_POLL_INTERVAL_US {
      error!("Poll interval {}us is beyond {}us!", self.polling.poll_interval_us, MAX_POLL_INTERVAL_US);
      return Err(SettingsError::InvalidCard);
    }
    if !self.moni_interval.is_finite()
      || self.moni_interval < 0.0
      || self.moni_interval > MAX_MONI_INTERVAL {
      error!("Monitoring interval {} is not in [0,{}]!", self.moni_interval, MAX_MONI_INTERVAL);
      return Err(SettingsError::InvalidCard);
    }
    Ok(())
  }

  /// Write the card to a toml file
  pub fn to_toml(&self, mut filename : String) -> Result<(), SettingsError> {
    if !filename.ends_with(".toml") {
      filename += ".toml";
    }
    info!("Will write to file {}!", filename);
    let toml_string = match toml::to_string_pretty(&self) {
      Err(err) => {
        error!("Unable to serialize toml! {err}");
        return Err(SettingsError::TomlEncodingError);
      }
      Ok(toml_string) => toml_string
    };
    let mut file = match File::create(&filename) {
      Err(err) => {
        error!("Unable to open file {}! {}", filename, err);
        return Err(SettingsError::IOError);
      }
      Ok(file) => file
    };
    match file.write_all(toml_string.as_bytes()) {
      Err(err) => {
        error!("Unable to write to file {}! {}", filename, err);
        Err(SettingsError::IOError)
      }
      Ok(_) => {
        debug!("Wrote card to {}!", filename);
        Ok(())
      }
    }
  }

  /// Write the card to a json file
  pub fn to_json(&self, mut filename : String) -> Result<(), SettingsError> {
    if !filename.ends_with(".json") {
      filename += ".json";
    }
    info!("Will write to file {}!", filename);
    let json_string = match serde_json::to_string_pretty(&self) {
      Err(err) => {
        error!("Unable to serialize json! {err}");
        return Err(SettingsError::JsonEncodingError);
      }
      Ok(json_string) => json_string
    };
    match File::create(&filename) {
      Err(err) => {
        error!("Unable to open file {}! {}", filename, err);
        Err(SettingsError::IOError)
      }
      Ok(mut file) => {
        match file.write_all(json_string.as_bytes()) {
          Err(err) => {
            error!("Unable to write to file {}! {}", filename, err);
            Err(SettingsError::IOError)
          }
          Ok(_) => Ok(())
        }
      }
    }
  }

  fn read_to_string(filename : &str) -> Result<String, SettingsError> {
    let mut file = match File::open(filename) {
      Err(err) => {
        error!("Unable to open {}! {}", filename, err);
        return Err(SettingsError::IOError);
      }
      Ok(file) => file
    };
    let mut content = String::from("");
    match file.read_to_string(&mut content) {
      Err(err) => {
        error!("Unable to read {}! {}", filename, err);
        Err(SettingsError::IOError)
      }
      Ok(_) => Ok(content)
    }
  }

  /// Read a card from a toml file
  pub fn from_toml(filename : &str) -> Result<FEDCard, SettingsError> {
    let toml_string = Self::read_to_string(filename)?;
    match toml::from_str(&toml_string) {
      Err(err) => {
        error!("Can't interpret toml! {}", err);
        Err(SettingsError::TomlDecodingError)
      }
      Ok(card) => Ok(card)
    }
  }

  /// Read a card from a json file
  pub fn from_json(filename : &str) -> Result<FEDCard, SettingsError> {
    let json_string = Self::read_to_string(filename)?;
    match serde_json::from_str(&json_string) {
      Err(err) => {
        error!("Can't interpret json! {}", err);
        Err(SettingsError::JsonDecodingError)
      }
      Ok(card) => Ok(card)
    }
  }

  /// Read a card, picking the format from
  /// the file extension
  pub fn from_file(filename : &str) -> Result<FEDCard, SettingsError> {
    if filename.ends_with(".json") {
      Self::from_json(filename)
    } else {
      Self::from_toml(filename)
    }
  }
}

impl Default for FEDCard {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for FEDCard {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp = toml::to_string(self).unwrap_or(
      String::from("-- DESERIALIZATION ERROR! --"));
    write!(f, "<FEDCard :\n{}>", disp)
  }
}

#[test]
fn default_card_is_valid() {
  let card = FEDCard::new();
  assert!(card.validate().is_ok());
  assert_eq!(card.n_enabled_channels(), NCHN as u32);
  assert!(card.channel_enabled(0));
  assert!(card.channel_enabled(47));
  assert!(!card.channel_enabled(48));
}

#[test]
fn invalid_cards() {
  let mut card = FEDCard::new();
  card.channel_enable_mask = 1u64 << 48;
  assert_eq!(card.validate(), Err(SettingsError::InvalidCard));
  let mut card = FEDCard::new();
  card.block_size = DDR_MAX_BLOCK_SIZE + 1;
  assert_eq!(card.validate(), Err(SettingsError::InvalidCard));
  let mut card = FEDCard::new();
  card.polling.i2c_ack_tries = 0;
  assert_eq!(card.validate(), Err(SettingsError::InvalidCard));
  let mut card = FEDCard::new();
  card.fitel_regmap_files[2] = String::from("  ");
  assert_eq!(card.validate(), Err(SettingsError::InvalidCard));
}

#[test]
fn unusable_intervals() {
  for moni_interval in [f32::INFINITY, f32::NAN, -1.0, 1e9] {
    let mut card = FEDCard::new();
    card.moni_interval = moni_interval;
    assert_eq!(card.validate(), Err(SettingsError::InvalidCard));
  }
  let mut card = FEDCard::new();
  card.polling.poll_interval_us = u64::MAX;
  assert_eq!(card.validate(), Err(SettingsError::InvalidCard));
  let mut card = FEDCard::new();
  card.polling.poll_interval_us = MAX_POLL_INTERVAL_US;
  card.moni_interval            = MAX_MONI_INTERVAL;
  assert!(card.validate().is_ok());
}

#[test]
fn regmap_paths() {
  let mut card = FEDCard::new();
  card.fitel_fn_base = String::from("/tmp/fitel");
  card.fitel_regmap_files[3] = String::from("/etc/fitel/custom.txt");
  assert_eq!(card.fitel_regmap_path(0), Some(PathBuf::from("/tmp/fitel/FMC0_Fitel0.txt")));
  assert_eq!(card.fitel_regmap_path(3), Some(PathBuf::from("/etc/fitel/custom.txt")));
  assert_eq!(card.fitel_regmap_path(4), None);
}

#[test]
fn print_levels() {
  assert_eq!(PrintLevel::CriticalOnly.to_level_filter(), LevelFilter::Error);
  assert_eq!(PrintLevel::ParamTrace.to_level_filter(), LevelFilter::Trace);
  assert!(PrintLevel::ParamTrace.traces_parameters());
  assert!(!PrintLevel::Info.traces_parameters());
  assert!(PrintLevel::Error < PrintLevel::Info);
}
