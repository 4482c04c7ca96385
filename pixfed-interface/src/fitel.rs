//! Fitel receivers and their register protocol
//!
//! The FED hosts 2 FMC mezzanines with 2 Fitel optical
//! receivers each. Every Fitel has its own register map
//! which is loaded from a text file and pushed over I2C.
//!
//! A single I2C request is a 32bit word:
//!
//! | bits    | content                      |
//! |---------|------------------------------|
//! | [31:24] | FMC id                       |
//! | [23:20] | Fitel id                     |
//! | [16]    | 1 = read, 0 = write          |
//! | [15:8]  | register address             |
//! | [7:0]   | value (0 for reads)          |
//!
//! Replies from the receive fifo have the same layout,
//! with the value field filled.
//!

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::fs::read_to_string;
use std::ops::{
    Index,
    IndexMut,
};
use std::path::Path;

use pixfed_lib::constants::N_FITELS;

use crate::errors::{
    FEDError,
    RegMapError,
    RegMapErrorKind,
};

const FMC_SHIFT     : u32 = 24;
const FITEL_SHIFT   : u32 = 20;
const READ_FLAG     : u32 = 1 << 16;
const ADDRESS_SHIFT : u32 = 8;
const FMC_MASK      : u32 = 0xff000000;
const FITEL_MASK    : u32 = 0x00f00000;
const ADDRESS_MASK  : u32 = 0x0000ff00;
const VALUE_MASK    : u32 = 0x000000ff;

/// Full scale of the Fitel ADC (RSSI) in Volt
pub const FITEL_ADC_FULL_SCALE : f64 = 3.3;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Fmc {
  Fmc0,
  Fmc1,
}

impl Fmc {
  pub fn id(&self) -> u8 {
    match self {
      Fmc::Fmc0 => 0,
      Fmc::Fmc1 => 1,
    }
  }
}

impl TryFrom<u8> for Fmc {
  type Error = FEDError;
  fn try_from(id : u8) -> Result<Self, Self::Error> {
    match id {
      0 => Ok(Fmc::Fmc0),
      1 => Ok(Fmc::Fmc1),
      _ => Err(FEDError::InvalidArgument)
    }
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Fitel {
  Fitel0,
  Fitel1,
}

impl Fitel {
  pub fn id(&self) -> u8 {
    match self {
      Fitel::Fitel0 => 0,
      Fitel::Fitel1 => 1,
    }
  }
}

impl TryFrom<u8> for Fitel {
  type Error = FEDError;
  fn try_from(id : u8) -> Result<Self, Self::Error> {
    match id {
      0 => Ok(Fitel::Fitel0),
      1 => Ok(Fitel::Fitel1),
      _ => Err(FEDError::InvalidArgument)
    }
  }
}

/// One of the 4 Fitel receivers, addressed
/// by its FMC and its position on the FMC
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FitelSlot {
  pub fmc   : Fmc,
  pub fitel : Fitel,
}

impl FitelSlot {
  pub const FMC0_FITEL0 : FitelSlot = FitelSlot { fmc : Fmc::Fmc0, fitel : Fitel::Fitel0 };
  pub const FMC0_FITEL1 : FitelSlot = FitelSlot { fmc : Fmc::Fmc0, fitel : Fitel::Fitel1 };
  pub const FMC1_FITEL0 : FitelSlot = FitelSlot { fmc : Fmc::Fmc1, fitel : Fitel::Fitel0 };
  pub const FMC1_FITEL1 : FitelSlot = FitelSlot { fmc : Fmc::Fmc1, fitel : Fitel::Fitel1 };

  /// All slots, in the order the card lists
  /// the register map files
  pub const ALL : [FitelSlot;N_FITELS] = [
    FitelSlot::FMC0_FITEL0,
    FitelSlot::FMC0_FITEL1,
    FitelSlot::FMC1_FITEL0,
    FitelSlot::FMC1_FITEL1,
  ];

  pub fn new(fmc : Fmc, fitel : Fitel) -> Self {
    Self {
      fmc,
      fitel,
    }
  }

  /// Position in FitelSlot::ALL
  pub fn index(&self) -> usize {
    match (self.fmc, self.fitel) {
      (Fmc::Fmc0, Fitel::Fitel0) => 0,
      (Fmc::Fmc0, Fitel::Fitel1) => 1,
      (Fmc::Fmc1, Fitel::Fitel0) => 2,
      (Fmc::Fmc1, Fitel::Fitel1) => 3,
    }
  }

  pub fn from_ids(fmc_id : u8, fitel_id : u8) -> Result<Self, FEDError> {
    Ok(Self::new(Fmc::try_from(fmc_id)?, Fitel::try_from(fitel_id)?))
  }
}

impl fmt::Display for FitelSlot {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "FMC{}_Fitel{}", self.fmc.id(), self.fitel.id())
  }
}

/// Access permission of a Fitel register
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Permission {
  Read,
  Write,
  ReadWrite,
}

impl Permission {
  pub fn from_tag(tag : &str) -> Option<Self> {
    match tag {
      "r"  => Some(Permission::Read),
      "w"  => Some(Permission::Write),
      "rw" => Some(Permission::ReadWrite),
      _    => None
    }
  }

  pub fn tag(&self) -> &'static str {
    match self {
      Permission::Read      => "r",
      Permission::Write     => "w",
      Permission::ReadWrite => "rw",
    }
  }

  pub fn readable(&self) -> bool {
    *self != Permission::Write
  }

  pub fn writable(&self) -> bool {
    *self != Permission::Read
  }
}

/// Direction of a Fitel I2C request
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FitelOp {
  Read,
  Write,
}

/// A single register of a Fitel
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FitelRegItem {
  pub address    : u8,
  pub default    : u8,
  /// The current value. Set from the map file,
  /// from configuration and updated by readback
  pub value      : u8,
  pub permission : Permission,
}

impl FitelRegItem {
  pub fn new(address : u8, default : u8, permission : Permission) -> Self {
    Self {
      address,
      default,
      value : default,
      permission,
    }
  }
}

impl fmt::Display for FitelRegItem {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<FitelRegItem: addr {:#04x} def {:#04x} val {:#04x} [{}]>",
           self.address, self.default, self.value, self.permission.tag())
  }
}

/// All registers of a Fitel, by name
pub type FitelRegMap = BTreeMap<String, FitelRegItem>;

/// The 4 register maps of a board, one per slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitelMaps {
  maps : [FitelRegMap;N_FITELS],
}

impl FitelMaps {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn clear(&mut self) {
    for map in self.maps.iter_mut() {
      map.clear();
    }
  }
}

impl Index<FitelSlot> for FitelMaps {
  type Output = FitelRegMap;
  fn index(&self, slot : FitelSlot) -> &FitelRegMap {
    &self.maps[slot.index()]
  }
}

impl IndexMut<FitelSlot> for FitelMaps {
  fn index_mut(&mut self, slot : FitelSlot) -> &mut FitelRegMap {
    &mut self.maps[slot.index()]
  }
}

/// Encode a register item as I2C request words
///
/// The word always carries the item value, the read
/// flag marks the direction. Writes to a read-only
/// register (and reads of a write-only register)
/// are refused.
///
/// # Arguments
///
/// * item : The register with the value to write
/// * slot : Which Fitel should get the request
/// * op   : read or write
pub fn encode_fitel_reg(item : &FitelRegItem,
                        slot : FitelSlot,
                        op   : FitelOp) -> Result<Vec<u32>, FEDError> {
  let mut word = (slot.fmc.id() as u32) << FMC_SHIFT
               | (slot.fitel.id() as u32) << FITEL_SHIFT
               | (item.address as u32) << ADDRESS_SHIFT
               | item.value as u32;
  match op {
    FitelOp::Write => {
      if !item.permission.writable() {
        error!("Refusing to write to read-only register {} of {}!", item, slot);
        return Err(FEDError::ProtocolViolation);
      }
    }
    FitelOp::Read => {
      if !item.permission.readable() {
        error!("Refusing to read write-only register {} of {}!", item, slot);
        return Err(FEDError::ProtocolViolation);
      }
      word |= READ_FLAG;
    }
  }
  Ok(vec![word])
}

/// Split a Fitel word into its fields
///
/// Returns (fmc id, fitel id, is read, address, value)
pub fn split_fitel_word(word : u32) -> (u8, u8, bool, u8, u8) {
  let fmc_id   = ((word & FMC_MASK) >> FMC_SHIFT) as u8;
  let fitel_id = ((word & FITEL_MASK) >> FITEL_SHIFT) as u8;
  let is_read  = word & READ_FLAG > 0;
  let address  = ((word & ADDRESS_MASK) >> ADDRESS_SHIFT) as u8;
  let value    = (word & VALUE_MASK) as u8;
  (fmc_id, fitel_id, is_read, address, value)
}

/// Decode a word from the receive fifo into a register item
///
/// The word has to come from the given slot and carry
/// the address of the item. On success, the item
/// value is updated and returned.
pub fn decode_fitel_reg(item : &mut FitelRegItem,
                        slot : FitelSlot,
                        word : u32) -> Result<u8, FEDError> {
  let (fmc_id, fitel_id, _, address, value) = split_fitel_word(word);
  if fmc_id != slot.fmc.id() || fitel_id != slot.fitel.id() {
    error!("Word {:#010x} is for FMC{}_Fitel{}, but expected {}!", word, fmc_id, fitel_id, slot);
    return Err(FEDError::SlotMismatch);
  }
  if address != item.address {
    error!("Word {:#010x} carries address {:#04x}, but expected {:#04x}!", word, address, item.address);
    return Err(FEDError::ProtocolViolation);
  }
  item.value = value;
  Ok(value)
}

/// Convert a raw Fitel ADC byte into Volt
pub fn fitel_adc_to_volt(raw : u8) -> f64 {
  raw as f64 * FITEL_ADC_FULL_SCALE / 256.0
}

fn parse_byte(token : &str) -> Option<u8> {
  if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
    u8::from_str_radix(hex, 16).ok()
  } else {
    token.parse::<u8>().ok()
  }
}

/// Parse a register map
///
/// One register per line:
///
/// `name  address  default  [value]  permission`
///
/// Numbers are decimal or hex (0x..), the permission is
/// one of r, w, rw. Empty lines and lines starting with
/// `*` or `#` are ignored. If the value column is missing
/// the register starts at its default.
pub fn parse_fitel_regmap(content : &str) -> Result<FitelRegMap, RegMapError> {
  let mut map = FitelRegMap::new();
  for (k, raw_line) in content.lines().enumerate() {
    let line_no = k + 1;
    let line = raw_line.trim();
    if line.is_empty() || line.starts_with('*') || line.starts_with('#') {
      continue;
    }
    let fields : Vec<&str> = line.split_whitespace().collect();
    let err = |field : &'static str, kind : RegMapErrorKind| {
      RegMapError {
        line : line_no,
        field,
        kind,
      }
    };
    if fields.len() < 4 {
      let missing = match fields.len() {
        1 => "address",
        2 => "default",
        _ => "permission",
      };
      return Err(err(missing, RegMapErrorKind::MissingField));
    }
    if fields.len() > 5 {
      return Err(err("permission", RegMapErrorKind::UnknownPermission));
    }
    let name     = fields[0];
    let address  = parse_byte(fields[1]).ok_or(err("address", RegMapErrorKind::BadNumber))?;
    let default  = parse_byte(fields[2]).ok_or(err("default", RegMapErrorKind::BadNumber))?;
    let perm_tag = fields[fields.len() - 1];
    let mut item = FitelRegItem::new(address, default, Permission::Read);
    if fields.len() == 5 {
      item.value = parse_byte(fields[3]).ok_or(err("value", RegMapErrorKind::BadNumber))?;
    }
    item.permission = Permission::from_tag(perm_tag)
      .ok_or(err("permission", RegMapErrorKind::UnknownPermission))?;
    match map.entry(String::from(name)) {
      Entry::Occupied(_) => {
        return Err(err("name", RegMapErrorKind::DuplicateName));
      }
      Entry::Vacant(entry) => {
        entry.insert(item);
      }
    }
  }
  Ok(map)
}

/// Load a register map file, see parse_fitel_regmap
pub fn load_fitel_regmap(path : &Path) -> Result<FitelRegMap, RegMapError> {
  match read_to_string(path) {
    Err(err) => {
      error!("Unable to read Fitel register map {}! {err}", path.display());
      Err(RegMapError {
        line  : 0,
        field : "file",
        kind  : RegMapErrorKind::Io,
      })
    }
    Ok(content) => {
      let map = parse_fitel_regmap(&content);
      match &map {
        Err(err) => error!("Malformed Fitel register map {}! {err}", path.display()),
        Ok(m)    => debug!("Loaded {} registers from {}", m.len(), path.display()),
      }
      map
    }
  }
}

/// The registers of a map sorted by address
pub fn sorted_by_address(map : &FitelRegMap) -> Vec<(&String, &FitelRegItem)> {
  let mut items : Vec<(&String, &FitelRegItem)> = map.iter().collect();
  items.sort_by_key(|(_, item)| item.address);
  items
}
