//! Global constants for pixel FED operations
//!

/// Number of optical input channels (links) on the FED
pub const NCHN             : usize = 48;

/// Mask covering all valid channel bits
pub const CHANNEL_MASK_ALL : u64 = (1u64 << NCHN) - 1;

/// Number of FMC mezzanine slots
pub const N_FMCS           : usize = 2;

/// Number of Fitel receivers per FMC
pub const N_FITELS_PER_FMC : usize = 2;

/// Total number of Fitel receivers on the board
pub const N_FITELS         : usize = N_FMCS * N_FITELS_PER_FMC;

/// Maximum burst (in 32bit words) for a single
/// block read out of one of the DDR banks
pub const DDR_MAX_BLOCK_SIZE : u32 = 0x20000;

/// Default block size for DDR readout
pub const DEFAULT_BLOCK_SIZE : u32 = 0x1000;

/// Default SEU counter threshold before the
/// board is put in degraded mode
pub const DEFAULT_SEU_THRESHOLD : u32 = 10;

pub const DEFAULT_WHOLE_EVENT_TRIES : u32 = 100000;
pub const DEFAULT_NEW_EVENT_TRIES   : u32 = 100000;
pub const DEFAULT_UPLOAD_TRIES      : u32 = 1000;
pub const DEFAULT_I2C_ACK_TRIES     : u32 = 100;

/// Sleep between two consecutive register polls
/// in microseconds
pub const DEFAULT_POLL_INTERVAL_US  : u64 = 10;

/// Longest sleep between two register polls
/// a card may ask for (1s)
pub const MAX_POLL_INTERVAL_US      : u64 = 1_000_000;

/// Longest interval between two channel health
/// checks in seconds
pub const MAX_MONI_INTERVAL         : f32 = 3600.0;

/// Where the Fitel register map files are
/// expected, if not stated otherwise
pub const DEFAULT_FITEL_FN_BASE : &str = "/opt/pixfed/fitel";

/// Default register map file names, in
/// FMC0_Fitel0, FMC0_Fitel1, FMC1_Fitel0, FMC1_Fitel1
/// order
pub const DEFAULT_FITEL_FILES : [&str;N_FITELS] = [
  "FMC0_Fitel0.txt",
  "FMC0_Fitel1.txt",
  "FMC1_Fitel0.txt",
  "FMC1_Fitel1.txt",
];
