//! Channel health and SEU tracking
//!
//! After configuration, the enable bits the board reports
//! for its 48 channels are stored as the *expected* state.
//! Every health check takes a fresh snapshot (*last*) and
//! diffs it against the expected one. A channel whose bit
//! flipped was most likely hit by a single event upset.
//!
//! Every mismatch increments a per-channel counter. Once a
//! channel has seen more upsets than a threshold, the board
//! can be put into degraded mode: counters and snapshots are
//! zeroed, the monitor resynchronizes with the hardware on
//! the next check and operation continues with reduced trust.
//! Only an operator can leave the degraded mode again.
//!

use std::fmt;

use pixfed_lib::constants::{
    NCHN,
    CHANNEL_MASK_ALL,
};

/// One bit per channel, channel 0 is the LSB
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Hash)]
pub struct EnableBits(u64);

impl EnableBits {
  pub const WIDTH : usize = NCHN;

  /// No channel enabled
  pub fn new() -> Self {
    Self(0)
  }

  pub fn all() -> Self {
    Self(CHANNEL_MASK_ALL)
  }

  /// Bits beyond the last channel are dropped
  pub fn from_mask(mask : u64) -> Self {
    Self(mask & CHANNEL_MASK_ALL)
  }

  /// Assemble from the two status registers
  /// (channels 0-31 and 32-47)
  pub fn from_registers(lo : u32, hi : u32) -> Self {
    Self::from_mask(((hi as u64) << 32) | lo as u64)
  }

  pub fn mask(&self) -> u64 {
    self.0
  }

  /// Split into (channels 0-31, channels 32-47)
  pub fn to_registers(&self) -> (u32, u32) {
    ((self.0 & 0xffff_ffff) as u32, (self.0 >> 32) as u32)
  }

  pub fn get(&self, ch : usize) -> bool {
    ch < Self::WIDTH && (self.0 >> ch) & 0x1 == 1
  }

  /// Channels beyond the last one are ignored
  pub fn set(&mut self, ch : usize, enabled : bool) {
    if ch >= Self::WIDTH {
      return;
    }
    if enabled {
      self.0 |= 1 << ch;
    } else {
      self.0 &= !(1 << ch);
    }
  }

  /// Channels which differ between self and other
  pub fn diff(&self, other : &EnableBits) -> EnableBits {
    EnableBits(self.0 ^ other.0)
  }

  pub fn is_empty(&self) -> bool {
    self.0 == 0
  }

  pub fn count(&self) -> u32 {
    self.0.count_ones()
  }

  /// The channel numbers of all set bits
  pub fn channels(&self) -> Vec<usize> {
    (0..Self::WIDTH).filter(|ch| self.get(*ch)).collect()
  }
}

impl fmt::Display for EnableBits {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<EnableBits: {:012x} ({} ch)>", self.0, self.count())
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HealthState {
  Normal,
  Degraded,
}

impl fmt::Display for HealthState {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      HealthState::Normal   => "Normal",
      HealthState::Degraded => "Degraded",
    };
    write!(f, "{}", repr)
  }
}

/// Keeps track of the expected and observed channel
/// enable bits, counts SEUs and holds the degraded state
#[derive(Debug, Clone)]
pub struct ChannelHealthMonitor {
  expected           : EnableBits,
  last               : EnableBits,
  /// The expected snapshot is a valid reference.
  /// Cleared by the resets, so that the next
  /// check adopts the hardware state again
  baseline_valid     : bool,
  /// A reset dropped the reference, the next
  /// check may take the hardware state
  resync_pending     : bool,
  num_seu            : [u32;NCHN],
  state              : HealthState,
  /// The counters at the moment the board
  /// went into degraded mode
  degrade_counters   : [u32;NCHN],
  n_checks           : u64,
  n_seu_events       : u64,
}

impl ChannelHealthMonitor {
  pub fn new() -> Self {
    Self {
      expected           : EnableBits::new(),
      last               : EnableBits::new(),
      baseline_valid     : false,
      resync_pending     : false,
      num_seu            : [0;NCHN],
      state              : HealthState::Normal,
      degrade_counters   : [0;NCHN],
      n_checks           : 0,
      n_seu_events       : 0,
    }
  }

  /// Take the observed enable bits as the reference
  pub fn store_enable_bits(&mut self, observed : EnableBits) {
    debug!("Storing expected enable bits {}", observed);
    self.expected       = observed;
    self.last           = observed;
    self.baseline_valid = true;
    self.resync_pending = false;
  }

  /// Compare the observed enable bits with the expected ones
  ///
  /// Every channel which differs gets its SEU counter
  /// incremented. Returns true if there was any mismatch.
  ///
  /// After a reset cleared the reference, the observation
  /// becomes the new reference and nothing is counted. If
  /// no reference was ever stored, nothing is compared.
  pub fn check_channel_seu(&mut self, observed : EnableBits) -> bool {
    self.n_checks += 1;
    self.last = observed;
    if !self.baseline_valid {
      if !self.resync_pending {
        warn!("No reference enable bits stored, is the board configured? Not checking {}", observed);
        return false;
      }
      info!("Reference enable bits were reset, resynchronizing to {}", observed);
      self.expected       = observed;
      self.baseline_valid = true;
      self.resync_pending = false;
      return false;
    }
    let changed = self.last.diff(&self.expected);
    if changed.is_empty() {
      return false;
    }
    warn!("Enable bits of channels {:?} differ from the configuration, SEU?", changed.channels());
    let (current, expected) = (self.last, self.expected);
    self.increment_seu_counters_from_enable_bits(current, expected);
    self.n_seu_events += 1;
    true
  }

  /// Increment the counter of every channel where
  /// current and expected disagree
  pub fn increment_seu_counters_from_enable_bits(&mut self,
                                                 current  : EnableBits,
                                                 expected : EnableBits) {
    for ch in current.diff(&expected).channels() {
      self.num_seu[ch] = self.num_seu[ch].saturating_add(1);
    }
  }

  /// Has any channel seen more SEUs than threshold?
  pub fn check_seu_counters(&self, threshold : u32) -> bool {
    let over = self.channels_over_threshold(threshold);
    if !over.is_empty() {
      warn!("Channels {:?} have more than {} SEUs!", over.channels(), threshold);
      return true;
    }
    false
  }

  /// The channels with strictly more SEUs than threshold
  pub fn channels_over_threshold(&self, threshold : u32) -> EnableBits {
    let mut over = EnableBits::new();
    for (ch, n) in self.num_seu.iter().enumerate() {
      if *n > threshold {
        over.set(ch, true);
      }
    }
    over
  }

  /// Go into degraded mode and restart the tracking
  ///
  /// All counters and both snapshots are zeroed.
  pub fn reset_seu_count_and_degrade_state(&mut self) {
    error!("Too many SEUs, board goes into degraded mode! SEU counters {:?}", self.num_seu);
    self.degrade_counters = self.num_seu;
    self.num_seu          = [0;NCHN];
    self.state            = HealthState::Degraded;
    self.reset_enable_bits();
  }

  /// Forget both snapshots, counters and state
  /// stay untouched
  pub fn reset_enable_bits(&mut self) {
    self.expected       = EnableBits::new();
    self.last           = EnableBits::new();
    self.baseline_valid = false;
    self.resync_pending = true;
  }

  pub fn run_degraded(&self) -> bool {
    self.state == HealthState::Degraded
  }

  /// Operator decision to trust the board again
  pub fn clear_degraded_state(&mut self) {
    info!("Degraded state cleared by operator");
    self.state            = HealthState::Normal;
    self.degrade_counters = [0;NCHN];
    self.num_seu          = [0;NCHN];
  }

  pub fn state(&self) -> HealthState {
    self.state
  }

  pub fn expected(&self) -> EnableBits {
    self.expected
  }

  pub fn last(&self) -> EnableBits {
    self.last
  }

  pub fn has_baseline(&self) -> bool {
    self.baseline_valid
  }

  pub fn seu_counters(&self) -> &[u32] {
    &self.num_seu
  }

  pub fn degrade_counters(&self) -> &[u32] {
    &self.degrade_counters
  }

  /// Channels which had seen SEUs when the
  /// board went into degraded mode
  pub fn suspect_channels(&self) -> EnableBits {
    let mut suspect = EnableBits::new();
    for (ch, n) in self.degrade_counters.iter().enumerate() {
      suspect.set(ch, *n > 0);
    }
    suspect
  }

  pub fn n_checks(&self) -> u64 {
    self.n_checks
  }

  pub fn n_seu_events(&self) -> u64 {
    self.n_seu_events
  }
}

impl Default for ChannelHealthMonitor {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for ChannelHealthMonitor {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<ChannelHealthMonitor:");
    repr += &(format!("\n  state      : {}", self.state));
    repr += &(format!("\n  expected   : {}", self.expected));
    repr += &(format!("\n  last       : {}", self.last));
    repr += &(format!("\n  checks     : {}", self.n_checks));
    repr += &(format!("\n  SEU events : {}", self.n_seu_events));
    repr += "\n  -- SEUs per channel:";
    for (ch, n) in self.num_seu.iter().enumerate() {
      if *n > 0 {
        repr += &(format!("\n    Ch{:02} : {}", ch, n));
      }
    }
    write!(f, "{}>", repr)
  }
}

/// Outcome of one health check cycle, as it is
/// published by the monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
  pub fed_id         : u32,
  pub state          : HealthState,
  /// An SEU was seen in this cycle
  pub seu_found      : bool,
  /// A channel is beyond the SEU threshold
  pub over_threshold : bool,
  /// The board has been put in degraded mode
  /// during this cycle
  pub degraded_now   : bool,
  pub expected       : EnableBits,
  pub last           : EnableBits,
  pub seu_counters   : Vec<u32>,
}

impl HealthReport {
  pub fn new(fed_id : u32, monitor : &ChannelHealthMonitor) -> Self {
    Self {
      fed_id,
      state          : monitor.state(),
      seu_found      : false,
      over_threshold : false,
      degraded_now   : false,
      expected       : monitor.expected(),
      last           : monitor.last(),
      seu_counters   : monitor.seu_counters().to_vec(),
    }
  }
}

impl fmt::Display for HealthReport {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<HealthReport:");
    repr += &(format!("\n  FED ID         : {}", self.fed_id));
    repr += &(format!("\n  state          : {}", self.state));
    repr += &(format!("\n  SEU found      : {}", self.seu_found));
    repr += &(format!("\n  over threshold : {}", self.over_threshold));
    repr += &(format!("\n  degraded now   : {}", self.degraded_now));
    repr += &(format!("\n  expected       : {}", self.expected));
    repr += &(format!("\n  last           : {}", self.last));
    write!(f, "{}>", repr)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn configured() -> ChannelHealthMonitor {
    let mut moni = ChannelHealthMonitor::new();
    moni.store_enable_bits(EnableBits::all());
    moni
  }

  #[test]
  fn enable_bits() {
    let mut bits = EnableBits::from_registers(0xffff_ffff, 0xffff_ffff);
    assert_eq!(bits, EnableBits::all());
    assert_eq!(bits.count(), 48);
    bits.set(5, false);
    bits.set(60, false);
    assert!(!bits.get(5));
    assert!(bits.get(47));
    assert!(!bits.get(48));
    assert_eq!(bits.diff(&EnableBits::all()).channels(), vec![5]);
    assert_eq!(bits.to_registers(), (0xffff_ffdf, 0xffff));
  }

  #[test]
  fn store_twice_is_idempotent() {
    let observed = EnableBits::from_mask(0x0000_ff00_ff00);
    let mut moni = ChannelHealthMonitor::new();
    moni.store_enable_bits(observed);
    let first = moni.expected();
    moni.store_enable_bits(observed);
    assert_eq!(first, moni.expected());
  }

  #[test]
  fn seu_on_single_channel() {
    let mut moni = configured();
    let mut observed = EnableBits::all();
    observed.set(5, false);
    assert!(moni.check_channel_seu(observed));
    assert_eq!(moni.last(), observed);
    assert_eq!(moni.expected(), EnableBits::all());
    for (ch, n) in moni.seu_counters().iter().enumerate() {
      if ch == 5 {
        assert_eq!(*n, 1);
      } else {
        assert_eq!(*n, 0);
      }
    }
  }

  #[test]
  fn no_seu_without_change() {
    let mut moni = configured();
    assert!(!moni.check_channel_seu(EnableBits::all()));
    assert!(moni.seu_counters().iter().all(|n| *n == 0));
    assert_eq!(moni.n_checks(), 1);
    assert_eq!(moni.n_seu_events(), 0);
  }

  #[test]
  fn newly_enabled_channel_counts() {
    let mut moni = ChannelHealthMonitor::new();
    moni.store_enable_bits(EnableBits::from_mask(0x1));
    assert!(moni.check_channel_seu(EnableBits::from_mask(0x3)));
    assert_eq!(moni.seu_counters()[1], 1);
    assert_eq!(moni.seu_counters()[0], 0);
  }

  #[test]
  fn threshold_is_strict() {
    let mut moni = configured();
    let mut observed = EnableBits::all();
    observed.set(12, false);
    for _ in 0..3 {
      moni.check_channel_seu(observed);
    }
    assert_eq!(moni.seu_counters()[12], 3);
    assert!(!moni.check_seu_counters(3));
    assert!(moni.check_seu_counters(2));
    moni.check_channel_seu(observed);
    assert!(moni.check_seu_counters(3));
    assert_eq!(moni.channels_over_threshold(3).channels(), vec![12]);
  }

  #[test]
  fn checking_counters_does_not_degrade() {
    let mut moni = configured();
    let mut observed = EnableBits::all();
    observed.set(0, false);
    moni.check_channel_seu(observed);
    moni.check_channel_seu(observed);
    assert!(moni.check_seu_counters(0));
    assert!(!moni.run_degraded());
  }

  #[test]
  fn degrade_and_resync() {
    let mut moni = configured();
    let mut observed = EnableBits::all();
    observed.set(7, false);
    observed.set(40, false);
    moni.check_channel_seu(observed);
    moni.reset_seu_count_and_degrade_state();
    assert!(moni.seu_counters().iter().all(|n| *n == 0));
    assert!(moni.run_degraded());
    assert_eq!(moni.expected(), EnableBits::new());
    assert_eq!(moni.last(), EnableBits::new());
    assert_eq!(moni.suspect_channels().channels(), vec![7, 40]);
    // the next check adopts the hardware state
    assert!(!moni.check_channel_seu(observed));
    assert_eq!(moni.expected(), observed);
    assert!(moni.seu_counters().iter().all(|n| *n == 0));
    // and tracking goes on from there
    let mut worse = observed;
    worse.set(8, false);
    assert!(moni.check_channel_seu(worse));
    assert_eq!(moni.seu_counters()[8], 1);
    // degraded until somebody says otherwise
    assert!(moni.run_degraded());
    moni.clear_degraded_state();
    assert!(!moni.run_degraded());
  }

  #[test]
  fn reset_enable_bits_keeps_counters() {
    let mut moni = configured();
    let mut observed = EnableBits::all();
    observed.set(3, false);
    moni.check_channel_seu(observed);
    moni.reset_enable_bits();
    assert_eq!(moni.expected(), EnableBits::new());
    assert_eq!(moni.last(), EnableBits::new());
    assert_eq!(moni.seu_counters()[3], 1);
    assert_eq!(moni.state(), HealthState::Normal);
    assert!(!moni.has_baseline());
  }

  #[test]
  fn unconfigured_monitor_takes_no_reference() {
    let mut moni = ChannelHealthMonitor::new();
    let mut observed = EnableBits::all();
    observed.set(9, false);
    assert!(!moni.check_channel_seu(observed));
    assert!(!moni.check_channel_seu(observed));
    assert!(!moni.has_baseline());
    assert_eq!(moni.expected(), EnableBits::new());
    assert_eq!(moni.last(), observed);
    assert_eq!(moni.n_checks(), 2);
    assert!(moni.seu_counters().iter().all(|n| *n == 0));
    // a stored reference is compared against
    moni.store_enable_bits(EnableBits::all());
    assert!(moni.check_channel_seu(observed));
  }
}
