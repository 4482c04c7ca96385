//! Thread control structures

use std::fmt;

/// Send runtime information 
/// to threads via shared memory
/// (Arc(Mutex)
#[derive(Default, Debug)]
pub struct ThreadControl {
  /// Stop ALL threads
  pub stop_flag                  : bool,
  /// alive indicator for the SEU monitoring loop
  pub thread_monitoring_active   : bool,
  /// Number of completed health checks
  pub n_health_checks            : u64,
  /// Set by the monitoring loop once the board
  /// went into degraded mode
  pub board_degraded             : bool,
}

impl ThreadControl {
  pub fn new() -> Self {
    Self {
      stop_flag                  : false,
      thread_monitoring_active   : false,
      n_health_checks            : 0,
      board_degraded             : false,
    }
  }
}

impl fmt::Display for ThreadControl {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<ThreadControl:");
    repr        += &(format!("\n  stop flag      : {}", self.stop_flag));
    repr        += "\n    -- reported thread activity:";
    repr        += &(format!("\n  monitoring     : {}", self.thread_monitoring_active));
    repr        += &(format!("\n  health checks  : {}", self.n_health_checks));
    repr        += &(format!("\n  degraded       : {}>", self.board_degraded));
    write!(f, "{}", repr)
  }
}
