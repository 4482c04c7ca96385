//! Shared pieces of the pixfed suite
//!
//! * the board configuration card (`FEDCard`) 
//!   and its toml/json representation
//! * thread control for long running loops
//! * logging setup
//!
pub mod constants;
pub mod errors;
pub mod settings;
pub mod thread_control;

pub use settings::{
    FEDCard,
    PrintLevel,
    TimingSettings,
    PollSettings,
};
pub use errors::SettingsError;
pub use thread_control::ThreadControl;

use std::io::Write;

use colored::{Colorize, ColoredString};
use log::Level;

#[macro_use] extern crate log;
extern crate env_logger;

/// Make sure that the loglevel is in color, even though not using pretty_env logger
pub fn color_log(level : &Level) -> ColoredString {
  match level {
    Level::Error    => String::from(" ERROR!").red(),
    Level::Warn     => String::from(" WARN  ").yellow(),
    Level::Info     => String::from(" Info  ").green(),
    Level::Debug    => String::from(" debug ").blue(),
    Level::Trace    => String::from(" trace ").cyan(),
  }
}

/// Set up the environmental (env) logger
/// with our format
///
/// Ensure that the lines and module paths
/// are printed in the logging output
pub fn init_env_logger() {
  env_logger::builder()
    .format(|buf, record| {
    writeln!( buf, "[{level}][{module_path}:{line}] {args}",
      level = color_log(&record.level()),
      module_path = record.module_path().unwrap_or("<unknown>"),
      line = record.line().unwrap_or(0),
      args = record.args()
      )
    }).init();
}

/// Same as init_env_logger, but the verbosity
/// follows the print level of a card, unless
/// RUST_LOG is set
pub fn init_env_logger_with_level(level : &PrintLevel) {
  let mut builder = env_logger::builder();
  if std::env::var("RUST_LOG").is_err() {
    builder.filter_level(level.to_level_filter());
  }
  builder
    .format(|buf, record| {
    writeln!( buf, "[{level}][{module_path}:{line}] {args}",
      level = color_log(&record.level()),
      module_path = record.module_path().unwrap_or("<unknown>"),
      line = record.line().unwrap_or(0),
      args = record.args()
      )
    }).init();
}
