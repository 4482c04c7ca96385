//! Errors which can occur while reading, writing
//! or validating settings (board cards)

use std::error::Error;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SettingsError {
  IOError,
  TomlDecodingError,
  TomlEncodingError,
  JsonDecodingError,
  JsonEncodingError,
  /// The card parsed, but holds values the
  /// board can not be configured with
  InvalidCard,
}

impl SettingsError {
  pub fn to_string(&self) -> String {
    match self {
      SettingsError::IOError           => String::from("IOError"),
      SettingsError::TomlDecodingError => String::from("TomlDecodingError"),
      SettingsError::TomlEncodingError => String::from("TomlEncodingError"),
      SettingsError::JsonDecodingError => String::from("JsonDecodingError"),
      SettingsError::JsonEncodingError => String::from("JsonEncodingError"),
      SettingsError::InvalidCard       => String::from("InvalidCard"),
    }
  }
}

impl fmt::Display for SettingsError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<SettingsError : {}>", self.to_string())
  }
}

impl Error for SettingsError {
}
