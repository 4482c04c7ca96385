//! Firmware images on the board flash
//!
//! The FED keeps several FPGA configurations on its
//! flash. Managing them (IPBus flash protocol, sd card
//! files, image formats) is not done here, the controller
//! only hands the requests on to a `FirmwareManager`,
//! one at a time and never during an ongoing upload.
//!

use crate::access::RegisterError;

pub trait FirmwareManager {
  /// Write the image at path into the flash
  /// slot with name config
  fn flash_prom(&mut self, config : &str, path : &str) -> Result<(), RegisterError>;

  /// Reconfigure the FPGA from the image config
  fn jump_to_fpga_config(&mut self, config : &str) -> Result<(), RegisterError>;

  /// Names of all images on the flash
  fn get_fpga_config_list(&mut self) -> Result<Vec<String>, RegisterError>;

  fn delete_fpga_config(&mut self, config : &str) -> Result<(), RegisterError>;

  /// Copy the image config from the flash to the
  /// local file path
  fn download_fpga_config(&mut self, config : &str, path : &str) -> Result<(), RegisterError>;
}
