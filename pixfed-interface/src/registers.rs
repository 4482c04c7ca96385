//! Named registers of the pixel FED
//!
//! The FED is not accessed through raw addresses. The
//! transport (uTCA/IPBus, VME, ...) resolves a register
//! *name* through its own address table, so everything
//! here is the name of a node in that table.
//!
//! Registers which hold several fields document the
//! bit layout next to their name.
//!

//========== Control ====================
//
//=======================================

/// Write 1 after the board has been fully configured
pub const PC_CONFIG_OK         : &str = "pixfed_ctrl_regs.PC_CONFIG_OK";
/// Write 1 to reload the FPGA from the EEPROM
pub const FPGA_RELOAD          : &str = "pixfed_ctrl_regs.fpga_reload";
/// [0] Global reset of the user logic
pub const GLOBAL_RESET         : &str = "pixfed_ctrl_regs.global_reset";
/// [0] Logic reset (LRES) of the front-end decoders
pub const LRES                 : &str = "pixfed_ctrl_regs.LRES";
/// [0] Counter clear (CLRES), also centers the OOS counters
pub const CLRES                : &str = "pixfed_ctrl_regs.CLRES";
/// [0] Clear the error fifos
pub const ERROR_FIFO_CLEAR     : &str = "pixfed_ctrl_regs.error_fifo_clear";
/// [0] Reset of the Slink core
pub const SLINK_RESET          : &str = "pixfed_ctrl_regs.slink_core_gtx_reset";

pub const FED_ID               : &str = "pixfed_ctrl_regs.fed_id";
pub const FED_CONTROL          : &str = "pixfed_ctrl_regs.fed_control";
pub const FED_MODE             : &str = "pixfed_ctrl_regs.fed_mode";
pub const PRIVATE_WORD         : &str = "pixfed_ctrl_regs.private_word";

/// [31:0] Set bit n to 1 to disable channel n (0-31)
pub const CH_DISABLE_LO        : &str = "fe_ctrl_regs.disable_ch_lo";
/// [15:0] Set bit n to 1 to disable channel 32+n (32-47)
pub const CH_DISABLE_HI        : &str = "fe_ctrl_regs.disable_ch_hi";

pub const TTC_CLOCK_DELAY      : &str = "pixfed_ctrl_regs.ttc_clock_delay";
pub const TBM_HEADER_TIMEOUT   : &str = "fe_ctrl_regs.tbm_header_timeout";
pub const TBM_TRAILER_TIMEOUT  : &str = "fe_ctrl_regs.tbm_trailer_timeout";

/// [0] Power good of the FMCs (1 = powered)
pub const FMC_POWER            : &str = "pixfed_ctrl_regs.fmc_pg_c2m";
/// [0] Enable the spy memory
pub const SPY_ENABLE           : &str = "pixfed_ctrl_regs.spy_enable";
/// [0] Enable the TTS test mode
pub const TTS_TEST_ENABLE      : &str = "pixfed_ctrl_regs.tts_test_enable";
/// [3:0] TTS test pattern
pub const TTS_TEST_VALUE       : &str = "pixfed_ctrl_regs.tts_test_value";
pub const XY_X                 : &str = "pixfed_ctrl_regs.xy_x";
pub const XY_Y                 : &str = "pixfed_ctrl_regs.xy_y";
pub const XY_COUNT_RESET       : &str = "pixfed_ctrl_regs.xy_count_reset";
pub const FAKE_EVENT_RESET     : &str = "pixfed_ctrl_regs.fake_event_count_reset";

//========== Status =====================
//
//=======================================

/// [31:0] Channels 0-31 currently reporting enabled
pub const CH_ENABLE_LO         : &str = "pixfed_stat_regs.ch_enable_lo";
/// [15:0] Channels 32-47 currently reporting enabled
pub const CH_ENABLE_HI         : &str = "pixfed_stat_regs.ch_enable_hi";

pub const EVENT_COUNTER        : &str = "pixfed_stat_regs.event_counter";
pub const FIFO_STATUS          : &str = "pixfed_stat_regs.fifo_status";
pub const LINK_FULL_FLAG       : &str = "pixfed_stat_regs.link_full_flag";
pub const PLL_LOCKS            : &str = "pixfed_stat_regs.num_pll_locks";
pub const FIFO_FILL_LEVEL      : &str = "pixfed_stat_regs.fifo_fill_level";
/// [31:0] Skipped channels 0-31
pub const SKIPPED_CH_LO        : &str = "pixfed_stat_regs.skipped_ch_lo";
/// [15:0] Skipped channels 32-47
pub const SKIPPED_CH_HI        : &str = "pixfed_stat_regs.skipped_ch_hi";
pub const XY_COUNT             : &str = "pixfed_stat_regs.xy_count";
pub const NUM_FAKE_EVENTS      : &str = "pixfed_stat_regs.num_fake_events";
/// [0] A new event has arrived since the last readout
pub const NEW_EVENT            : &str = "pixfed_stat_regs.new_event";
/// [0] A firmware/configuration upload is ongoing
pub const FLASH_UPLOADING      : &str = "pixfed_stat_regs.flash_upload_busy";

/// Per channel reports, the channel number
/// (two digits) is appended to the name
pub const ERROR_REPORT_PREFIX   : &str = "pixfed_stat_regs.error_report_ch";
pub const TIMEOUT_REPORT_PREFIX : &str = "pixfed_stat_regs.timeout_report_ch";

/// 4 ascii characters, e.g. "PFED"
pub const BOARD_ID             : &str = "board_id";
/// Firmware dates, encoded as 0xYYMMDD
pub const FW_DATE_USER         : &str = "pixfed_stat_regs.user_fw_date";
pub const FW_DATE_SYSTEM       : &str = "pixfed_stat_regs.system_fw_date";

//========== Fitel I2C ==================
//
//=======================================

/// Request register. 1 = write the transmit fifo,
/// 3 = read back the registers in the transmit fifo,
/// 0 = release the bus
pub const FITEL_CONFIG_REQ     : &str = "pixfed_ctrl_regs.fitel_config_req";
/// [1:0] 0 = idle, 1 = done, 3 = error
pub const FITEL_I2C_ACK        : &str = "pixfed_stat_regs.fitel_i2c_ack";
pub const FITEL_TX_FIFO        : &str = "fitel_config_fifo_tx";
pub const FITEL_RX_FIFO        : &str = "fitel_config_fifo_rx";

pub const FITEL_REQ_RELEASE    : u32 = 0;
pub const FITEL_REQ_WRITE      : u32 = 1;
pub const FITEL_REQ_READ       : u32 = 3;

pub const FITEL_ACK_IDLE       : u32 = 0;
pub const FITEL_ACK_DONE       : u32 = 1;
pub const FITEL_ACK_ERROR      : u32 = 3;

//========== DDR ========================
//
//=======================================

/// The two data banks for double buffered readout
pub const DDR0                 : &str = "DDR0";
pub const DDR1                 : &str = "DDR1";
pub const DDR0_CTRL_SEL        : &str = "pixfed_ctrl_regs.DDR0_ctrl_sel";
pub const DDR1_CTRL_SEL        : &str = "pixfed_ctrl_regs.DDR1_ctrl_sel";
pub const DDR0_FULL            : &str = "pixfed_stat_regs.DDR0_full";
pub const DDR1_FULL            : &str = "pixfed_stat_regs.DDR1_full";
pub const DDR0_END_READOUT     : &str = "pixfed_ctrl_regs.DDR0_end_readout";
pub const DDR1_END_READOUT     : &str = "pixfed_ctrl_regs.DDR1_end_readout";

//========== FIFOs ======================
// every fifo has a data node (block read)
// and a word counter
//=======================================

pub const FIFO1                : &str = "FIFO1";
pub const FIFO1_COUNT          : &str = "pixfed_stat_regs.fifo1_wr_data_count";
pub const ERROR_FIFO           : &str = "ERROR_fifo";
pub const ERROR_FIFO_COUNT     : &str = "pixfed_stat_regs.error_fifo_wr_data_count";
pub const TBM_FIFO             : &str = "TBM_fifo";
pub const TBM_FIFO_COUNT       : &str = "pixfed_stat_regs.tbm_fifo_wr_data_count";
pub const TEMP_FIFO            : &str = "TEMP_fifo";
pub const TEMP_FIFO_COUNT      : &str = "pixfed_stat_regs.temp_fifo_wr_data_count";
pub const TTS_FIFO             : &str = "TTS_fifo";
pub const TTS_FIFO_COUNT       : &str = "pixfed_stat_regs.tts_fifo_wr_data_count";
pub const SPY_FIFO             : &str = "SPY_fifo";
pub const SPY_FIFO_COUNT       : &str = "pixfed_stat_regs.spy_fifo_wr_data_count";
pub const TRANSPARENT_FIFO     : &str = "TRANSPARENT_fifo";
pub const TRANSPARENT_FIFO_COUNT : &str = "pixfed_stat_regs.transparent_fifo_wr_data_count";
/// Spy on the Slink output, 2 words per 64bit Slink word
pub const SLINK_SPY_FIFO       : &str = "SLINK_spy_fifo";
pub const SLINK_SPY_FIFO_COUNT : &str = "pixfed_stat_regs.slink_spy_wr_data_count";

/// Name of a per-channel report register
pub fn channel_register(prefix : &str, ch : usize) -> String {
  format!("{}{:02}", prefix, ch)
}

#[test]
fn channel_register_names() {
  assert_eq!(channel_register(ERROR_REPORT_PREFIX, 3), "pixfed_stat_regs.error_report_ch03");
  assert_eq!(channel_register(TIMEOUT_REPORT_PREFIX, 47), "pixfed_stat_regs.timeout_report_ch47");
}
