use std::fs;
use std::sync::{
    Arc,
    Mutex,
};
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;

use pixfed_lib::{
    FEDCard,
    SettingsError,
    ThreadControl,
};
use pixfed_interface::control::FEDController;
use pixfed_interface::drain::DdrBank;
use pixfed_interface::errors::{
    FEDError,
    RegMapError,
    RegMapErrorKind,
};
use pixfed_interface::fitel::FitelSlot;
use pixfed_interface::health::{
    EnableBits,
    HealthReport,
    HealthState,
};
use pixfed_interface::registers::*;
use pixfed_interface::sim::{
    BusOp,
    SimBoard,
    SimFlash,
};
use pixfed_interface::threads::seu_monitoring;

const REGMAP : &str = "
* RegName         Address  Default  Value  Permission
Ch01_ConfigReg    0x00     0x02     0x03   rw
Ch02_ConfigReg    0x01     0x04            rw
ADC_RSSI_Ch01     0x40     0x00            r
ADC_RSSI_Ch02     0x41     0x00            r
ResetReg          0x7f     0x00     0x01   w
";

/// A card with register maps in a fresh
/// directory and polls without waiting
fn test_card(tag : &str) -> FEDCard {
  let dir = std::env::temp_dir().join(format!("pixfed-test-{tag}"));
  fs::create_dir_all(&dir).unwrap();
  let mut card = FEDCard::new();
  card.fed_id                   = 1294;
  card.channel_enable_mask      = 0xffff_0000_ffff;
  card.fitel_fn_base            = String::from(dir.to_string_lossy());
  card.polling.poll_interval_us = 0;
  card.polling.upload_tries     = 5;
  for fname in card.fitel_regmap_files.iter() {
    fs::write(dir.join(fname), REGMAP).unwrap();
  }
  card
}

#[test]
fn setup_configures_all_fitels() {
  let card = test_card("setup");
  let mut fed = FEDController::new(SimBoard::new());
  let report = fed.setup(&card).unwrap();
  assert!(report.is_ok());
  assert_eq!(report.n_written, [3;4]);
  assert_eq!(report.enable_bits, EnableBits::from_mask(card.channel_enable_mask));
  assert!(fed.is_configured());
  for slot in FitelSlot::ALL {
    assert_eq!(fed.bus().fitel_register(slot, 0x00), 0x03);
    assert_eq!(fed.bus().fitel_register(slot, 0x01), 0x04);
    assert_eq!(fed.bus().fitel_register(slot, 0x7f), 0x01);
    assert_eq!(fed.fitel_map(slot).len(), 5);
  }
  assert_eq!(fed.bus().register(FED_ID), 1294);
  assert_eq!(fed.bus().register(PC_CONFIG_OK), 1);
  assert_eq!(fed.bus().register(CH_DISABLE_LO), 0xffff_0000);
  assert_eq!(fed.bus().register(CH_DISABLE_HI), 0x0000);
  let health = fed.health_handle();
  let moni = health.lock().unwrap();
  assert_eq!(moni.expected(), EnableBits::from_mask(0xffff_0000_ffff));
  assert_eq!(moni.state(), HealthState::Normal);
}

#[test]
fn invalid_card_touches_nothing() {
  let mut card = test_card("invalid");
  card.channel_enable_mask = 1 << 50;
  let mut fed = FEDController::new(SimBoard::new());
  assert_eq!(fed.setup(&card).unwrap_err(), FEDError::Settings(SettingsError::InvalidCard));
  assert!(fed.bus().log().is_empty());
  assert!(!fed.is_configured());
}

#[test]
fn transport_error_aborts_setup() {
  let card = test_card("transport");
  let mut board = SimBoard::new();
  board.fail_register(FED_MODE, pixfed_interface::RegisterError::BusFailure);
  let mut fed = FEDController::new(board);
  assert!(matches!(fed.setup(&card), Err(FEDError::Transport(_))));
  assert!(!fed.is_configured());
  assert!(fed.bus().writes_to(FITEL_CONFIG_REQ).is_empty());
}

#[test]
fn fitel_transport_error_aborts_setup() {
  let card = test_card("fitel-transport");
  let mut board = SimBoard::new();
  board.fail_register(FITEL_TX_FIFO, pixfed_interface::RegisterError::BusFailure);
  let mut fed = FEDController::new(board);
  assert_eq!(fed.setup(&card).unwrap_err(),
             FEDError::Transport(pixfed_interface::RegisterError::BusFailure));
  assert!(!fed.is_configured());
  assert!(fed.bus().writes_to(PC_CONFIG_OK).is_empty());
  assert!(!fed.health_handle().lock().unwrap().has_baseline());
  // nothing is sent after the first failure
  let n_blocks = fed.bus().log().iter()
    .filter(|op| matches!(op, BusOp::WriteBlock(reg, _) if reg == FITEL_TX_FIFO))
    .count();
  assert_eq!(n_blocks, 1);
  assert!(fed.fitel_map(FitelSlot::FMC0_FITEL0).is_empty());
}

#[test]
fn wrong_readback_address_aborts_setup() {
  let card = test_card("fitel-protocol");
  let mut board = SimBoard::new();
  board.fitel_garble(FitelSlot::FMC0_FITEL1);
  let mut fed = FEDController::new(board);
  assert_eq!(fed.setup(&card).unwrap_err(), FEDError::ProtocolViolation);
  assert!(!fed.is_configured());
  assert!(fed.bus().writes_to(PC_CONFIG_OK).is_empty());
  assert!(!fed.health_handle().lock().unwrap().has_baseline());
  // the slot before went through, the ones after were never touched
  assert_eq!(fed.bus().fitel_register(FitelSlot::FMC0_FITEL0, 0x00), 0x03);
  assert_eq!(fed.bus().fitel_register(FitelSlot::FMC1_FITEL0, 0x00), 0x00);
  assert!(fed.fitel_map(FitelSlot::FMC0_FITEL1).is_empty());
}

#[test]
fn failing_fitels_are_reported_per_slot() {
  let mut card = test_card("failing");
  card.fitel_regmap_files[1] = String::from("does_not_exist.txt");
  let mut board = SimBoard::new();
  board.fitel_nack(FitelSlot::FMC1_FITEL0);
  let mut fed = FEDController::new(board);
  let report = fed.setup(&card).unwrap();
  assert!(!report.is_ok());
  assert_eq!(report.slots[0], None);
  assert_eq!(report.slots[1], Some(FEDError::RegMap(RegMapError {
    line  : 0,
    field : "file",
    kind  : RegMapErrorKind::Io,
  })));
  assert_eq!(report.slots[2], Some(FEDError::NoAcknowledge));
  assert_eq!(report.slots[3], None);
  assert_eq!(report.failed_slots().len(), 2);
  // the failing slots are not half configured
  assert!(fed.fitel_map(FitelSlot::FMC0_FITEL1).is_empty());
  assert!(fed.fitel_map(FitelSlot::FMC1_FITEL0).is_empty());
  assert_eq!(fed.bus().fitel_register(FitelSlot::FMC1_FITEL0, 0x00), 0x00);
  // the others are
  assert_eq!(fed.bus().fitel_register(FitelSlot::FMC1_FITEL1, 0x00), 0x03);
  assert_eq!(fed.bus().register(PC_CONFIG_OK), 1);
  assert!(fed.health_handle().lock().unwrap().has_baseline());
}

#[test]
fn verification_finds_lost_writes() {
  let card = test_card("verify");
  let mut board = SimBoard::new();
  board.fitel_stuck(FitelSlot::FMC0_FITEL1, 0x01);
  let mut fed = FEDController::new(board);
  let report = fed.setup(&card).unwrap();
  assert_eq!(report.slots[1], Some(FEDError::VerificationFailed(1)));
  assert_eq!(report.failed_slots()[0].0, FitelSlot::FMC0_FITEL1);

  // without verification nobody notices
  let mut card = card;
  card.fitel_verify = false;
  fed.bus_mut().clear_log();
  let report = fed.setup(&card).unwrap();
  assert!(report.is_ok());
  assert!(!fed.bus().log().iter().any(|op| *op == BusOp::Write(String::from(FITEL_CONFIG_REQ), FITEL_REQ_READ)));
}

#[test]
fn readback_and_adc() {
  let card = test_card("adc");
  let slot = FitelSlot::FMC1_FITEL1;
  let mut board = SimBoard::new();
  board.set_fitel_register(slot, 0x40, 0x80);
  let mut fed = FEDController::new(board);
  fed.setup(&card).unwrap();
  assert_eq!(fed.fitel_map(slot)["ADC_RSSI_Ch01"].value, 0x80);
  assert_eq!(fed.fitel_map(FitelSlot::FMC0_FITEL0)["ADC_RSSI_Ch01"].value, 0x00);

  fed.bus_mut().set_fitel_register(slot, 0x41, 0xff);
  let (ok, volts) = fed.read_adc(slot).unwrap();
  assert!(ok);
  assert_eq!(volts.len(), 2);
  assert!((volts[0] - 1.65).abs() < 1e-9);
  assert!((volts[1] - 255.0 * 3.3 / 256.0).abs() < 1e-9);

  fed.bus_mut().fitel_nack(slot);
  assert_eq!(fed.read_adc(slot), Ok((false, Vec::new())));
}

#[test]
fn seu_until_degraded() {
  let mut card = test_card("degrade");
  card.channel_enable_mask = 0xffff_ffff_ffff;
  card.seu_threshold       = 1;
  card.auto_degrade        = true;
  let mut fed = FEDController::new(SimBoard::new());
  fed.setup(&card).unwrap();

  let report = fed.health_cycle().unwrap();
  assert!(!report.seu_found);

  fed.bus_mut().flip_enable_bit(5);
  let report = fed.health_cycle().unwrap();
  assert!(report.seu_found);
  assert!(!report.over_threshold);
  assert_eq!(report.seu_counters[5], 1);
  assert_eq!(report.seu_counters.iter().sum::<u32>(), 1);

  let report = fed.health_cycle().unwrap();
  assert!(report.over_threshold);
  assert!(report.degraded_now);
  assert_eq!(report.state, HealthState::Degraded);
  assert!(report.seu_counters.iter().all(|n| *n == 0));
  assert_eq!(report.expected, EnableBits::new());
  assert!(fed.run_degraded());

  // the board state is taken as the new reference
  let report = fed.health_cycle().unwrap();
  assert!(!report.seu_found);
  let mut expected = EnableBits::all();
  expected.set(5, false);
  assert_eq!(report.expected, expected);
  assert!(fed.run_degraded());

  fed.clear_degraded_state();
  assert!(!fed.run_degraded());
}

#[test]
fn no_degrade_without_auto_degrade() {
  let mut card = test_card("no-degrade");
  card.seu_threshold = 0;
  card.auto_degrade  = false;
  let mut fed = FEDController::new(SimBoard::new());
  fed.setup(&card).unwrap();
  fed.bus_mut().flip_enable_bit(40);
  for _ in 0..3 {
    let report = fed.health_cycle().unwrap();
    assert!(report.over_threshold);
    assert!(!report.degraded_now);
  }
  assert!(fed.check_seu_counters(2));
  assert!(!fed.run_degraded());
  fed.reset_seu_count_and_degrade_state();
  assert!(fed.run_degraded());
}

#[test]
fn reset_order() {
  let mut fed = FEDController::new(SimBoard::new());
  fed.reset_fed().unwrap();
  let expected = vec![
    BusOp::Write(String::from(LRES), 1),
    BusOp::Write(String::from(LRES), 0),
    BusOp::Write(String::from(CLRES), 1),
    BusOp::Write(String::from(CLRES), 0),
    BusOp::Write(String::from(ERROR_FIFO_CLEAR), 1),
    BusOp::Write(String::from(ERROR_FIFO_CLEAR), 0),
  ];
  assert_eq!(fed.bus().log(), expected.as_slice());
}

#[test]
fn daq_readout() {
  let card = test_card("daq");
  let mut fed = FEDController::new(SimBoard::new());
  fed.setup(&card).unwrap();
  fed.bus_mut().fill_ddr(DdrBank::Ddr0, &[1, 2, 3]);
  assert_eq!(fed.read_data(3), Ok(vec![1, 2, 3]));
  fed.bus_mut().fill_ddr(DdrBank::Ddr1, &[4, 5]);
  assert_eq!(fed.read_data(2), Ok(vec![4, 5]));
  assert_eq!(fed.drain().n_acquisitions(), 2);
  assert_eq!(fed.drain().bank(), DdrBank::Ddr0);
  assert_eq!(fed.select_daq_ddr(7), Err(FEDError::InvalidArgument));

  fed.bus_mut().push_fifo(SLINK_SPY_FIFO, &[0x5000_0000, 0x0000_0001, 0xa000_0000, 0x0000_0008]);
  assert_eq!(fed.spy_slink64(), Ok(vec![0x5000_0000_0000_0001, 0xa000_0000_0000_0008]));

  let mut buffer = Vec::new();
  assert_eq!(fed.drain_error_fifo(&mut buffer), Ok(0));
  fed.bus_mut().push_fifo(ERROR_FIFO, &[0xdead]);
  assert_eq!(fed.drain_error_fifo(&mut buffer), Ok(1));
  assert_eq!(buffer, vec![0xdead]);
}

#[test]
fn firmware_is_delegated() {
  let card = test_card("firmware");
  let mut fed = FEDController::new(SimBoard::new())
    .with_firmware_manager(Box::new(SimFlash::new(&["golden"])));
  fed.setup(&card).unwrap();
  fed.flash_prom("user", "/tmp/pixfed_user.bin").unwrap();
  assert_eq!(fed.get_fpga_config_list(), Ok(vec![String::from("golden"), String::from("user")]));
  fed.jump_to_fpga_config("user").unwrap();
  assert!(!fed.is_configured());
  assert_eq!(fed.delete_fpga_config("other"), Err(FEDError::Transport(pixfed_interface::RegisterError::UnknownRegister)));

  fed.bus_mut().set_register(FLASH_UPLOADING, 1);
  fed.bus_mut().clear_log();
  assert_eq!(fed.download_fpga_config("user", "/tmp/x.bin"), Err(FEDError::UploadInProgress));
  assert_eq!(fed.bus().read_count(FLASH_UPLOADING), 5);
}

#[test]
fn monitoring_thread() {
  let card = test_card("monitoring");
  let mut fed = FEDController::new(SimBoard::new());
  fed.setup(&card).unwrap();
  fed.bus_mut().flip_enable_bit(33);

  let thread_control = Arc::new(Mutex::new(ThreadControl::new()));
  let (send, recv) = unbounded::<HealthReport>();
  let tc = Arc::clone(&thread_control);
  let handle = thread::spawn(move || {
    seu_monitoring(&mut fed, &send, Duration::from_millis(10), tc);
    fed
  });
  let report = recv.recv_timeout(Duration::from_secs(5)).unwrap();
  assert!(report.seu_found);
  assert_eq!(report.fed_id, 1294);
  assert_eq!(report.seu_counters[33], 1);

  thread_control.lock().unwrap().stop_flag = true;
  let fed = handle.join().unwrap();
  let tc = thread_control.lock().unwrap();
  assert!(!tc.thread_monitoring_active);
  assert!(tc.n_health_checks >= 1);
  assert!(fed.health_handle().lock().unwrap().seu_counters()[33] >= 1);
}
