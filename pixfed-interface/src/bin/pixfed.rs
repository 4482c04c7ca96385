//! # Operator tool for pixel FEDs
//!
//! * check-regmap : Validate a Fitel register map file and
//!                  show the I2C words it turns into
//! * write-card   : Write a default configuration card
//! * dry-run      : Set up a simulated board from a card,
//!                  show all register transactions and
//!                  optionally watch the channel health
//!

use std::path::PathBuf;
use std::process::exit;
use std::sync::{
    Arc,
    Mutex,
};
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::thread;
use std::time::{
    Duration,
    Instant,
};

use clap::{
    Parser,
    Subcommand,
    Args,
};
use colored::Colorize;
use crossbeam_channel::unbounded;

use pixfed_lib::constants::NCHN;
use pixfed_lib::{
    init_env_logger,
    init_env_logger_with_level,
    FEDCard,
    ThreadControl,
};
use pixfed_interface::control::FEDController;
use pixfed_interface::fitel::{
    encode_fitel_reg,
    load_fitel_regmap,
    sorted_by_address,
    FitelOp,
    FitelSlot,
};
use pixfed_interface::health::HealthReport;
use pixfed_interface::sim::{
    BusOp,
    SimBoard,
};
use pixfed_interface::threads::seu_monitoring;

#[macro_use] extern crate log;

#[derive(Parser, Debug)]
#[command(author = "pixfed developers", version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command : Command,
}

#[derive(Debug, Subcommand)]
enum Command {
  /// Validate a Fitel register map file
  CheckRegmap(CheckRegmapOpts),
  /// Write a configuration card with default values
  WriteCard(WriteCardOpts),
  /// Set up a simulated board from a card
  DryRun(DryRunOpts),
}

#[derive(Debug, Args)]
struct CheckRegmapOpts {
  /// The register map file
  #[arg(required = true)]
  file  : PathBuf,
  /// FMC the Fitel sits on (0 or 1)
  #[arg(long, default_value_t = 0)]
  fmc   : u8,
  /// Fitel on the FMC (0 or 1)
  #[arg(long, default_value_t = 0)]
  fitel : u8,
}

#[derive(Debug, Args)]
struct WriteCardOpts {
  /// Output file, .toml or .json
  #[arg(required = true)]
  file : String,
}

#[derive(Debug, Args)]
struct DryRunOpts {
  /// The configuration card (.toml or .json)
  #[arg(required = true)]
  card       : String,
  /// Don't list the individual register transactions
  #[arg(long, default_value_t = false)]
  quiet      : bool,
  /// Watch the channel health for this many
  /// seconds after setup (0 = don't)
  #[arg(long, default_value_t = 0)]
  monitor    : u64,
  /// Flip the enable bit of this channel before
  /// the monitoring starts, to see an SEU
  #[arg(long)]
  inject_seu : Option<usize>,
}

fn check_regmap(opts : &CheckRegmapOpts) -> i32 {
  let slot = match FitelSlot::from_ids(opts.fmc, opts.fitel) {
    Ok(slot) => slot,
    Err(err) => {
      error!("There is no FMC{}_Fitel{}! {err}", opts.fmc, opts.fitel);
      return 1;
    }
  };
  let map = match load_fitel_regmap(&opts.file) {
    Ok(map)  => map,
    Err(err) => {
      println!("{} {}: {}", "INVALID".red().bold(), opts.file.display(), err);
      return 1;
    }
  };
  println!("{} {} ({} registers) for {}", "OK".green().bold(), opts.file.display(), map.len(), slot);
  for (name, item) in sorted_by_address(&map) {
    let mut words = String::new();
    if item.permission.writable() {
      match encode_fitel_reg(item, slot, FitelOp::Write) {
        Ok(w)    => words += &format!(" W {:#010x}", w[0]),
        Err(err) => words += &format!(" W {}", err),
      }
    }
    if item.permission.readable() {
      match encode_fitel_reg(item, slot, FitelOp::Read) {
        Ok(w)    => words += &format!(" R {:#010x}", w[0]),
        Err(err) => words += &format!(" R {}", err),
      }
    }
    println!("  {:<24} {}{}", name, item, words);
  }
  0
}

fn write_card(opts : &WriteCardOpts) -> i32 {
  let card = FEDCard::new();
  let result = if opts.file.ends_with(".json") {
    card.to_json(opts.file.clone())
  } else {
    card.to_toml(opts.file.clone())
  };
  match result {
    Ok(_)    => {
      println!("Wrote default card to {}", opts.file);
      0
    }
    Err(err) => {
      error!("Unable to write card! {err}");
      1
    }
  }
}

fn print_transactions(board : &SimBoard) {
  println!("{}", "-- register transactions".bold());
  for op in board.log() {
    match op {
      BusOp::Read(reg)             => println!("  R  {}", reg),
      BusOp::Write(reg, value)     => println!("  W  {:<48} {:#010x}", reg, value),
      BusOp::ReadBlock(reg, n)     => println!("  RB {:<48} {} words", reg, n),
      BusOp::WriteBlock(reg, data) => println!("  WB {:<48} {:08x?}", reg, data),
    }
  }
}

fn dry_run(card : &FEDCard, opts : &DryRunOpts) -> i32 {
  let mut fed = FEDController::new(SimBoard::new());
  let report = match fed.setup(card) {
    Ok(report) => report,
    Err(err)   => {
      error!("Setup failed! {err}");
      return 1;
    }
  };
  if !opts.quiet {
    print_transactions(fed.bus());
  }
  println!("{}", report);
  if report.is_ok() {
    println!("{}", "Setup OK".green().bold());
  } else {
    println!("{}", "Setup finished with failing Fitels".yellow().bold());
  }
  if opts.monitor == 0 {
    return 0;
  }
  if let Some(ch) = opts.inject_seu {
    if ch >= NCHN {
      error!("There is no channel {ch}!");
      return 1;
    }
    warn!("Flipping the enable bit of channel {ch}");
    fed.bus_mut().flip_enable_bit(ch);
  }

  // the monitoring thread runs until either the time
  // is up or somebody hits CTRL+C
  let interrupted = Arc::new(AtomicBool::new(false));
  if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted)) {
    warn!("Can not register SIGINT handler! {err}");
  }
  let thread_control = Arc::new(Mutex::new(ThreadControl::new()));
  let (report_send, report_recv) = unbounded::<HealthReport>();
  let moni_interval = Duration::from_secs_f32(card.moni_interval.max(0.1));
  let health = fed.health_handle();
  let tc = Arc::clone(&thread_control);
  let moni = thread::Builder::new()
    .name("seu-monitoring".into())
    .spawn(move || {
      seu_monitoring(&mut fed, &report_send, moni_interval, tc);
      fed
    });
  let moni = match moni {
    Ok(handle) => handle,
    Err(err)   => {
      error!("Unable to spawn monitoring thread! {err}");
      return 1;
    }
  };
  let start = Instant::now();
  while start.elapsed() < Duration::from_secs(opts.monitor) && !interrupted.load(Ordering::Relaxed) {
    while let Ok(report) = report_recv.try_recv() {
      println!("{}", report);
    }
    thread::sleep(Duration::from_millis(50));
  }
  match thread_control.lock() {
    Ok(mut tc) => tc.stop_flag = true,
    Err(err)   => error!("Can't acquire lock! {err}"),
  }
  match moni.join() {
    Ok(_)  => (),
    Err(_) => error!("Monitoring thread panicked!"),
  }
  while let Ok(report) = report_recv.try_recv() {
    println!("{}", report);
  }
  match health.lock() {
    Ok(moni) => println!("{}", moni),
    Err(err) => error!("Can't acquire lock! {err}"),
  }
  0
}

fn main() {
  let cli = Cli::parse();
  let status = match &cli.command {
    Command::CheckRegmap(opts) => {
      init_env_logger();
      check_regmap(opts)
    }
    Command::WriteCard(opts) => {
      init_env_logger();
      write_card(opts)
    }
    Command::DryRun(opts) => {
      match FEDCard::from_file(&opts.card) {
        Ok(card) => {
          init_env_logger_with_level(&card.print_level);
          dry_run(&card, opts)
        }
        Err(err) => {
          init_env_logger();
          error!("Unable to load card {}! {err}", opts.card);
          1
        }
      }
    }
  };
  exit(status);
}
