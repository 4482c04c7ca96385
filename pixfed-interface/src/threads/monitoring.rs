use std::time::{
    Duration,
    Instant,
};
use std::sync::{
    Arc,
    Mutex,
};

use std::thread;

use crossbeam_channel::Sender;

use pixfed_lib::ThreadControl;

use crate::access::RegisterAccess;
use crate::control::FEDController;
use crate::health::{
    HealthReport,
    HealthState,
};

/// Check the channel health of a FED periodically
/// and pass the reports on over a channel
///
/// Whether the board goes into degraded mode once
/// the SEU threshold is exceeded is decided by the
/// auto_degrade setting of the card.
///
/// # Arguments:
///
/// * fed            - a configured controller
/// * ch             - should connect to whoever
///                    wants to know (dashboards, run control)
/// * moni_interval  - time between two health checks
/// * thread_control - the loop stops once the stop flag
///                    is raised
pub fn seu_monitoring<R: RegisterAccess>(fed            : &mut FEDController<R>,
                                         ch             : &Sender<HealthReport>,
                                         moni_interval  : Duration,
                                         thread_control : Arc<Mutex<ThreadControl>>) {
  // check the stop flag at least this often
  let heartbeat = moni_interval.min(Duration::from_millis(100));
  let mut moni_timer = Instant::now();
  let mut first_pass = true;
  match thread_control.lock() {
    Ok(mut tc) => {
      tc.thread_monitoring_active = true;
    },
    Err(err) => {
      trace!("Can't acquire lock! {err}");
    },
  }
  loop {
    match thread_control.lock() {
      Ok(tc) => {
        if tc.stop_flag {
          info!("Received stop signal. Will stop thread!");
          break;
        }
      },
      Err(err) => {
        trace!("Can't acquire lock! {err}");
      },
    }

    if first_pass || moni_timer.elapsed() >= moni_interval {
      first_pass = false;
      moni_timer = Instant::now();
      match fed.health_cycle() {
        Err(err) => {
          error!("Health check failed! {err}");
        },
        Ok(report) => {
          if report.seu_found {
            warn!("SEU on FED {}, expected {} but found {}", report.fed_id, report.expected, report.last);
          }
          if report.degraded_now {
            error!("FED {} has gone into degraded mode!", report.fed_id);
          }
          match thread_control.lock() {
            Ok(mut tc) => {
              tc.n_health_checks += 1;
              tc.board_degraded   = report.state == HealthState::Degraded;
            },
            Err(err) => {
              trace!("Can't acquire lock! {err}");
            },
          }
          match ch.try_send(report) {
            Err(err) => {error!("Issue sending HealthReport {:?}", err)},
            Ok(_)    => {debug!("Send HealthReport successfully!")}
          }
        }
      }
    }
    thread::sleep(heartbeat);
  }
  match thread_control.lock() {
    Ok(mut tc) => {
      tc.thread_monitoring_active = false;
    },
    Err(err) => {
      trace!("Can't acquire lock! {err}");
    },
  }
}
