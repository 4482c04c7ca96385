pub mod monitoring;

pub use monitoring::seu_monitoring;
