//! Control core for a solar microgrid with relay-switched load zones.
//!
//! Each cycle reads a [`control::SystemSnapshot`] of per-zone sensor data,
//! picks an operating mode from the battery level, decides ON/OFF per zone,
//! trims the decision to available generation and dispatches relay
//! commands. A watchdog retries undelivered commands and escalates
//! connectivity loss and stale data; a monitor raises battery and anomaly
//! alerts and opens emergencies.

pub mod config;
/// Decision engine, load balancer, dispatcher and optimizer.
pub mod control;
pub mod emergency;
pub mod feed;
pub mod forecast;
pub mod io;
pub mod monitor;
pub mod notify;
pub mod ports;
pub mod scheduler;
pub mod store;
pub mod ticker;
pub mod watchdog;
pub mod zones;
