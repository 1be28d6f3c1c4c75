mod client;
mod climate;
mod config;
mod coordinator;
mod diff;
mod entity;
mod error;
mod integration;
mod logger;
mod number;
mod protocol;
mod scheduler;
mod sensor;
mod snapshot;
mod switch;
mod timer;
mod types;

pub use client::{AuxCloudClient, AuxCloudClientBuilder, Family, RemoteDeviceClient};
pub use climate::{ClimateControl, ClimateState, MAX_TEMP, MIN_TEMP};
pub use config::{API_SERVER_URL_EU, API_SERVER_URL_USA, Region, Session};
pub use coordinator::{
    Coordinator, CoordinatorBuilder, DEFAULT_TICK_PERIOD, DEFAULT_UPDATE_INTERVAL, Observer,
    SubscriptionHandle,
};
pub use entity::DeviceInfo;
pub use error::{Error, Result};
pub use integration::{CancelTimerCall, DeviceEntities, Integration, SetTimerCall};
pub use logger::MessageLogMode;
pub use number::TimerDurationNumber;
pub use scheduler::{ManualScheduler, ScheduleHandle, Scheduler, TickCallback, TokioScheduler};
pub use sensor::{TimerAttributes, TimerSensor};
pub use snapshot::{DeviceSnapshot, SnapshotStore};
pub use switch::SleepModeSwitch;
pub use timer::{ExpiryOutcome, ExpiryReport, MAX_TIMER_MINUTES, TimerEngine, TimerStatus};
pub use types::*;
