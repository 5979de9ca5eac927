pub mod audio;
pub mod bus;
pub mod camera;
pub mod capture;
pub mod config;
pub mod control;
pub mod error;
pub mod frame;
pub mod logging;
pub mod router;
pub mod vision;

pub use config::{Config, OperatingMode};
pub use error::{Error, Result};
pub use frame::{Frame, FrameBuffer, FrameReader};
