mod manager;

pub use manager::{DeviceManager, DeviceRecord};
