//! DualShock 4 UDP bridge
//!
//! Reads raw Bluetooth input reports from a DualShock 4 controller, translates
//! them into a compact state packet and fans that out to subscribed UDP
//! clients. In the other direction it builds the checksummed control and audio
//! output reports the controller expects.

pub mod axis;
pub mod bridge;
pub mod broadcast;
pub mod codec;
pub mod config;
pub mod device;
pub mod frame;
pub mod loss;
pub mod packet;
pub mod report;
