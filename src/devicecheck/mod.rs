//! Apple DeviceCheck server-to-server API
//!
//! Independent of App Attest: devices are identified by opaque tokens from
//! `DCDevice.generateToken`, and Apple stores two bits per device.

pub mod auth;
pub mod errors;
pub mod gateway;
pub mod types;

pub use auth::{AuthKeyConfig, AuthTokenProvider, DEVICECHECK_AUDIENCE};
pub use errors::DeviceCheckError;
pub use gateway::{AppleDeviceCheckGateway, DeviceTokenGateway};
pub use types::DeviceBits;
