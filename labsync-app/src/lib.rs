//! # labsync-app — Application controller and console front end
//!
//! - [`controller`] — `AppController`: view state, identity → feed wiring, actions
//! - [`banner`] — Transient status messages with auto-dismiss
//! - [`render`] — Plain-text rendering of the view
//! - [`console`] — stdin command loop driving the controller

pub mod banner;
pub mod console;
pub mod controller;
pub mod render;

pub use banner::{Banner, BannerKind, BannerSlot};
pub use controller::{AppController, ControllerConfig, Phase};
