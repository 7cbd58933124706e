//! picgp-core - Core library for PIC in-circuit serial programming
//!
//! This crate provides everything needed to program a PIC microcontroller
//! by bit-banging its ICSP lines through a GPIO backend:
//!
//! - [`gpio`] - line claiming, direction and level control with an injectable clock
//! - [`device`] - data-driven device profiles and the RON device database
//! - [`protocol`] - the programming-mode state machine and ICSP command framing
//! - [`session`] - one connect/program/verify/disconnect cycle owning its lines
//! - [`image`] - Intel HEX parsing and serialisation
//! - [`flash`] - the program/verify/read/erase orchestration with retries
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use picgp_core::{device::DeviceDatabase, flash, gpio::LineRegistry, image};
//! use picgp_core::session::{PinMap, ProgrammingSession};
//!
//! let db = DeviceDatabase::builtin()?;
//! let profile = db.resolve("PIC16F1823")?;
//! let image = image::parse_file("firmware.hex")?;
//! let mut session = ProgrammingSession::open(
//!     backend, clock, LineRegistry::new(), &pins, profile,
//! )?;
//! let report = flash::program(&mut session, &image, &Default::default(), &mut flash::NoProgress)?;
//! session.close()?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod device;
pub mod error;
pub mod flash;
pub mod gpio;
pub mod image;
pub mod protocol;
pub mod session;

pub use error::{Error, ErrorKind, Result};
