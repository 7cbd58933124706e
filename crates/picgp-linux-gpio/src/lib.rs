//! picgp-linux-gpio - Linux GPIO backend for picgp
//!
//! This crate drives the ICSP lines of a PIC through the Linux GPIO
//! character device interface (gpiocdev), so any board with spare GPIOs
//! (Raspberry Pi, BeagleBone, ...) can act as the programmer.
//!
//! # Example
//!
//! ```no_run
//! use picgp_core::session::PinMap;
//! use picgp_linux_gpio::{LinuxGpioBackend, LinuxGpioConfig};
//!
//! let pins = PinMap { mclr: 22, pgc: 27, pgd: 17, vdd: None };
//! let config = LinuxGpioConfig::new("/dev/gpiochip0", pins);
//! let backend = LinuxGpioBackend::open(&config)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Usage with the picgp CLI
//!
//! ```bash
//! # Pins from the configuration file
//! picgp program -p linux_gpio -d PIC16F1823 -i firmware.hex
//!
//! # Override chip and pins on the command line
//! picgp program -p linux_gpio:gpiochip=0,mclr=22,pgc=27,pgd=17 -d PIC16F1823 -i firmware.hex
//! ```
//!
//! # Wiring
//!
//! | PIC pin     | GPIO function     | Description |
//! |-------------|-------------------|-------------|
//! | MCLR/VPP    | mclr (output)     | Reset; drives the VPP switch on high-voltage parts |
//! | ICSPCLK     | pgc (output)      | Programming clock |
//! | ICSPDAT     | pgd (bidirectional) | Programming data |
//! | VDD         | vdd (output, optional) | Supply switch |
//! | VSS         | GND               | Ground |
//!
//! High-voltage parts need an external transistor stage on MCLR; the GPIO
//! only switches it.
//!
//! # System Requirements
//!
//! - Linux kernel 4.8+ with GPIO character device support (kernel 5.10+ for v2 API)
//! - Access to `/dev/gpiochipN` devices (may require root or udev rules)

pub mod device;
pub mod error;

// Re-exports
pub use device::{parse_options, LinuxGpioBackend, LinuxGpioConfig};
pub use error::{LinuxGpioError, Result};
