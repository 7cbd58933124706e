//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Help text for the programmer argument
const PROGRAMMER_HELP: &str = "Programmer to use: linux_gpio[:dev=<path>|gpiochip=<n>,mclr=<n>,pgc=<n>,pgd=<n>,vdd=<n>] \
     or dummy[:device_id=<id>,preload=<file.hex>] (default from the configuration file, else linux_gpio)";

#[derive(Parser)]
#[command(name = "picgp")]
#[command(author, version, about = "PIC microcontroller programmer using the Linux GPIO", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to $XDG_CONFIG_HOME/picgp/picgp.conf,
    /// ~/.config/picgp/picgp.conf, /etc/picgp.conf)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Extra device database file or directory (contains .ron files)
    #[arg(long, global = true)]
    pub device_db: Option<PathBuf>,

    #[arg(short, long, global = true, help = PROGRAMMER_HELP)]
    pub programmer: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Target device selection shared across commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct DeviceArgs {
    /// Device name, e.g. PIC16F1823 (defaults to the configuration file)
    #[arg(short, long)]
    pub device: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write an Intel HEX image to the device
    Program {
        #[command(flatten)]
        device: DeviceArgs,

        /// Input file (Intel HEX)
        #[arg(short, long)]
        input: PathBuf,

        /// Don't read back written words
        #[arg(long)]
        no_verify: bool,

        /// Don't erase before writing
        #[arg(long)]
        no_erase: bool,

        /// Check that the target words are erased before writing
        #[arg(long)]
        blank_check: bool,

        /// Rewrites allowed per word after a verify mismatch
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Compare the device contents against an Intel HEX image
    Verify {
        #[command(flatten)]
        device: DeviceArgs,

        /// Input file (Intel HEX)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Dump program memory and configuration words to an Intel HEX file
    Read {
        #[command(flatten)]
        device: DeviceArgs,

        /// Output file (Intel HEX)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Bulk erase program memory and configuration words
    Erase {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Summarise an Intel HEX image without touching hardware
    Info {
        /// Input file (Intel HEX)
        #[arg(short, long)]
        input: PathBuf,

        /// Check the image against this device's memory map
        #[arg(short, long)]
        device: Option<String>,
    },

    /// List supported devices
    ListDevices {
        /// Filter by vendor
        #[arg(long)]
        vendor: Option<String>,
    },

    /// List supported programmers
    ListProgrammers,
}
