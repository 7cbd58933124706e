//! List commands implementation

use picgp_core::device::{DeviceDatabase, EntryMode};

use crate::programmers;

/// List all supported programmers
pub fn list_programmers() {
    println!("Supported programmers:");
    println!();
    for p in programmers::available_programmers() {
        if p.aliases.is_empty() {
            println!("  {:12} - {}", p.name, p.description);
        } else {
            println!(
                "  {:12} - {} (aliases: {})",
                p.name,
                p.description,
                p.aliases.join(", ")
            );
        }
    }
}

/// List all supported devices
pub fn list_devices(db: &DeviceDatabase, vendor_filter: Option<&str>) {
    println!("Supported devices:");
    println!();
    println!(
        "{:<12} {:<14} {:>8} {:>7} {:>6} {:>8}",
        "Vendor", "Name", "Words", "Config", "Entry", "Row"
    );
    println!("{}", "-".repeat(60));

    for device in db.iter() {
        if let Some(vendor) = vendor_filter {
            if !device.vendor.to_lowercase().contains(&vendor.to_lowercase()) {
                continue;
            }
        }

        let config = device
            .config
            .map(|c| c.words.to_string())
            .unwrap_or_else(|| "-".to_string());
        let entry = match device.entry.mode {
            EntryMode::LowVoltage => "LVP",
            EntryMode::HighVoltage => "HVP",
        };
        let row = device
            .erase_block_words
            .map(|r| r.to_string())
            .unwrap_or_else(|| "bulk".to_string());

        println!(
            "{:<12} {:<14} {:>8} {:>7} {:>6} {:>8}",
            device.vendor, device.name, device.program_words, config, entry, row
        );
    }
}
