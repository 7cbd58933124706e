//! Info command implementation

use std::path::Path;

use picgp_core::device::DeviceProfile;
use picgp_core::flash::WritePlan;
use picgp_core::image;

/// Run the info command
///
/// Summarises the records of an image and, given a device, how it maps onto
/// that device's memory.
pub fn run_info(
    input: &Path,
    profile: Option<&DeviceProfile>,
) -> Result<(), Box<dyn std::error::Error>> {
    let image = image::parse_file(input)?;

    println!("Image Information");
    println!("=================");
    println!();
    println!("File:            {}", input.display());
    println!("Bytes:           {}", image.len());
    match image.span() {
        Some(span) => println!("Span:            0x{:08X} - 0x{:08X}", span.start(), span.end()),
        None => println!("Span:            (empty)"),
    }

    let runs = image.runs();
    println!();
    println!("Contiguous runs: {}", runs.len());
    for (start, data) in &runs {
        println!(
            "  0x{:08X} - 0x{:08X} ({} bytes)",
            start,
            last_address(*start, data.len()),
            data.len()
        );
    }

    if let Some(profile) = profile {
        let plan = WritePlan::from_image(profile, &image)?;
        println!();
        println!("Device:          {} {}", profile.vendor, profile.name);
        println!("Words:           {}", plan.word_count());
        for run in plan.runs() {
            println!(
                "  {:8} 0x{:04X} - 0x{:04X} ({} words)",
                run.region.to_string(),
                run.start,
                run.end() - 1,
                run.words.len()
            );
        }
        if let Some((start, end)) = plan.program_span() {
            let used = end - start;
            println!(
                "Program span:    {} of {} words ({:.1}%)",
                used,
                profile.program_words,
                used as f32 * 100.0 / profile.program_words as f32
            );
        }
        println!("Erase:           {:?}", plan.erase_plan(profile));
    }

    Ok(())
}

/// Address of the last byte of a non-empty run
fn last_address(start: u32, len: usize) -> u32 {
    start + (len as u32 - 1)
}
