//! Read command implementation

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use picgp_core::flash;

use super::{print_device, IndicatifProgress, Session};

/// Run the read command
pub fn run_read(mut session: Session, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    print_device(session.profile());

    let mut progress = IndicatifProgress::new();
    let image = match flash::read_memory(&mut session, &mut progress) {
        Ok(image) => image,
        Err(e) => {
            progress.abandon();
            return Err(e.into());
        }
    };
    session.close()?;

    let file = File::create(output)?;
    image.write_intel_hex(BufWriter::new(file))?;

    println!("Wrote {} bytes to {:?}", image.len(), output);
    Ok(())
}
