//! Verify command implementation

use std::path::Path;

use picgp_core::flash;

use super::{load_image, print_device, IndicatifProgress, Session};

/// Run the verify command
pub fn run_verify(mut session: Session, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    print_device(session.profile());
    let image = load_image(input)?;

    let mut progress = IndicatifProgress::new();
    let report = match flash::verify(&mut session, &image, &mut progress) {
        Ok(report) => report,
        Err(e) => {
            progress.abandon();
            return Err(e.into());
        }
    };
    session.close()?;

    println!("Verification passed! ({} words)", report.words_verified);
    Ok(())
}
