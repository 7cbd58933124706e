//! Program command implementation

use std::path::Path;

use picgp_core::flash::{self, ProgramOptions};

use super::{load_image, print_device, IndicatifProgress, Session};

/// Run the program command
pub fn run_program(
    mut session: Session,
    input: &Path,
    options: &ProgramOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    print_device(session.profile());
    let image = load_image(input)?;

    let mut progress = IndicatifProgress::new();
    let report = match flash::program(&mut session, &image, options, &mut progress) {
        Ok(report) => report,
        Err(e) => {
            progress.abandon();
            return Err(e.into());
        }
    };
    session.close()?;

    if report.bulk_erased {
        println!("Bulk erased device");
    } else if report.rows_erased > 0 {
        println!("Erased {} row(s)", report.rows_erased);
    }
    println!("Wrote {} words", report.words_written);
    if options.verify {
        println!(
            "Verified {} words ({} rewrite(s))",
            report.words_verified, report.retries
        );
    }
    Ok(())
}
