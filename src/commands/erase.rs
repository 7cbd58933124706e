//! Erase command implementation

use picgp_core::flash;

use super::{print_device, IndicatifProgress, Session};

/// Run the erase command
pub fn run_erase(mut session: Session) -> Result<(), Box<dyn std::error::Error>> {
    print_device(session.profile());

    let mut progress = IndicatifProgress::new();
    if let Err(e) = flash::erase(&mut session, &mut progress) {
        progress.abandon();
        return Err(e.into());
    }
    session.close()?;

    println!("Erase complete");
    Ok(())
}
