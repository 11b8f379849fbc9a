pub mod backup;

use crate::error::VirtBackupError;

/// Config problems exit 2, anything else 1.
pub fn exit_for_error(err: &VirtBackupError) -> ! {
    let code = match err {
        VirtBackupError::Config(_) => 2,
        _ => 1,
    };
    eprintln!("{}", err);
    std::process::exit(code);
}
