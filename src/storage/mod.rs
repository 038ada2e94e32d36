pub mod artifact_store;
pub mod batch_store;

pub use artifact_store::*;
pub use batch_store::*;

use crate::error::Result;
use std::fs;
use std::path::Path;

/// Write to a `.tmp` sibling and rename it over `path`, so readers see
/// either the old file or the new one.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    fs::write(tmp_path, bytes)?;
    if let Err(e) = fs::rename(tmp_path, path) {
        let _ = fs::remove_file(tmp_path);
        return Err(e.into());
    }
    Ok(())
}
