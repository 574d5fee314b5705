//! Finding configuration modules on disk.

use std::path::{Path, PathBuf};

use kiln_core::{EvalError, EvalResult};
use walkdir::WalkDir;

/// Extension of configuration modules.
pub const MODULE_EXTENSION: &str = "pkl";

/// Every `*.pkl` file below `root`, sorted by path.
pub fn discover_modules(root: &Path) -> EvalResult<Vec<PathBuf>> {
    let mut modules = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| EvalError::Discovery {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == MODULE_EXTENSION)
        {
            modules.push(entry.into_path());
        }
    }

    modules.sort();
    Ok(modules)
}
