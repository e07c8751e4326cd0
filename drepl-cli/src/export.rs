use std::path::Path;

use anyhow::Context;
use drepl::file::DreplFile;

pub fn exec_export(file: &DreplFile, output: &Path) -> anyhow::Result<()> {
    let bytes = file.export()?;
    std::fs::write(output, &bytes)
        .with_context(|| format!("writing export to {}", output.display()))?;
    tracing::info!("exported {} bytes to {}", bytes.len(), output.display());
    Ok(())
}
