use anyhow::Context;
use drepl::file::DreplFile;

const LINE: usize = 16;

pub fn exec_read(
    file: &DreplFile,
    view: &str,
    offset: u64,
    len: Option<u64>,
) -> anyhow::Result<()> {
    let view = file.view(view)?;
    let len = len.unwrap_or_else(|| view.len().saturating_sub(offset));
    let mut buf = vec![0; usize::try_from(len).context("read length does not fit in memory")?];
    let n = view.read(offset, &mut buf)?;
    for (i, line) in buf[..n].chunks(LINE).enumerate() {
        println!("{:08x}  {}", offset + (i * LINE) as u64, hex::encode(line));
    }
    if n < buf.len() {
        tracing::warn!("read {n} of {len} bytes from view '{}'", view.name());
    }
    Ok(())
}

pub fn exec_write(file: &DreplFile, view: &str, offset: u64, data: &str) -> anyhow::Result<()> {
    let data = hex::decode(data.trim()).context("data must be hex encoded")?;
    let view = file.view(view)?;
    let n = view.write(offset, &data)?;
    file.flush()?;
    println!("wrote {n} of {} bytes to view '{}' at {offset}", data.len(), view.name());
    Ok(())
}
