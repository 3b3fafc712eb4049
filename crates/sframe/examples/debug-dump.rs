use std::path::PathBuf;

use anyhow::Context;
use sframe::SFrame;

fn main() -> anyhow::Result<()> {
    let path = std::env::args_os()
        .nth(1)
        .context("USAGE: debug-dump <sframe file>")?;
    let path = PathBuf::from(path);

    let data = std::fs::read(&path)
        .with_context(|| format!("could not read `{}`", path.display()))?;
    let sframe = SFrame::decode(&data).context("failed to decode sframe section")?;

    println!("{sframe:#?}");

    for (index, fde) in sframe.fdes().enumerate() {
        for fre in sframe.fres(index)? {
            println!("{:#x}: {:?}", fde.start_address(), fre?);
        }
    }

    Ok(())
}
