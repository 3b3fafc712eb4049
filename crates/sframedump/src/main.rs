use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use object::{Object, ObjectSection};
use sframe::raw::v2::{FdeType, FreBaseRegId};
use sframe::{FrameRowEntry, SFrame};

const HELP: &str = "\
Dump SFrame debug information of an ELF object.

USAGE
    sframedump [OPTIONS] <object file>

DESCRIPTION
    sframedump prints the information contained in the .sframe section of an
    ELF object in a human readable format.

FLAGS
    -h
    --help
        Print this help message and then exit.

    -p <PC>
    --pc <PC>
        Only print the frame row entry that covers PC. PC is relative to the
        start of the .sframe section and may be given in hex with a 0x prefix.

ENVIRONMENT
    SFRAME_DEBUG
        When set, explain why a section or lookup was rejected on stderr.
";

/// log::Log implementation that writes the library's trace messages to
/// stderr.
struct Logger;

impl log::Log for Logger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        eprintln!("[{}] ({}) {}", record.level(), record.target(), record.args())
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;

fn main() -> anyhow::Result<()> {
    let mut opts = getopts::Options::new();
    opts.optflag("h", "help", "show this help text");
    opts.optopt("p", "pc", "look up the FRE covering PC", "PC");

    let matches = opts.parse(std::env::args().skip(1))?;

    if matches.opt_present("help") {
        eprintln!("{HELP}");
        return Ok(());
    }

    if std::env::var_os(sframe::DEBUG_ENV).is_some() {
        log::set_logger(&LOGGER).context("failed to install logger")?;
        log::set_max_level(log::LevelFilter::Debug);
    }

    if matches.free.is_empty() {
        anyhow::bail!("no object file input provided");
    }

    if matches.free.len() != 1 {
        anyhow::bail!("at most one object file can be provided as an input")
    }

    let pc = matches
        .opt_str("pc")
        .map(|pc| parse_pc(&pc).with_context(|| format!("invalid PC `{pc}`")))
        .transpose()?;

    let path = Path::new(&matches.free[0]);
    let file = File::open(path).with_context(|| format!("failed to open `{}`", path.display()))?;
    let data = unsafe { memmap2::Mmap::map(&file) }
        .with_context(|| format!("failed to mmap `{}`", path.display()))?;
    let file = object::File::parse(&*data)
        .with_context(|| format!("failed to parse `{}`", path.display()))?;

    let section = match file.section_by_name(".sframe") {
        Some(section) => section,
        None => anyhow::bail!("elf binary has no .sframe section"),
    };

    let data = section
        .uncompressed_data()
        .context("failed to decompress the .sframe section")?;

    let sframe = SFrame::decode(&data).context("unable to read the .sframe section")?;
    let stdout = std::io::stdout();
    let mut w = BufWriter::new(stdout.lock());

    match pc {
        Some(pc) => lookup(&mut w, &sframe, pc)?,
        None => dump(&mut w, &sframe)?,
    }

    w.flush()?;
    Ok(())
}

fn parse_pc(pc: &str) -> anyhow::Result<i32> {
    let value = match pc.strip_prefix("0x") {
        Some(hex) => i32::from_str_radix(hex, 16)?,
        None => pc.parse()?,
    };

    Ok(value)
}

fn lookup<W: Write>(w: &mut W, sframe: &SFrame, pc: i32) -> anyhow::Result<()> {
    let fre = sframe
        .find_fre(pc)
        .with_context(|| format!("no frame row entry covers pc {pc:#x}"))?;
    let index = sframe.funcdesc_for_addr(pc)?;
    let fde = sframe.funcdesc(index)?;

    writeln!(
        w,
        "func idx [{index}]: pc = {:#x}, size = {} bytes",
        fde.start_address(),
        fde.size()
    )?;
    writeln!(w, "  STARTPC          CFA          FP           RA")?;
    write_fre(w, sframe, fde.start_address(), &fre)
}

fn dump<W: Write>(w: &mut W, sframe: &SFrame) -> anyhow::Result<()> {
    writeln!(w, "Header:")?;
    writeln!(w, "  Version:  {}", sframe.version().0)?;
    writeln!(w, "  Flags:    {:#x}", sframe.flags().bits())?;
    writeln!(w, "  Num FDEs: {}", sframe.num_fdes())?;
    writeln!(w, "  Num FREs: {}", sframe.num_fres())?;
    writeln!(w, "  FRE len:  {}", sframe.fre_len())?;
    writeln!(w, "  Arch/ABI: {:?}", sframe.abi())?;
    writeln!(
        w,
        "  Fixed FP Offset: {}",
        sframe
            .fixed_fp_offset()
            .map(|x| x.to_string())
            .unwrap_or_else(|| "none".to_string())
    )?;
    writeln!(
        w,
        "  Fixed RA Offset: {}",
        sframe
            .fixed_ra_offset()
            .map(|x| x.to_string())
            .unwrap_or_else(|| "none".to_string())
    )?;
    if !sframe.aux_header().is_empty() {
        writeln!(w, "  Aux header: {} bytes", sframe.aux_header().len())?;
    }
    writeln!(w)?;
    writeln!(w, "Function Index:")?;

    for (idx, fde) in sframe.fdes().enumerate() {
        writeln!(
            w,
            "  func idx [{idx}]: pc = {:#x}, size = {} bytes",
            fde.start_address(),
            fde.size()
        )?;

        let marker = match fde.fdetype() {
            FdeType::PcInc => "   ",
            FdeType::PcMask => "[m]",
        };

        writeln!(w, "  STARTPC {marker}      CFA          FP           RA")?;

        for fre in sframe.fres(idx)? {
            let fre = match fre {
                Ok(fre) => fre,
                Err(e) => {
                    w.flush()?;
                    eprintln!("  error decoding FRE: {e}");
                    break;
                }
            };

            let start = match fde.fdetype() {
                FdeType::PcInc => fde.start_address(),
                FdeType::PcMask => 0,
            };
            write_fre(w, sframe, start, &fre)?;
        }

        writeln!(w)?;
    }

    Ok(())
}

fn write_fre<W: Write>(
    w: &mut W,
    sframe: &SFrame,
    start: i32,
    fre: &FrameRowEntry,
) -> anyhow::Result<()> {
    let base = match fre.base_reg_id() {
        FreBaseRegId::Fp => "fp",
        FreBaseRegId::Sp => "sp",
    };

    let cfa = match fre.cfa_offset() {
        Ok(offset) => format!("{base}{offset:+}"),
        Err(_) => "u".to_string(),
    };

    let fp = match fre.fp_offset(sframe) {
        Ok(offset) => format!("c{offset:+}"),
        Err(_) => "u".to_string(),
    };

    let ra = match fre.ra_offset(sframe) {
        Ok(offset) => format!("c{offset:+}"),
        Err(_) => "u".to_string(),
    };

    let mangled = match fre.mangled_ra_p() {
        true => "[s]",
        false => "",
    };

    let address = i64::from(start) + i64::from(fre.start_address_offset());
    writeln!(w, "  {address:016x} {cfa: <12} {fp: <12} {ra}{mangled}")?;

    Ok(())
}
