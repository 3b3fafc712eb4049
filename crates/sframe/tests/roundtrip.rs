use anyhow::Context;
use sframe::raw::v2::{Abi, FdeInfo, FdeType, FreBaseRegId, FreType};
use sframe::raw::{Flags, Version};
use sframe::write::{FrameRowOffsets, SFrameEncoder, SFrameOptions};
use sframe::*;

fn info(size: u32) -> FdeInfo {
    FdeInfo::new(FreType::for_function_size(size), FdeType::PcInc)
}

fn sp(start: u32, offsets: &[i32]) -> anyhow::Result<FrameRowEntry> {
    Ok(FrameRowEntry::with_offsets(start, FreBaseRegId::Sp, offsets)?)
}

struct Function {
    start: i32,
    size: u32,
    fres: Vec<FrameRowEntry>,
}

/// A few functions, added out of address order, with FREs of every address
/// and offset width.
fn functions() -> anyhow::Result<Vec<Function>> {
    Ok(vec![
        Function {
            start: 0x3000,
            size: 0x40,
            fres: vec![sp(0, &[8, -8])?, sp(1, &[16, -8, -16])?, sp(0x30, &[8, -8])?],
        },
        Function {
            start: 0x1000,
            size: 0x2000 - 0x1000,
            fres: vec![
                sp(0, &[8, -8])?,
                FrameRowEntry::with_offsets(0x104, FreBaseRegId::Fp, &[0x200, -8, -0x110])?,
            ],
        },
        Function {
            start: 0x10000,
            size: 0x20000,
            fres: vec![
                sp(0, &[8])?.mangled_ra(true),
                sp(0x1FFFF, &[0x12345, -8])?,
            ],
        },
    ])
}

fn encode(options: SFrameOptions, functions: &[Function]) -> anyhow::Result<Vec<u8>> {
    let mut encoder = SFrameEncoder::new(options)?;

    for function in functions {
        let index = encoder.add_function(function.start, function.size, info(function.size))?;
        for &fre in &function.fres {
            encoder.add_fre(index, fre)?;
        }
    }

    Ok(encoder.write()?)
}

fn check_contents(sframe: &SFrame, functions: &[Function]) -> anyhow::Result<()> {
    assert_eq!(sframe.num_fdes(), functions.len());
    assert_eq!(
        sframe.num_fres() as usize,
        functions.iter().map(|f| f.fres.len()).sum::<usize>()
    );

    // The decoded table is sorted, so match functions up by their start address.
    let starts: Vec<i32> = sframe.fdes().map(|fde| fde.start_address()).collect();
    let mut sorted = starts.clone();
    sorted.sort();
    assert_eq!(starts, sorted);

    for function in functions {
        let index = sframe.funcdesc_for_addr(function.start)?;
        let fde = sframe.funcdesc(index)?;

        assert_eq!(fde.start_address(), function.start);
        assert_eq!(fde.size(), function.size);
        assert_eq!(fde.num_fres() as usize, function.fres.len());
        assert_eq!(fde.fdetype(), FdeType::PcInc);
        assert_eq!(fde.fretype()?, FreType::for_function_size(function.size));

        for (i, expected) in function.fres.iter().enumerate() {
            assert_eq!(&sframe.fre(index, i)?, expected);
        }

        let fres = sframe.fres(index)?.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(fres, function.fres);
    }

    Ok(())
}

#[test]
fn roundtrip() -> anyhow::Result<()> {
    let functions = functions()?;
    let data = encode(SFrameOptions::new(), &functions)?;

    let sframe = SFrame::decode(&data).context("failed to decode sframe section")?;

    assert_eq!(sframe.version(), Version::V2);
    assert_eq!(sframe.flags(), Flags::FDE_SORTED);
    assert_eq!(sframe.header_size(), HEADER_SIZE);
    assert!(sframe.aux_header().is_empty());
    assert_eq!(sframe.fre_len() as usize, data.len() - HEADER_SIZE - 3 * 20);
    check_contents(&sframe, &functions)
}

#[test]
fn roundtrip_v1() -> anyhow::Result<()> {
    let functions = functions()?;
    let options = SFrameOptions::new().version(Version::V1);
    let data = encode(options, &functions)?;

    let sframe = SFrame::decode(&data).context("failed to decode sframe section")?;

    assert_eq!(sframe.version(), Version::V1);
    assert_eq!(sframe.fre_len() as usize, data.len() - HEADER_SIZE - 3 * 17);
    check_contents(&sframe, &functions)
}

fn check_foreign_endian(version: Version) -> anyhow::Result<()> {
    let (native, foreign) = if cfg!(target_endian = "little") {
        (Abi::AMD64_ENDIAN_LITTLE, Abi::S390X_ENDIAN_BIG)
    } else {
        (Abi::S390X_ENDIAN_BIG, Abi::AARCH64_ENDIAN_LITTLE)
    };

    let functions = functions()?;
    let options = SFrameOptions::new().version(version).fixed_fp_offset(-16);
    let native_data = encode(options.abi(native), &functions)?;
    let foreign_data = encode(options.abi(foreign), &functions)?;

    assert_eq!(native_data.len(), foreign_data.len());
    assert_eq!(&native_data[..2], &0xDEE2u16.to_ne_bytes());
    assert_eq!(&foreign_data[..2], &0xDEE2u16.swap_bytes().to_ne_bytes());

    let native_sframe = SFrame::decode(&native_data)?;
    let foreign_sframe = SFrame::decode(&foreign_data)?;

    assert_eq!(foreign_sframe.version(), version);
    assert_eq!(foreign_sframe.abi(), foreign);
    assert_eq!(foreign_sframe.fixed_fp_offset(), Some(-16));
    check_contents(&foreign_sframe, &functions)?;

    assert_eq!(
        native_sframe.fdes().collect::<Vec<_>>(),
        foreign_sframe.fdes().collect::<Vec<_>>()
    );

    // Converting back by hand gives the bytes of the native encoding, apart
    // from the ABI.
    let mut converted = foreign_data.clone();
    convert_section(&mut converted, Direction::ToNative)?;
    converted[4] = native.0;
    assert_eq!(converted, native_data);

    Ok(())
}

#[test]
fn roundtrip_foreign_endian() -> anyhow::Result<()> {
    check_foreign_endian(Version::V2)
}

#[test]
fn roundtrip_foreign_endian_v1() -> anyhow::Result<()> {
    check_foreign_endian(Version::V1)
}

#[test]
fn single_function_single_fre() -> anyhow::Result<()> {
    let mut encoder = SFrameEncoder::new(SFrameOptions::new())?;
    let func = encoder.add_function(0x1000, 64, info(64))?;
    encoder.add_fre(func, sp(0, &[8])?)?;

    let sframe = SFrame::decode(&encoder.write()?)?;
    let fre = sframe.find_fre(0x1000 + 32)?;

    assert_eq!(fre.start_address_offset(), 0);
    assert_eq!(fre.base_reg_id(), FreBaseRegId::Sp);
    assert_eq!(fre.offset_count(), 1);
    assert_eq!(fre.cfa_offset()?, 8);

    Ok(())
}

#[test]
fn two_fres_boundary_pc() -> anyhow::Result<()> {
    let mut encoder = SFrameEncoder::new(SFrameOptions::new())?;
    let func = encoder.add_function(0x1000, 20, info(20))?;
    encoder.add_fre(func, sp(0, &[8])?)?;
    encoder.add_fre(func, sp(10, &[16])?)?;

    let sframe = SFrame::decode(&encoder.write()?)?;

    assert_eq!(sframe.find_fre(0x1000)?.cfa_offset()?, 8);
    assert_eq!(sframe.find_fre(0x1000 + 9)?.cfa_offset()?, 8);
    assert_eq!(sframe.find_fre(0x1000 + 10)?.cfa_offset()?, 16);
    assert_eq!(sframe.find_fre(0x1000 + 19)?.cfa_offset()?, 16);
    assert_eq!(sframe.find_fre(0x1000 + 20), Err(Error::FdeInvalid));

    Ok(())
}

#[test]
fn fixed_ra_offset() -> anyhow::Result<()> {
    let options = SFrameOptions::new().fixed_ra_offset(-8);
    let mut encoder = SFrameEncoder::new(options)?;
    let func = encoder.add_function(0x1000, 0x10, info(0x10))?;

    let fre = encoder.fre_from_offsets(
        0,
        FreBaseRegId::Sp,
        FrameRowOffsets {
            cfa: 16,
            ra: Some(-8),
            fp: None,
        },
    )?;
    assert_eq!(fre.offset_count(), 1);
    encoder.add_fre(func, fre)?;

    let sframe = SFrame::decode(&encoder.write()?)?;
    assert_eq!(sframe.fixed_ra_offset(), Some(-8));
    assert_eq!(sframe.fixed_fp_offset(), None);

    let fre = sframe.find_fre(0x1004)?;
    assert_eq!(fre.offsets(), &[16]);
    assert_eq!(fre.ra_offset(&sframe)?, -8);
    assert_eq!(fre.fp_offset(&sframe), Err(Error::FreOffsetNotPresent));

    Ok(())
}

#[test]
fn pc_mask_function() -> anyhow::Result<()> {
    let mut encoder = SFrameEncoder::new(SFrameOptions::new())?;
    let mask = FdeInfo::new(FreType::Addr1, FdeType::PcMask);
    let func = encoder.add_function_v2(0x4000, 64, mask, 16)?;
    encoder.add_fre(func, sp(0, &[8])?)?;
    encoder.add_fre(func, sp(8, &[16])?)?;

    let sframe = SFrame::decode(&encoder.write()?)?;
    let fde = sframe.funcdesc(0)?;
    assert_eq!(fde.fdetype(), FdeType::PcMask);
    assert_eq!(fde.rep_block_size(), 16);

    assert_eq!(sframe.find_fre(0x4000 + 7)?.cfa_offset()?, 8);
    assert_eq!(sframe.find_fre(0x4000 + 8)?.cfa_offset()?, 16);
    assert_eq!(sframe.find_fre(0x4000 + 16 * 3 + 2)?.cfa_offset()?, 8);
    assert_eq!(sframe.find_fre(0x4000 + 16 * 3 + 9)?.cfa_offset()?, 16);

    Ok(())
}

#[test]
fn lookup_errors() -> anyhow::Result<()> {
    let mut encoder = SFrameEncoder::new(SFrameOptions::new())?;
    let func = encoder.add_function(0x1000, 0x20, info(0x20))?;
    encoder.add_fre(func, sp(8, &[8])?)?;
    let data = encoder.write()?;
    let sframe = SFrame::decode(&data)?;

    assert_eq!(sframe.find_fre(0xFFF), Err(Error::FdeNotFound));
    // The first FRE starts after the PC.
    assert_eq!(sframe.find_fre(0x1004), Err(Error::FreInvalid));
    assert_eq!(sframe.find_fre(0x1008)?.cfa_offset()?, 8);
    assert_eq!(sframe.find_fre(0x1020), Err(Error::FdeInvalid));

    assert_eq!(sframe.funcdesc(1).err(), Some(Error::FdeNotFound));
    assert_eq!(sframe.fre(0, 1), Err(Error::FreNotFound));
    assert_eq!(sframe.fre(1, 0), Err(Error::FdeNotFound));

    // Clear the sorted flag.
    let mut unsorted = data.clone();
    unsorted[3] &= !Flags::FDE_SORTED.bits();
    let sframe = SFrame::decode(&unsorted)?;
    assert_eq!(sframe.find_fre(0x1008), Err(Error::FdeNotSorted));

    let empty = SFrameEncoder::new(SFrameOptions::new())?.write()?;
    let sframe = SFrame::decode(&empty)?;
    assert_eq!(sframe.num_fdes(), 0);
    assert_eq!(sframe.find_fre(0x1000), Err(Error::FdeNotFound));

    Ok(())
}

#[test]
fn decode_errors() -> anyhow::Result<()> {
    let mut encoder = SFrameEncoder::new(SFrameOptions::new())?;
    let func = encoder.add_function(0x1000, 0x20, info(0x20))?;
    encoder.add_fre(func, sp(0, &[8])?)?;
    let data = encoder.write()?;

    assert_eq!(SFrame::decode(&data[..HEADER_SIZE - 1]).err(), Some(Error::BufferInvalid));
    assert_eq!(SFrame::decode(&data[..data.len() - 1]).err(), Some(Error::BufferInvalid));

    let mut bad_magic = data.clone();
    bad_magic[0] ^= 0xFF;
    assert_eq!(SFrame::decode(&bad_magic).err(), Some(Error::BufferInvalid));

    let mut bad_version = data.clone();
    bad_version[2] = 3;
    assert_eq!(SFrame::decode(&bad_version).err(), Some(Error::BufferInvalid));

    // More FDEs than the section has room for.
    for num_fdes in [2, 0x4000_0000, u32::MAX] {
        let mut too_many = data.clone();
        too_many[8..12].copy_from_slice(&num_fdes.to_ne_bytes());
        assert_eq!(SFrame::decode(&too_many).err(), Some(Error::BufferInvalid));
    }

    // Reserved FRE type in the function info byte.
    let mut bad_fde = data.clone();
    bad_fde[HEADER_SIZE + 16] = 0x03;
    assert_eq!(SFrame::decode(&bad_fde).err(), Some(Error::FdeInvalid));

    // A PC-mask FDE with a zero block size.
    let mut zero_rep = data.clone();
    zero_rep[HEADER_SIZE + 16] |= 0x10;
    assert_eq!(SFrame::decode(&zero_rep).err(), Some(Error::FdeInvalid));

    Ok(())
}

#[test]
fn aux_header() -> anyhow::Result<()> {
    let mut encoder = SFrameEncoder::new(SFrameOptions::new())?;
    let func = encoder.add_function(0x1000, 0x20, info(0x20))?;
    encoder.add_fre(func, sp(0, &[8])?)?;
    let data = encoder.write()?;

    let mut with_aux = data[..HEADER_SIZE].to_vec();
    with_aux[7] = 4;
    with_aux.extend_from_slice(&[1, 2, 3, 4]);
    with_aux.extend_from_slice(&data[HEADER_SIZE..]);

    let sframe = SFrame::decode(&with_aux)?;
    assert_eq!(sframe.header_size(), HEADER_SIZE + 4);
    assert_eq!(sframe.aux_header(), &[1, 2, 3, 4]);
    assert_eq!(sframe.find_fre(0x1010)?.cfa_offset()?, 8);

    Ok(())
}
