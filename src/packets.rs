//! Bit-exact ROHC packet formats shared by the compressed profiles.
//!
//! Build and parse routines for the UO-0, UO-1 family, UOR-2 family and
//! extensions 0-3, plus the Add-CID and large-CID helpers. Field layouts
//! (`S` = SN bits, `T` = TS bits, `I` = IP-ID bits, `M` = marker, `X` =
//! extension flag, `C` = CRC):
//!
//! | Type      | Octets                              |
//! |-----------|-------------------------------------|
//! | UO-0      | `0SSSSCCC`                          |
//! | UO-1      | `10IIIIII` `SSSSSCCC`               |
//! | UO-1-RTP  | `10TTTTTT` `MSSSSCCC`               |
//! | UO-1-ID   | `100IIIII` `XMSSSCCC`               |
//! | UO-1-TS   | `101TTTTT` `XMSSSCCC`               |
//! | UOR-2     | `110SSSSS` `XCCCCCCC`               |
//! | UOR-2-RTP | `110SSSSS` `TTTTTTTM` `XCCCCCCC`    |
//!
//! UO-1-ID and UO-1-TS share the `10` prefix with UO-1-RTP; the third bit is
//! the T flag and is only meaningful on flows whose IP-ID is compressible,
//! which both endpoints know from the context. UO-1-RTP is used on flows
//! without a compressible IP-ID, UO-1-ID/UO-1-TS on flows with one.

use crate::bitstream::{BitReader, BitWriter};
use crate::constants::{ADD_CID_PREFIX_VALUE, SMALL_CID_MASK};
use crate::crc::CrcCalculators;
use crate::error::{
    CrcType, Field, ParseContext, RohcBuildingError, RohcParsingError,
};
use crate::sdvl::{sdvl_decode, sdvl_encode};
use crate::types::ContextId;

/// UO-0 packet: 4 SN LSBs and a CRC-3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Uo0 {
    pub sn_lsb: u8,
    pub crc3: u8,
}

/// UO-1 packet (non-RTP profiles): 6 IP-ID LSBs, 5 SN LSBs, CRC-3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Uo1 {
    pub ip_id_lsb: u8,
    pub sn_lsb: u8,
    pub crc3: u8,
}

/// UO-1-RTP packet: 6 TS LSBs (scaled when the stride is established),
/// marker, 4 SN LSBs, CRC-3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Uo1Rtp {
    pub ts_lsb: u8,
    pub marker: bool,
    pub sn_lsb: u8,
    pub crc3: u8,
}

/// UO-1-ID packet: 5 IP-ID LSBs, marker, 3 SN LSBs, CRC-3, optional
/// extension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uo1Id {
    pub ip_id_lsb: u8,
    pub marker: bool,
    pub sn_lsb: u8,
    pub crc3: u8,
    pub extension: Option<Extension>,
}

/// UO-1-TS packet: 5 TS LSBs, marker, 3 SN LSBs, CRC-3, optional extension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uo1Ts {
    pub ts_lsb: u8,
    pub marker: bool,
    pub sn_lsb: u8,
    pub crc3: u8,
    pub extension: Option<Extension>,
}

/// UOR-2 packet (non-RTP profiles): 5 SN LSBs, CRC-7, optional extension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uor2 {
    pub sn_lsb: u8,
    pub crc7: u8,
    pub extension: Option<Extension>,
}

/// UOR-2-RTP packet: 5 SN LSBs, 7 TS LSBs, marker, CRC-7, optional
/// extension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uor2Rtp {
    pub sn_lsb: u8,
    pub ts_lsb: u8,
    pub marker: bool,
    pub crc7: u8,
    pub extension: Option<Extension>,
}

/// Extensions 0-3 carrying additional SN/TS/IP-ID bits and, for extension
/// 3, explicit field updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    /// `00SSSTTT`: 3 SN bits and 3 TS-or-IP-ID bits.
    Ext0 { sn: u8, t: u8 },
    /// `01SSSTTT` + 1 octet: 3 SN bits and 11 T bits.
    Ext1 { sn: u8, t: u16 },
    /// `10SSSTTT` + 2 octets: 3 SN bits and 19 T bits.
    Ext2 { sn: u8, t: u32 },
    /// Flag-driven field updates.
    Ext3(Ext3),
}

impl Extension {
    /// Additional SN bits this extension contributes.
    pub fn sn_bits(&self) -> (u8, u32) {
        match self {
            Extension::Ext0 { sn, .. } | Extension::Ext1 { sn, .. } | Extension::Ext2 { sn, .. } => {
                (3, *sn as u32)
            }
            Extension::Ext3(e) => match e.sn8 {
                Some(sn) => (8, sn as u32),
                None => (0, 0),
            },
        }
    }

    /// Additional T (TS or IP-ID) bits this extension contributes.
    pub fn t_bits(&self) -> (u8, u32) {
        match self {
            Extension::Ext0 { t, .. } => (3, *t as u32),
            Extension::Ext1 { t, .. } => (11, *t as u32),
            Extension::Ext2 { t, .. } => (19, *t),
            Extension::Ext3(_) => (0, 0),
        }
    }
}

/// Extension 3: two flag octets guarded by a CRC-2, then the flagged fields.
///
/// Octet 0: `11` S R-TS Tsc I ip rtp. Octet 1: M ip2 stride ttl+tos? -- see
/// the bit assignments in `serialize_extension`. `ip2` signals inner-IP
/// updates, which this implementation never emits and rejects on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ext3 {
    /// Full low byte of the SN (S flag).
    pub sn8: Option<u8>,
    /// SDVL-coded timestamp (R-TS flag), scaled when `ts_is_scaled`.
    pub ts: Option<u32>,
    /// Tsc flag: `ts` is TS_SCALED rather than the raw timestamp.
    pub ts_is_scaled: bool,
    /// Full IP-ID (I flag).
    pub ip_id: Option<u16>,
    /// Outer IP TTL and traffic octet updates (ip flag).
    pub ttl_tos: Option<(u8, u8)>,
    /// RTP payload type update (rtp flag).
    pub payload_type: Option<u8>,
    /// SDVL-coded TS_STRIDE declaration.
    pub ts_stride: Option<u32>,
    /// RTP marker value.
    pub marker: bool,
    /// IPv4 don't-fragment value.
    pub df: bool,
}

fn check_fits(value: u32, bits: u8, field: Field) -> Result<(), RohcBuildingError> {
    if bits < 32 && value >= (1u32 << bits) {
        return Err(RohcBuildingError::InvalidFieldValue {
            field,
            value,
            max_bits: bits,
        });
    }
    Ok(())
}

fn too_small(needed: usize, available: usize) -> RohcBuildingError {
    RohcBuildingError::BufferTooSmall {
        needed,
        available,
        context: ParseContext::UoPacket,
    }
}

fn short_input(needed: usize, got: usize) -> RohcParsingError {
    RohcParsingError::NotEnoughData {
        needed,
        got,
        context: ParseContext::UoPacket,
    }
}

/// Serializes a UO-0 packet.
pub fn serialize_uo0(packet: &Uo0, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    check_fits(packet.sn_lsb as u32, 4, Field::SnLsb)?;
    check_fits(packet.crc3 as u32, 3, Field::Crc)?;
    if out.is_empty() {
        return Err(too_small(1, 0));
    }
    out[0] = (packet.sn_lsb << 3) | packet.crc3;
    Ok(1)
}

/// Parses a UO-0 packet, returning it and the bytes consumed.
pub fn parse_uo0(data: &[u8]) -> Result<(Uo0, usize), RohcParsingError> {
    let b = *data.first().ok_or_else(|| short_input(1, 0))?;
    debug_assert_eq!(b & 0x80, 0, "UO-0 discriminator check failed");
    Ok((
        Uo0 {
            sn_lsb: (b >> 3) & 0x0F,
            crc3: b & 0x07,
        },
        1,
    ))
}

/// Serializes a UO-1 packet (non-RTP).
pub fn serialize_uo1(packet: &Uo1, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    check_fits(packet.ip_id_lsb as u32, 6, Field::IpIdLsb)?;
    check_fits(packet.sn_lsb as u32, 5, Field::SnLsb)?;
    check_fits(packet.crc3 as u32, 3, Field::Crc)?;
    if out.len() < 2 {
        return Err(too_small(2, out.len()));
    }
    out[0] = 0x80 | packet.ip_id_lsb;
    out[1] = (packet.sn_lsb << 3) | packet.crc3;
    Ok(2)
}

/// Parses a UO-1 packet (non-RTP).
pub fn parse_uo1(data: &[u8]) -> Result<(Uo1, usize), RohcParsingError> {
    if data.len() < 2 {
        return Err(short_input(2, data.len()));
    }
    debug_assert_eq!(data[0] & 0xC0, 0x80, "UO-1 discriminator check failed");
    Ok((
        Uo1 {
            ip_id_lsb: data[0] & 0x3F,
            sn_lsb: (data[1] >> 3) & 0x1F,
            crc3: data[1] & 0x07,
        },
        2,
    ))
}

/// Serializes a UO-1-RTP packet.
pub fn serialize_uo1_rtp(packet: &Uo1Rtp, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    check_fits(packet.ts_lsb as u32, 6, Field::TsLsb)?;
    check_fits(packet.sn_lsb as u32, 4, Field::SnLsb)?;
    check_fits(packet.crc3 as u32, 3, Field::Crc)?;
    if out.len() < 2 {
        return Err(too_small(2, out.len()));
    }
    out[0] = 0x80 | packet.ts_lsb;
    out[1] = ((packet.marker as u8) << 7) | (packet.sn_lsb << 3) | packet.crc3;
    Ok(2)
}

/// Parses a UO-1-RTP packet.
pub fn parse_uo1_rtp(data: &[u8]) -> Result<(Uo1Rtp, usize), RohcParsingError> {
    if data.len() < 2 {
        return Err(short_input(2, data.len()));
    }
    Ok((
        Uo1Rtp {
            ts_lsb: data[0] & 0x3F,
            marker: data[1] & 0x80 != 0,
            sn_lsb: (data[1] >> 3) & 0x0F,
            crc3: data[1] & 0x07,
        },
        2,
    ))
}

fn serialize_uo1_idts(
    first_octet: u8,
    marker: bool,
    sn_lsb: u8,
    crc3: u8,
    extension: Option<&Extension>,
    out: &mut [u8],
) -> Result<usize, RohcBuildingError> {
    check_fits(sn_lsb as u32, 3, Field::SnLsb)?;
    check_fits(crc3 as u32, 3, Field::Crc)?;
    if out.len() < 2 {
        return Err(too_small(2, out.len()));
    }
    out[0] = first_octet;
    out[1] = (((extension.is_some()) as u8) << 7)
        | ((marker as u8) << 6)
        | (sn_lsb << 3)
        | crc3;
    let mut len = 2;
    if let Some(ext) = extension {
        len += serialize_extension(ext, &mut out[2..])?;
    }
    Ok(len)
}

/// Serializes a UO-1-ID packet (`100IIIII`).
pub fn serialize_uo1_id(packet: &Uo1Id, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    check_fits(packet.ip_id_lsb as u32, 5, Field::IpIdLsb)?;
    serialize_uo1_idts(
        0x80 | packet.ip_id_lsb,
        packet.marker,
        packet.sn_lsb,
        packet.crc3,
        packet.extension.as_ref(),
        out,
    )
}

/// Serializes a UO-1-TS packet (`101TTTTT`).
pub fn serialize_uo1_ts(packet: &Uo1Ts, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    check_fits(packet.ts_lsb as u32, 5, Field::TsLsb)?;
    serialize_uo1_idts(
        0xA0 | packet.ts_lsb,
        packet.marker,
        packet.sn_lsb,
        packet.crc3,
        packet.extension.as_ref(),
        out,
    )
}

fn parse_uo1_idts(data: &[u8]) -> Result<(u8, bool, u8, u8, Option<Extension>, usize), RohcParsingError> {
    if data.len() < 2 {
        return Err(short_input(2, data.len()));
    }
    let field5 = data[0] & 0x1F;
    let has_ext = data[1] & 0x80 != 0;
    let marker = data[1] & 0x40 != 0;
    let sn_lsb = (data[1] >> 3) & 0x07;
    let crc3 = data[1] & 0x07;
    let mut consumed = 2;
    let extension = if has_ext {
        let (ext, ext_len) = parse_extension(&data[2..])?;
        consumed += ext_len;
        Some(ext)
    } else {
        None
    };
    Ok((field5, marker, sn_lsb, crc3, extension, consumed))
}

/// Parses a UO-1-ID packet.
pub fn parse_uo1_id(data: &[u8]) -> Result<(Uo1Id, usize), RohcParsingError> {
    let (ip_id_lsb, marker, sn_lsb, crc3, extension, consumed) = parse_uo1_idts(data)?;
    Ok((
        Uo1Id {
            ip_id_lsb,
            marker,
            sn_lsb,
            crc3,
            extension,
        },
        consumed,
    ))
}

/// Parses a UO-1-TS packet.
pub fn parse_uo1_ts(data: &[u8]) -> Result<(Uo1Ts, usize), RohcParsingError> {
    let (ts_lsb, marker, sn_lsb, crc3, extension, consumed) = parse_uo1_idts(data)?;
    Ok((
        Uo1Ts {
            ts_lsb,
            marker,
            sn_lsb,
            crc3,
            extension,
        },
        consumed,
    ))
}

/// Serializes a UOR-2 packet (non-RTP).
pub fn serialize_uor2(packet: &Uor2, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    check_fits(packet.sn_lsb as u32, 5, Field::SnLsb)?;
    check_fits(packet.crc7 as u32, 7, Field::Crc)?;
    if out.len() < 2 {
        return Err(too_small(2, out.len()));
    }
    out[0] = 0xC0 | packet.sn_lsb;
    out[1] = ((packet.extension.is_some() as u8) << 7) | packet.crc7;
    let mut len = 2;
    if let Some(ext) = &packet.extension {
        len += serialize_extension(ext, &mut out[2..])?;
    }
    Ok(len)
}

/// Parses a UOR-2 packet (non-RTP).
pub fn parse_uor2(data: &[u8]) -> Result<(Uor2, usize), RohcParsingError> {
    if data.len() < 2 {
        return Err(short_input(2, data.len()));
    }
    debug_assert_eq!(data[0] & 0xE0, 0xC0, "UOR-2 discriminator check failed");
    let sn_lsb = data[0] & 0x1F;
    let has_ext = data[1] & 0x80 != 0;
    let crc7 = data[1] & 0x7F;
    let mut consumed = 2;
    let extension = if has_ext {
        let (ext, ext_len) = parse_extension(&data[2..])?;
        consumed += ext_len;
        Some(ext)
    } else {
        None
    };
    Ok((
        Uor2 {
            sn_lsb,
            crc7,
            extension,
        },
        consumed,
    ))
}

/// Serializes a UOR-2-RTP packet.
pub fn serialize_uor2_rtp(packet: &Uor2Rtp, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    check_fits(packet.sn_lsb as u32, 5, Field::SnLsb)?;
    check_fits(packet.ts_lsb as u32, 7, Field::TsLsb)?;
    check_fits(packet.crc7 as u32, 7, Field::Crc)?;
    let mut writer = BitWriter::new(out);
    writer.write_bits(0b110, 3)?;
    writer.write_bits(packet.sn_lsb as u32, 5)?;
    writer.write_bits(packet.ts_lsb as u32, 7)?;
    writer.write_bits(packet.marker as u32, 1)?;
    writer.write_bits(packet.extension.is_some() as u32, 1)?;
    writer.write_bits(packet.crc7 as u32, 7)?;
    let mut len = writer.bytes_written();
    if let Some(ext) = &packet.extension {
        len += serialize_extension(ext, &mut out[len..])?;
    }
    Ok(len)
}

/// Parses a UOR-2-RTP packet.
pub fn parse_uor2_rtp(data: &[u8]) -> Result<(Uor2Rtp, usize), RohcParsingError> {
    if data.len() < 3 {
        return Err(short_input(3, data.len()));
    }
    let mut reader = BitReader::new(data);
    let disc = reader.read_bits(3)?;
    debug_assert_eq!(disc, 0b110, "UOR-2-RTP discriminator check failed");
    let sn_lsb = reader.read_bits(5)? as u8;
    let ts_lsb = reader.read_bits(7)? as u8;
    let marker = reader.read_bits(1)? != 0;
    let has_ext = reader.read_bits(1)? != 0;
    let crc7 = reader.read_bits(7)? as u8;
    let mut consumed = 3;
    let extension = if has_ext {
        let (ext, ext_len) = parse_extension(&data[3..])?;
        consumed += ext_len;
        Some(ext)
    } else {
        None
    };
    Ok((
        Uor2Rtp {
            sn_lsb,
            ts_lsb,
            marker,
            crc7,
            extension,
        },
        consumed,
    ))
}

/// Serializes an extension, returning the bytes written.
pub fn serialize_extension(ext: &Extension, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    match ext {
        Extension::Ext0 { sn, t } => {
            check_fits(*sn as u32, 3, Field::SnLsb)?;
            check_fits(*t as u32, 3, Field::TsLsb)?;
            if out.is_empty() {
                return Err(too_small(1, 0));
            }
            out[0] = (sn << 3) | t;
            Ok(1)
        }
        Extension::Ext1 { sn, t } => {
            check_fits(*sn as u32, 3, Field::SnLsb)?;
            check_fits(*t as u32, 11, Field::TsLsb)?;
            if out.len() < 2 {
                return Err(too_small(2, out.len()));
            }
            out[0] = 0x40 | (sn << 3) | ((t >> 8) as u8 & 0x07);
            out[1] = *t as u8;
            Ok(2)
        }
        Extension::Ext2 { sn, t } => {
            check_fits(*sn as u32, 3, Field::SnLsb)?;
            check_fits(*t, 19, Field::TsLsb)?;
            if out.len() < 3 {
                return Err(too_small(3, out.len()));
            }
            out[0] = 0x80 | (sn << 3) | ((t >> 16) as u8 & 0x07);
            out[1] = (t >> 8) as u8;
            out[2] = *t as u8;
            Ok(3)
        }
        Extension::Ext3(e) => serialize_ext3(e, out),
    }
}

fn serialize_ext3(e: &Ext3, out: &mut [u8]) -> Result<usize, RohcBuildingError> {
    if out.len() < 2 {
        return Err(too_small(2, out.len()));
    }
    out[0] = 0xC0
        | ((e.sn8.is_some() as u8) << 5)
        | ((e.ts.is_some() as u8) << 4)
        | ((e.ts_is_scaled as u8) << 3)
        | ((e.ip_id.is_some() as u8) << 2)
        | ((e.ttl_tos.is_some() as u8) << 1)
        | (e.payload_type.is_some() as u8);
    // Octet 1: M ip2 stride - - df crc2(2). ip2 is never emitted.
    out[1] = ((e.marker as u8) << 7)
        | ((e.ts_stride.is_some() as u8) << 5)
        | ((e.df as u8) << 2);
    let crc_calc = CrcCalculators::new();
    let crc2 = crc_calc.crc2(&[out[0], out[1] & !0x03]);
    out[1] |= crc2 & 0x03;

    let mut at = 2;
    let mut need = |n: usize, at: usize, out_len: usize| -> Result<(), RohcBuildingError> {
        if out_len < at + n {
            Err(too_small(at + n, out_len))
        } else {
            Ok(())
        }
    };
    if let Some(sn8) = e.sn8 {
        need(1, at, out.len())?;
        out[at] = sn8;
        at += 1;
    }
    if let Some(ts) = e.ts {
        at += sdvl_encode(ts, &mut out[at..])?;
    }
    if let Some(ip_id) = e.ip_id {
        need(2, at, out.len())?;
        out[at..at + 2].copy_from_slice(&ip_id.to_be_bytes());
        at += 2;
    }
    if let Some((ttl, tos)) = e.ttl_tos {
        need(2, at, out.len())?;
        out[at] = ttl;
        out[at + 1] = tos;
        at += 2;
    }
    if let Some(pt) = e.payload_type {
        need(1, at, out.len())?;
        out[at] = pt & 0x7F;
        at += 1;
    }
    if let Some(stride) = e.ts_stride {
        at += sdvl_encode(stride, &mut out[at..])?;
    }
    Ok(at)
}

/// Parses an extension, returning it and the bytes consumed.
pub fn parse_extension(data: &[u8]) -> Result<(Extension, usize), RohcParsingError> {
    let b0 = *data.first().ok_or(RohcParsingError::NotEnoughData {
        needed: 1,
        got: 0,
        context: ParseContext::Extension,
    })?;
    match b0 >> 6 {
        0b00 => Ok((
            Extension::Ext0 {
                sn: (b0 >> 3) & 0x07,
                t: b0 & 0x07,
            },
            1,
        )),
        0b01 => {
            if data.len() < 2 {
                return Err(RohcParsingError::NotEnoughData {
                    needed: 2,
                    got: data.len(),
                    context: ParseContext::Extension,
                });
            }
            Ok((
                Extension::Ext1 {
                    sn: (b0 >> 3) & 0x07,
                    t: (((b0 & 0x07) as u16) << 8) | data[1] as u16,
                },
                2,
            ))
        }
        0b10 => {
            if data.len() < 3 {
                return Err(RohcParsingError::NotEnoughData {
                    needed: 3,
                    got: data.len(),
                    context: ParseContext::Extension,
                });
            }
            Ok((
                Extension::Ext2 {
                    sn: (b0 >> 3) & 0x07,
                    t: (((b0 & 0x07) as u32) << 16)
                        | ((data[1] as u32) << 8)
                        | data[2] as u32,
                },
                3,
            ))
        }
        _ => parse_ext3(data),
    }
}

fn parse_ext3(data: &[u8]) -> Result<(Extension, usize), RohcParsingError> {
    if data.len() < 2 {
        return Err(RohcParsingError::NotEnoughData {
            needed: 2,
            got: data.len(),
            context: ParseContext::Extension,
        });
    }
    let b0 = data[0];
    let b1 = data[1];
    let crc_calc = CrcCalculators::new();
    let expected = b1 & 0x03;
    let calculated = crc_calc.crc2(&[b0, b1 & !0x03]);
    if expected != calculated {
        return Err(RohcParsingError::CrcMismatch {
            expected,
            calculated,
            crc_type: CrcType::Crc2Extension,
        });
    }
    if b1 & 0x40 != 0 {
        return Err(RohcParsingError::ProfileSpecific {
            profile_id: 0,
            description: "inner IP header updates (ip2) are not supported",
        });
    }

    let mut e = Ext3 {
        ts_is_scaled: b0 & 0x08 != 0,
        marker: b1 & 0x80 != 0,
        df: b1 & 0x04 != 0,
        ..Ext3::default()
    };
    let mut at = 2;
    let mut take = |n: usize, at: &mut usize| -> Result<usize, RohcParsingError> {
        if data.len() < *at + n {
            return Err(RohcParsingError::NotEnoughData {
                needed: *at + n,
                got: data.len(),
                context: ParseContext::Extension,
            });
        }
        let start = *at;
        *at += n;
        Ok(start)
    };
    if b0 & 0x20 != 0 {
        let i = take(1, &mut at)?;
        e.sn8 = Some(data[i]);
    }
    if b0 & 0x10 != 0 {
        let (ts, len) = sdvl_decode(&data[at..])?;
        e.ts = Some(ts);
        at += len;
    }
    if b0 & 0x04 != 0 {
        let i = take(2, &mut at)?;
        e.ip_id = Some(u16::from_be_bytes([data[i], data[i + 1]]));
    }
    if b0 & 0x02 != 0 {
        let i = take(2, &mut at)?;
        e.ttl_tos = Some((data[i], data[i + 1]));
    }
    if b0 & 0x01 != 0 {
        let i = take(1, &mut at)?;
        e.payload_type = Some(data[i] & 0x7F);
    }
    if b1 & 0x20 != 0 {
        let (stride, len) = sdvl_decode(&data[at..])?;
        e.ts_stride = Some(stride);
        at += len;
    }
    Ok((Extension::Ext3(e), at))
}

/// Builds the Add-CID octet for a small CID in `[1, 15]`.
pub fn add_cid_octet(cid: ContextId) -> u8 {
    debug_assert!(cid.value() >= 1 && cid <= ContextId::MAX_SMALL_CID);
    ADD_CID_PREFIX_VALUE | (cid.value() as u8 & SMALL_CID_MASK)
}

/// Inserts an SDVL-coded large CID after the first octet of a core packet
/// already present in `buf[..len]`, returning the new length.
///
/// Large-CID packets place the CID between the packet type octet and the
/// profile-specific content; the shift is done in place.
pub fn insert_large_cid(
    buf: &mut [u8],
    len: usize,
    cid: ContextId,
) -> Result<usize, RohcBuildingError> {
    let mut cid_bytes = [0u8; 4];
    let cid_len = sdvl_encode(cid.value() as u32, &mut cid_bytes)?;
    if buf.len() < len + cid_len {
        return Err(RohcBuildingError::BufferTooSmall {
            needed: len + cid_len,
            available: buf.len(),
            context: ParseContext::CidParsing,
        });
    }
    buf.copy_within(1..len, 1 + cid_len);
    buf[1..1 + cid_len].copy_from_slice(&cid_bytes[..cid_len]);
    Ok(len + cid_len)
}
