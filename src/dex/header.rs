/* The header_item that anchors every section */

use adler::adler32_slice;
use log::warn;
use sha1::{Digest, Sha1};

use crate::dex::block::Block;
use crate::dex::error::DexError;
use crate::dex::reader::{BlockReader, ByteSource};
use crate::dex::text::{TextFormat, TextWriter};
use crate::dex::section::SectionRegistry;
use crate::dex::{write_u4, write_x};

pub const DEX_FILE_MAGIC: [u8; 8] = [0x64, 0x65, 0x78, 0x0a, 0x30, 0x33, 0x35, 0x00];
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;

/// Size of the fixed record every version carries.
pub const HEADER_SIZE: usize = 0x70;
/// Version 041 appends the container pair.
pub const CONTAINER_HEADER_SIZE: usize = 0x78;

pub const CHECKSUM_OFFSET: usize = 8;
pub const SIGNATURE_OFFSET: usize = 12;
pub const FILE_SIZE_OFFSET: usize = 32;
const ENDIAN_TAG_OFFSET: usize = 40;

pub const MIN_VERSION: u32 = 35;
pub const MAX_VERSION: u32 = 41;
pub const CONTAINER_VERSION: u32 = 41;

/// Count and start offset of one id table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SectionSpan
{
    pub size: u32,
    pub offset: u32,
}

impl SectionSpan
{
    fn read(reader: &mut BlockReader<'_>) -> Result<SectionSpan, DexError>
    {
        Ok(SectionSpan { size: reader.read_u4()?, offset: reader.read_u4()? })
    }

    fn write(&self, out: &mut Vec<u8>) -> usize
    {
        write_u4(out, self.size) + write_u4(out, self.offset)
    }
}

/// Multi-dex container fields present from version 041.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ContainerInfo
{
    pub container_size: u32,
    pub header_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexHeader
{
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link: SectionSpan,
    pub map_off: u32,
    pub string_ids: SectionSpan,
    pub type_ids: SectionSpan,
    pub proto_ids: SectionSpan,
    pub field_ids: SectionSpan,
    pub method_ids: SectionSpan,
    pub class_defs: SectionSpan,
    pub data: SectionSpan,
    pub container: Option<ContainerInfo>,
    /// Bytes between the end of the known fields and the declared header size.
    pub unknown: Vec<u8>,
}

impl Default for DexHeader
{
    fn default() -> Self
    {
        DexHeader {
            magic: DEX_FILE_MAGIC,
            checksum: 0,
            signature: [0; 20],
            file_size: 0,
            header_size: HEADER_SIZE as u32,
            endian_tag: ENDIAN_CONSTANT,
            link: SectionSpan::default(),
            map_off: 0,
            string_ids: SectionSpan::default(),
            type_ids: SectionSpan::default(),
            proto_ids: SectionSpan::default(),
            field_ids: SectionSpan::default(),
            method_ids: SectionSpan::default(),
            class_defs: SectionSpan::default(),
            data: SectionSpan::default(),
            container: None,
            unknown: Vec::new(),
        }
    }
}

/// Version number encoded in the magic's three ASCII digits, if well formed.
pub fn magic_version(magic: &[u8; 8]) -> Option<u32>
{
    if &magic[..4] != b"dex\n" || magic[7] != 0
    {
        return None;
    }
    let digits = &magic[4..7];
    if !digits.iter().all(u8::is_ascii_digit)
    {
        return None;
    }
    Some(digits.iter().fold(0, |acc, d| acc * 10 + (d - b'0') as u32))
}

/// Adler-32 over everything after the checksum field.
pub fn compute_checksum(file: &[u8]) -> u32
{
    adler32_slice(file.get(SIGNATURE_OFFSET..).unwrap_or(&[]))
}

/// SHA-1 over everything after the signature field.
pub fn compute_signature(file: &[u8]) -> [u8; 20]
{
    let mut hasher = Sha1::new();
    hasher.update(file.get(FILE_SIZE_OFFSET..).unwrap_or(&[]));
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

impl DexHeader
{
    pub fn new(version: u32) -> Self
    {
        let mut header = DexHeader::default();
        header.set_version(version);
        header
    }

    /// Read the header at the reader's position. The endian tag is inspected
    /// first so the remaining fields are read in the file's byte order.
    pub fn read(reader: &mut BlockReader<'_>, strict: bool) -> Result<DexHeader, DexError>
    {
        let start = reader.position();
        let bytes = reader.bytes();
        if bytes.len() < start + HEADER_SIZE
        {
            fail!(TruncatedInput, "header needs 0x{:x} bytes at 0x{:x}, {} available", HEADER_SIZE, start, reader.remaining());
        }

        let magic: [u8; 8] = reader.read_array()?;
        let version = match magic_version(&magic)
        {
            Some(v) => v,
            None => fail!(FormatMismatch, "bad magic {:02x?}", magic),
        };
        if !(MIN_VERSION..=MAX_VERSION).contains(&version)
        {
            if strict
            {
                fail!(FormatMismatch, "unsupported version {:03}", version);
            }
            warn!("Reading dex file with unknown version {:03}", version);
        }

        let tag_at = start + ENDIAN_TAG_OFFSET;
        let tag = u32::from_le_bytes([bytes[tag_at], bytes[tag_at + 1], bytes[tag_at + 2], bytes[tag_at + 3]]);
        match tag
        {
            ENDIAN_CONSTANT => reader.set_big_endian(false),
            REVERSE_ENDIAN_CONSTANT => reader.set_big_endian(true),
            other => fail!(FormatMismatch, "bad endian tag 0x{:08x}", other),
        }

        let mut header = DexHeader {
            magic,
            checksum: reader.read_u4()?,
            signature: reader.read_array()?,
            file_size: reader.read_u4()?,
            header_size: reader.read_u4()?,
            endian_tag: reader.read_u4()?,
            link: SectionSpan::read(reader)?,
            map_off: reader.read_u4()?,
            string_ids: SectionSpan::read(reader)?,
            type_ids: SectionSpan::read(reader)?,
            proto_ids: SectionSpan::read(reader)?,
            field_ids: SectionSpan::read(reader)?,
            method_ids: SectionSpan::read(reader)?,
            class_defs: SectionSpan::read(reader)?,
            data: SectionSpan::read(reader)?,
            container: None,
            unknown: Vec::new(),
        };

        let declared = header.header_size as usize;
        if declared < HEADER_SIZE
        {
            fail!(FormatMismatch, "header size 0x{:x} smaller than 0x{:x}", declared, HEADER_SIZE);
        }
        if version >= CONTAINER_VERSION && declared >= CONTAINER_HEADER_SIZE
        {
            header.container = Some(ContainerInfo { container_size: reader.read_u4()?, header_offset: reader.read_u4()? });
        }
        let known = header.known_len();
        if declared > known
        {
            if strict
            {
                fail!(FormatMismatch, "header declares 0x{:x} bytes, 0x{:x} are known", declared, known);
            }
            warn!("Preserving {} unknown header bytes", declared - known);
            header.unknown = reader.read_x(declared - known)?;
        }
        Ok(header)
    }

    pub fn version(&self) -> Option<u32>
    {
        magic_version(&self.magic)
    }

    pub fn set_version(&mut self, version: u32)
    {
        let digits = format!("{:03}", version.min(999));
        self.magic[4..7].copy_from_slice(digits.as_bytes());
        if version >= CONTAINER_VERSION
        {
            self.container.get_or_insert_with(ContainerInfo::default);
        }
        else
        {
            self.container = None;
        }
        self.refresh();
    }

    fn known_len(&self) -> usize
    {
        if self.container.is_some() { CONTAINER_HEADER_SIZE } else { HEADER_SIZE }
    }

    /// Recompute the checksum of `file` (which starts with this header) and
    /// store it in both. Returns whether the value changed.
    pub fn update_checksum(&mut self, file: &mut [u8]) -> Result<bool, DexError>
    {
        if file.len() < SIGNATURE_OFFSET
        {
            fail!(TruncatedInput, "file of {} bytes has no checksum field", file.len());
        }
        let checksum = compute_checksum(file);
        file[CHECKSUM_OFFSET..SIGNATURE_OFFSET].copy_from_slice(&checksum.to_le_bytes());
        let changed = checksum != self.checksum;
        self.checksum = checksum;
        Ok(changed)
    }

    /// Recompute the SHA-1 signature of `file` and store it in both. The
    /// checksum covers the signature, so update it afterwards.
    pub fn update_signature(&mut self, file: &mut [u8]) -> Result<bool, DexError>
    {
        if file.len() < FILE_SIZE_OFFSET
        {
            fail!(TruncatedInput, "file of {} bytes has no signature field", file.len());
        }
        let signature = compute_signature(file);
        file[SIGNATURE_OFFSET..FILE_SIZE_OFFSET].copy_from_slice(&signature);
        let changed = signature != self.signature;
        self.signature = signature;
        Ok(changed)
    }

    pub fn verify_checksum(&self, file: &[u8]) -> bool
    {
        compute_checksum(file) == self.checksum
    }

    pub fn verify_signature(&self, file: &[u8]) -> bool
    {
        compute_signature(file) == self.signature
    }
}

impl Block for DexHeader
{
    fn encoded_len(&self) -> usize
    {
        self.known_len() + self.unknown.len()
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_x(out, &self.magic);
        c += write_u4(out, self.checksum);
        c += write_x(out, &self.signature);
        c += write_u4(out, self.file_size);
        c += write_u4(out, self.header_size);
        c += write_u4(out, ENDIAN_CONSTANT);
        c += self.link.write(out);
        c += write_u4(out, self.map_off);
        c += self.string_ids.write(out);
        c += self.type_ids.write(out);
        c += self.proto_ids.write(out);
        c += self.field_ids.write(out);
        c += self.method_ids.write(out);
        c += self.class_defs.write(out);
        c += self.data.write(out);
        if let Some(container) = &self.container
        {
            c += write_u4(out, container.container_size);
            c += write_u4(out, container.header_offset);
        }
        c += write_x(out, &self.unknown);
        Ok(c)
    }

    fn refresh(&mut self)
    {
        self.header_size = self.encoded_len() as u32;
        self.endian_tag = ENDIAN_CONSTANT;
    }
}

impl TextFormat for DexHeader
{
    fn append(&self, w: &mut TextWriter, _sections: &SectionRegistry)
    {
        let version = self.version().map_or_else(|| "???".to_string(), |v| format!("{:03}", v));
        w.line(format!(".header version {}", version));
        w.indented(|w| {
            w.line(format!("checksum 0x{:08x}", self.checksum));
            let sig: String = self.signature.iter().map(|b| format!("{:02x}", b)).collect();
            w.line(format!("signature {}", sig));
            w.line(format!("file_size 0x{:x}", self.file_size));
            w.line(format!("header_size 0x{:x}", self.header_size));
            w.line(format!("map_off 0x{:x}", self.map_off));
            for (name, span) in [
                ("string_ids", self.string_ids),
                ("type_ids", self.type_ids),
                ("proto_ids", self.proto_ids),
                ("field_ids", self.field_ids),
                ("method_ids", self.method_ids),
                ("class_defs", self.class_defs),
                ("data", self.data),
            ]
            {
                w.line(format!("{} {} @ 0x{:x}", name, span.size, span.offset));
            }
            if let Some(c) = &self.container
            {
                w.line(format!("container_size 0x{:x} header_offset 0x{:x}", c.container_size, c.header_offset));
            }
            if !self.unknown.is_empty()
            {
                w.line(format!("unknown {} bytes", self.unknown.len()));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::DexErrorKind;

    fn image(header: &DexHeader, body: &[u8]) -> Vec<u8> {
        let mut out = vec![];
        header.write(&mut out).unwrap();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn header_round_trip() {
        let mut h = DexHeader::new(39);
        h.string_ids = SectionSpan { size: 3, offset: 0x70 };
        h.map_off = 0x1234;
        let bytes = image(&h, &[]);
        assert_eq!(bytes.len(), HEADER_SIZE);
        let mut r = BlockReader::new(&bytes);
        let back = DexHeader::read(&mut r, true).unwrap();
        assert_eq!(back, h);
        assert_eq!(back.version(), Some(39));
        assert_eq!(r.position(), HEADER_SIZE);
    }

    #[test]
    fn container_version_extends_header() {
        let h = DexHeader::new(41);
        assert_eq!(h.header_size as usize, CONTAINER_HEADER_SIZE);
        let bytes = image(&h, &[]);
        let back = DexHeader::read(&mut BlockReader::new(&bytes), false).unwrap();
        assert_eq!(back.container, Some(ContainerInfo::default()));
    }

    #[test]
    fn surplus_bytes_are_kept_unless_strict() {
        let mut h = DexHeader::new(35);
        h.unknown = vec![0xAA, 0xBB, 0xCC, 0xDD];
        h.refresh();
        assert_eq!(h.header_size, 0x74);
        let bytes = image(&h, &[]);

        let back = DexHeader::read(&mut BlockReader::new(&bytes), false).unwrap();
        assert_eq!(back.unknown, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(back.encoded_len(), 0x74);

        let e = DexHeader::read(&mut BlockReader::new(&bytes), true).unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::FormatMismatch);
    }

    #[test]
    fn bad_magic_and_short_input() {
        let mut bytes = image(&DexHeader::new(35), &[]);
        bytes[0] = b'x';
        let e = DexHeader::read(&mut BlockReader::new(&bytes), false).unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::FormatMismatch);

        let e = DexHeader::read(&mut BlockReader::new(&bytes[..0x40]), false).unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::TruncatedInput);
    }

    #[test]
    fn unknown_version_is_lenient_by_default() {
        let bytes = image(&DexHeader::new(99), &[]);
        assert!(DexHeader::read(&mut BlockReader::new(&bytes), false).is_ok());
        assert!(DexHeader::read(&mut BlockReader::new(&bytes), true).is_err());
    }

    #[test]
    fn reverse_endian_header_is_read() {
        let mut h = DexHeader::new(35);
        h.file_size = 0x01020304;
        let mut bytes = image(&h, &[]);
        // rewrite every u4 after the signature in big-endian order
        for at in (FILE_SIZE_OFFSET..HEADER_SIZE).step_by(4) {
            bytes[at..at + 4].reverse();
        }
        let back = DexHeader::read(&mut BlockReader::new(&bytes), false).unwrap();
        assert_eq!(back.file_size, 0x01020304);
        assert_eq!(back.header_size as usize, HEADER_SIZE);
    }

    #[test]
    fn checksum_tracks_trailing_bytes() {
        let mut h = DexHeader::new(35);
        let mut bytes = image(&h, &[1, 2, 3, 4]);
        h.update_signature(&mut bytes).unwrap();
        h.update_checksum(&mut bytes).unwrap();
        assert!(!h.update_checksum(&mut bytes).unwrap());
        assert!(h.verify_checksum(&bytes));

        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(h.update_checksum(&mut bytes).unwrap());
        assert!(!h.update_checksum(&mut bytes).unwrap());
        assert!(!h.verify_signature(&bytes));
        assert_eq!(u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), h.checksum);
    }
}
