/* debug_info_item: line table and local variable program */

use crate::dex::block::{Block, ReadBlock};
use crate::dex::error::DexError;
use crate::dex::ids::{DexString, TypeId};
use crate::dex::leb::{sleb128_len, uleb128_len};
use crate::dex::reader::DexReader;
use crate::dex::reference::{IdRef, RefSlot, ReferenceHolder, UsedId};
use crate::dex::section::{SectionRegistry, UsageMarker};
use crate::dex::text::{string_literal, type_name, TextFormat, TextWriter};
use crate::dex::{write_sleb128, write_u1, write_uleb128, write_uleb128p1};

const DBG_END_SEQUENCE: u8 = 0x00;
const DBG_ADVANCE_PC: u8 = 0x01;
const DBG_ADVANCE_LINE: u8 = 0x02;
const DBG_START_LOCAL: u8 = 0x03;
const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
const DBG_END_LOCAL: u8 = 0x05;
const DBG_RESTART_LOCAL: u8 = 0x06;
const DBG_SET_PROLOGUE_END: u8 = 0x07;
const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
const DBG_SET_FILE: u8 = 0x09;
const DBG_FIRST_SPECIAL: u8 = 0x0a;
const DBG_LINE_BASE: i32 = -4;
const DBG_LINE_RANGE: i32 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DebugOp
{
    AdvancePc(u32),
    AdvanceLine(i32),
    StartLocal { register: u32, name: IdRef<DexString>, local_type: IdRef<TypeId> },
    StartLocalExtended { register: u32, name: IdRef<DexString>, local_type: IdRef<TypeId>, signature: IdRef<DexString> },
    EndLocal(u32),
    RestartLocal(u32),
    PrologueEnd,
    EpilogueBegin,
    SetFile(IdRef<DexString>),
    /// Advances address and line together and emits a position entry.
    Special(u8),
}

fn p1_len<T>(r: &IdRef<T>) -> usize
{
    uleb128_len(r.p1().wrapping_add(1) as u32)
}

impl DebugOp
{
    fn read(opcode: u8, reader: &mut DexReader<'_>) -> Result<DebugOp, DexError>
    {
        let usage = UsageMarker::DEBUG;
        Ok(match opcode
        {
            DBG_ADVANCE_PC => DebugOp::AdvancePc(reader.read_uleb128()?),
            DBG_ADVANCE_LINE => DebugOp::AdvanceLine(reader.read_sleb128()?),
            DBG_START_LOCAL => DebugOp::StartLocal {
                register: reader.read_uleb128()?,
                name: IdRef::from_p1(reader.read_uleb128p1()?, usage),
                local_type: IdRef::from_p1(reader.read_uleb128p1()?, usage),
            },
            DBG_START_LOCAL_EXTENDED => DebugOp::StartLocalExtended {
                register: reader.read_uleb128()?,
                name: IdRef::from_p1(reader.read_uleb128p1()?, usage),
                local_type: IdRef::from_p1(reader.read_uleb128p1()?, usage),
                signature: IdRef::from_p1(reader.read_uleb128p1()?, usage),
            },
            DBG_END_LOCAL => DebugOp::EndLocal(reader.read_uleb128()?),
            DBG_RESTART_LOCAL => DebugOp::RestartLocal(reader.read_uleb128()?),
            DBG_SET_PROLOGUE_END => DebugOp::PrologueEnd,
            DBG_SET_EPILOGUE_BEGIN => DebugOp::EpilogueBegin,
            DBG_SET_FILE => DebugOp::SetFile(IdRef::from_p1(reader.read_uleb128p1()?, usage)),
            special => DebugOp::Special(special),
        })
    }

    fn encoded_len(&self) -> usize
    {
        1 + match self
        {
            DebugOp::AdvancePc(d) => uleb128_len(*d),
            DebugOp::AdvanceLine(d) => sleb128_len(*d),
            DebugOp::StartLocal { register, name, local_type } => uleb128_len(*register) + p1_len(name) + p1_len(local_type),
            DebugOp::StartLocalExtended { register, name, local_type, signature } =>
            {
                uleb128_len(*register) + p1_len(name) + p1_len(local_type) + p1_len(signature)
            }
            DebugOp::EndLocal(r) | DebugOp::RestartLocal(r) => uleb128_len(*r),
            DebugOp::SetFile(name) => p1_len(name),
            DebugOp::PrologueEnd | DebugOp::EpilogueBegin | DebugOp::Special(_) => 0,
        }
    }

    fn write(&self, out: &mut Vec<u8>) -> usize
    {
        match self
        {
            DebugOp::AdvancePc(d) => write_u1(out, DBG_ADVANCE_PC) + write_uleb128(out, *d),
            DebugOp::AdvanceLine(d) => write_u1(out, DBG_ADVANCE_LINE) + write_sleb128(out, *d),
            DebugOp::StartLocal { register, name, local_type } =>
            {
                write_u1(out, DBG_START_LOCAL)
                    + write_uleb128(out, *register)
                    + write_uleb128p1(out, name.p1())
                    + write_uleb128p1(out, local_type.p1())
            }
            DebugOp::StartLocalExtended { register, name, local_type, signature } =>
            {
                write_u1(out, DBG_START_LOCAL_EXTENDED)
                    + write_uleb128(out, *register)
                    + write_uleb128p1(out, name.p1())
                    + write_uleb128p1(out, local_type.p1())
                    + write_uleb128p1(out, signature.p1())
            }
            DebugOp::EndLocal(r) => write_u1(out, DBG_END_LOCAL) + write_uleb128(out, *r),
            DebugOp::RestartLocal(r) => write_u1(out, DBG_RESTART_LOCAL) + write_uleb128(out, *r),
            DebugOp::PrologueEnd => write_u1(out, DBG_SET_PROLOGUE_END),
            DebugOp::EpilogueBegin => write_u1(out, DBG_SET_EPILOGUE_BEGIN),
            DebugOp::SetFile(name) => write_u1(out, DBG_SET_FILE) + write_uleb128p1(out, name.p1()),
            DebugOp::Special(op) => write_u1(out, *op),
        }
    }

    fn refs(&self) -> Vec<UsedId>
    {
        match self
        {
            DebugOp::StartLocal { name, local_type, .. } => name.used().into_iter().chain(local_type.used()).collect(),
            DebugOp::StartLocalExtended { name, local_type, signature, .. } =>
            {
                name.used().into_iter().chain(local_type.used()).chain(signature.used()).collect()
            }
            DebugOp::SetFile(name) => name.used().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        match self
        {
            DebugOp::StartLocal { name, local_type, .. } =>
            {
                visitor(name);
                visitor(local_type);
            }
            DebugOp::StartLocalExtended { name, local_type, signature, .. } =>
            {
                visitor(name);
                visitor(local_type);
                visitor(signature);
            }
            DebugOp::SetFile(name) => visitor(name),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DebugInfo
{
    pub line_start: u32,
    pub parameter_names: Vec<IdRef<DexString>>,
    /// The program, without its terminating end-sequence opcode.
    pub ops: Vec<DebugOp>,
}

/// One row of the decoded position table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionEntry
{
    pub address: u32,
    pub line: u32,
}

impl DebugInfo
{
    pub fn new(line_start: u32) -> Self
    {
        DebugInfo { line_start, ..Default::default() }
    }

    /// Run the state machine and collect the address to line mapping.
    pub fn positions(&self) -> Vec<PositionEntry>
    {
        let mut address: u32 = 0;
        let mut line = self.line_start as i64;
        let mut rows = vec![];
        for op in &self.ops
        {
            match op
            {
                DebugOp::AdvancePc(d) => address = address.wrapping_add(*d),
                DebugOp::AdvanceLine(d) => line += *d as i64,
                DebugOp::Special(op) =>
                {
                    let adjusted = op.saturating_sub(DBG_FIRST_SPECIAL) as i32;
                    line += (DBG_LINE_BASE + adjusted % DBG_LINE_RANGE) as i64;
                    address = address.wrapping_add((adjusted / DBG_LINE_RANGE) as u32);
                    rows.push(PositionEntry { address, line: line.max(0) as u32 });
                }
                _ => {}
            }
        }
        rows
    }
}

impl ReadBlock for DebugInfo
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        let line_start = reader.read_uleb128()?;
        let parameters_size = reader.read_uleb128()?;
        let mut parameter_names = Vec::with_capacity(parameters_size.min(0x100) as usize);
        for _ in 0..parameters_size
        {
            parameter_names.push(IdRef::from_p1(reader.read_uleb128p1()?, UsageMarker::DEBUG));
        }
        let mut ops = vec![];
        loop
        {
            let opcode = reader.read_u1()?;
            if opcode == DBG_END_SEQUENCE
            {
                break;
            }
            ops.push(DebugOp::read(opcode, reader)?);
        }
        Ok(DebugInfo { line_start, parameter_names, ops })
    }
}

impl Block for DebugInfo
{
    fn encoded_len(&self) -> usize
    {
        uleb128_len(self.line_start)
            + uleb128_len(self.parameter_names.len() as u32)
            + self.parameter_names.iter().map(p1_len).sum::<usize>()
            + self.ops.iter().map(DebugOp::encoded_len).sum::<usize>()
            + 1
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        let mut c = write_uleb128(out, self.line_start);
        c += write_uleb128(out, self.parameter_names.len() as u32);
        for p in &self.parameter_names
        {
            c += write_uleb128p1(out, p.p1());
        }
        for op in &self.ops
        {
            c += op.write(out);
        }
        c += write_u1(out, DBG_END_SEQUENCE);
        Ok(c)
    }
}

impl ReferenceHolder for DebugInfo
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(
            self.parameter_names
                .iter()
                .filter_map(IdRef::used)
                .chain(self.ops.iter().flat_map(DebugOp::refs)),
        )
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        for p in self.parameter_names.iter_mut()
        {
            visitor(p);
        }
        for op in self.ops.iter_mut()
        {
            op.visit_refs_mut(visitor);
        }
    }
}

impl TextFormat for DebugInfo
{
    fn append(&self, w: &mut TextWriter, sections: &SectionRegistry)
    {
        w.line(format!(".debug line_start {}", self.line_start));
        w.indented(|w| {
            for (i, p) in self.parameter_names.iter().enumerate()
            {
                w.line(format!(".param p{}, {}", i, string_literal(sections, p)));
            }
            for op in &self.ops
            {
                let text = match op
                {
                    DebugOp::AdvancePc(d) => format!("advance_pc {}", d),
                    DebugOp::AdvanceLine(d) => format!("advance_line {}", d),
                    DebugOp::StartLocal { register, name, local_type } => format!(
                        ".local v{}, {}:{}",
                        register,
                        string_literal(sections, name),
                        type_name(sections, local_type)
                    ),
                    DebugOp::StartLocalExtended { register, name, local_type, signature } => format!(
                        ".local v{}, {}:{}, {}",
                        register,
                        string_literal(sections, name),
                        type_name(sections, local_type),
                        string_literal(sections, signature)
                    ),
                    DebugOp::EndLocal(r) => format!(".end local v{}", r),
                    DebugOp::RestartLocal(r) => format!(".restart local v{}", r),
                    DebugOp::PrologueEnd => ".prologue".to_string(),
                    DebugOp::EpilogueBegin => ".epilogue".to_string(),
                    DebugOp::SetFile(name) => format!(".source {}", string_literal(sections, name)),
                    DebugOp::Special(op) => format!("special 0x{:02x}", op),
                };
                w.line(text);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::section::SectionType;

    fn sample() -> DebugInfo {
        DebugInfo {
            line_start: 10,
            parameter_names: vec![IdRef::new(2, UsageMarker::DEBUG), IdRef::none(UsageMarker::DEBUG)],
            ops: vec![
                DebugOp::PrologueEnd,
                DebugOp::StartLocal {
                    register: 1,
                    name: IdRef::new(3, UsageMarker::DEBUG),
                    local_type: IdRef::new(0, UsageMarker::DEBUG),
                },
                DebugOp::Special(0x0e),
                DebugOp::AdvanceLine(-2),
                DebugOp::AdvancePc(3),
                DebugOp::Special(0x0a + 15 * 2 + 4),
                DebugOp::EndLocal(1),
            ],
        }
    }

    #[test]
    fn program_round_trips() {
        let info = sample();
        let mut out = vec![];
        let n = info.write(&mut out).unwrap();
        assert_eq!(n, info.encoded_len());
        assert_eq!(*out.last().unwrap(), 0);
        let back = DebugInfo::read(&mut DexReader::new(&out)).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn positions_follow_special_opcodes() {
        let rows = sample().positions();
        // 0x0e: line += -4 + 4, address += 0
        assert_eq!(rows[0], PositionEntry { address: 0, line: 10 });
        // advance line -2, pc +3, then special line += 0, address += 2
        assert_eq!(rows[1], PositionEntry { address: 5, line: 8 });
    }

    #[test]
    fn refs_skip_absent_names() {
        let used: Vec<_> = sample().used_ids().map(|u| (u.section, u.index)).collect();
        assert_eq!(
            used,
            vec![(SectionType::StringId, 2), (SectionType::StringId, 3), (SectionType::TypeId, 0)]
        );
    }

    #[test]
    fn missing_end_sequence_is_truncated() {
        let bytes = [1, 0, 0x07];
        assert!(DebugInfo::read(&mut DexReader::new(&bytes)).is_err());
    }
}
