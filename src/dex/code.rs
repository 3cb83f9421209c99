//! code_item: register counts, the instruction stream and the optional
//! try/catch table.

use log::warn;

use crate::dex::block::{Block, ReadBlock};
use crate::dex::debug_info::DebugInfo;
use crate::dex::error::{DexError, ResultExt};
use crate::dex::instructions::InstructionList;
use crate::dex::key::RefTranslator;
use crate::dex::reader::{ByteSource, DexReader};
use crate::dex::reference::{DataRef, RefSlot, ReferenceHolder, UsedId};
use crate::dex::section::{SectionRegistry, SectionType, UsageMarker};
use crate::dex::text::{TextFormat, TextWriter};
use crate::dex::try_block::TryBlock;
use crate::dex::{write_u2, write_u4};

const CODE_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeItem
{
    pub registers: u16,
    pub ins: u16,
    pub outs: u16,
    pub debug_info: DataRef<DebugInfo>,
    pub insns: InstructionList,
    try_block: Option<TryBlock>,
}

impl Default for CodeItem
{
    fn default() -> Self
    {
        CodeItem {
            registers: 0,
            ins: 0,
            outs: 0,
            debug_info: DataRef::none(UsageMarker::DEBUG),
            insns: InstructionList::default(),
            try_block: None,
        }
    }
}

impl CodeItem
{
    pub fn new(registers: u16, ins: u16, outs: u16, insns: Vec<u16>) -> Self
    {
        CodeItem { registers, ins, outs, insns: InstructionList::new(insns), ..Default::default() }
    }

    pub fn try_block(&self) -> Option<&TryBlock>
    {
        self.try_block.as_ref()
    }

    /// The try/catch table, created empty on first request. Once present it
    /// stays attached; emptying it is done through [`TryBlock::clear`].
    pub fn get_or_create_try_block(&mut self) -> &mut TryBlock
    {
        self.try_block.get_or_insert_with(TryBlock::new)
    }

    pub fn tries_size(&self) -> u16
    {
        self.try_block.as_ref().map_or(0, |t| t.tries.len() as u16)
    }

    fn has_tries(&self) -> bool
    {
        self.tries_size() > 0
    }

    fn needs_padding(&self) -> bool
    {
        self.has_tries() && self.insns.len() % 2 == 1
    }

    pub fn set_debug_info(&mut self, index: Option<u32>)
    {
        match index
        {
            Some(i) => self.debug_info.set_target(i),
            None => self.debug_info.clear(),
        }
    }

    /// Take `other`'s header fields and instructions. A try table on `other`
    /// is merged into this item's (created if needed); without one, this
    /// item's table is left as it is.
    pub fn merge(&mut self, other: &CodeItem, translator: &mut dyn RefTranslator) -> Result<(), DexError>
    {
        self.registers = other.registers;
        self.ins = other.ins;
        self.outs = other.outs;
        if let Some(index) = other.debug_info.index()
        {
            let translated = translator.translate(SectionType::DebugInfo, index)?;
            self.debug_info.set_target(translated);
        }
        self.insns.merge(&other.insns, translator)?;
        if let Some(tries) = &other.try_block
        {
            self.get_or_create_try_block().merge(tries, translator)?;
        }
        Ok(())
    }
}

impl ReadBlock for CodeItem
{
    fn read(reader: &mut DexReader<'_>) -> Result<Self, DexError>
    {
        let start = reader.position();
        let registers = reader.read_u2()?;
        let ins = reader.read_u2()?;
        let outs = reader.read_u2()?;
        let tries_size = reader.read_u2()?;
        if ins > registers
        {
            if reader.is_strict()
            {
                fail!(FormatMismatch, "code item at 0x{:x} has {} ins but only {} registers", start, ins, registers);
            }
            warn!("Code item at 0x{:x} has {} ins but only {} registers", start, ins, registers);
        }
        let debug_off = reader.read_u4()?;
        let insns_size = reader.read_u4()? as usize;
        if insns_size * 2 > reader.remaining()
        {
            fail!(TruncatedInput, "code item at 0x{:x} declares {} code units past end of input", start, insns_size);
        }
        let mut units = Vec::with_capacity(insns_size);
        for _ in 0..insns_size
        {
            units.push(reader.read_u2()?);
        }
        if tries_size > 0 && insns_size % 2 == 1
        {
            let padding = reader.read_u2()?;
            if padding != 0
            {
                warn!("Code item at 0x{:x} has non-zero padding 0x{:04x}", start, padding);
            }
        }
        let try_block = if tries_size > 0
        {
            Some(TryBlock::read(reader, tries_size).context(|| format!("try block of code item at 0x{:x}", start))?)
        }
        else
        {
            None
        };
        let debug_info = reader
            .data_ref_at::<DebugInfo>(debug_off, UsageMarker::DEBUG)
            .context(|| format!("code item at 0x{:x}", start))?;

        Ok(CodeItem { registers, ins, outs, debug_info, insns: InstructionList::new(units), try_block })
    }
}

impl Block for CodeItem
{
    fn encoded_len(&self) -> usize
    {
        let mut len = CODE_HEADER_SIZE + self.insns.encoded_len();
        if self.needs_padding()
        {
            len += 2;
        }
        if let Some(t) = self.try_block.as_ref().filter(|_| self.has_tries())
        {
            len += t.encoded_len();
        }
        len
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        if self.ins > self.registers
        {
            fail!(FormatMismatch, "code item has {} ins but only {} registers", self.ins, self.registers);
        }
        let mut c = write_u2(out, self.registers);
        c += write_u2(out, self.ins);
        c += write_u2(out, self.outs);
        c += write_u2(out, self.tries_size());
        c += write_u4(out, self.debug_info.offset()?);
        c += write_u4(out, self.insns.len() as u32);
        c += self.insns.write(out)?;
        if self.needs_padding()
        {
            c += write_u2(out, 0);
        }
        if let Some(t) = self.try_block.as_ref().filter(|_| self.has_tries())
        {
            c += t.write(out)?;
        }
        Ok(c)
    }

    fn refresh(&mut self)
    {
        if let Some(t) = self.try_block.as_mut()
        {
            t.refresh();
        }
    }

    fn is_dirty(&self) -> bool
    {
        self.try_block.as_ref().is_some_and(|t| t.is_dirty())
    }
}

impl ReferenceHolder for CodeItem
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(
            self.debug_info
                .used()
                .into_iter()
                .chain(self.insns.used_ids())
                .chain(self.try_block.iter().flat_map(|t| t.used_ids())),
        )
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        visitor(&mut self.debug_info);
        self.insns.visit_refs_mut(visitor);
        if let Some(t) = self.try_block.as_mut()
        {
            t.visit_refs_mut(visitor);
        }
    }
}

impl TextFormat for CodeItem
{
    fn append(&self, w: &mut TextWriter, sections: &SectionRegistry)
    {
        w.line(format!(".registers {}", self.registers));
        w.line(format!(".ins {} .outs {}", self.ins, self.outs));
        if let Some(debug) = self.debug_info.resolve(sections)
        {
            debug.append(w, sections);
        }
        self.insns.append(w, sections);
        if let Some(t) = &self.try_block
        {
            t.append(w, sections);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::try_block::{CatchHandlerList, ExceptionHandler};

    fn body() -> CodeItem {
        // const/4 v0, 0 ; return-void ; nop
        let mut code = CodeItem::new(3, 1, 0, vec![0x0012, 0x000e, 0x0000]);
        code.get_or_create_try_block().add_try(0, 2, CatchHandlerList::new(vec![ExceptionHandler::CatchAll { address: 2 }]));
        code
    }

    #[test]
    fn odd_instruction_count_is_padded() {
        let code = body();
        let mut out = vec![];
        let n = code.write(&mut out).unwrap();
        assert_eq!(n, code.encoded_len());
        assert_eq!(&out[6..8], &[1, 0]);
        assert_eq!(&out[22..24], &[0, 0]);

        let back = CodeItem::read(&mut DexReader::new(&out)).unwrap();
        assert_eq!(back, code);
        assert_eq!(back.tries_size(), 1);
    }

    #[test]
    fn no_table_without_tries() {
        let code = CodeItem::new(1, 0, 0, vec![0x000e]);
        let mut out = vec![];
        code.write(&mut out).unwrap();
        assert_eq!(out.len(), 18);
        let back = CodeItem::read(&mut DexReader::new(&out)).unwrap();
        assert!(back.try_block().is_none());
    }

    #[test]
    fn cleared_table_stays_attached() {
        let mut code = body();
        code.get_or_create_try_block().clear();
        assert!(code.try_block().is_some());
        assert_eq!(code.tries_size(), 0);
        assert_eq!(code.encoded_len(), 16 + 6);
    }

    #[test]
    fn merge_keeps_own_table_when_other_has_none() {
        let mut code = body();
        let other = CodeItem::new(7, 2, 1, vec![0x000e]);
        code.merge(&other, &mut crate::dex::key::IdentityTranslator).unwrap();
        assert_eq!((code.registers, code.ins, code.outs), (7, 2, 1));
        assert_eq!(code.insns.units(), &[0x000e]);
        assert_eq!(code.tries_size(), 1);

        let mut plain = CodeItem::default();
        plain.merge(&body(), &mut crate::dex::key::IdentityTranslator).unwrap();
        assert_eq!(plain.tries_size(), 1);
    }

    #[test]
    fn truncated_units_are_reported() {
        let mut out = vec![];
        CodeItem::new(1, 0, 0, vec![0x000e, 0x000e]).write(&mut out).unwrap();
        out.truncate(out.len() - 2);
        let e = CodeItem::read(&mut DexReader::new(&out)).unwrap_err();
        assert_eq!(e.kind(), crate::dex::error::DexErrorKind::TruncatedInput);
    }

    #[test]
    fn ins_beyond_registers() {
        let code = CodeItem::new(1, 5, 0, vec![0x000e]);
        let e = code.write(&mut vec![]).unwrap_err();
        assert_eq!(e.kind(), crate::dex::error::DexErrorKind::FormatMismatch);

        let mut out = vec![];
        CodeItem::new(5, 5, 0, vec![0x000e]).write(&mut out).unwrap();
        // registers_size = 1
        out[0] = 1;
        let back = CodeItem::read(&mut DexReader::new(&out)).unwrap();
        assert_eq!((back.registers, back.ins), (1, 5));

        let mut strict = DexReader::new(&out);
        strict.set_strict(true);
        let e = CodeItem::read(&mut strict).unwrap_err();
        assert_eq!(e.kind(), crate::dex::error::DexErrorKind::FormatMismatch);
    }
}
