//! Dalvik instruction stream.
//!
//! The stream is kept as raw 16-bit code units. Instruction boundaries are
//! found through the opcode table so that pool references embedded in
//! operands can be reported and rewritten; no other operand semantics are
//! interpreted.

use std::fmt::Write as _;

use log::warn;
use once_cell::sync::Lazy;

use crate::dex::error::DexError;
use crate::dex::key::{translate_refs, RefTranslator};
use crate::dex::reference::{RefSlot, ReferenceHolder, UsedId};
use crate::dex::section::{SectionRegistry, SectionType, UsageMarker};
use crate::dex::text::{describe, TextFormat, TextWriter};
use crate::dex::write_u2;

const PACKED_SWITCH_IDENT: u16 = 0x0100;
const SPARSE_SWITCH_IDENT: u16 = 0x0200;
const FILL_ARRAY_DATA_IDENT: u16 = 0x0300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format
{
    Format10x,
    Format12x,
    Format11n,
    Format11x,
    Format10t,
    Format20t,
    Format22x,
    Format21t,
    Format21s,
    Format21h,
    Format21c,
    Format23x,
    Format22b,
    Format22t,
    Format22s,
    Format22c,
    Format30t,
    Format32x,
    Format31i,
    Format31t,
    Format31c,
    Format35c,
    Format3rc,
    Format45cc,
    Format4rcc,
    Format51l,
}

impl Format
{
    /// Instruction size in 16-bit code units.
    pub fn size(self) -> usize
    {
        use Format::*;
        match self
        {
            Format10x | Format12x | Format11n | Format11x | Format10t => 1,
            Format20t | Format22x | Format21t | Format21s | Format21h | Format21c | Format23x | Format22b
            | Format22t | Format22s | Format22c => 2,
            Format30t | Format32x | Format31i | Format31t | Format31c | Format35c | Format3rc => 3,
            Format45cc | Format4rcc => 4,
            Format51l => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType
{
    None,
    String,
    Type,
    Field,
    Method,
    MethodProto,
    CallSite,
    MethodHandle,
}

impl ReferenceType
{
    /// Pool the reference points into; call sites and method handles are not pooled here.
    pub fn section(self) -> Option<SectionType>
    {
        match self
        {
            ReferenceType::String => Some(SectionType::StringId),
            ReferenceType::Type => Some(SectionType::TypeId),
            ReferenceType::Field => Some(SectionType::FieldId),
            ReferenceType::Method => Some(SectionType::MethodId),
            ReferenceType::MethodProto => Some(SectionType::ProtoId),
            ReferenceType::None | ReferenceType::CallSite | ReferenceType::MethodHandle => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Opcode
{
    pub value: u8,
    pub name: &'static str,
    pub format: Format,
    pub reference: ReferenceType,
    /// Second reference of the 45cc/4rcc formats.
    pub reference2: ReferenceType,
}

const BINOPS: [&str; 32] = [
    "add-int", "sub-int", "mul-int", "div-int", "rem-int", "and-int", "or-int", "xor-int", "shl-int", "shr-int",
    "ushr-int", "add-long", "sub-long", "mul-long", "div-long", "rem-long", "and-long", "or-long", "xor-long",
    "shl-long", "shr-long", "ushr-long", "add-float", "sub-float", "mul-float", "div-float", "rem-float",
    "add-double", "sub-double", "mul-double", "div-double", "rem-double",
];

const BINOPS_2ADDR: [&str; 32] = [
    "add-int/2addr", "sub-int/2addr", "mul-int/2addr", "div-int/2addr", "rem-int/2addr", "and-int/2addr",
    "or-int/2addr", "xor-int/2addr", "shl-int/2addr", "shr-int/2addr", "ushr-int/2addr", "add-long/2addr",
    "sub-long/2addr", "mul-long/2addr", "div-long/2addr", "rem-long/2addr", "and-long/2addr", "or-long/2addr",
    "xor-long/2addr", "shl-long/2addr", "shr-long/2addr", "ushr-long/2addr", "add-float/2addr",
    "sub-float/2addr", "mul-float/2addr", "div-float/2addr", "rem-float/2addr", "add-double/2addr",
    "sub-double/2addr", "mul-double/2addr", "div-double/2addr", "rem-double/2addr",
];

const UNOPS: [&str; 21] = [
    "neg-int", "not-int", "neg-long", "not-long", "neg-float", "neg-double", "int-to-long", "int-to-float",
    "int-to-double", "long-to-int", "long-to-float", "long-to-double", "float-to-int", "float-to-long",
    "float-to-double", "double-to-int", "double-to-long", "double-to-float", "int-to-byte", "int-to-char",
    "int-to-short",
];

const LIT16: [&str; 8] = [
    "add-int/lit16", "rsub-int", "mul-int/lit16", "div-int/lit16", "rem-int/lit16", "and-int/lit16",
    "or-int/lit16", "xor-int/lit16",
];

const LIT8: [&str; 11] = [
    "add-int/lit8", "rsub-int/lit8", "mul-int/lit8", "div-int/lit8", "rem-int/lit8", "and-int/lit8",
    "or-int/lit8", "xor-int/lit8", "shl-int/lit8", "shr-int/lit8", "ushr-int/lit8",
];

static OPCODES: Lazy<Vec<Opcode>> = Lazy::new(|| {
    use Format::*;
    use ReferenceType as R;

    let mut table: Vec<Opcode> = (0..=255u8)
        .map(|value| Opcode { value, name: "unused", format: Format10x, reference: R::None, reference2: R::None })
        .collect();
    let mut set = |value: u8, name: &'static str, format: Format, reference: ReferenceType| {
        table[value as usize] = Opcode { value, name, format, reference, reference2: R::None };
    };

    let simple: [(u8, &'static str, Format); 41] = [
        (0x00, "nop", Format10x),
        (0x01, "move", Format12x),
        (0x02, "move/from16", Format22x),
        (0x03, "move/16", Format32x),
        (0x04, "move-wide", Format12x),
        (0x05, "move-wide/from16", Format22x),
        (0x06, "move-wide/16", Format32x),
        (0x07, "move-object", Format12x),
        (0x08, "move-object/from16", Format22x),
        (0x09, "move-object/16", Format32x),
        (0x0a, "move-result", Format11x),
        (0x0b, "move-result-wide", Format11x),
        (0x0c, "move-result-object", Format11x),
        (0x0d, "move-exception", Format11x),
        (0x0e, "return-void", Format10x),
        (0x0f, "return", Format11x),
        (0x10, "return-wide", Format11x),
        (0x11, "return-object", Format11x),
        (0x12, "const/4", Format11n),
        (0x13, "const/16", Format21s),
        (0x14, "const", Format31i),
        (0x15, "const/high16", Format21h),
        (0x16, "const-wide/16", Format21s),
        (0x17, "const-wide/32", Format31i),
        (0x18, "const-wide", Format51l),
        (0x19, "const-wide/high16", Format21h),
        (0x1d, "monitor-enter", Format11x),
        (0x1e, "monitor-exit", Format11x),
        (0x21, "array-length", Format12x),
        (0x26, "fill-array-data", Format31t),
        (0x27, "throw", Format11x),
        (0x28, "goto", Format10t),
        (0x29, "goto/16", Format20t),
        (0x2a, "goto/32", Format30t),
        (0x2b, "packed-switch", Format31t),
        (0x2c, "sparse-switch", Format31t),
        (0x2d, "cmpl-float", Format23x),
        (0x2e, "cmpg-float", Format23x),
        (0x2f, "cmpl-double", Format23x),
        (0x30, "cmpg-double", Format23x),
        (0x31, "cmp-long", Format23x),
    ];
    for (value, name, format) in simple
    {
        set(value, name, format, R::None);
    }
    set(0x1a, "const-string", Format21c, R::String);
    set(0x1b, "const-string/jumbo", Format31c, R::String);
    set(0x1c, "const-class", Format21c, R::Type);
    set(0x1f, "check-cast", Format21c, R::Type);
    set(0x20, "instance-of", Format22c, R::Type);
    set(0x22, "new-instance", Format21c, R::Type);
    set(0x23, "new-array", Format22c, R::Type);
    set(0x24, "filled-new-array", Format35c, R::Type);
    set(0x25, "filled-new-array/range", Format3rc, R::Type);

    for (i, name) in ["if-eq", "if-ne", "if-lt", "if-ge", "if-gt", "if-le"].into_iter().enumerate()
    {
        set(0x32 + i as u8, name, Format22t, R::None);
    }
    for (i, name) in ["if-eqz", "if-nez", "if-ltz", "if-gez", "if-gtz", "if-lez"].into_iter().enumerate()
    {
        set(0x38 + i as u8, name, Format21t, R::None);
    }

    const AGET: [&str; 7] = ["aget", "aget-wide", "aget-object", "aget-boolean", "aget-byte", "aget-char", "aget-short"];
    const APUT: [&str; 7] = ["aput", "aput-wide", "aput-object", "aput-boolean", "aput-byte", "aput-char", "aput-short"];
    const IGET: [&str; 7] = ["iget", "iget-wide", "iget-object", "iget-boolean", "iget-byte", "iget-char", "iget-short"];
    const IPUT: [&str; 7] = ["iput", "iput-wide", "iput-object", "iput-boolean", "iput-byte", "iput-char", "iput-short"];
    const SGET: [&str; 7] = ["sget", "sget-wide", "sget-object", "sget-boolean", "sget-byte", "sget-char", "sget-short"];
    const SPUT: [&str; 7] = ["sput", "sput-wide", "sput-object", "sput-boolean", "sput-byte", "sput-char", "sput-short"];
    for i in 0..7u8
    {
        let k = i as usize;
        set(0x44 + i, AGET[k], Format23x, R::None);
        set(0x4b + i, APUT[k], Format23x, R::None);
        set(0x52 + i, IGET[k], Format22c, R::Field);
        set(0x59 + i, IPUT[k], Format22c, R::Field);
        set(0x60 + i, SGET[k], Format21c, R::Field);
        set(0x67 + i, SPUT[k], Format21c, R::Field);
    }

    let invokes = ["invoke-virtual", "invoke-super", "invoke-direct", "invoke-static", "invoke-interface"];
    let invokes_range = [
        "invoke-virtual/range",
        "invoke-super/range",
        "invoke-direct/range",
        "invoke-static/range",
        "invoke-interface/range",
    ];
    for i in 0..5u8
    {
        set(0x6e + i, invokes[i as usize], Format35c, R::Method);
        set(0x74 + i, invokes_range[i as usize], Format3rc, R::Method);
    }

    for (i, name) in UNOPS.into_iter().enumerate()
    {
        set(0x7b + i as u8, name, Format12x, R::None);
    }
    for (i, name) in BINOPS.into_iter().enumerate()
    {
        set(0x90 + i as u8, name, Format23x, R::None);
    }
    for (i, name) in BINOPS_2ADDR.into_iter().enumerate()
    {
        set(0xb0 + i as u8, name, Format12x, R::None);
    }
    for (i, name) in LIT16.into_iter().enumerate()
    {
        set(0xd0 + i as u8, name, Format22s, R::None);
    }
    for (i, name) in LIT8.into_iter().enumerate()
    {
        set(0xd8 + i as u8, name, Format22b, R::None);
    }

    set(0xfc, "invoke-custom", Format35c, R::CallSite);
    set(0xfd, "invoke-custom/range", Format3rc, R::CallSite);
    set(0xfe, "const-method-handle", Format21c, R::MethodHandle);
    set(0xff, "const-method-type", Format21c, R::MethodProto);

    table[0xfa] = Opcode { value: 0xfa, name: "invoke-polymorphic", format: Format45cc, reference: R::Method, reference2: R::MethodProto };
    table[0xfb] = Opcode { value: 0xfb, name: "invoke-polymorphic/range", format: Format4rcc, reference: R::Method, reference2: R::MethodProto };
    table
});

pub fn opcode(value: u8) -> &'static Opcode
{
    &OPCODES[value as usize]
}

pub fn opcode_by_name(name: &str) -> Option<&'static Opcode>
{
    OPCODES.iter().find(|o| o.name == name && o.name != "unused")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind
{
    PackedSwitch,
    SparseSwitch,
    FillArrayData,
}

/// One decoded unit of the stream.
#[derive(Debug, Clone, Copy)]
pub enum Insn<'a>
{
    Op { address: u32, opcode: &'static Opcode, units: &'a [u16] },
    Payload { address: u32, kind: PayloadKind, units: &'a [u16] },
}

impl<'a> Insn<'a>
{
    pub fn address(&self) -> u32
    {
        match self
        {
            Insn::Op { address, .. } | Insn::Payload { address, .. } => *address,
        }
    }

    pub fn units(&self) -> &'a [u16]
    {
        match self
        {
            Insn::Op { units, .. } | Insn::Payload { units, .. } => *units,
        }
    }
}

/// A pool reference embedded in an instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandRef
{
    pub address: u32,
    /// Code unit holding the index, relative to the start of the stream.
    pub unit: usize,
    pub wide: bool,
    pub section: SectionType,
}

fn payload_kind(unit: u16) -> Option<PayloadKind>
{
    match unit
    {
        PACKED_SWITCH_IDENT => Some(PayloadKind::PackedSwitch),
        SPARSE_SWITCH_IDENT => Some(PayloadKind::SparseSwitch),
        FILL_ARRAY_DATA_IDENT => Some(PayloadKind::FillArrayData),
        _ => None,
    }
}

/// Payload size in code units, or `None` when its own header is cut off.
fn payload_size(kind: PayloadKind, units: &[u16], at: usize) -> Option<usize>
{
    let get = |i: usize| units.get(at + i).copied().map(|u| u as usize);
    match kind
    {
        PayloadKind::PackedSwitch => Some(4 + get(1)? * 2),
        PayloadKind::SparseSwitch => Some(2 + get(1)? * 4),
        PayloadKind::FillArrayData =>
        {
            let width = get(1)?;
            let size = get(2)? | (get(3)? << 16);
            Some(4 + (size * width + 1) / 2)
        }
    }
}

pub struct InsnIter<'a>
{
    units: &'a [u16],
    pos: usize,
}

impl<'a> Iterator for InsnIter<'a>
{
    type Item = Result<Insn<'a>, DexError>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.pos >= self.units.len()
        {
            return None;
        }
        let at = self.pos;
        let unit = self.units[at];
        let kind = payload_kind(unit);
        let size = match kind
        {
            Some(kind) => payload_size(kind, self.units, at).unwrap_or(usize::MAX),
            None => opcode((unit & 0xff) as u8).format.size(),
        };
        let left = self.units.len() - at;
        if size > left
        {
            self.pos = self.units.len();
            return Some(Err(err!(TruncatedInput, "instruction at 0x{:x} runs past the {} remaining code units", at, left)));
        }
        self.pos = at + size;
        let units = &self.units[at..at + size];
        let address = at as u32;
        Some(Ok(match kind
        {
            Some(kind) => Insn::Payload { address, kind, units },
            None => Insn::Op { address, opcode: opcode((unit & 0xff) as u8), units },
        }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct InstructionList
{
    units: Vec<u16>,
    /// A rewritten index no longer fits its operand field.
    overflow: bool,
}

impl InstructionList
{
    pub fn new(units: Vec<u16>) -> Self
    {
        InstructionList { units, overflow: false }
    }

    pub fn units(&self) -> &[u16]
    {
        &self.units
    }

    pub fn set_units(&mut self, units: Vec<u16>)
    {
        self.units = units;
        self.overflow = false;
    }

    /// Size in code units.
    pub fn len(&self) -> usize
    {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.units.is_empty()
    }

    pub fn iter(&self) -> InsnIter<'_>
    {
        InsnIter { units: &self.units, pos: 0 }
    }

    /// Decode every boundary, failing on a truncated instruction.
    pub fn validate(&self) -> Result<usize, DexError>
    {
        let mut count = 0;
        for insn in self.iter()
        {
            insn?;
            count += 1;
        }
        Ok(count)
    }

    /// Pool references in operand order. Decoding stops quietly at a truncated tail.
    pub fn operand_refs(&self) -> Vec<OperandRef>
    {
        let mut refs = vec![];
        for insn in self.iter()
        {
            let (address, opcode) = match insn
            {
                Ok(Insn::Op { address, opcode, .. }) => (address, opcode),
                Ok(Insn::Payload { .. }) => continue,
                Err(_) => break,
            };
            let at = address as usize;
            let wide = opcode.format == Format::Format31c;
            if let Some(section) = opcode.reference.section()
            {
                refs.push(OperandRef { address, unit: at + 1, wide, section });
            }
            if let Some(section) = opcode.reference2.section()
            {
                refs.push(OperandRef { address, unit: at + 3, wide: false, section });
            }
        }
        refs
    }

    fn read_operand(&self, r: &OperandRef) -> u32
    {
        let lo = self.units[r.unit] as u32;
        if r.wide { lo | (self.units[r.unit + 1] as u32) << 16 } else { lo }
    }

    fn write_operand(&mut self, r: &OperandRef, index: u32)
    {
        if r.wide
        {
            self.units[r.unit] = index as u16;
            self.units[r.unit + 1] = (index >> 16) as u16;
        }
        else if index > u16::MAX as u32
        {
            self.overflow = true;
        }
        else
        {
            self.units[r.unit] = index as u16;
        }
    }

    /// Replace this stream with `other`'s, translating its references.
    pub fn merge(&mut self, other: &InstructionList, translator: &mut dyn RefTranslator) -> Result<(), DexError>
    {
        self.set_units(other.units.clone());
        translate_refs(self, translator)
    }

    pub fn encoded_len(&self) -> usize
    {
        self.units.len() * 2
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<usize, DexError>
    {
        if self.overflow
        {
            fail!(IndexOutOfRange, "rewritten operand index does not fit a 16-bit field");
        }
        let mut c = 0;
        for u in &self.units
        {
            c += write_u2(out, *u);
        }
        Ok(c)
    }
}

/// Adapter exposing one operand as a reference slot.
struct OperandSlot
{
    section: SectionType,
    index: Option<u32>,
}

impl RefSlot for OperandSlot
{
    fn section(&self) -> SectionType
    {
        self.section
    }

    fn index(&self) -> Option<u32>
    {
        self.index
    }

    fn usage(&self) -> UsageMarker
    {
        UsageMarker::INSTRUCTION
    }

    fn set_index(&mut self, index: Option<u32>)
    {
        self.index = index;
    }
}

impl ReferenceHolder for InstructionList
{
    fn used_ids(&self) -> Box<dyn Iterator<Item = UsedId> + '_>
    {
        Box::new(self.operand_refs().into_iter().map(move |r| UsedId {
            section: r.section,
            index: self.read_operand(&r),
            usage: UsageMarker::INSTRUCTION,
        }))
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefSlot))
    {
        for r in self.operand_refs()
        {
            let old = self.read_operand(&r);
            let mut slot = OperandSlot { section: r.section, index: Some(old) };
            visitor(&mut slot);
            match slot.index
            {
                Some(new) if new != old => self.write_operand(&r, new),
                Some(_) => {}
                None =>
                {
                    warn!("Instruction at 0x{:x} lost its {} target", r.address, r.section);
                    self.overflow = true;
                }
            }
        }
    }
}

fn nibble(u: u16, shift: u32) -> u16
{
    (u >> shift) & 0xf
}

fn operands(insn_units: &[u16], opcode: &Opcode, sections: &SectionRegistry) -> String
{
    use Format::*;
    let u = insn_units;
    let aa = u[0] >> 8;
    let reference = |unit: usize, wide: bool, kind: ReferenceType| -> String {
        let raw = if wide { u[unit] as u32 | (u[unit + 1] as u32) << 16 } else { u[unit] as u32 };
        match kind.section()
        {
            Some(section) => describe(sections, section, raw),
            None => format!("ref@{}", raw),
        }
    };
    let regs_35c = || -> String {
        let count = nibble(u[0], 12) as usize;
        let regs = [nibble(u[2], 0), nibble(u[2], 4), nibble(u[2], 8), nibble(u[2], 12), nibble(u[0], 8)];
        let list: Vec<String> = regs.iter().take(count.min(5)).map(|r| format!("v{}", r)).collect();
        format!("{{{}}}", list.join(", "))
    };
    let regs_3rc = || -> String {
        let first = u[2] as u32;
        if aa == 0 { "{}".to_string() } else { format!("{{v{} .. v{}}}", first, first + aa as u32 - 1) }
    };
    match opcode.format
    {
        Format10x => String::new(),
        Format12x => format!("v{}, v{}", nibble(u[0], 8), nibble(u[0], 12)),
        Format11n => format!("v{}, #{}", nibble(u[0], 8), ((u[0] as i16) >> 12)),
        Format11x => format!("v{}", aa),
        Format10t => format!("{:+}", (aa as u8) as i8),
        Format20t => format!("{:+}", u[1] as i16),
        Format22x => format!("v{}, v{}", aa, u[1]),
        Format21t => format!("v{}, {:+}", aa, u[1] as i16),
        Format21s => format!("v{}, #{}", aa, u[1] as i16),
        Format21h => format!("v{}, #0x{:x}", aa, u[1]),
        Format21c => format!("v{}, {}", aa, reference(1, false, opcode.reference)),
        Format23x => format!("v{}, v{}, v{}", aa, u[1] & 0xff, u[1] >> 8),
        Format22b => format!("v{}, v{}, #{}", aa, u[1] & 0xff, (u[1] >> 8) as u8 as i8),
        Format22t => format!("v{}, v{}, {:+}", nibble(u[0], 8), nibble(u[0], 12), u[1] as i16),
        Format22s => format!("v{}, v{}, #{}", nibble(u[0], 8), nibble(u[0], 12), u[1] as i16),
        Format22c => format!("v{}, v{}, {}", nibble(u[0], 8), nibble(u[0], 12), reference(1, false, opcode.reference)),
        Format30t => format!("{:+}", (u[1] as u32 | (u[2] as u32) << 16) as i32),
        Format32x => format!("v{}, v{}", u[1], u[2]),
        Format31i => format!("v{}, #{}", aa, (u[1] as u32 | (u[2] as u32) << 16) as i32),
        Format31t => format!("v{}, {:+}", aa, (u[1] as u32 | (u[2] as u32) << 16) as i32),
        Format31c => format!("v{}, {}", aa, reference(1, true, opcode.reference)),
        Format35c => format!("{}, {}", regs_35c(), reference(1, false, opcode.reference)),
        Format3rc => format!("{}, {}", regs_3rc(), reference(1, false, opcode.reference)),
        Format45cc => format!(
            "{}, {}, {}",
            regs_35c(),
            reference(1, false, opcode.reference),
            reference(3, false, opcode.reference2)
        ),
        Format4rcc => format!(
            "{}, {}, {}",
            regs_3rc(),
            reference(1, false, opcode.reference),
            reference(3, false, opcode.reference2)
        ),
        Format51l =>
        {
            let v = (0..4).fold(0u64, |acc, i| acc | (u[1 + i] as u64) << (16 * i));
            format!("v{}, #{}", aa, v as i64)
        }
    }
}

impl TextFormat for InstructionList
{
    fn append(&self, w: &mut TextWriter, sections: &SectionRegistry)
    {
        for insn in self.iter()
        {
            match insn
            {
                Ok(Insn::Op { address, opcode, units }) =>
                {
                    let mut line = format!("{:04x}: ", address);
                    if opcode.name == "unused"
                    {
                        let _ = write!(line, "unused-{:02x}", opcode.value);
                    }
                    else
                    {
                        line.push_str(opcode.name);
                        let ops = operands(units, opcode, sections);
                        if !ops.is_empty()
                        {
                            line.push(' ');
                            line.push_str(&ops);
                        }
                    }
                    w.line(line);
                }
                Ok(Insn::Payload { address, kind, units }) =>
                {
                    w.line(format!("{:04x}: {:?} payload ({} units)", address, kind, units.len()));
                }
                Err(e) =>
                {
                    w.line(format!("; {}", e));
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::DexErrorKind;
    use crate::dex::key::IdentityTranslator;

    #[test]
    fn opcode_table_covers_all_values() {
        assert_eq!(opcode(0x1a).name, "const-string");
        assert_eq!(opcode(0x1a).reference, ReferenceType::String);
        assert_eq!(opcode(0x6e).format, Format::Format35c);
        assert_eq!(opcode(0x78).name, "invoke-interface/range");
        assert_eq!(opcode(0x8f).name, "int-to-short");
        assert_eq!(opcode(0xaf).name, "rem-double");
        assert_eq!(opcode(0xcf).name, "rem-double/2addr");
        assert_eq!(opcode(0xe2).name, "ushr-int/lit8");
        assert_eq!(opcode(0x3e).name, "unused");
        assert_eq!(opcode(0xfa).reference2, ReferenceType::MethodProto);
        assert_eq!(opcode_by_name("sput-short").map(|o| o.value), Some(0x6d));
    }

    #[test]
    fn boundaries_include_payloads() {
        // const-string v0, string@5; packed-switch v0, +3; nop; packed-switch payload of 1 target
        let units = vec![0x001a, 0x0005, 0x002b, 0x0003, 0x0000, 0x0000, 0x0100, 0x0001, 0, 0, 0x0004, 0];
        let list = InstructionList::new(units);
        let addrs: Vec<u32> = list.iter().map(|i| i.unwrap().address()).collect();
        assert_eq!(addrs, vec![0, 2, 5, 6]);
        assert_eq!(list.validate().unwrap(), 4);
    }

    #[test]
    fn fill_array_payload_rounds_up() {
        let units = vec![0x0300, 0x0001, 0x0003, 0x0000, 0x0201, 0x0003];
        let list = InstructionList::new(units);
        let insn = list.iter().next().unwrap().unwrap();
        assert_eq!(insn.units().len(), 6);
    }

    #[test]
    fn truncated_instruction_is_reported() {
        let list = InstructionList::new(vec![0x0e00, 0x0014, 0x0001]);
        let e = list.validate().unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::TruncatedInput);
    }

    #[test]
    fn operand_refs_are_reported_and_rewritten() {
        // const-string/jumbo v1, string@0x10002; invoke-static {v0}, method@3; sget v2, field@7
        let units = vec![0x011b, 0x0002, 0x0001, 0x1071, 0x0003, 0x0000, 0x0260, 0x0007];
        let mut list = InstructionList::new(units);
        let used: Vec<(SectionType, u32)> = list.used_ids().map(|u| (u.section, u.index)).collect();
        assert_eq!(
            used,
            vec![(SectionType::StringId, 0x10002), (SectionType::MethodId, 3), (SectionType::FieldId, 7)]
        );

        list.visit_refs_mut(&mut |slot| {
            if slot.section() == SectionType::MethodId {
                slot.set_index(Some(9));
            }
        });
        assert_eq!(list.units()[4], 9);
        assert!(list.write(&mut vec![]).is_ok());

        let other = list.clone();
        let mut target = InstructionList::default();
        target.merge(&other, &mut IdentityTranslator).unwrap();
        assert_eq!(target, other);
    }

    #[test]
    fn narrow_operand_overflow_fails_write() {
        let mut list = InstructionList::new(vec![0x001a, 0x0001]);
        list.visit_refs_mut(&mut |slot| slot.set_index(Some(0x10000)));
        let e = list.write(&mut vec![]).unwrap_err();
        assert_eq!(e.kind(), DexErrorKind::IndexOutOfRange);
    }
}
