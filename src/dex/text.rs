//! A one-way, assembly-like text projection of the structure, for inspection
//! and diffing. Nothing parses this text back.

use std::fmt;

use crate::dex::ids::{DexString, TypeId};
use crate::dex::key::{FieldKey, MethodKey, ProtoKey, TypeKey};
use crate::dex::reference::{IdRef, UsedId};
use crate::dex::section::{SectionRegistry, SectionType};

pub trait TextFormat
{
    fn append(&self, w: &mut TextWriter, sections: &SectionRegistry);

    fn to_text(&self, sections: &SectionRegistry) -> String
    {
        let mut w = TextWriter::new();
        self.append(&mut w, sections);
        w.finish()
    }
}

#[derive(Debug, Default)]
pub struct TextWriter
{
    out: String,
    indent: usize,
}

impl TextWriter
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn line(&mut self, text: impl AsRef<str>)
    {
        for _ in 0..self.indent
        {
            self.out.push_str("    ");
        }
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    pub fn blank(&mut self)
    {
        self.out.push('\n');
    }

    pub fn indented(&mut self, f: impl FnOnce(&mut TextWriter))
    {
        self.indent += 1;
        f(self);
        self.indent -= 1;
    }

    pub fn as_str(&self) -> &str
    {
        &self.out
    }

    pub fn finish(self) -> String
    {
        self.out
    }
}

impl fmt::Display for TextWriter
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.out)
    }
}

/// Quote and escape a string constant the way smali does.
pub fn quote(s: &str) -> String
{
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars()
    {
        match c
        {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn type_name(sections: &SectionRegistry, r: &IdRef<TypeId>) -> String
{
    match r.index()
    {
        Some(i) => describe(sections, SectionType::TypeId, i),
        None => "<none>".to_string(),
    }
}

pub fn string_literal(sections: &SectionRegistry, r: &IdRef<DexString>) -> String
{
    match r.index()
    {
        Some(i) => describe(sections, SectionType::StringId, i),
        None => "<none>".to_string(),
    }
}

/// Readable form of a pool reference, or `kind@index` when it does not resolve.
pub fn describe(sections: &SectionRegistry, section: SectionType, index: u32) -> String
{
    let resolved = match section
    {
        SectionType::StringId | SectionType::StringData => sections.strings.get(index).map(|s| quote(&s.to_string_lossy())),
        SectionType::TypeId => TypeKey::of(sections, index).ok().map(|k| k.to_string()),
        SectionType::ProtoId => ProtoKey::of(sections, index).ok().map(|k| k.to_string()),
        SectionType::FieldId => FieldKey::of(sections, index).ok().map(|k| k.to_string()),
        SectionType::MethodId => MethodKey::of(sections, index).ok().map(|k| k.to_string()),
        _ => None,
    };
    resolved.unwrap_or_else(|| format!("{}@{}", section_tag(section), index))
}

pub fn describe_used(sections: &SectionRegistry, used: &UsedId) -> String
{
    describe(sections, used.section, used.index)
}

fn section_tag(section: SectionType) -> &'static str
{
    match section
    {
        SectionType::StringId | SectionType::StringData => "string",
        SectionType::TypeId => "type",
        SectionType::ProtoId => "proto",
        SectionType::FieldId => "field",
        SectionType::MethodId => "method",
        SectionType::Code => "code",
        SectionType::DebugInfo => "debug_info",
        _ => "item",
    }
}
