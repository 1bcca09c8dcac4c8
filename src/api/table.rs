//! The kernel function index: one row per registered primitive, grouped
//! by category and keyed within the category by ordinal (spec §3's
//! "Kernel function index entry" data model, §6's category assignments).

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::CallerPrivilege;

/// Category byte → human name, purely documentary (spec §6).
pub const CATEGORY_NAMES: &[(u8, &str)] = &[
    (0x1, "text"),
    (0x2, "disk"),
    (0x3, "filesystem"),
    (0x4, "file"),
    (0x5, "memory"),
    (0x6, "multitasker"),
    (0x7, "loader"),
    (0x8, "rtc"),
    (0x9, "random"),
    (0xA, "variable-list"),
    (0xB, "environment"),
    (0xC, "graphic"),
    (0xD, "image"),
    (0xE, "font"),
    (0xF, "window"),
    (0x10, "user"),
    (0x11, "network"),
    (0xFF, "misc"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerConstraint {
    pub non_null: bool,
    pub must_be_user: bool,
    pub must_be_kernel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueConstraint {
    pub non_zero: bool,
    pub positive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Void,
    Pointer(PointerConstraint),
    Value(ValueConstraint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgDecl {
    /// Argument width in 32-bit words — 2 for a 64-bit value/pointer pair,
    /// 1 otherwise (spec §4.d calling convention).
    pub dwords: u8,
    pub kind: ArgKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Integer,
    Pointer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEntry {
    pub function_number: u32,
    pub required_privilege: CallerPrivilege,
    pub args: Vec<ArgDecl>,
    pub return_kind: ReturnKind,
}

/// The categorized table of tables. Category 0xFF ("misc") lives at its
/// own slot rather than index 0 of a contiguous array, since ordinary
/// categories are sparse (0x1..0x11) and 0xFF sits far outside that range.
pub struct FunctionTable {
    categories: BTreeMap<u8, BTreeMap<u16, FunctionEntry>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        FunctionTable { categories: BTreeMap::new() }
    }

    /// Registers one entry. The ordinal used for lookup is the function
    /// number's low 12 bits, matching [`super::decode_function_number`].
    pub fn register(&mut self, entry: FunctionEntry) {
        let ordinal = (entry.function_number & 0xFFF) as u16;
        let top = entry.function_number >> 12;
        let category = if top == 0xFF { super::CATEGORY_MISC } else { top as u8 };
        self.categories.entry(category).or_default().insert(ordinal, entry);
    }

    /// Looks up by already-decoded category/ordinal. Ordinals with no
    /// registered entry (and categories with no table at all) both read as
    /// "not found" — spec §4.d: "Ordinals not present in the table reject
    /// with ERR_NOSUCHFUNCTION."
    pub fn lookup(&self, category: u8, ordinal: u16) -> Option<&FunctionEntry> {
        self.categories.get(&category)?.get(&ordinal)
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::new()
    }
}
