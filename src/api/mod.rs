//! Kernel API gateway (spec §4.d).
//!
//! The single entry point every call-gate trap lands on. `argListPtr[0]`
//! is the function number, `argListPtr[1]` a pointer to the packed
//! argument vector; dispatch resolves the category/ordinal pair to a
//! [`table::FunctionEntry`], validates privilege and every declared
//! argument, then hands off to the target.

pub mod table;

use crate::lib::error::{KernelError, Result};
use table::{ArgKind, FunctionTable, PointerConstraint, ReturnKind, ValueConstraint};

/// Category byte reserved for the "misc" table (spec §6).
pub const CATEGORY_MISC: u8 = 0xFF;

/// A process's declared privilege, as seen at the call-gate boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallerPrivilege {
    Supervisor = 0,
    User = 1,
}

/// The lowest virtual address considered kernel-owned; pointer arguments
/// tagged `USER` must fall below it, `KERNEL` ones at or above it. Real
/// value supplied by the (out-of-scope) memory manager at boot; a
/// plausible default is kept here so the gateway is self-contained for
/// testing.
pub const KERNEL_VIRTUAL_BASE: u32 = 0xC000_0000;

/// Outcome of one argument word, decoded per its declared `dwords` count.
#[derive(Debug, Clone, Copy)]
pub enum ArgWord {
    Value(i64),
    Pointer(u32),
}

/// Splits the number into `(category, ordinal)` per spec §4.d: category
/// 0xFF is "misc" and indexes the table of tables at slot 0; otherwise
/// `category = number >> 12`, ordinal = low 12 bits.
pub fn decode_function_number(number: u32) -> Result<(u8, u16)> {
    if !(0x1000..=0xFFFFF).contains(&number) {
        return Err(KernelError::NoSuchFunction);
    }
    let top = (number >> 12) as u32;
    let category = if top == 0xFF { CATEGORY_MISC } else { top as u8 };
    let ordinal = (number & 0xFFF) as u16;
    Ok((category, ordinal))
}

/// Runs the checks of spec §4.d in order, all fatal on failure, against
/// one already-resolved entry and its caller-supplied arguments.
pub fn validate_call(
    entry: &table::FunctionEntry,
    caller: CallerPrivilege,
    args: &[ArgWord],
) -> Result<()> {
    if (caller as u8) > (entry.required_privilege as u8) {
        return Err(KernelError::Permission);
    }
    if args.len() != entry.args.len() {
        return Err(KernelError::ArgumentCount);
    }
    for (word, decl) in args.iter().zip(entry.args.iter()) {
        match (decl.kind, word) {
            (ArgKind::Pointer(constraint), ArgWord::Pointer(addr)) => {
                check_pointer(constraint, *addr)?;
            }
            (ArgKind::Value(constraint), ArgWord::Value(v)) => {
                check_value(constraint, *v)?;
            }
            (ArgKind::Void, _) => {}
            _ => return Err(KernelError::Invalid),
        }
    }
    Ok(())
}

fn check_pointer(constraint: PointerConstraint, addr: u32) -> Result<()> {
    if constraint.non_null && addr == 0 {
        return Err(KernelError::NullParameter);
    }
    if constraint.must_be_user && addr != 0 && addr >= KERNEL_VIRTUAL_BASE {
        return Err(KernelError::Permission);
    }
    if constraint.must_be_kernel && addr < KERNEL_VIRTUAL_BASE {
        return Err(KernelError::Permission);
    }
    Ok(())
}

fn check_value(constraint: ValueConstraint, value: i64) -> Result<()> {
    if constraint.non_zero && value == 0 {
        return Err(KernelError::Invalid);
    }
    if constraint.positive && value < 0 {
        return Err(KernelError::Range);
    }
    Ok(())
}

/// `kernelApi(CS, argListPtr)`: resolves the function number against
/// `table`, validates, and returns the entry ready for the caller to
/// invoke. The actual far-call/epilogue machinery (spec §9's "process
/// image / far-call argument passing" design note) lives at the call-gate
/// trampoline, not here — this function is the dispatch + validation core
/// that trampoline calls into.
pub fn dispatch<'a>(
    table: &'a FunctionTable,
    number: u32,
    caller: CallerPrivilege,
    args: &[ArgWord],
) -> Result<&'a table::FunctionEntry> {
    let (category, ordinal) = decode_function_number(number)?;
    let entry = table.lookup(category, ordinal).ok_or(KernelError::NoSuchFunction)?;
    if entry.function_number != number {
        return Err(KernelError::NoSuchFunction);
    }
    validate_call(entry, caller, args)?;
    Ok(entry)
}

/// Declared return shape, used by the trampoline to decide whether a
/// failure is signalled as a negative integer or a null pointer.
pub fn failure_value(kind: ReturnKind, err: KernelError) -> i64 {
    match kind {
        ReturnKind::Pointer => 0,
        ReturnKind::Integer => err.code() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use table::{ArgDecl, FunctionEntry};

    #[test]
    fn misc_category_is_0xff() {
        let (cat, ord) = decode_function_number(0xFF010).unwrap();
        assert_eq!(cat, CATEGORY_MISC);
        assert_eq!(ord, 0x010);
    }

    #[test]
    fn ordinary_category_is_top_byte() {
        let (cat, ord) = decode_function_number(0x6_003).unwrap();
        assert_eq!(cat, 0x6);
        assert_eq!(ord, 0x003);
    }

    #[test]
    fn below_range_is_no_such_function() {
        assert_eq!(decode_function_number(0x0FFF), Err(KernelError::NoSuchFunction));
    }

    fn entry() -> FunctionEntry {
        FunctionEntry {
            function_number: 0x6001,
            required_privilege: CallerPrivilege::User,
            args: alloc::vec![ArgDecl {
                dwords: 1,
                kind: ArgKind::Pointer(PointerConstraint { non_null: true, must_be_user: true, must_be_kernel: false }),
            }],
            return_kind: ReturnKind::Integer,
        }
    }

    #[test]
    fn null_pointer_argument_is_rejected() {
        let e = entry();
        let args = [ArgWord::Pointer(0)];
        assert_eq!(validate_call(&e, CallerPrivilege::User, &args), Err(KernelError::NullParameter));
    }

    #[test]
    fn kernel_address_for_a_user_pointer_is_rejected() {
        let e = entry();
        let args = [ArgWord::Pointer(KERNEL_VIRTUAL_BASE + 4)];
        assert_eq!(validate_call(&e, CallerPrivilege::User, &args), Err(KernelError::Permission));
    }

    #[test]
    fn privilege_escalation_is_rejected() {
        let mut e = entry();
        e.required_privilege = CallerPrivilege::Supervisor;
        let args = [ArgWord::Pointer(4)];
        assert_eq!(validate_call(&e, CallerPrivilege::User, &args), Err(KernelError::Permission));
    }

    #[test]
    fn wrong_arg_count_is_rejected() {
        let e = entry();
        assert_eq!(validate_call(&e, CallerPrivilege::User, &[]), Err(KernelError::ArgumentCount));
    }
}
