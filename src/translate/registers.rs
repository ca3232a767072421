//! Register models: how machine register names map onto register-space varnodes.
//!
//! Sub-register views share their parent's offset with a smaller size (low bytes
//! first); `ah`-style high-byte views sit at offset + 1. Because varnode identity
//! includes the size, `eax` and `rax` are distinct values that
//! [overlap](crate::ir::Varnode::overlaps).

use crate::ir::Varnode;

/// Where a return address lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnLinkage {
    /// Pushed on the stack by the call; `ret` pops it
    Stack,
    /// Held in a link register
    LinkRegister(Varnode),
}

/// Condition flag varnodes of a model with a flags register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagLayout {
    /// Carry / unsigned borrow
    pub carry: Varnode,
    /// Parity of the low result byte
    pub parity: Varnode,
    /// Result is zero
    pub zero: Varnode,
    /// Result is negative
    pub sign: Varnode,
    /// Signed overflow
    pub overflow: Varnode,
}

impl FlagLayout {
    /// Returns `true` if `varnode` is one of the flags.
    #[must_use]
    pub fn contains(&self, varnode: &Varnode) -> bool {
        [self.carry, self.parity, self.zero, self.sign, self.overflow].contains(varnode)
    }
}

/// Naming and layout conventions of one register file.
pub trait RegisterModel: Send + Sync {
    /// Short model name.
    fn name(&self) -> &'static str;

    /// Resolves a register name to its varnode.
    fn register(&self, name: &str) -> Option<Varnode>;

    /// Names a register-space varnode, if it matches a register exactly.
    fn register_name(&self, varnode: &Varnode) -> Option<String>;

    /// The stack pointer.
    fn stack_pointer(&self) -> Varnode;

    /// The frame pointer, if the model has one.
    fn frame_pointer(&self) -> Option<Varnode> {
        None
    }

    /// Size of a code or data pointer in bytes.
    fn pointer_size(&self) -> u32;

    /// Flag varnodes, or `None` for a flag-less register file.
    fn flags(&self) -> Option<FlagLayout>;

    /// How calls pass the return address.
    fn return_linkage(&self) -> ReturnLinkage;

    /// Full register implicitly zero-extended when `written` is written.
    fn widened_on_write(&self, _written: &Varnode) -> Option<Varnode> {
        None
    }

    /// Full register holding `view` when `view` is a narrower view of it.
    fn parent_register(&self, _view: &Varnode) -> Option<Varnode> {
        None
    }

    /// Returns `true` if `varnode` is a condition flag.
    fn is_flag(&self, varnode: &Varnode) -> bool {
        self.flags().is_some_and(|flags| flags.contains(varnode))
    }
}

const X86_GPR: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];
const X86_GPR32: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];
const X86_GPR16: [&str; 8] = ["ax", "cx", "dx", "bx", "sp", "bp", "si", "di"];
const X86_GPR8: [&str; 8] = ["al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil"];
const X86_GPR8_HIGH: [&str; 4] = ["ah", "ch", "dh", "bh"];

const X86_RIP: u64 = 0x80;
const X86_RFLAGS: u64 = 0x88;
const X86_XMM: u64 = 0x100;

const X86_CF: u64 = X86_RFLAGS;
const X86_PF: u64 = X86_RFLAGS + 2;
const X86_ZF: u64 = X86_RFLAGS + 6;
const X86_SF: u64 = X86_RFLAGS + 7;
const X86_OF: u64 = X86_RFLAGS + 11;

/// The x86-64 register file.
///
/// General purpose registers sit 8 bytes apart starting at offset 0 in the order
/// `rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8..r15`. Flags are one-byte varnodes
/// at `RFLAGS` plus their bit index; `xmm0..xmm15` are 16 bytes each.
///
/// # Examples
///
/// ```rust
/// use irscope::translate::{RegisterModel, X86_64};
///
/// let model = X86_64;
/// let rax = model.register("rax").unwrap();
/// let ah = model.register("ah").unwrap();
/// assert_eq!(ah.offset(), rax.offset() + 1);
/// assert_eq!(model.register_name(&ah).as_deref(), Some("ah"));
/// assert!(model.flags().is_some());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct X86_64;

impl X86_64 {
    fn gpr_offset(index: usize) -> u64 {
        index as u64 * 8
    }
}

impl RegisterModel for X86_64 {
    fn name(&self) -> &'static str {
        "x86-64"
    }

    fn register(&self, name: &str) -> Option<Varnode> {
        if let Some(i) = X86_GPR.iter().position(|&r| r == name) {
            return Some(Varnode::register(Self::gpr_offset(i), 8));
        }
        if let Some(i) = X86_GPR32.iter().position(|&r| r == name) {
            return Some(Varnode::register(Self::gpr_offset(i), 4));
        }
        if let Some(i) = X86_GPR16.iter().position(|&r| r == name) {
            return Some(Varnode::register(Self::gpr_offset(i), 2));
        }
        if let Some(i) = X86_GPR8.iter().position(|&r| r == name) {
            return Some(Varnode::register(Self::gpr_offset(i), 1));
        }
        if let Some(i) = X86_GPR8_HIGH.iter().position(|&r| r == name) {
            return Some(Varnode::register(Self::gpr_offset(i) + 1, 1));
        }

        // r8d, r8w, r8b
        if let Some(rest) = name.strip_prefix('r') {
            let (digits, size) = match rest.char_indices().last() {
                Some((i, 'd')) => (&rest[..i], 4),
                Some((i, 'w')) => (&rest[..i], 2),
                Some((i, 'b')) => (&rest[..i], 1),
                _ => ("", 0),
            };
            if let Ok(n @ 8..=15) = digits.parse::<usize>() {
                return Some(Varnode::register(Self::gpr_offset(n), size));
            }
        }

        if let Some(rest) = name.strip_prefix("xmm") {
            if let Ok(n @ 0..=15) = rest.parse::<u64>() {
                return Some(Varnode::register(X86_XMM + n * 16, 16));
            }
        }

        match name {
            "rip" => Some(Varnode::register(X86_RIP, 8)),
            "cf" => Some(Varnode::register(X86_CF, 1)),
            "pf" => Some(Varnode::register(X86_PF, 1)),
            "zf" => Some(Varnode::register(X86_ZF, 1)),
            "sf" => Some(Varnode::register(X86_SF, 1)),
            "of" => Some(Varnode::register(X86_OF, 1)),
            _ => None,
        }
    }

    fn register_name(&self, varnode: &Varnode) -> Option<String> {
        if !varnode.is_register() {
            return None;
        }
        let offset = varnode.offset();
        let size = varnode.size();

        if offset < 128 {
            let index = (offset / 8) as usize;
            let high = offset % 8 == 1;
            if high {
                return (size == 1 && index < 4).then(|| X86_GPR8_HIGH[index].to_string());
            }
            if offset % 8 != 0 {
                return None;
            }
            return match (size, index) {
                (8, _) => Some(X86_GPR[index].to_string()),
                (4, 0..=7) => Some(X86_GPR32[index].to_string()),
                (2, 0..=7) => Some(X86_GPR16[index].to_string()),
                (1, 0..=7) => Some(X86_GPR8[index].to_string()),
                (4, _) => Some(format!("r{index}d")),
                (2, _) => Some(format!("r{index}w")),
                (1, _) => Some(format!("r{index}b")),
                _ => None,
            };
        }

        match (offset, size) {
            (X86_RIP, 8) => Some("rip".into()),
            (X86_CF, 1) => Some("CF".into()),
            (X86_PF, 1) => Some("PF".into()),
            (X86_ZF, 1) => Some("ZF".into()),
            (X86_SF, 1) => Some("SF".into()),
            (X86_OF, 1) => Some("OF".into()),
            (o, s) if o >= X86_XMM && (o - X86_XMM) % 16 == 0 && o < X86_XMM + 256 => {
                let n = (o - X86_XMM) / 16;
                match s {
                    16 => Some(format!("xmm{n}")),
                    8 => Some(format!("xmm{n}_q")),
                    4 => Some(format!("xmm{n}_d")),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn stack_pointer(&self) -> Varnode {
        Varnode::register(Self::gpr_offset(4), 8)
    }

    fn frame_pointer(&self) -> Option<Varnode> {
        Some(Varnode::register(Self::gpr_offset(5), 8))
    }

    fn pointer_size(&self) -> u32 {
        8
    }

    fn flags(&self) -> Option<FlagLayout> {
        Some(FlagLayout {
            carry: Varnode::register(X86_CF, 1),
            parity: Varnode::register(X86_PF, 1),
            zero: Varnode::register(X86_ZF, 1),
            sign: Varnode::register(X86_SF, 1),
            overflow: Varnode::register(X86_OF, 1),
        })
    }

    fn return_linkage(&self) -> ReturnLinkage {
        ReturnLinkage::Stack
    }

    fn widened_on_write(&self, written: &Varnode) -> Option<Varnode> {
        let offset = written.offset();
        (written.is_register() && written.size() == 4 && offset < 128 && offset % 8 == 0)
            .then(|| Varnode::register(offset, 8))
    }

    fn parent_register(&self, view: &Varnode) -> Option<Varnode> {
        let offset = view.offset();
        (view.is_register() && view.size() < 8 && offset < 128)
            .then(|| Varnode::register(offset - offset % 8, 8))
    }
}

const GENERIC_SP: u64 = 0x1000;
const GENERIC_LR: u64 = 0x1008;

/// A flag-less load/store register file.
///
/// `r0..rN` are 64-bit with `rNd`, `rNw` and `rNb` views of the low 4, 2 and 1
/// bytes; `sp` and `lr` are separate 64-bit registers. Returns go through `lr`.
///
/// # Examples
///
/// ```rust
/// use irscope::translate::{Generic, RegisterModel, ReturnLinkage};
///
/// let model = Generic::default();
/// let r1 = model.register("r1").unwrap();
/// let r1d = model.register("r1d").unwrap();
/// assert!(r1.contains(&r1d));
/// assert!(model.flags().is_none());
/// assert!(matches!(model.return_linkage(), ReturnLinkage::LinkRegister(_)));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Generic {
    registers: u64,
}

impl Default for Generic {
    fn default() -> Self {
        Self::new(32)
    }
}

impl Generic {
    /// A register file with `registers` general purpose registers.
    #[must_use]
    pub fn new(registers: u64) -> Self {
        Generic {
            registers: registers.min(GENERIC_SP / 8),
        }
    }

    fn link_register() -> Varnode {
        Varnode::register(GENERIC_LR, 8)
    }
}

impl RegisterModel for Generic {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn register(&self, name: &str) -> Option<Varnode> {
        match name {
            "sp" => return Some(self.stack_pointer()),
            "lr" => return Some(Self::link_register()),
            _ => {}
        }
        let rest = name.strip_prefix('r')?;
        let (digits, size) = match rest.char_indices().last() {
            Some((i, 'd')) => (&rest[..i], 4),
            Some((i, 'w')) => (&rest[..i], 2),
            Some((i, 'b')) => (&rest[..i], 1),
            _ => (rest, 8),
        };
        let n: u64 = digits.parse().ok()?;
        (n < self.registers).then(|| Varnode::register(n * 8, size))
    }

    fn register_name(&self, varnode: &Varnode) -> Option<String> {
        if !varnode.is_register() {
            return None;
        }
        match (varnode.offset(), varnode.size()) {
            (GENERIC_SP, 8) => return Some("sp".into()),
            (GENERIC_LR, 8) => return Some("lr".into()),
            _ => {}
        }
        let offset = varnode.offset();
        if offset % 8 != 0 || offset / 8 >= self.registers {
            return None;
        }
        let n = offset / 8;
        match varnode.size() {
            8 => Some(format!("r{n}")),
            4 => Some(format!("r{n}d")),
            2 => Some(format!("r{n}w")),
            1 => Some(format!("r{n}b")),
            _ => None,
        }
    }

    fn stack_pointer(&self) -> Varnode {
        Varnode::register(GENERIC_SP, 8)
    }

    fn pointer_size(&self) -> u32 {
        8
    }

    fn flags(&self) -> Option<FlagLayout> {
        None
    }

    fn return_linkage(&self) -> ReturnLinkage {
        ReturnLinkage::LinkRegister(Self::link_register())
    }

    fn parent_register(&self, view: &Varnode) -> Option<Varnode> {
        let offset = view.offset();
        (view.is_register()
            && view.size() < 8
            && offset % 8 == 0
            && offset / 8 < self.registers)
            .then(|| Varnode::register(offset, 8))
    }
}
