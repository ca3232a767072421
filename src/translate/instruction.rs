//! Decoded machine instructions, the input of the front end.

use std::fmt;

use crate::{Error, Result};

/// A memory reference `size ptr [base + index*scale + displacement]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryOperand {
    /// Base register name
    pub base: Option<String>,
    /// Index register name
    pub index: Option<String>,
    /// Index multiplier (1, 2, 4 or 8)
    pub scale: u8,
    /// Signed displacement
    pub displacement: i64,
    /// Access size in bytes when given explicitly (`dword ptr`)
    pub size: Option<u32>,
}

impl fmt::Display for MemoryOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(size) = self.size {
            let keyword = match size {
                1 => "byte",
                2 => "word",
                4 => "dword",
                8 => "qword",
                16 => "xmmword",
                _ => "",
            };
            if !keyword.is_empty() {
                write!(f, "{keyword} ptr ")?;
            }
        }
        write!(f, "[")?;
        let mut first = true;
        if let Some(base) = &self.base {
            write!(f, "{base}")?;
            first = false;
        }
        if let Some(index) = &self.index {
            if !first {
                write!(f, " + ")?;
            }
            write!(f, "{index}*{}", self.scale)?;
            first = false;
        }
        if self.displacement != 0 || first {
            if first {
                write!(f, "{:#x}", self.displacement)?;
            } else if self.displacement < 0 {
                write!(f, " - {:#x}", self.displacement.unsigned_abs())?;
            } else {
                write!(f, " + {:#x}", self.displacement)?;
            }
        }
        write!(f, "]")
    }
}

/// One instruction operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// A register, by lowercase name
    Register(String),
    /// An immediate; branch targets are absolute addresses
    Immediate(i64),
    /// A memory reference
    Memory(MemoryOperand),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(name) => write!(f, "{name}"),
            Operand::Immediate(value) if *value < 0 => write!(f, "-{:#x}", value.unsigned_abs()),
            Operand::Immediate(value) => write!(f, "{value:#x}"),
            Operand::Memory(mem) => write!(f, "{mem}"),
        }
    }
}

/// A decoded instruction.
///
/// The front end consumes instructions that a disassembler has already decoded;
/// [`Instruction::parse`] builds them from assembly text.
///
/// # Examples
///
/// ```rust
/// use irscope::translate::{Instruction, Operand};
///
/// let insn = Instruction::parse(0x1000, 4, "add r1, r1, r2")?;
/// assert_eq!(insn.mnemonic, "add");
/// assert_eq!(insn.operands.len(), 3);
/// assert_eq!(insn.operands[2], Operand::Register("r2".into()));
/// assert_eq!(insn.next_address(), 0x1004);
/// # Ok::<(), irscope::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Address of the first byte
    pub address: u64,
    /// Lowercase mnemonic
    pub mnemonic: String,
    /// Operands in Intel order (destination first)
    pub operands: Vec<Operand>,
    /// Encoded length in bytes
    pub length: u32,
}

impl Instruction {
    /// Creates an instruction from already decoded parts.
    pub fn new(address: u64, length: u32, mnemonic: &str, operands: Vec<Operand>) -> Self {
        Instruction {
            address,
            mnemonic: mnemonic.to_ascii_lowercase(),
            operands,
            length,
        }
    }

    /// Address of the instruction that follows in memory.
    #[must_use]
    pub fn next_address(&self) -> u64 {
        self.address.wrapping_add(u64::from(self.length))
    }

    /// Parses Intel-syntax assembly text.
    ///
    /// Accepted operands are register names, decimal or `0x` hexadecimal
    /// immediates (optionally negative), and memory references of the form
    /// `[base + index*scale + disp]` with an optional `byte|word|dword|qword|xmmword
    /// ptr` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOperand`] for empty text or unparseable operands.
    pub fn parse(address: u64, length: u32, text: &str) -> Result<Instruction> {
        let text = text.trim();
        let (mnemonic, rest) = match text.find(char::is_whitespace) {
            Some(split) => (&text[..split], text[split..].trim()),
            None => (text, ""),
        };
        if mnemonic.is_empty() {
            return Err(Error::InvalidOperand(format!(
                "empty instruction text at 0x{address:x}"
            )));
        }

        let operands = split_operands(rest)
            .into_iter()
            .map(parse_operand)
            .collect::<Result<Vec<_>>>()?;

        Ok(Instruction::new(address, length, mnemonic, operands))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{operand}")?;
        }
        Ok(())
    }
}

/// Splits on commas outside brackets.
fn split_operands(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts
}

fn parse_operand(text: &str) -> Result<Operand> {
    let lowered = text.trim().to_ascii_lowercase();
    let (size, body) = strip_size_prefix(&lowered);

    if let Some(inner) = body.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
        return parse_memory(inner, size).map(Operand::Memory);
    }
    if size.is_some() {
        return Err(Error::InvalidOperand(format!(
            "size prefix without memory reference: '{text}'"
        )));
    }
    if let Some(value) = parse_immediate(body) {
        return Ok(Operand::Immediate(value));
    }
    if is_identifier(body) {
        return Ok(Operand::Register(body.to_string()));
    }
    Err(Error::InvalidOperand(format!("cannot parse operand '{text}'")))
}

fn strip_size_prefix(text: &str) -> (Option<u32>, &str) {
    const PREFIXES: [(&str, u32); 5] = [
        ("xmmword", 16),
        ("qword", 8),
        ("dword", 4),
        ("word", 2),
        ("byte", 1),
    ];
    for (keyword, size) in PREFIXES {
        if let Some(rest) = text.strip_prefix(keyword) {
            let rest = rest.trim_start();
            if let Some(rest) = rest.strip_prefix("ptr") {
                return (Some(size), rest.trim_start());
            }
        }
    }
    (None, text)
}

fn parse_immediate(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()?
    } else if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse::<u64>().ok()?
    } else {
        return None;
    };
    let value = magnitude as i64;
    Some(if negative { value.wrapping_neg() } else { value })
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_memory(inner: &str, size: Option<u32>) -> Result<MemoryOperand> {
    let mut mem = MemoryOperand {
        scale: 1,
        size,
        ..MemoryOperand::default()
    };

    let mut terms: Vec<(bool, String)> = Vec::new();
    let mut current = String::new();
    let mut negative = false;
    for c in inner.chars() {
        match c {
            '+' | '-' => {
                if !current.trim().is_empty() {
                    terms.push((negative, current.trim().to_string()));
                }
                current.clear();
                negative = c == '-';
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        terms.push((negative, current.trim().to_string()));
    }
    if terms.is_empty() {
        return Err(Error::InvalidOperand(format!("empty memory reference '[{inner}]'")));
    }

    for (negative, term) in terms {
        if let Some((left, right)) = term.split_once('*') {
            let (left, right) = (left.trim(), right.trim());
            let (register, scale) = match (parse_immediate(left), parse_immediate(right)) {
                (None, Some(scale)) => (left, scale),
                (Some(scale), None) => (right, scale),
                _ => {
                    return Err(Error::InvalidOperand(format!("bad scaled index '{term}'")));
                }
            };
            if negative || !matches!(scale, 1 | 2 | 4 | 8) || mem.index.is_some() {
                return Err(Error::InvalidOperand(format!("bad scaled index '{term}'")));
            }
            mem.index = Some(register.to_string());
            mem.scale = scale as u8;
        } else if let Some(value) = parse_immediate(&term) {
            mem.displacement = if negative {
                mem.displacement.wrapping_sub(value)
            } else {
                mem.displacement.wrapping_add(value)
            };
        } else if is_identifier(&term) && !negative {
            if mem.base.is_none() {
                mem.base = Some(term);
            } else if mem.index.is_none() {
                mem.index = Some(term);
            } else {
                return Err(Error::InvalidOperand(format!(
                    "too many registers in '[{inner}]'"
                )));
            }
        } else {
            return Err(Error::InvalidOperand(format!("bad memory term '{term}'")));
        }
    }

    Ok(mem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registers_and_immediates() {
        let insn = Instruction::parse(0x1000, 3, "MOV r1, 0x10").unwrap();
        assert_eq!(insn.mnemonic, "mov");
        assert_eq!(
            insn.operands,
            vec![Operand::Register("r1".into()), Operand::Immediate(0x10)]
        );

        let insn = Instruction::parse(0x1000, 3, "sub rsp, -8").unwrap();
        assert_eq!(insn.operands[1], Operand::Immediate(-8));
    }

    #[test]
    fn test_parse_no_operands() {
        let insn = Instruction::parse(0x1000, 1, "ret").unwrap();
        assert!(insn.operands.is_empty());
        assert!(Instruction::parse(0x1000, 1, "   ").is_err());
    }

    #[test]
    fn test_parse_memory() {
        let insn =
            Instruction::parse(0x1000, 7, "mov eax, dword ptr [rbx + rcx*4 - 0x10]").unwrap();
        assert_eq!(
            insn.operands[1],
            Operand::Memory(MemoryOperand {
                base: Some("rbx".into()),
                index: Some("rcx".into()),
                scale: 4,
                displacement: -0x10,
                size: Some(4),
            })
        );
        assert_eq!(insn.to_string(), "mov eax, dword ptr [rbx + rcx*4 - 0x10]");
    }

    #[test]
    fn test_parse_memory_absolute() {
        let insn = Instruction::parse(0x1000, 7, "mov rax, qword ptr [0x4000]").unwrap();
        match &insn.operands[1] {
            Operand::Memory(mem) => {
                assert!(mem.base.is_none());
                assert_eq!(mem.displacement, 0x4000);
            }
            other => panic!("unexpected operand {other:?}"),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(Instruction::parse(0, 1, "mov r1, [r2*3]").is_err());
        assert!(Instruction::parse(0, 1, "mov r1, %%").is_err());
        assert!(Instruction::parse(0, 1, "mov r1, dword ptr r2").is_err());
    }
}
