//! Address-ordered IR for one function.

use std::{collections::BTreeMap, fmt};

use crate::{ir::PcodeOp, Result};

/// The lowered operations of one function, in address order.
///
/// Besides the operations, the program remembers which addresses started an
/// instruction (so branch targets landing on an instruction that lowered to
/// nothing still resolve) and the names of user-defined operations referenced by
/// `CALLOTHER`.
#[derive(Debug, Clone, Default)]
pub struct IrProgram {
    ops: Vec<PcodeOp>,
    instructions: BTreeMap<u64, u32>,
    user_ops: Vec<String>,
}

impl IrProgram {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the lowering of the instruction at `address`.
    ///
    /// Operations are re-stamped with the instruction address and consecutive
    /// sequence numbers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedOperation`] if `address` does not follow the
    /// previously added instruction.
    pub fn add_instruction(&mut self, address: u64, length: u32, ops: Vec<PcodeOp>) -> Result<()> {
        if let Some((&last, _)) = self.instructions.last_key_value() {
            if address <= last {
                return Err(malformed_error!(
                    "instruction at 0x{:x} does not follow 0x{:x}",
                    address,
                    last
                ));
            }
        }

        self.instructions.insert(address, length);
        for (seq, mut op) in ops.into_iter().enumerate() {
            op.address = address;
            op.seq = u32::try_from(seq).unwrap_or(u32::MAX);
            self.ops.push(op);
        }
        Ok(())
    }

    /// Interns a user-defined operation name and returns its index.
    pub fn user_op_index(&mut self, name: &str) -> u64 {
        let index = match self.user_ops.iter().position(|n| n == name) {
            Some(index) => index,
            None => {
                self.user_ops.push(name.to_string());
                self.user_ops.len() - 1
            }
        };
        index as u64
    }

    /// Name of a user-defined operation.
    #[must_use]
    pub fn user_op_name(&self, index: u64) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.user_ops.get(i))
            .map(String::as_str)
    }

    /// All operations in address order.
    #[must_use]
    pub fn ops(&self) -> &[PcodeOp] {
        &self.ops
    }

    /// Mutable access for stamping owning blocks.
    pub(crate) fn ops_mut(&mut self) -> &mut [PcodeOp] {
        &mut self.ops
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if no operation was lowered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of translated instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Returns `true` if an instruction starts at `address`.
    #[must_use]
    pub fn is_instruction_start(&self, address: u64) -> bool {
        self.instructions.contains_key(&address)
    }

    /// Address following the instruction at `address`.
    #[must_use]
    pub fn next_address(&self, address: u64) -> Option<u64> {
        self.instructions
            .get(&address)
            .map(|&length| address + u64::from(length))
    }

    /// Index of the first operation at or after `address`.
    #[must_use]
    pub fn first_op_at_or_after(&self, address: u64) -> Option<usize> {
        let index = self.ops.partition_point(|op| op.address < address);
        (index < self.ops.len()).then_some(index)
    }

    /// Validates every operation.
    ///
    /// # Errors
    ///
    /// Returns the first [`crate::Error::MalformedOperation`] found.
    pub fn validate(&self) -> Result<()> {
        self.ops.iter().try_for_each(PcodeOp::validate)
    }
}

impl fmt::Display for IrProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.ops {
            writeln!(f, "0x{:08x}:{:02}  {}", op.address, op.seq, op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{OpCode, Varnode};

    fn copy(dst: u64, value: u64) -> PcodeOp {
        PcodeOp::new(
            OpCode::Copy,
            Some(Varnode::register(dst, 8)),
            vec![Varnode::constant(value, 8)],
            0,
        )
    }

    #[test]
    fn test_add_instruction_stamps_ops() {
        let mut program = IrProgram::new();
        program
            .add_instruction(0x1000, 4, vec![copy(0, 1), copy(8, 2)])
            .unwrap();
        program.add_instruction(0x1004, 2, vec![]).unwrap();
        program.add_instruction(0x1006, 4, vec![copy(0, 3)]).unwrap();

        assert_eq!(program.len(), 3);
        assert_eq!(program.instruction_count(), 3);
        assert_eq!(program.ops()[1].address, 0x1000);
        assert_eq!(program.ops()[1].seq, 1);
        assert_eq!(program.next_address(0x1004), Some(0x1006));
        assert_eq!(program.first_op_at_or_after(0x1004), Some(2));
        assert_eq!(program.first_op_at_or_after(0x1007), None);
        assert!(program.is_instruction_start(0x1004));
    }

    #[test]
    fn test_out_of_order_instruction() {
        let mut program = IrProgram::new();
        program.add_instruction(0x1004, 4, vec![]).unwrap();
        assert!(program.add_instruction(0x1000, 4, vec![]).is_err());
    }

    #[test]
    fn test_user_ops_are_interned() {
        let mut program = IrProgram::new();
        assert_eq!(program.user_op_index("syscall"), 0);
        assert_eq!(program.user_op_index("cpuid"), 1);
        assert_eq!(program.user_op_index("syscall"), 0);
        assert_eq!(program.user_op_name(1), Some("cpuid"));
        assert_eq!(program.user_op_name(7), None);
    }

    #[test]
    fn test_listing() {
        let mut program = IrProgram::new();
        program.add_instruction(0x1000, 4, vec![copy(8, 0)]).unwrap();
        assert_eq!(
            program.to_string(),
            "0x00001000:00  (register, 0x8, 8) = COPY (const, 0x0, 8)\n"
        );
    }
}
