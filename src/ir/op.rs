//! IR operations.

use std::fmt;

use crate::{
    ir::{AddressSpace, OpCode, OpFlags, OutputRule, SizeRule, Varnode},
    utils::graph::NodeId,
    Result,
};

/// A single P-code style operation.
///
/// `address` is the originating instruction and `seq` the position among the
/// operations that instruction lowered to. `block` is stamped by the CFG builder
/// and stays `None` for free-standing operations.
///
/// # Examples
///
/// ```rust
/// use irscope::ir::{OpCode, PcodeOp, Varnode};
///
/// let r1 = Varnode::register(8, 8);
/// let r2 = Varnode::register(16, 8);
/// let op = PcodeOp::new(OpCode::IntAdd, Some(r1), vec![r1, r2], 0x1008);
///
/// assert!(op.validate().is_ok());
/// assert_eq!(
///     op.to_string(),
///     "(register, 0x8, 8) = INT_ADD (register, 0x8, 8), (register, 0x10, 8)"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcodeOp {
    /// The operator
    pub opcode: OpCode,
    /// Written varnode, if any
    pub output: Option<Varnode>,
    /// Read varnodes, in operator order
    pub inputs: Vec<Varnode>,
    /// Address of the originating instruction
    pub address: u64,
    /// Order within the originating instruction
    pub seq: u32,
    /// Owning basic block, once a CFG has been built
    pub block: Option<NodeId>,
}

impl PcodeOp {
    /// Creates an operation with `seq` 0 and no owning block.
    #[must_use]
    pub fn new(opcode: OpCode, output: Option<Varnode>, inputs: Vec<Varnode>, address: u64) -> Self {
        PcodeOp {
            opcode,
            output,
            inputs,
            address,
            seq: 0,
            block: None,
        }
    }

    /// Sets the sequence number.
    #[must_use]
    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    /// Returns `true` if this operation ends a basic block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    /// Returns `true` for direct and indirect calls.
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.opcode.flags().contains(OpFlags::CALL)
    }

    /// Static target of a `BRANCH`, `CBRANCH` or `CALL`.
    ///
    /// Targets are ram-space varnodes holding the code address.
    #[must_use]
    pub fn branch_target(&self) -> Option<u64> {
        match self.opcode {
            OpCode::Branch | OpCode::CBranch | OpCode::Call => self
                .inputs
                .first()
                .filter(|target| target.space() == AddressSpace::Ram)
                .map(Varnode::offset),
            _ => None,
        }
    }

    /// Condition of a `CBRANCH`.
    #[must_use]
    pub fn condition(&self) -> Option<Varnode> {
        match self.opcode {
            OpCode::CBranch => self.inputs.get(1).copied(),
            _ => None,
        }
    }

    /// Checks arity, output presence and the operator's size rule.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedOperation`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let arity = self.opcode.arity();
        if !arity.accepts(self.inputs.len()) {
            return Err(malformed_error!(
                "{} at 0x{:x} takes {} input(s), found {}",
                self.opcode,
                self.address,
                arity,
                self.inputs.len()
            ));
        }

        match (self.opcode.output(), &self.output) {
            (OutputRule::Required, None) => {
                return Err(malformed_error!(
                    "{} at 0x{:x} requires an output",
                    self.opcode,
                    self.address
                ));
            }
            (OutputRule::Forbidden, Some(output)) => {
                return Err(malformed_error!(
                    "{} at 0x{:x} cannot write {}",
                    self.opcode,
                    self.address,
                    output
                ));
            }
            _ => {}
        }

        if let Some(output) = self.output {
            if output.is_constant() {
                return Err(malformed_error!(
                    "{} at 0x{:x} writes a constant",
                    self.opcode,
                    self.address
                ));
            }
        }

        self.check_sizes()?;

        if let Some(condition) = self.condition() {
            if condition.size() != 1 {
                return Err(malformed_error!(
                    "CBRANCH at 0x{:x} has a {}-byte condition",
                    self.address,
                    condition.size()
                ));
            }
        }

        Ok(())
    }

    fn check_sizes(&self) -> Result<()> {
        let out_size = self.output.map(|o| o.size());
        let first = self.inputs.first().map(Varnode::size);

        let violation = match self.opcode.size_rule() {
            SizeRule::SameAsInputs => {
                let expected = first.or(out_size);
                let inputs_agree = self.inputs.iter().all(|v| Some(v.size()) == expected);
                let output_agrees = out_size.is_none() || out_size == expected;
                (!inputs_agree || !output_agrees).then(|| "operands differ in size".to_string())
            }
            SizeRule::Boolean => {
                let paired = match self.inputs.as_slice() {
                    [a, b] => a.size() == b.size(),
                    _ => true,
                };
                if out_size != Some(1) {
                    Some("boolean output must be 1 byte".to_string())
                } else if !paired {
                    Some("compared operands differ in size".to_string())
                } else {
                    None
                }
            }
            SizeRule::Extend => match (out_size, first) {
                (Some(out), Some(input)) if out <= input => {
                    Some(format!("extension from {input} to {out} bytes"))
                }
                _ => None,
            },
            SizeRule::Truncate => match (out_size, first) {
                (Some(out), Some(input)) => {
                    let skip = self
                        .inputs
                        .get(1)
                        .and_then(Varnode::constant_value)
                        .unwrap_or(0);
                    (u64::from(out).saturating_add(skip) > u64::from(input))
                        .then(|| format!("{out} bytes at offset {skip} exceed {input}-byte input"))
                }
                _ => None,
            },
            SizeRule::Shift => match (out_size, first) {
                (Some(out), Some(input)) if out != input => {
                    Some(format!("shift output {out} bytes, shifted value {input}"))
                }
                _ => None,
            },
            SizeRule::Free => None,
        };

        match violation {
            Some(reason) => Err(malformed_error!(
                "{} at 0x{:x}: {}",
                self.opcode,
                self.address,
                reason
            )),
            None => Ok(()),
        }
    }
}

impl fmt::Display for PcodeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(output) = &self.output {
            write!(f, "{output} = ")?;
        }
        write!(f, "{}", self.opcode)?;
        for (i, input) in self.inputs.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{input}")?;
        }
        Ok(())
    }
}
