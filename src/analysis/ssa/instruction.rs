//! SSA-form operations.

use std::fmt;

use crate::{analysis::ssa::SsaValue, ir::OpCode};

/// An IR operation whose varnodes have been renamed to SSA values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsaOp {
    /// The operator
    pub opcode: OpCode,
    /// Defined value, if any
    pub output: Option<SsaValue>,
    /// Read values, in operator order
    pub inputs: Vec<SsaValue>,
    /// Address of the originating instruction
    pub address: u64,
    /// Order within the originating instruction
    pub seq: u32,
}

impl fmt::Display for SsaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(output) = &self.output {
            write!(f, "{output} = ")?;
        }
        write!(f, "{}", self.opcode)?;
        for (i, input) in self.inputs.iter().enumerate() {
            let separator = if i == 0 { " " } else { ", " };
            write!(f, "{separator}{input}")?;
        }
        Ok(())
    }
}
