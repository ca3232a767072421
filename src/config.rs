//! Configuration for the decompiler pipeline.
//!
//! Every stage reads its own section of [`DecompilerConfig`]; the sections can
//! also be passed to the stages directly when they are run on their own.

use crate::translate::UnsupportedPolicy;

/// Configuration for the whole pipeline.
#[derive(Debug, Clone)]
pub struct DecompilerConfig {
    /// Default cap on translated instructions per function (default: 10 000).
    ///
    /// A [`crate::FunctionInput`] may lower it further.
    pub max_instructions: usize,

    /// What to do with instructions the front end cannot lower.
    pub unsupported: UnsupportedPolicy,

    /// Type inference settings.
    pub types: TypeConfig,

    /// Control-structure recovery settings.
    pub structure: StructureConfig,

    /// Pseudocode output settings.
    pub render: RenderConfig,

    /// Re-check the SSA invariants after construction (default: true).
    pub verify_ssa: bool,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            max_instructions: 10_000,
            unsupported: UnsupportedPolicy::default(),
            types: TypeConfig::default(),
            structure: StructureConfig::default(),
            render: RenderConfig::default(),
            verify_ssa: true,
        }
    }
}

impl DecompilerConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a "fast" configuration for bulk processing.
    ///
    /// This configuration uses:
    /// - A smaller instruction window (2 000)
    /// - Fewer inference rounds and structuring attempts
    /// - No SSA verification
    #[must_use]
    pub fn fast() -> Self {
        Self {
            max_instructions: 2_000,
            types: TypeConfig {
                max_iterations: 16,
                ..TypeConfig::default()
            },
            structure: StructureConfig {
                max_attempts: 256,
                ..StructureConfig::default()
            },
            verify_ssa: false,
            ..Self::default()
        }
    }

    /// Creates a "thorough" configuration for large, tangled functions.
    ///
    /// This configuration uses:
    /// - A large instruction window (100 000)
    /// - Deeper pointer types and more inference rounds
    /// - A generous structuring budget
    /// - SSA verification
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            max_instructions: 100_000,
            types: TypeConfig {
                max_iterations: 256,
                max_pointer_depth: 4,
                ..TypeConfig::default()
            },
            structure: StructureConfig {
                max_attempts: 16_384,
                max_depth: 256,
                ..StructureConfig::default()
            },
            verify_ssa: true,
            ..Self::default()
        }
    }

    /// Sets the instruction cap.
    #[must_use]
    pub fn with_max_instructions(mut self, max: usize) -> Self {
        self.max_instructions = max;
        self
    }

    /// Sets the unsupported-instruction policy.
    #[must_use]
    pub fn with_unsupported(mut self, policy: UnsupportedPolicy) -> Self {
        self.unsupported = policy;
        self
    }
}

/// Configuration for type inference.
#[derive(Debug, Clone)]
pub struct TypeConfig {
    /// Pointer size of the target in bytes (default: 8).
    ///
    /// The pipeline overwrites this with the register model's pointer size.
    pub pointer_size: u32,

    /// Deepest pointer nesting kept; deeper pointees become unknown (default: 3).
    pub max_pointer_depth: usize,

    /// Fixed-point rounds over the links before giving up (default: 64).
    pub max_iterations: usize,
}

impl Default for TypeConfig {
    fn default() -> Self {
        Self {
            pointer_size: 8,
            max_pointer_depth: 3,
            max_iterations: 64,
        }
    }
}

/// Configuration for control-structure recovery.
#[derive(Debug, Clone)]
pub struct StructureConfig {
    /// Pattern attempts before the remaining regions fall back to gotos (default: 4 096).
    pub max_attempts: usize,

    /// Deepest region nesting (default: 64).
    pub max_depth: usize,

    /// Distinct constants a compare chain needs to become a switch (default: 3).
    pub min_switch_cases: usize,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4_096,
            max_depth: 64,
            min_switch_cases: 3,
        }
    }
}

/// Configuration for pseudocode output.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Spaces per indentation level (default: 2).
    pub indent: usize,

    /// Print assignments to condition flags (default: false).
    pub show_flag_updates: bool,

    /// Print a declaration per local variable (default: true).
    pub declare_locals: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            indent: 2,
            show_flag_updates: false,
            declare_locals: true,
        }
    }
}
