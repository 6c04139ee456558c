//! Operand model for helper-stub emission.
//!
//! Describes effective addresses and symbolic registers the way the
//! instruction encoder consumes them: a base register, an optional scaled
//! index, a byte displacement and an operand size.

use serde::Serialize;

/// Symbolic x86-64 general-purpose register.
///
/// The high bit is an addressing modifier: when set, the register *is* the
/// operand (register-direct); when clear, the register is used as the base
/// of a memory operand. See [`AddrMode::reg_direct`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Register(u8);

impl std::fmt::Debug for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [&str; 16] = [
            "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15",
        ];
        let name = NAMES[self.number() as usize];
        if self.is_direct() {
            write!(f, "direct({})", name)
        } else {
            f.write_str(name)
        }
    }
}

impl Register {
    pub const RAX: Register = Register(0);
    pub const RCX: Register = Register(1);
    pub const RDX: Register = Register(2);
    pub const RBX: Register = Register(3);
    pub const RSP: Register = Register(4);
    pub const RBP: Register = Register(5);
    pub const RSI: Register = Register(6);
    pub const RDI: Register = Register(7);
    pub const R8: Register = Register(8);
    pub const R9: Register = Register(9);
    pub const R10: Register = Register(10);
    pub const R11: Register = Register(11);
    pub const R12: Register = Register(12);
    pub const R13: Register = Register(13);
    pub const R14: Register = Register(14);
    pub const R15: Register = Register(15);

    const DIRECT: u8 = 0x80;

    /// This register as a direct operand rather than an indirection base.
    pub const fn direct(self) -> Register {
        Register(self.0 | Self::DIRECT)
    }

    /// Whether the modifier bit marks this register as a direct operand.
    pub const fn is_direct(self) -> bool {
        self.0 & Self::DIRECT != 0
    }

    /// The register without the addressing modifier.
    pub const fn without_modifier(self) -> Register {
        Register(self.0 & !Self::DIRECT)
    }

    /// Register number (0..=15).
    pub const fn number(self) -> u8 {
        self.0 & 0x0f
    }

    /// Get the register code (lower 3 bits of the encoding).
    pub const fn code(self) -> u8 {
        self.0 & 0x7
    }

    /// Check if this register requires REX.B or REX.R extension.
    pub const fn needs_rex_ext(self) -> bool {
        self.number() >= 8
    }
}

/// Size of a memory or register operand, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperandSize {
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
}

impl OperandSize {
    /// Operand width in bytes.
    pub const fn bytes(self) -> u32 {
        match self {
            OperandSize::Int8 => 1,
            OperandSize::Int16 => 2,
            OperandSize::Int32 => 4,
            OperandSize::Int64 => 8,
            OperandSize::Int128 => 16,
        }
    }
}

/// An effective-address operand: `[base + index * scale + offset]`.
///
/// With `index = None` this is plain base+displacement addressing, which is
/// the dominant case in helper stubs. Displacements are byte-granular;
/// range checks are the encoder's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AddrMode {
    pub base: Register,
    /// Optional index register and scale. The scale is meaningful only
    /// when an index is present and must be 1, 2, 4 or 8.
    pub index: Option<(Register, u8)>,
    pub offset: i32,
    pub size: OperandSize,
}

impl AddrMode {
    /// `[base + offset]`
    pub fn indirect(base: Register, offset: i32, size: OperandSize) -> AddrMode {
        debug_assert!(!base.is_direct());
        AddrMode {
            base,
            index: None,
            offset,
            size,
        }
    }

    /// `[base + index * scale + offset]`
    pub fn indexed(
        base: Register,
        index: Register,
        scale: u8,
        offset: i32,
        size: OperandSize,
    ) -> AddrMode {
        debug_assert!(!base.is_direct() && !index.is_direct());
        debug_assert!(matches!(scale, 1 | 2 | 4 | 8));
        AddrMode {
            base,
            index: Some((index, scale)),
            offset,
            size,
        }
    }

    /// The register itself as the operand (no memory access).
    pub fn reg_direct(reg: Register, size: OperandSize) -> AddrMode {
        AddrMode {
            base: reg.direct(),
            index: None,
            offset: 0,
            size,
        }
    }

    /// Whether this operand is a register rather than a memory location.
    pub fn is_reg_direct(&self) -> bool {
        self.base.is_direct()
    }
}
