//! x86-64 encoding of the abstract emission interface.
//!
//! Encodes the operation stream produced by the helper-stub generators as
//! machine code bytes in a [`CodeBuffer`]. Symbol operands become rel32
//! relocation records patched later by the object writer.

use super::codebuf::{CodeBuffer, RelocKind};
use super::emit::Emitter;
use super::operand::{AddrMode, OperandSize, Register};
use super::symbols::Symbol;

/// x86-64 encoder writing into a [`CodeBuffer`].
pub struct X64Emitter<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> X64Emitter<'a> {
    pub fn new(buf: &'a mut CodeBuffer) -> X64Emitter<'a> {
        X64Emitter { buf }
    }

    /// Encode ModR/M byte.
    /// mode: 2 bits, reg: 3 bits, rm: 3 bits
    fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
        ((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
    }

    /// Emit a REX prefix if any of its bits are needed.
    fn emit_rex(&mut self, wide: bool, reg: Register, addr: &AddrMode) {
        let mut rex = 0x40u8;
        if wide {
            rex |= 0x08; // W
        }
        if reg.needs_rex_ext() {
            rex |= 0x04; // R
        }
        if let Some((index, _)) = addr.index {
            if index.needs_rex_ext() {
                rex |= 0x02; // X
            }
        }
        if addr.base.needs_rex_ext() {
            rex |= 0x01; // B
        }
        if rex != 0x40 {
            self.buf.emit_u8(rex);
        }
    }

    /// Emit the ModR/M byte, SIB byte and displacement for an operand.
    fn emit_operand(&mut self, reg_field: u8, addr: &AddrMode) {
        if addr.is_reg_direct() {
            self.buf
                .emit_u8(Self::modrm(0b11, reg_field, addr.base.code()));
            return;
        }

        let base = addr.base;
        let disp = addr.offset;
        // RBP/R13 as base cannot be encoded without a displacement.
        let needs_disp = disp != 0 || base.code() == 5;
        let (mode, disp8) = if !needs_disp {
            (0b00, false)
        } else if (-128..=127).contains(&disp) {
            (0b01, true)
        } else {
            (0b10, false)
        };

        if let Some((index, scale)) = addr.index {
            // RSP cannot be encoded as an index register.
            debug_assert!(index.number() != 4);
            let scale_bits = match scale {
                1 => 0b00,
                2 => 0b01,
                4 => 0b10,
                8 => 0b11,
                _ => unreachable!("invalid index scale: {}", scale),
            };
            self.buf.emit_u8(Self::modrm(mode, reg_field, 0b100));
            self.buf
                .emit_u8((scale_bits << 6) | (index.code() << 3) | base.code());
        } else if base.code() == 4 {
            // RSP/R12 as base requires a SIB byte.
            self.buf.emit_u8(Self::modrm(mode, reg_field, 0b100));
            self.buf.emit_u8(0x24);
        } else {
            self.buf.emit_u8(Self::modrm(mode, reg_field, base.code()));
        }

        if needs_disp {
            if disp8 {
                self.buf.emit_u8(disp as u8);
            } else {
                self.buf.emit_u32(disp as u32);
            }
        }
    }

    fn is_wide(size: OperandSize) -> bool {
        match size {
            OperandSize::Int32 => false,
            OperandSize::Int64 => true,
            other => unreachable!("unsupported operand size: {:?}", other),
        }
    }
}

impl Emitter for X64Emitter<'_> {
    /// MOV r, r/m
    fn emit_mov(&mut self, dst: Register, src: &AddrMode) {
        self.emit_rex(Self::is_wide(src.size), dst, src);
        self.buf.emit_u8(0x8B);
        self.emit_operand(dst.code(), src);
    }

    /// MOV r64, imm64
    fn emit_mov_imm(&mut self, dst: Register, imm: i64) {
        let rex = 0x48 | if dst.needs_rex_ext() { 0x01 } else { 0 };
        self.buf.emit_u8(rex);
        self.buf.emit_u8(0xB8 + dst.code());
        self.buf.emit_u64(imm as u64);
    }

    /// LEA r64, [rip + symbol + offset]
    fn emit_lea_symbol(&mut self, dst: Register, symbol: &Symbol, offset: i32) {
        let rex = 0x48 | if dst.needs_rex_ext() { 0x04 } else { 0 };
        self.buf.emit_u8(rex);
        self.buf.emit_u8(0x8D);
        self.buf.emit_u8(Self::modrm(0b00, dst.code(), 0b101));
        self.buf.add_reloc(symbol, RelocKind::Rel32);
        // The addend rides in the relocated field.
        self.buf.emit_u32(offset as u32);
    }

    /// LEA r64, m
    fn emit_lea(&mut self, dst: Register, src: &AddrMode) {
        debug_assert!(!src.is_reg_direct());
        self.emit_rex(true, dst, src);
        self.buf.emit_u8(0x8D);
        self.emit_operand(dst.code(), src);
    }

    /// CMP r/m, imm8/imm32
    fn emit_cmp_imm(&mut self, addr: &AddrMode, imm: i32) {
        self.emit_rex(Self::is_wide(addr.size), Register::RAX, addr);
        if (-128..=127).contains(&imm) {
            self.buf.emit_u8(0x83);
            self.emit_operand(7, addr);
            self.buf.emit_u8(imm as u8);
        } else {
            self.buf.emit_u8(0x81);
            self.emit_operand(7, addr);
            self.buf.emit_u32(imm as u32);
        }
    }

    /// ADD r/m, imm8/imm32
    fn emit_add_imm(&mut self, addr: &AddrMode, imm: i32) {
        self.emit_rex(Self::is_wide(addr.size), Register::RAX, addr);
        if (-128..=127).contains(&imm) {
            self.buf.emit_u8(0x83);
            self.emit_operand(0, addr);
            self.buf.emit_u8(imm as u8);
        } else {
            self.buf.emit_u8(0x81);
            self.emit_operand(0, addr);
            self.buf.emit_u32(imm as u32);
        }
    }

    /// JMP rel32 to a symbol
    fn emit_jmp_symbol(&mut self, target: &Symbol) {
        self.buf.emit_u8(0xE9);
        self.buf.add_reloc(target, RelocKind::Rel32);
        self.buf.emit_u32(0);
    }

    /// JMP r/m64
    fn emit_jmp(&mut self, target: &AddrMode) {
        // Near indirect jump defaults to 64-bit; no REX.W needed.
        self.emit_rex(false, Register::RAX, target);
        self.buf.emit_u8(0xFF);
        self.emit_operand(4, target);
    }

    /// RET
    fn emit_ret(&mut self) {
        self.buf.emit_u8(0xC3);
    }

    /// JNE +1; RET. Falls through to the next instruction unless the
    /// equal flag is set.
    fn emit_ret_if_equal(&mut self) {
        self.buf.emit_u8(0x75);
        self.buf.emit_u8(0x01);
        self.buf.emit_u8(0xC3);
    }

    /// INT3
    fn emit_trap(&mut self) {
        self.buf.emit_u8(0xCC);
    }

    fn mark_step_in_point(&mut self) {
        self.buf.mark_step_in();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(f: impl FnOnce(&mut X64Emitter)) -> CodeBuffer {
        let mut buf = CodeBuffer::new();
        let mut asm = X64Emitter::new(&mut buf);
        f(&mut asm);
        buf
    }

    #[test]
    fn test_mov_load_simple() {
        let buf = encode(|asm| {
            asm.emit_mov(
                Register::RAX,
                &AddrMode::indirect(Register::RDI, 0, OperandSize::Int64),
            )
        });
        // MOV RAX, [RDI] = 48 8B 07
        assert_eq!(buf.code(), &[0x48, 0x8B, 0x07]);
    }

    #[test]
    fn test_mov_load_disp8() {
        let buf = encode(|asm| {
            asm.emit_mov(
                Register::RSI,
                &AddrMode::indirect(Register::RSI, 8, OperandSize::Int64),
            )
        });
        // MOV RSI, [RSI+8] = 48 8B 76 08
        assert_eq!(buf.code(), &[0x48, 0x8B, 0x76, 0x08]);
    }

    #[test]
    fn test_mov_load_disp32() {
        let buf = encode(|asm| {
            asm.emit_mov(
                Register::RAX,
                &AddrMode::indirect(Register::RDI, 0x1000, OperandSize::Int64),
            )
        });
        // MOV RAX, [RDI+0x1000] = 48 8B 87 00 10 00 00
        assert_eq!(buf.code(), &[0x48, 0x8B, 0x87, 0x00, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn test_mov_load_r12_base_needs_sib() {
        let buf = encode(|asm| {
            asm.emit_mov(
                Register::RAX,
                &AddrMode::indirect(Register::R12, 8, OperandSize::Int64),
            )
        });
        // MOV RAX, [R12+8] = 49 8B 44 24 08
        assert_eq!(buf.code(), &[0x49, 0x8B, 0x44, 0x24, 0x08]);
    }

    #[test]
    fn test_mov_load_rbp_base_needs_disp() {
        let buf = encode(|asm| {
            asm.emit_mov(
                Register::RAX,
                &AddrMode::indirect(Register::RBP, 0, OperandSize::Int64),
            )
        });
        // MOV RAX, [RBP+0] = 48 8B 45 00
        assert_eq!(buf.code(), &[0x48, 0x8B, 0x45, 0x00]);
    }

    #[test]
    fn test_mov_load_scaled_index() {
        let buf = encode(|asm| {
            asm.emit_mov(
                Register::RCX,
                &AddrMode::indexed(Register::RAX, Register::RDX, 8, 0x10, OperandSize::Int64),
            )
        });
        // MOV RCX, [RAX+RDX*8+0x10] = 48 8B 4C D0 10
        assert_eq!(buf.code(), &[0x48, 0x8B, 0x4C, 0xD0, 0x10]);
    }

    #[test]
    fn test_mov_reg_direct() {
        let buf = encode(|asm| {
            asm.emit_mov(
                Register::RSI,
                &AddrMode::reg_direct(Register::RDI, OperandSize::Int64),
            )
        });
        // MOV RSI, RDI = 48 8B F7
        assert_eq!(buf.code(), &[0x48, 0x8B, 0xF7]);
    }

    #[test]
    fn test_mov_imm64() {
        let buf = encode(|asm| asm.emit_mov_imm(Register::RDI, 42));
        // MOV RDI, 42 = 48 BF 2A 00 00 00 00 00 00 00
        assert_eq!(
            buf.code(),
            &[0x48, 0xBF, 0x2A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_lea_symbol_records_reloc() {
        let buf = encode(|asm| asm.emit_lea_symbol(Register::RAX, &Symbol::new("typehandle_t1"), 8));
        // LEA RAX, [RIP+sym+8] = 48 8D 05 <addend>
        assert_eq!(buf.code(), &[0x48, 0x8D, 0x05, 0x08, 0x00, 0x00, 0x00]);
        assert_eq!(buf.relocs().len(), 1);
        assert_eq!(buf.relocs()[0].offset, 3);
        assert_eq!(buf.relocs()[0].symbol.name(), "typehandle_t1");
    }

    #[test]
    fn test_lea_addr() {
        let buf = encode(|asm| {
            asm.emit_lea(
                Register::RAX,
                &AddrMode::indirect(Register::RDI, 16, OperandSize::Int64),
            )
        });
        // LEA RAX, [RDI+16] = 48 8D 47 10
        assert_eq!(buf.code(), &[0x48, 0x8D, 0x47, 0x10]);
    }

    #[test]
    fn test_cmp_dword_imm8() {
        let buf = encode(|asm| {
            asm.emit_cmp_imm(
                &AddrMode::indirect(Register::RDI, 8, OperandSize::Int32),
                1,
            )
        });
        // CMP DWORD [RDI+8], 1 = 83 7F 08 01
        assert_eq!(buf.code(), &[0x83, 0x7F, 0x08, 0x01]);
    }

    #[test]
    fn test_cmp_qword_imm32() {
        let buf = encode(|asm| {
            asm.emit_cmp_imm(
                &AddrMode::indirect(Register::RAX, 0, OperandSize::Int64),
                0x1234,
            )
        });
        // CMP QWORD [RAX], 0x1234 = 48 81 38 34 12 00 00
        assert_eq!(buf.code(), &[0x48, 0x81, 0x38, 0x34, 0x12, 0x00, 0x00]);
    }

    #[test]
    fn test_add_reg_direct_imm8() {
        let buf = encode(|asm| {
            asm.emit_add_imm(&AddrMode::reg_direct(Register::RCX, OperandSize::Int64), 8)
        });
        // ADD RCX, 8 = 48 83 C1 08
        assert_eq!(buf.code(), &[0x48, 0x83, 0xC1, 0x08]);
    }

    #[test]
    fn test_jmp_symbol_records_reloc() {
        let buf = encode(|asm| asm.emit_jmp_symbol(&Symbol::new("rt_alloc_object_t1")));
        // JMP rel32 = E9 00 00 00 00
        assert_eq!(buf.code(), &[0xE9, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(buf.relocs()[0].offset, 1);
    }

    #[test]
    fn test_jmp_indirect_r11() {
        let buf =
            encode(|asm| asm.emit_jmp(&AddrMode::indirect(Register::R11, 0, OperandSize::Int64)));
        // JMP [R11] = 41 FF 23
        assert_eq!(buf.code(), &[0x41, 0xFF, 0x23]);
    }

    #[test]
    fn test_jmp_indirect_disp() {
        let buf =
            encode(|asm| asm.emit_jmp(&AddrMode::indirect(Register::RAX, 0x18, OperandSize::Int64)));
        // JMP [RAX+0x18] = FF 60 18
        assert_eq!(buf.code(), &[0xFF, 0x60, 0x18]);
    }

    #[test]
    fn test_jmp_reg_direct() {
        let buf =
            encode(|asm| asm.emit_jmp(&AddrMode::reg_direct(Register::RAX, OperandSize::Int64)));
        // JMP RAX = FF E0
        assert_eq!(buf.code(), &[0xFF, 0xE0]);
    }

    #[test]
    fn test_ret_if_equal_skips_over_ret() {
        let buf = encode(|asm| asm.emit_ret_if_equal());
        // JNE +1; RET = 75 01 C3
        assert_eq!(buf.code(), &[0x75, 0x01, 0xC3]);
    }

    #[test]
    fn test_trap() {
        let buf = encode(|asm| asm.emit_trap());
        assert_eq!(buf.code(), &[0xCC]);
    }

    #[test]
    fn test_step_in_point_records_offset() {
        let buf = encode(|asm| {
            asm.emit_ret();
            asm.mark_step_in_point();
            asm.emit_jmp_symbol(&Symbol::new("method_entry_m1"));
        });
        assert_eq!(buf.step_in_points(), &[1]);
    }
}
