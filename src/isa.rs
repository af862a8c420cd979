//! The instruction word layout, shared by the encoder and the CPU so both read the same table.

use crate::bits::{mask_field, pack_field, Word};
use crate::symbol::Register;

/// ADD and AND take either a register or a 5-bit immediate as their last operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ImmediateOrReg {
    Reg(Register),
    /// Raw 5-bit two's-complement field
    Imm5(Word),
}

/// A decoded instruction. Offset and immediate fields hold their raw, masked bits.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instr {
    /// Branch to `page | off9` if any flag in `nzp` is set. An all-zero word is a no-op.
    Br { nzp: Word, off9: Word },
    Add { dst: Register, src: Register, operand: ImmediateOrReg },
    Ld { dst: Register, off9: Word },
    St { src: Register, off9: Word },
    /// `JSR` when `link` is set, `JMP` otherwise.
    Jsr { link: bool, off9: Word },
    And { dst: Register, src: Register, operand: ImmediateOrReg },
    Ldr { dst: Register, base: Register, off6: Word },
    Str { src: Register, base: Register, off6: Word },
    Rti,
    /// `low` holds bits 5-0, which should always be all ones.
    Not { dst: Register, src: Register, low: Word },
    Ldi { dst: Register, off9: Word },
    Sti { src: Register, off9: Word },
    /// `JSRR` when `link` is set, `JMPR` otherwise.
    Jsrr { link: bool, base: Register, off6: Word },
    Ret,
    Lea { dst: Register, off9: Word },
    Trap { vect: u8 },
}

/// Bits 5-0 of a well-formed `NOT`.
pub const NOT_LOW_BITS: Word = 0x3F;

fn reg(word: Word, shift: u32) -> Register {
    Register::from_bits(mask_field(word, 3, shift))
}

fn off9(word: Word) -> Word {
    mask_field(word, 9, 0)
}

fn off6(word: Word) -> Word {
    mask_field(word, 6, 0)
}

fn operand(word: Word) -> ImmediateOrReg {
    if mask_field(word, 1, 5) == 0 {
        ImmediateOrReg::Reg(reg(word, 0))
    } else {
        ImmediateOrReg::Imm5(mask_field(word, 5, 0))
    }
}

impl Instr {
    pub fn decode(word: Word) -> Instr {
        let link = mask_field(word, 1, 11) != 0;
        match word >> 12 {
            0x0 => Instr::Br {
                nzp: mask_field(word, 3, 9),
                off9: off9(word),
            },
            0x1 => Instr::Add {
                dst: reg(word, 9),
                src: reg(word, 6),
                operand: operand(word),
            },
            0x2 => Instr::Ld { dst: reg(word, 9), off9: off9(word) },
            0x3 => Instr::St { src: reg(word, 9), off9: off9(word) },
            0x4 => Instr::Jsr { link, off9: off9(word) },
            0x5 => Instr::And {
                dst: reg(word, 9),
                src: reg(word, 6),
                operand: operand(word),
            },
            0x6 => Instr::Ldr {
                dst: reg(word, 9),
                base: reg(word, 6),
                off6: off6(word),
            },
            0x7 => Instr::Str {
                src: reg(word, 9),
                base: reg(word, 6),
                off6: off6(word),
            },
            0x8 => Instr::Rti,
            0x9 => Instr::Not {
                dst: reg(word, 9),
                src: reg(word, 6),
                low: off6(word),
            },
            0xA => Instr::Ldi { dst: reg(word, 9), off9: off9(word) },
            0xB => Instr::Sti { src: reg(word, 9), off9: off9(word) },
            0xC => Instr::Jsrr {
                link,
                base: reg(word, 6),
                off6: off6(word),
            },
            0xD => Instr::Ret,
            0xE => Instr::Lea { dst: reg(word, 9), off9: off9(word) },
            _ => Instr::Trap {
                vect: mask_field(word, 8, 0) as u8,
            },
        }
    }

    pub fn opcode(&self) -> Word {
        match self {
            Instr::Br { .. } => 0x0,
            Instr::Add { .. } => 0x1,
            Instr::Ld { .. } => 0x2,
            Instr::St { .. } => 0x3,
            Instr::Jsr { .. } => 0x4,
            Instr::And { .. } => 0x5,
            Instr::Ldr { .. } => 0x6,
            Instr::Str { .. } => 0x7,
            Instr::Rti => 0x8,
            Instr::Not { .. } => 0x9,
            Instr::Ldi { .. } => 0xA,
            Instr::Sti { .. } => 0xB,
            Instr::Jsrr { .. } => 0xC,
            Instr::Ret => 0xD,
            Instr::Lea { .. } => 0xE,
            Instr::Trap { .. } => 0xF,
        }
    }

    pub fn encode(&self) -> Word {
        let fields = match *self {
            Instr::Br { nzp, off9 } => pack_field(nzp, 3, 9) | pack_field(off9, 9, 0),
            Instr::Add { dst, src, operand } | Instr::And { dst, src, operand } => {
                let last = match operand {
                    ImmediateOrReg::Reg(r) => pack_field(r.bits(), 3, 0),
                    ImmediateOrReg::Imm5(imm) => pack_field(1, 1, 5) | pack_field(imm, 5, 0),
                };
                pack_field(dst.bits(), 3, 9) | pack_field(src.bits(), 3, 6) | last
            }
            Instr::Ld { dst: r, off9 }
            | Instr::St { src: r, off9 }
            | Instr::Ldi { dst: r, off9 }
            | Instr::Sti { src: r, off9 }
            | Instr::Lea { dst: r, off9 } => pack_field(r.bits(), 3, 9) | pack_field(off9, 9, 0),
            Instr::Jsr { link, off9 } => pack_field(link as Word, 1, 11) | pack_field(off9, 9, 0),
            Instr::Ldr { dst: r, base, off6 } | Instr::Str { src: r, base, off6 } => {
                pack_field(r.bits(), 3, 9) | pack_field(base.bits(), 3, 6) | pack_field(off6, 6, 0)
            }
            Instr::Not { dst, src, low } => {
                pack_field(dst.bits(), 3, 9) | pack_field(src.bits(), 3, 6) | pack_field(low, 6, 0)
            }
            Instr::Jsrr { link, base, off6 } => {
                pack_field(link as Word, 1, 11)
                    | pack_field(base.bits(), 3, 6)
                    | pack_field(off6, 6, 0)
            }
            Instr::Rti | Instr::Ret => 0,
            Instr::Trap { vect } => vect as Word,
        };
        pack_field(self.opcode(), 4, 12) | fields
    }
}
