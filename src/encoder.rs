use crate::{
    air::{AirStmt, Arg, Operand, StmtKind},
    bits::{fits_either, fits_signed, Word},
    error::{AsmError, AsmWarning},
    isa::{ImmediateOrReg, Instr, NOT_LOW_BITS},
    lexer::Token,
    parser::Reports,
    symbol::{InstrKind, Register},
};

/// Page bits of an address. Page-relative operands keep only the 9 bits below these.
pub const PAGE_MASK: Word = 0xFE00;

/// Turn a statement into the words it occupies, starting at `stmt.addr`.
pub(crate) fn encode(stmt: &AirStmt, reports: &mut Reports) -> Result<Vec<Word>, AsmError> {
    match &stmt.kind {
        StmtKind::Instr {
            kind,
            mnemonic,
            args,
        } => Ok(vec![encode_instr(stmt, *kind, mnemonic, args, reports)?]),
        StmtKind::Fill(arg) => {
            let word = match &arg.value {
                Operand::Literal(n) => {
                    reports.truncate(*n, 16, fits_either(*n, 16), stmt.row, arg.span)
                }
                Operand::Address { addr, .. } => *addr,
                Operand::Register(_) => {
                    return Err(wrong_operand(stmt, arg, "a literal or label"));
                }
            };
            Ok(vec![word])
        }
        StmtKind::Blkw { count, fill } => Ok(vec![*fill; *count as usize]),
        StmtKind::Stringz(s) => Ok(s
            .chars()
            .map(|c| c as u32 as Word)
            .chain(std::iter::once(0))
            .collect()),
    }
}

fn wrong_operand(stmt: &AirStmt, arg: &Arg, expected: &'static str) -> AsmError {
    AsmError::WrongOperand {
        row: stmt.row,
        expected,
        found: arg.text.clone(),
        span: arg.span.into(),
    }
}

/// Operand list of one instruction, tracking how many were consumed.
struct Operands<'a> {
    stmt: &'a AirStmt,
    mnemonic: &'a Token,
    args: &'a [Arg],
    used: usize,
}

impl<'a> Operands<'a> {
    fn get(&mut self, idx: usize, expected: &'static str) -> Result<&'a Arg, AsmError> {
        self.used = self.used.max(idx + 1);
        self.args.get(idx).ok_or_else(|| AsmError::MissingOperand {
            row: self.stmt.row,
            mnemonic: self.mnemonic.text.to_ascii_uppercase(),
            index: idx + 1,
            expected,
            span: self.args.last().map_or(self.mnemonic.span, |a| a.span).into(),
        })
    }

    fn reg(&mut self, idx: usize) -> Result<Register, AsmError> {
        let arg = self.get(idx, "a register")?;
        match arg.value {
            Operand::Register(r) => Ok(r),
            _ => Err(wrong_operand(self.stmt, arg, "a register")),
        }
    }

    fn reg_or_imm5(&mut self, idx: usize, reports: &mut Reports) -> Result<ImmediateOrReg, AsmError> {
        let arg = self.get(idx, "a register or 5-bit literal")?;
        match arg.value {
            Operand::Register(r) => Ok(ImmediateOrReg::Reg(r)),
            Operand::Literal(n) => Ok(ImmediateOrReg::Imm5(reports.truncate(
                n,
                5,
                fits_signed(n, 5),
                self.stmt.row,
                arg.span,
            ))),
            Operand::Address { .. } => Err(wrong_operand(self.stmt, arg, "a register or 5-bit literal")),
        }
    }

    /// A label or literal page offset. Labels on another page still encode their low 9 bits,
    /// which the CPU combines with the page of the instruction.
    fn off9(&mut self, idx: usize, reports: &mut Reports) -> Result<Word, AsmError> {
        let arg = self.get(idx, "a label or page offset")?;
        match &arg.value {
            Operand::Address { name, addr } => {
                let page = self.stmt.addr.wrapping_add(1) & PAGE_MASK;
                if addr & PAGE_MASK != page {
                    reports.warn(AsmWarning::CrossPage {
                        row: self.stmt.row,
                        name: name.clone(),
                        page,
                        target: addr & PAGE_MASK,
                        span: arg.span.into(),
                    });
                }
                Ok(addr & !PAGE_MASK)
            }
            Operand::Literal(n) => {
                Ok(reports.truncate(*n, 9, fits_either(*n, 9), self.stmt.row, arg.span))
            }
            Operand::Register(_) => Err(wrong_operand(self.stmt, arg, "a label or page offset")),
        }
    }

    fn off6(&mut self, idx: usize, reports: &mut Reports) -> Result<Word, AsmError> {
        let arg = self.get(idx, "a 6-bit literal")?;
        match arg.value {
            Operand::Literal(n) => {
                Ok(reports.truncate(n, 6, fits_signed(n, 6), self.stmt.row, arg.span))
            }
            _ => Err(wrong_operand(self.stmt, arg, "a 6-bit literal")),
        }
    }

    fn vect8(&mut self, idx: usize, reports: &mut Reports) -> Result<u8, AsmError> {
        let arg = self.get(idx, "a trap vector")?;
        match arg.value {
            Operand::Literal(n) => {
                let vect = reports.truncate(n, 8, (0..=0xFF).contains(&n), self.stmt.row, arg.span);
                Ok(vect as u8)
            }
            _ => Err(wrong_operand(self.stmt, arg, "a trap vector")),
        }
    }

    /// Warn about operands past the ones the instruction consumed.
    fn finish(self, reports: &mut Reports) {
        if let (Some(first), Some(last)) = (self.args.get(self.used), self.args.last()) {
            reports.warn(AsmWarning::ExtraOperands {
                row: self.stmt.row,
                mnemonic: self.mnemonic.text.to_ascii_uppercase(),
                span: first.span.join(last.span).into(),
            });
        }
    }
}

fn encode_instr(
    stmt: &AirStmt,
    kind: InstrKind,
    mnemonic: &Token,
    args: &[Arg],
    reports: &mut Reports,
) -> Result<Word, AsmError> {
    let mut ops = Operands {
        stmt,
        mnemonic,
        args,
        used: 0,
    };
    let instr = match kind {
        InstrKind::Nop => Instr::Br { nzp: 0, off9: 0 },
        InstrKind::Br(flag) => Instr::Br {
            nzp: flag.mask(),
            off9: ops.off9(0, reports)?,
        },
        InstrKind::Add => Instr::Add {
            dst: ops.reg(0)?,
            src: ops.reg(1)?,
            operand: ops.reg_or_imm5(2, reports)?,
        },
        InstrKind::And => Instr::And {
            dst: ops.reg(0)?,
            src: ops.reg(1)?,
            operand: ops.reg_or_imm5(2, reports)?,
        },
        InstrKind::Ld => Instr::Ld {
            dst: ops.reg(0)?,
            off9: ops.off9(1, reports)?,
        },
        InstrKind::Ldi => Instr::Ldi {
            dst: ops.reg(0)?,
            off9: ops.off9(1, reports)?,
        },
        InstrKind::Lea => Instr::Lea {
            dst: ops.reg(0)?,
            off9: ops.off9(1, reports)?,
        },
        InstrKind::St => Instr::St {
            src: ops.reg(0)?,
            off9: ops.off9(1, reports)?,
        },
        InstrKind::Sti => Instr::Sti {
            src: ops.reg(0)?,
            off9: ops.off9(1, reports)?,
        },
        InstrKind::Jsr | InstrKind::Jmp => Instr::Jsr {
            link: kind == InstrKind::Jsr,
            off9: ops.off9(0, reports)?,
        },
        InstrKind::Ldr => Instr::Ldr {
            dst: ops.reg(0)?,
            base: ops.reg(1)?,
            off6: ops.off6(2, reports)?,
        },
        InstrKind::Str => Instr::Str {
            src: ops.reg(0)?,
            base: ops.reg(1)?,
            off6: ops.off6(2, reports)?,
        },
        InstrKind::Jsrr | InstrKind::Jmpr => {
            let base = ops.reg(0)?;
            // Offset is optional and defaults to zero
            let off6 = if args.len() > 1 {
                ops.off6(1, reports)?
            } else {
                0
            };
            Instr::Jsrr {
                link: kind == InstrKind::Jsrr,
                base,
                off6,
            }
        }
        InstrKind::Not => {
            let dst = ops.reg(0)?;
            let src = ops.reg(1)?;
            if let Some(extra) = args.get(2) {
                reports.warn(AsmWarning::NotReservedBits {
                    row: stmt.row,
                    span: extra.span.into(),
                });
                ops.used = args.len();
            }
            Instr::Not {
                dst,
                src,
                low: NOT_LOW_BITS,
            }
        }
        InstrKind::Rti => Instr::Rti,
        InstrKind::Ret => Instr::Ret,
        InstrKind::Trap => Instr::Trap {
            vect: ops.vect8(0, reports)?,
        },
    };
    ops.finish(reports);
    Ok(instr.encode())
}
