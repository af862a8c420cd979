use std::{cell::RefCell, cmp::Ordering, rc::Rc};

use tracing::{debug, trace, warn};

use crate::{
    assembler::Image,
    bits::{sign_extend, Word},
    boot,
    bus::{MemoryBus, PeripheralHandle},
    console::{Console, Screen},
    encoder::PAGE_MASK,
    error::{BootError, BusError, LoadError, RuntimeWarning},
    isa::{ImmediateOrReg, Instr, NOT_LOW_BITS},
    symbol::Register,
};

/// Non-zero while the machine is running. The HALT routine clears it.
pub const MACHINE_ON: Word = 0xFF15;

/// Base of the console window: DataIn, DataOut, Command, Status.
pub const CONSOLE_BASE: Word = 0xFF16;

/// Condition code.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunFlag {
    N = 0b100,
    Z = 0b010,
    P = 0b001,
    /// All flags set after reset, so the first branch is always taken.
    Reset = 0b111,
}

/// Why a run stopped.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Exit {
    /// The machine-on cell was cleared.
    Halted,
    /// A peripheral is waiting for [`Processor::input`]. Call [`Processor::run`] again once
    /// a character has been supplied.
    NeedsInput,
    /// The step limit passed to [`Processor::run_steps`] was reached.
    Paused,
}

/// Represents complete machine state: memory, registers and the trap routines.
pub struct Processor {
    bus: MemoryBus,
    /// Program counter
    pc: Word,
    /// 8x 16-bit registers
    reg: [Word; 8],
    /// Condition code
    flag: RunFlag,
    warnings: Vec<RuntimeWarning>,
    /// Trap routines, assembled once and reloaded on reset
    boot: Image,
}

impl Processor {
    /// Build a machine with the trap routines installed and no peripherals.
    pub fn new() -> Result<Self, BootError> {
        let boot = boot::assemble_traps()?;
        let mut cpu = Processor {
            bus: MemoryBus::new(),
            pc: 0,
            reg: [0; 8],
            flag: RunFlag::Reset,
            warnings: Vec::new(),
            boot,
        };
        boot::install(&mut cpu.bus, &cpu.boot)?;
        Ok(cpu)
    }

    /// Build a machine with a console at [`CONSOLE_BASE`] drawing to `screen`.
    pub fn with_console<S: Screen + 'static>(
        screen: S,
    ) -> Result<(Self, Rc<RefCell<Console<S>>>), BootError> {
        let mut cpu = Self::new()?;
        let console = Rc::new(RefCell::new(Console::new(screen)));
        cpu.map(CONSOLE_BASE, console.clone())?;
        Ok((cpu, console))
    }

    pub fn map(&mut self, base: Word, device: PeripheralHandle) -> Result<(), BusError> {
        self.bus.map(base, device)
    }

    /// Return to power-on state: memory cleared, registers zeroed, trap routines reloaded.
    /// Peripherals stay mapped.
    pub fn reset(&mut self) -> Result<(), LoadError> {
        self.bus.clear();
        self.pc = 0;
        self.reg = [0; 8];
        self.flag = RunFlag::Reset;
        self.warnings.clear();
        boot::install(&mut self.bus, &self.boot)?;
        debug!("machine reset");
        Ok(())
    }

    /// Load a program at its origin and point PC at it.
    pub fn load_image(&mut self, image: &Image) -> Result<(), LoadError> {
        self.bus.load(image.orig, &image.words)?;
        self.pc = image.orig;
        debug!(
            "loaded {} word(s) at x{:04X}",
            image.words.len(),
            image.orig
        );
        Ok(())
    }

    /// Load words where the first word is the origin of the rest.
    pub fn load_words(&mut self, words: &[Word]) -> Result<(), LoadError> {
        let (&orig, body) = words.split_first().ok_or(LoadError::Empty)?;
        self.load_image(&Image {
            orig,
            words: body.to_vec(),
        })
    }

    /// Load an object file: big-endian words, the first being the origin.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), LoadError> {
        self.load_image(&Image::from_bytes(bytes)?)
    }

    /// Copy `code` to `dest` without touching PC.
    pub fn load_code(&mut self, code: &[Word], dest: Word) -> Result<(), LoadError> {
        self.bus.load(dest, code)
    }

    /// Read memory, going through any peripheral mapped at `addr`.
    pub fn mem(&self, addr: Word) -> Word {
        self.bus.read(addr)
    }

    /// Write memory, triggering any peripheral mapped at `addr`.
    pub fn set_mem(&mut self, addr: Word, value: Word) {
        self.bus.write(addr, value)
    }

    /// Memory as last written, ignoring peripherals.
    pub fn peek(&self, addr: Word) -> Word {
        self.bus.peek(addr)
    }

    pub fn reg(&self, reg: Register) -> Word {
        self.reg[reg.index()]
    }

    pub fn set_reg(&mut self, reg: Register, value: Word) {
        self.reg[reg.index()] = value;
    }

    pub fn regs(&self) -> &[Word; 8] {
        &self.reg
    }

    pub fn pc(&self) -> Word {
        self.pc
    }

    pub fn set_pc(&mut self, pc: Word) {
        self.pc = pc;
    }

    pub fn flag(&self) -> RunFlag {
        self.flag
    }

    pub fn is_on(&self) -> bool {
        self.bus.read(MACHINE_ON) != 0
    }

    pub fn turn_on(&mut self) {
        self.bus.write(MACHINE_ON, 1);
    }

    pub fn turn_off(&mut self) {
        self.bus.write(MACHINE_ON, 0);
    }

    /// Warnings reported since the last reset.
    pub fn warnings(&self) -> &[RuntimeWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<RuntimeWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Hand a typed character to the console. Returns false if nothing is mapped to take it.
    pub fn input(&mut self, ch: Word) -> bool {
        self.bus.input(ch)
    }

    /// Run until the machine halts or waits for input. Turns the machine on first if needed.
    pub fn run(&mut self) -> Exit {
        self.run_until(None)
    }

    /// Like [`Processor::run`], but stop after `limit` instructions.
    pub fn run_steps(&mut self, limit: u64) -> Exit {
        self.run_until(Some(limit))
    }

    fn run_until(&mut self, limit: Option<u64>) -> Exit {
        if !self.is_on() {
            self.turn_on();
        }
        let mut steps = 0;
        let exit = loop {
            if limit.is_some_and(|limit| steps >= limit) {
                break Exit::Paused;
            }
            self.step();
            steps += 1;
            if !self.is_on() {
                break Exit::Halted;
            }
            if self.bus.awaiting_input() {
                break Exit::NeedsInput;
            }
        };
        debug!("stopped after {steps} instruction(s): {exit:?}");
        exit
    }

    /// Execute exactly one instruction.
    pub fn step(&mut self) {
        let addr = self.pc;
        let word = self.bus.read(addr);
        // PC incremented before instruction is performed
        let (next, wrapped) = addr.overflowing_add(1);
        self.pc = next;
        if wrapped {
            self.warn(RuntimeWarning::PcWrapped);
        }
        let instr = Instr::decode(word);
        trace!("x{addr:04X}: {word:04X} {instr:?}");
        self.execute(addr, word, instr);
    }

    fn warn(&mut self, warning: RuntimeWarning) {
        warn!("{warning}");
        self.warnings.push(warning);
    }

    #[inline]
    fn set_flags(&mut self, val: Word) {
        self.flag = match (val as i16).cmp(&0) {
            Ordering::Less => RunFlag::N,
            Ordering::Equal => RunFlag::Z,
            Ordering::Greater => RunFlag::P,
        }
    }

    fn set_result(&mut self, dst: Register, val: Word) {
        self.reg[dst.index()] = val;
        self.set_flags(val);
    }

    fn operand(&self, operand: ImmediateOrReg) -> Word {
        match operand {
            ImmediateOrReg::Reg(r) => self.reg(r),
            ImmediateOrReg::Imm5(imm) => sign_extend(imm, 5),
        }
    }

    fn execute(&mut self, addr: Word, word: Word, instr: Instr) {
        // Page of the next instruction, since PC has already moved on
        let page = self.pc & PAGE_MASK;
        match instr {
            Instr::Br { nzp, off9 } => {
                if self.flag as Word & nzp != 0 {
                    self.pc = page | off9;
                }
            }
            Instr::Add { dst, src, operand } => {
                let val = self.reg(src).wrapping_add(self.operand(operand));
                self.set_result(dst, val);
            }
            Instr::And { dst, src, operand } => {
                let val = self.reg(src) & self.operand(operand);
                self.set_result(dst, val);
            }
            Instr::Ld { dst, off9 } => {
                let val = self.bus.read(page | off9);
                self.set_result(dst, val);
            }
            Instr::St { src, off9 } => {
                let val = self.reg(src);
                self.bus.write(page | off9, val);
            }
            Instr::Jsr { link, off9 } => {
                if link {
                    self.reg[7] = self.pc;
                }
                self.pc = page.wrapping_add(off9);
            }
            Instr::Ldr { dst, base, off6 } => {
                let ptr = self.reg(base).wrapping_add(sign_extend(off6, 6));
                let val = self.bus.read(ptr);
                self.set_result(dst, val);
            }
            Instr::Str { src, base, off6 } => {
                let ptr = self.reg(base).wrapping_add(sign_extend(off6, 6));
                let val = self.reg(src);
                self.bus.write(ptr, val);
            }
            Instr::Rti => {
                // Flags come from the stack pointer, and it moves twice for one read
                self.set_flags(self.reg[6]);
                self.reg[6] = self.reg[6].wrapping_sub(1);
                self.pc = self.bus.read(self.reg[6]);
                self.reg[6] = self.reg[6].wrapping_sub(1);
            }
            Instr::Not { dst, src, low } => {
                if low != NOT_LOW_BITS {
                    self.warn(RuntimeWarning::NotReservedBits { addr, word });
                }
                let val = !self.reg(src);
                self.set_result(dst, val);
            }
            Instr::Ldi { dst, off9 } => {
                let ptr = self.bus.read(page | off9);
                let val = self.bus.read(ptr);
                self.set_result(dst, val);
            }
            Instr::Sti { src, off9 } => {
                let ptr = self.bus.read(page | off9);
                let val = self.reg(src);
                self.bus.write(ptr, val);
            }
            Instr::Jsrr { link, base, off6 } => {
                if link {
                    self.reg[7] = self.pc;
                }
                self.pc = self.reg(base).wrapping_add(sign_extend(off6, 6));
            }
            Instr::Ret => self.pc = self.reg[7],
            Instr::Lea { dst, off9 } => self.set_result(dst, page | off9),
            Instr::Trap { vect } => {
                let target = self.bus.read(vect as Word);
                if target == 0 {
                    self.warn(RuntimeWarning::UnmappedTrap { vector: vect, addr });
                } else {
                    self.reg[7] = self.pc;
                    self.pc = target;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembler::{assemble, AsmOptions},
        console::TextScreen,
    };
    use Register::*;

    type Output = Rc<RefCell<Console<TextScreen<Vec<u8>>>>>;

    fn image(src: &str) -> Image {
        let asm = assemble(src, &AsmOptions::default());
        assert!(asm.errors.is_empty(), "{:?}", asm.errors);
        asm.image
    }

    fn boot(src: &str) -> Processor {
        let mut cpu = Processor::new().unwrap();
        cpu.load_image(&image(src)).unwrap();
        cpu
    }

    fn boot_console(src: &str) -> (Processor, Output) {
        let (mut cpu, console) = Processor::with_console(TextScreen::new(Vec::new())).unwrap();
        cpu.load_image(&image(src)).unwrap();
        (cpu, console)
    }

    fn printed(console: &Output) -> String {
        String::from_utf8_lossy(console.borrow().screen().get_ref()).into_owned()
    }

    #[test]
    fn adds_immediates() {
        let mut cpu = boot(".ORIG x3000\nADD R0,R0,#5\nADD R0,R0,#5\n.END");
        cpu.step();
        cpu.step();
        assert_eq!(cpu.reg(R0), 10);
        assert_eq!(cpu.flag(), RunFlag::P);
        assert_eq!(cpu.pc(), 0x3002);
    }

    #[test]
    fn first_branch_after_reset_is_taken() {
        let mut cpu = boot(".ORIG x3000\nBRn target\nHALT\ntarget ADD R1,R1,#1\n.END");
        assert_eq!(cpu.flag(), RunFlag::Reset);
        cpu.step();
        assert_eq!(cpu.pc(), 0x3002);
    }

    #[test]
    fn unconditional_branch_after_reset() {
        let mut cpu = boot(".ORIG x3000\nBRnzp target\nHALT\ntarget ADD R1,R1,#1\n.END");
        assert_eq!(cpu.flag(), RunFlag::Reset);
        cpu.step();
        assert_eq!(cpu.pc(), 0x3002);
    }

    #[test]
    fn negative_result_sets_only_n() {
        let mut cpu = boot(".ORIG x3000\nADD R0,R0,#-1\nADD R0,R0,#1\nADD R0,R0,#1\n.END");
        cpu.step();
        assert_eq!(cpu.reg(R0), 0xFFFF);
        assert_eq!(cpu.flag(), RunFlag::N);
        cpu.step();
        assert_eq!(cpu.flag(), RunFlag::Z);
        cpu.step();
        assert_eq!(cpu.flag(), RunFlag::P);
    }

    #[test]
    fn branch_follows_flags() {
        let mut cpu = boot(".ORIG x3000\nAND R0,R0,#0\nBRp skip\nBRz skip\nHALT\nskip HALT\n.END");
        cpu.step();
        assert_eq!(cpu.flag(), RunFlag::Z);
        cpu.step();
        assert_eq!(cpu.pc(), 0x3002);
        cpu.step();
        assert_eq!(cpu.pc(), 0x3004);
    }

    #[test]
    fn load_indirect() {
        let mut cpu = boot(".ORIG x3000\nLDI R1, #256\n.END");
        cpu.set_mem(0x3100, 0x3200);
        cpu.set_mem(0x3200, 42);
        cpu.step();
        assert_eq!(cpu.reg(R1), 42);
        assert_eq!(cpu.flag(), RunFlag::P);
    }

    #[test]
    fn halt_clears_machine_on() {
        let mut cpu = boot(".ORIG x3000\nHALT\n.END");
        // TRAP, stub jump, clear R0, store to the machine-on cell
        assert_eq!(cpu.run_steps(4), Exit::Halted);
        assert_eq!(cpu.mem(MACHINE_ON), 0);
        assert!(!cpu.is_on());
    }

    #[test]
    fn flush_toggles_display_ready() {
        #[derive(Default)]
        struct Recorder(Vec<String>);

        impl Screen for Recorder {
            fn show(&mut self, ch: Word) {
                self.0.push(format!("show {ch}"));
            }

            fn set_ready(&mut self, ready: bool) {
                self.0.push(format!("ready {ready}"));
            }
        }

        let (mut cpu, console) = Processor::with_console(Recorder::default()).unwrap();
        console.borrow_mut().screen_mut().0.clear();
        cpu.set_mem(CONSOLE_BASE + 1, 65);
        cpu.set_mem(CONSOLE_BASE + 2, 0b10);
        assert_eq!(
            console.borrow().screen().0,
            ["ready false", "show 65", "ready true"]
        );
    }

    #[test]
    fn memory_outside_windows() {
        let (mut cpu, _console) = Processor::with_console(TextScreen::new(Vec::new())).unwrap();
        for (addr, value) in [(0x0000, 1), (0x3000, 0xFFFF), (0xFF14, 7), (0xFF1A, 9)] {
            cpu.set_mem(addr, value);
            assert_eq!(cpu.mem(addr), value);
        }
    }

    #[test]
    fn rti_moves_stack_pointer_twice() {
        let mut cpu = boot(".ORIG x3000\nRTI\n.END");
        cpu.set_reg(R6, 0x4002);
        cpu.set_mem(0x4001, 0x3005);
        cpu.step();
        assert_eq!(cpu.pc(), 0x3005);
        assert_eq!(cpu.reg(R6), 0x4000);
        // Flags reflect R6 before it moved
        assert_eq!(cpu.flag(), RunFlag::P);
    }

    #[test]
    fn subroutines() {
        let mut cpu = boot(
            ".ORIG x3000\nJSR sub\nLEA R2, sub\nJSRR R2\nHALT\nsub ADD R1,R1,#1\nRET\n.END",
        );
        assert_eq!(cpu.run(), Exit::Halted);
        assert_eq!(cpu.reg(R1), 2);
        assert_eq!(cpu.reg(R2), 0x3004);
    }

    #[test]
    fn not_and_memory_ops() {
        let mut cpu = boot(
            ".ORIG x3000\nLD R1, val\nNOT R2, R1\nST R2, dst\nLEA R3, dst\nLDR R4, R3, #0\nSTR R1, R3, #1\nHALT\nval .FILL x00F0\ndst .BLKW 2\n.END",
        );
        assert_eq!(cpu.run(), Exit::Halted);
        assert_eq!(cpu.reg(R2), 0xFF0F);
        assert_eq!(cpu.reg(R4), 0xFF0F);
        assert_eq!(cpu.mem(0x3008), 0xFF0F);
        assert_eq!(cpu.mem(0x3009), 0x00F0);
        assert!(cpu.warnings().is_empty());
    }

    #[test]
    fn warns_on_bad_not_bits() {
        let mut cpu = Processor::new().unwrap();
        // NOT R0, R1 with the low bits clear
        cpu.load_words(&[0x3000, 0x9040]).unwrap();
        cpu.set_reg(R1, 0x00FF);
        cpu.step();
        assert_eq!(cpu.reg(R0), 0xFF00);
        assert_eq!(
            cpu.warnings(),
            [RuntimeWarning::NotReservedBits {
                addr: 0x3000,
                word: 0x9040
            }]
        );
    }

    #[test]
    fn unmapped_trap_is_skipped() {
        let mut cpu = boot(".ORIG x3000\nTRAP x30\n.END");
        cpu.step();
        assert_eq!(cpu.pc(), 0x3001);
        assert_eq!(cpu.reg(R7), 0);
        assert_eq!(
            cpu.take_warnings(),
            [RuntimeWarning::UnmappedTrap {
                vector: 0x30,
                addr: 0x3000
            }]
        );
    }

    #[test]
    fn pc_wraps_around() {
        let mut cpu = Processor::new().unwrap();
        cpu.load_code(&[0x0000], 0xFFFF).unwrap();
        cpu.set_pc(0xFFFF);
        cpu.step();
        assert_eq!(cpu.pc(), 0x0000);
        assert_eq!(cpu.warnings(), [RuntimeWarning::PcWrapped]);
    }

    #[test]
    fn puts_prints_string() {
        let (mut cpu, console) =
            boot_console(".ORIG x3000\nLEA R0, msg\nPUTS\nHALT\nmsg .STRINGZ \"Hello, world!\\n\"\n.END");
        assert_eq!(cpu.run(), Exit::Halted);
        assert_eq!(printed(&console), "Hello, world!\n");
    }

    #[test]
    fn putsp_prints_packed_string() {
        let (mut cpu, console) = boot_console(
            ".ORIG x3000\nLEA R0, msg\nPUTSP\nHALT\nmsg .FILL x6548\n.FILL x6C6C\n.FILL x006F\n.FILL #0\n.END",
        );
        assert_eq!(cpu.run(), Exit::Halted);
        assert_eq!(printed(&console), "Hello");
    }

    #[test]
    fn getc_suspends_until_input() {
        let (mut cpu, console) = boot_console(".ORIG x3000\nGETC\nOUT\nHALT\n.END");
        assert_eq!(cpu.run(), Exit::NeedsInput);
        let waiting_at = cpu.pc();
        assert_eq!(cpu.run_steps(0), Exit::Paused);
        assert_eq!(cpu.pc(), waiting_at);

        assert!(cpu.input('k' as Word));
        assert_eq!(cpu.run(), Exit::Halted);
        assert_eq!(printed(&console), "k");
        assert_eq!(console.borrow().pending(), 0);
    }

    #[test]
    fn polling_status_directly_suspends() {
        let (mut cpu, console) = boot_console(
            ".ORIG x3000
poll LDI R1, stat
AND R1, R1, #2
BRz poll
LDI R0, din
LD R2, ack
STI R2, cmd
OUT
HALT
stat .FILL xFF19
din .FILL xFF16
cmd .FILL xFF18
ack .FILL x0001
.END",
        );
        assert_eq!(cpu.run_steps(1_000), Exit::NeedsInput);
        assert!(cpu.input('z' as Word));
        assert_eq!(cpu.run_steps(1_000), Exit::Halted);
        assert_eq!(printed(&console), "z");
        assert_eq!(console.borrow().pending(), 0);
    }

    #[test]
    fn queued_input_does_not_suspend() {
        let (mut cpu, console) = boot_console(".ORIG x3000\nIN\nIN\nHALT\n.END");
        cpu.input('a' as Word);
        cpu.input('b' as Word);
        assert_eq!(cpu.run(), Exit::Halted);
        assert_eq!(printed(&console), "ab");
        assert_eq!(cpu.reg(R0), 0);
    }

    #[test]
    fn reset_restores_power_on_state() {
        let mut cpu = boot(".ORIG x3000\nADD R0,R0,#-1\nHALT\n.END");
        assert_eq!(cpu.run(), Exit::Halted);
        cpu.reset().unwrap();
        assert_eq!(cpu.regs(), &[0; 8]);
        assert_eq!(cpu.pc(), 0);
        assert_eq!(cpu.flag(), RunFlag::Reset);
        assert_eq!(cpu.mem(0x3000), 0);
        assert_eq!(cpu.mem(0x25), boot::TRAP_ORIGIN + 5);
    }

    #[test]
    fn loads_object_bytes() {
        let mut cpu = Processor::new().unwrap();
        cpu.load_bytes(&[0x30, 0x00, 0x10, 0x21]).unwrap();
        assert_eq!(cpu.pc(), 0x3000);
        assert_eq!(cpu.mem(0x3000), 0x1021);
        assert_eq!(
            cpu.load_bytes(&[0x30, 0x00, 0x10]),
            Err(LoadError::Unaligned { len: 3 })
        );
        assert_eq!(cpu.load_bytes(&[]), Err(LoadError::Empty));
    }

    #[test]
    fn same_program_same_state() {
        let src = ".ORIG x3000\nAND R1,R1,#0\nloop ADD R1,R1,#3\nADD R2,R1,#-12\nBRn loop\nHALT\n.END";
        let mut first = boot(src);
        let mut second = boot(src);
        assert_eq!(first.run(), Exit::Halted);
        assert_eq!(second.run(), Exit::Halted);
        assert_eq!(first.regs(), second.regs());
        assert_eq!(first.reg(R1), 12);
    }
}
