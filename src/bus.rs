use std::{cell::RefCell, rc::Rc};

use tracing::trace;

use crate::{
    bits::Word,
    error::{BusError, LoadError},
};

/// The CPU can address 64K words.
pub const MEMORY_SIZE: usize = 0x10000;

/// Every peripheral occupies four consecutive addresses.
pub const WINDOW_SIZE: Word = 4;

/// Offsets inside a peripheral window.
pub mod offset {
    use crate::bits::Word;

    pub const DATA_IN: Word = 0;
    pub const DATA_OUT: Word = 1;
    pub const COMMAND: Word = 2;
    pub const STATUS: Word = 3;
}

/// A device mapped into a window of the address space.
///
/// The bus keeps a plain memory cell behind every window address. Writes always land there
/// first, then writes to `DATA_OUT` reach [`Peripheral::write`] and writes to `COMMAND` reach
/// [`Peripheral::command`]. Reads anywhere inside the window come from [`Peripheral::read`].
pub trait Peripheral {
    fn read(&self, offset: Word) -> Word;

    fn write(&mut self, offset: Word, value: Word);

    fn command(&mut self, value: Word);

    /// A character typed by the user.
    fn input(&mut self, _value: Word) {}

    /// The running program is waiting for [`Peripheral::input`].
    fn awaiting_input(&self) -> bool {
        false
    }
}

pub type PeripheralHandle = Rc<RefCell<dyn Peripheral>>;

struct Mapping {
    base: Word,
    device: PeripheralHandle,
}

/// Flat memory with peripheral windows. Windows are kept sorted by base address and never
/// overlap.
pub struct MemoryBus {
    mem: Box<[Word]>,
    windows: Vec<Mapping>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        MemoryBus {
            mem: vec![0; MEMORY_SIZE].into_boxed_slice(),
            windows: Vec::new(),
        }
    }

    /// Map `device` into `base..base + WINDOW_SIZE`.
    pub fn map(&mut self, base: Word, device: PeripheralHandle) -> Result<(), BusError> {
        if base.checked_add(WINDOW_SIZE - 1).is_none() {
            return Err(BusError::OutOfRange { base });
        }
        if let Some(existing) = self
            .windows
            .iter()
            .find(|m| m.base.abs_diff(base) < WINDOW_SIZE)
        {
            return Err(BusError::Overlap {
                base,
                existing: existing.base,
            });
        }
        let idx = self.windows.partition_point(|m| m.base < base);
        self.windows.insert(idx, Mapping { base, device });
        trace!("mapped peripheral at x{base:04X}");
        Ok(())
    }

    fn window(&self, addr: Word) -> Option<(&Mapping, Word)> {
        self.windows
            .iter()
            .find(|m| addr >= m.base && addr - m.base < WINDOW_SIZE)
            .map(|m| (m, addr - m.base))
    }

    pub fn read(&self, addr: Word) -> Word {
        match self.window(addr) {
            Some((m, offset)) => m.device.borrow().read(offset),
            None => self.mem[addr as usize],
        }
    }

    pub fn write(&mut self, addr: Word, value: Word) {
        self.mem[addr as usize] = value;
        if let Some((m, offs)) = self.window(addr) {
            match offs {
                offset::DATA_OUT => m.device.borrow_mut().write(offs, value),
                offset::COMMAND => m.device.borrow_mut().command(value),
                _ => (),
            }
        }
    }

    /// Raw memory cell, bypassing any peripheral.
    pub fn peek(&self, addr: Word) -> Word {
        self.mem[addr as usize]
    }

    /// Copy `words` into raw memory from `dest` on, without notifying peripherals.
    pub fn load(&mut self, dest: Word, words: &[Word]) -> Result<(), LoadError> {
        let start = dest as usize;
        let end = start + words.len();
        if end > MEMORY_SIZE {
            return Err(LoadError::TooLong {
                orig: dest,
                len: words.len(),
            });
        }
        self.mem[start..end].copy_from_slice(words);
        Ok(())
    }

    /// Zero all memory. Peripherals stay mapped.
    pub fn clear(&mut self) {
        self.mem.fill(0);
    }

    /// Hand a typed character to the peripheral waiting for it, or to the first one mapped.
    /// Returns false if there are no peripherals.
    pub fn input(&mut self, value: Word) -> bool {
        let target = self
            .windows
            .iter()
            .find(|m| m.device.borrow().awaiting_input())
            .or_else(|| self.windows.first());
        match target {
            Some(m) => {
                m.device.borrow_mut().input(value);
                true
            }
            None => false,
        }
    }

    pub fn awaiting_input(&self) -> bool {
        self.windows.iter().any(|m| m.device.borrow().awaiting_input())
    }
}
