//! Trap routines assembled from source when a [`Processor`](crate::Processor) is built.
//!
//! The routines are assembled once and the image is kept, so resetting the machine only copies
//! it back into memory.

use tracing::{debug, warn};

use crate::{
    assembler::{assemble, AsmOptions, Image},
    bits::Word,
    bus::MemoryBus,
    error::{BootError, LoadError},
    symbol::TrapKind,
};

/// Source of GETC, OUT, PUTS, IN, PUTSP and HALT.
pub const TRAP_SOURCE: &str = include_str!("boot/traps.asm");

/// Load address of the trap routines. The first six words are jump stubs, one per vector.
pub const TRAP_ORIGIN: Word = 0x0200;

/// Assemble the trap routines.
pub(crate) fn assemble_traps() -> Result<Image, BootError> {
    let asm = assemble(TRAP_SOURCE, &AsmOptions::default());
    for warning in &asm.warnings {
        warn!("trap routines: {warning}");
    }
    let image = asm
        .into_result("traps.asm", TRAP_SOURCE)
        .map_err(BootError::Assemble)?;
    debug!(
        "assembled {} word(s) of trap routines at x{:04X}",
        image.len(),
        image.orig
    );
    Ok(image)
}

/// Copy the trap routines into memory and point each vector at its stub.
pub(crate) fn install(bus: &mut MemoryBus, image: &Image) -> Result<(), LoadError> {
    bus.load(image.orig, &image.words)?;
    for (i, trap) in TrapKind::ALL.iter().enumerate() {
        let stub = image.orig.wrapping_add(i as Word);
        bus.load(trap.vector() as Word, &[stub])?;
        debug!("trap x{:02X} -> x{stub:04X}", trap.vector());
    }
    Ok(())
}
