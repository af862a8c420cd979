use std::{cell::Cell, collections::VecDeque, io::Write};

use tracing::{trace, warn};

use crate::{
    bits::Word,
    bus::{offset, Peripheral},
};

/// Status register bits.
pub mod status {
    use crate::bits::Word;

    /// The display can take another character.
    pub const DISPLAY_READY: Word = 0b01;
    /// A typed character is waiting in `DATA_IN`.
    pub const INPUT_PENDING: Word = 0b10;
}

/// Command register bits.
pub mod command {
    use crate::bits::Word;

    /// Drop the character in `DATA_IN`.
    pub const ACK_INPUT: Word = 0b001;
    /// Print the character in `DATA_OUT`.
    pub const FLUSH_OUTPUT: Word = 0b010;
    /// The program is about to poll for input.
    pub const WANT_INPUT: Word = 0b100;
}

/// Status reads in a row, with nothing typed and no other console traffic, after which the
/// program is taken to be polling for a key.
pub const IDLE_POLLS: u32 = 2;

/// Where console output ends up.
pub trait Screen {
    fn show(&mut self, ch: Word);

    /// Display ready state changed.
    fn set_ready(&mut self, _ready: bool) {}
}

/// Writes the low byte of each character to a byte stream.
pub struct TextScreen<W> {
    out: W,
}

impl<W: Write> TextScreen<W> {
    pub fn new(out: W) -> Self {
        TextScreen { out }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Screen for TextScreen<W> {
    fn show(&mut self, ch: Word) {
        let byte = (ch & 0xFF) as u8;
        if let Err(err) = self.out.write_all(&[byte]).and_then(|_| self.out.flush()) {
            warn!("console output failed: {err}");
        }
    }
}

/// Keyboard and display device.
pub struct Console<S> {
    screen: S,
    input: VecDeque<Word>,
    data_out: Word,
    display_ready: bool,
    wanted: bool,
    /// Status reads since the last write, command or keystroke
    idle_polls: Cell<u32>,
}

impl<S: Screen> Console<S> {
    pub fn new(mut screen: S) -> Self {
        screen.set_ready(true);
        Console {
            screen,
            input: VecDeque::new(),
            data_out: 0,
            display_ready: true,
            wanted: false,
            idle_polls: Cell::new(0),
        }
    }

    pub fn screen(&self) -> &S {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut S {
        &mut self.screen
    }

    /// Characters typed but not yet taken by the program.
    pub fn pending(&self) -> usize {
        self.input.len()
    }

    fn status(&self) -> Word {
        let mut status = 0;
        if self.display_ready {
            status |= status::DISPLAY_READY;
        }
        if !self.input.is_empty() {
            status |= status::INPUT_PENDING;
        }
        status
    }

    fn set_ready(&mut self, ready: bool) {
        self.display_ready = ready;
        self.screen.set_ready(ready);
    }
}

impl<S: Screen> Peripheral for Console<S> {
    fn read(&self, offs: Word) -> Word {
        if offs == offset::STATUS && self.input.is_empty() {
            self.idle_polls.set(self.idle_polls.get().saturating_add(1));
        }
        match offs {
            offset::DATA_IN => self.input.front().copied().unwrap_or(0),
            offset::DATA_OUT => self.data_out,
            offset::STATUS => self.status(),
            _ => 0,
        }
    }

    fn write(&mut self, offs: Word, value: Word) {
        self.idle_polls.set(0);
        if offs == offset::DATA_OUT {
            self.data_out = value;
        }
    }

    fn command(&mut self, value: Word) {
        self.idle_polls.set(0);
        if value & command::ACK_INPUT != 0 {
            let taken = self.input.pop_front();
            trace!("input acknowledged: {taken:?}");
            self.wanted = false;
        }
        if value & command::FLUSH_OUTPUT != 0 {
            self.set_ready(false);
            self.screen.show(self.data_out);
            self.set_ready(true);
        }
        if value & command::WANT_INPUT != 0 {
            self.wanted = true;
        }
    }

    fn input(&mut self, value: Word) {
        self.idle_polls.set(0);
        self.input.push_back(value);
    }

    /// Either the program asked for input, or it keeps polling the status register.
    fn awaiting_input(&self) -> bool {
        (self.wanted || self.idle_polls.get() >= IDLE_POLLS) && self.input.is_empty()
    }
}
