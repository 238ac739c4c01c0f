//! Simulated open-drain I2C bus with a single target device, for host tests.
//!
//! Both lines are wired-AND: a line is high only if nobody pulls it low. The target reacts to
//! the edges produced by the controller under test, like a register-based sensor or EEPROM:
//! the first byte written after its address sets the register pointer, following bytes are
//! stored at the pointer, and reads return memory from the pointer on.

use std::{cell::RefCell, convert::Infallible, rc::Rc};

use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType, InputPin, OutputPin},
};

use crate::{Config, SoftI2c};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Receiving the n-th address byte.
    Header(u8),
    Write,
    Read,
    /// Not addressed, waiting for the next START or STOP.
    Ignored,
}

pub struct Target {
    address: u16,
    ten_bit: bool,

    pub memory: [u8; 256],
    pub pointer: u8,
    /// Every byte written to the target, including register pointers.
    pub written: Vec<u8>,
    /// Acknowledge only that many bytes of each write.
    pub nack_data_after: Option<usize>,
    /// Number of SCL polls the target holds SCL low each time the controller releases it.
    pub stretch_polls: u32,
    pub stuck_scl: bool,
    /// Holds SDA low until that many SCL pulses were seen.
    pub stuck_sda_pulses: u32,
    /// Address byte sent by another controller starting at the same time as the next START.
    pub rival: Option<u8>,
    /// Once that many bytes were written, keeps holding SDA low after the acknowledge for
    /// `lock_sda_pulses` SCL pulses.
    pub lock_after: Option<usize>,
    pub lock_sda_pulses: u32,
    /// Also holds SCL low from the first SCL pulse after SDA got locked.
    pub lock_scl: bool,
    pub starts: u32,
    pub stops: u32,

    phase: Phase,
    bit: u8,
    shift: u8,
    in_ack: bool,
    after_ack: Phase,
    out_bit: u8,
    write_index: usize,
    ten_bit_matched: bool,
    drive_low: bool,
    scl_hold: u32,
    rival_bits: Option<(u8, u8)>,
    rival_low: bool,
    lock_pending: bool,
    scl_lock_pending: bool,
}

impl Target {
    pub fn seven_bit(address: u16) -> Self {
        Self::new(address, false)
    }

    pub fn ten_bit(address: u16) -> Self {
        Self::new(address, true)
    }

    fn new(address: u16, ten_bit: bool) -> Self {
        Self {
            address,
            ten_bit,
            memory: [0; 256],
            pointer: 0,
            written: Vec::new(),
            nack_data_after: None,
            stretch_polls: 0,
            stuck_scl: false,
            stuck_sda_pulses: 0,
            rival: None,
            lock_after: None,
            lock_sda_pulses: 0,
            lock_scl: false,
            starts: 0,
            stops: 0,
            phase: Phase::Idle,
            bit: 0,
            shift: 0,
            in_ack: false,
            after_ack: Phase::Idle,
            out_bit: 0,
            write_index: 0,
            ten_bit_matched: false,
            drive_low: false,
            scl_hold: 0,
            rival_bits: None,
            rival_low: false,
            lock_pending: false,
            scl_lock_pending: false,
        }
    }

    fn pulls_sda_low(&self) -> bool {
        self.drive_low || self.rival_low || self.stuck_sda_pulses > 0
    }

    fn pulls_scl_low(&self) -> bool {
        self.stuck_scl || self.scl_hold > 0
    }

    fn on_start(&mut self) {
        self.starts += 1;
        self.phase = Phase::Header(0);
        self.bit = 0;
        self.shift = 0;
        self.in_ack = false;
        self.drive_low = false;
        self.write_index = 0;
        if let Some(byte) = self.rival.take() {
            self.rival_bits = Some((byte, 0));
        }
    }

    fn on_stop(&mut self) {
        self.stops += 1;
        self.phase = Phase::Idle;
        self.in_ack = false;
        self.drive_low = false;
        self.ten_bit_matched = false;
        self.rival_bits = None;
        self.rival_low = false;
    }

    fn on_scl_rise(&mut self, sda: bool) {
        if self.in_ack {
            return;
        }

        match self.phase {
            Phase::Header(_) | Phase::Write => {
                if self.bit < 8 {
                    self.shift = (self.shift << 1) | u8::from(sda);
                    self.bit += 1;
                }
            }
            Phase::Read => {
                if self.out_bit >= 8 {
                    // Acknowledge clock of the controller.
                    if sda {
                        self.phase = Phase::Ignored;
                    } else {
                        self.pointer = self.pointer.wrapping_add(1);
                        self.out_bit = 0;
                    }
                } else {
                    self.out_bit += 1;
                }
            }
            Phase::Idle | Phase::Ignored => {}
        }
    }

    fn on_scl_fall(&mut self) {
        self.stuck_sda_pulses = self.stuck_sda_pulses.saturating_sub(1);
        if self.scl_lock_pending {
            self.scl_lock_pending = false;
            self.stuck_scl = true;
        }

        if let Some((byte, index)) = self.rival_bits {
            if index < 8 {
                self.rival_low = byte & (0x80 >> index) == 0;
                self.rival_bits = Some((byte, index + 1));
            } else {
                self.rival_low = false;
                self.rival_bits = None;
            }
        }

        if self.in_ack {
            self.in_ack = false;
            self.drive_low = false;
            self.bit = 0;
            self.shift = 0;
            self.phase = self.after_ack;
            if self.lock_pending {
                self.lock_pending = false;
                self.stuck_sda_pulses = self.lock_sda_pulses;
                self.scl_lock_pending = self.lock_scl;
            }
            if self.phase == Phase::Read {
                self.out_bit = 0;
                self.present_bit();
            }
            return;
        }

        match self.phase {
            Phase::Header(_) | Phase::Write if self.bit == 8 => {
                let (ack, next) = self.accept(self.shift);
                self.in_ack = true;
                self.drive_low = ack;
                self.after_ack = next;
            }
            Phase::Read => {
                if self.out_bit < 8 {
                    self.present_bit();
                } else {
                    self.drive_low = false;
                }
            }
            Phase::Ignored => self.drive_low = false,
            _ => {}
        }
    }

    fn present_bit(&mut self) {
        let byte = self.memory[usize::from(self.pointer)];
        self.drive_low = byte & (0x80 >> self.out_bit) == 0;
    }

    /// Handles a complete byte, returns whether to acknowledge it and the next phase.
    fn accept(&mut self, byte: u8) -> (bool, Phase) {
        let [high, low] = self.address.to_be_bytes();

        match self.phase {
            Phase::Header(0) if self.ten_bit => {
                let header = 0xf0 | ((high & 0x03) << 1);
                if byte & 0xfe != header {
                    (false, Phase::Ignored)
                } else if byte & 1 == 0 {
                    (true, Phase::Header(1))
                } else if self.ten_bit_matched {
                    (true, Phase::Read)
                } else {
                    (false, Phase::Ignored)
                }
            }
            Phase::Header(0) => {
                if u16::from(byte >> 1) != self.address {
                    (false, Phase::Ignored)
                } else if byte & 1 == 1 {
                    (true, Phase::Read)
                } else {
                    (true, Phase::Write)
                }
            }
            Phase::Header(_) => {
                if byte == low {
                    self.ten_bit_matched = true;
                    (true, Phase::Write)
                } else {
                    (false, Phase::Ignored)
                }
            }
            Phase::Write => {
                self.written.push(byte);
                if self.lock_after == Some(self.written.len()) {
                    self.lock_after = None;
                    self.lock_pending = true;
                }
                let index = self.write_index;
                self.write_index += 1;

                if index == 0 {
                    self.pointer = byte;
                } else {
                    self.memory[usize::from(self.pointer)] = byte;
                    self.pointer = self.pointer.wrapping_add(1);
                }

                let ack = self.nack_data_after.map_or(true, |count| index < count);
                (ack, Phase::Write)
            }
            _ => (false, Phase::Ignored),
        }
    }
}

#[derive(Copy, Clone)]
enum Line {
    Sda,
    Scl,
}

pub struct SimBus {
    controller_sda_low: bool,
    controller_scl_low: bool,
    sda: bool,
    scl: bool,
    target: Target,
}

impl SimBus {
    fn sda_level(&self) -> bool {
        !(self.controller_sda_low || self.target.pulls_sda_low())
    }

    fn scl_level(&self) -> bool {
        !(self.controller_scl_low || self.target.pulls_scl_low())
    }

    fn drive(&mut self, line: Line, low: bool) {
        match line {
            Line::Sda => self.controller_sda_low = low,
            Line::Scl => {
                let released = self.controller_scl_low && !low;
                if released && self.target.phase != Phase::Idle {
                    self.target.scl_hold = self.target.stretch_polls;
                }
                self.controller_scl_low = low;
            }
        }
        self.settle();
    }

    fn read(&mut self, line: Line) -> bool {
        match line {
            Line::Sda => self.sda,
            Line::Scl => {
                if self.target.scl_hold > 0 {
                    self.target.scl_hold -= 1;
                    if self.target.scl_hold == 0 {
                        self.settle();
                    }
                }
                self.scl
            }
        }
    }

    /// Updates the line levels and lets the target react to edges.
    fn settle(&mut self) {
        let (sda, scl) = (self.sda_level(), self.scl_level());

        if scl != self.scl {
            if scl {
                self.target.on_scl_rise(sda);
            } else {
                self.target.on_scl_fall();
            }
        } else if scl && sda != self.sda {
            if sda {
                self.target.on_stop();
            } else {
                self.target.on_start();
            }
        }

        // The target only changes SDA while SCL is low, this never makes another edge.
        self.sda = self.sda_level();
        self.scl = self.scl_level();
    }
}

pub struct SimPin {
    bus: Rc<RefCell<SimBus>>,
    line: Line,
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.bus.borrow_mut().drive(self.line, true);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.bus.borrow_mut().drive(self.line, false);
        Ok(())
    }
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.bus.borrow_mut().read(self.line))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.bus.borrow_mut().read(self.line))
    }
}

/// Records requested delays instead of waiting.
pub struct SimDelay {
    delays: Rc<RefCell<Vec<u32>>>,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.delays.borrow_mut().push(ns);
    }
}

pub struct Sim {
    bus: Rc<RefCell<SimBus>>,
    delays: Rc<RefCell<Vec<u32>>>,
}

impl Sim {
    pub fn new(target: Target) -> Self {
        let mut bus = SimBus {
            controller_sda_low: false,
            controller_scl_low: false,
            sda: true,
            scl: true,
            target,
        };
        bus.sda = bus.sda_level();
        bus.scl = bus.scl_level();

        Self {
            bus: Rc::new(RefCell::new(bus)),
            delays: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn parts(&self) -> (SimPin, SimPin, SimDelay) {
        (
            SimPin {
                bus: Rc::clone(&self.bus),
                line: Line::Sda,
            },
            SimPin {
                bus: Rc::clone(&self.bus),
                line: Line::Scl,
            },
            SimDelay {
                delays: Rc::clone(&self.delays),
            },
        )
    }

    pub fn controller(&self, config: Config) -> SoftI2c<SimPin, SimPin, SimDelay> {
        let (sda, scl, delay) = self.parts();
        SoftI2c::new(sda, scl, delay, config)
    }

    pub fn with_target<R>(&self, f: impl FnOnce(&mut Target) -> R) -> R {
        f(&mut self.bus.borrow_mut().target)
    }

    /// Returns whether both lines are released and high.
    pub fn is_idle(&self) -> bool {
        let bus = self.bus.borrow();
        bus.sda && bus.scl
    }

    pub fn delays(&self) -> Vec<u32> {
        self.delays.borrow().clone()
    }
}
