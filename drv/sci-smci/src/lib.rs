// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A driver for the SCI peripheral in smart-card interface (SMCI) mode.
//!
//! This is the core engine, separated from any particular board's register
//! block: everything hardware-specific goes through the [`SmciHardware`]
//! trait, which a board crate implements over its PAC and tests implement
//! with a fake.
//!
//! # Execution model
//!
//! The link is half-duplex and interrupt driven. `read` and `write` return
//! immediately after registering a buffer; the owner's interrupt handlers
//! feed [`SciSmci::on_rx_interrupt`], [`SciSmci::on_tx_interrupt`], and
//! [`SciSmci::on_error_interrupt`], and completions and faults come back
//! through the registered callback, dispatched synchronously in interrupt
//! context. Nothing in the interrupt path allocates; the callback argument
//! record is a single slot in the control block, reused per dispatch.
//!
//! The control block is single-owner. Control-plane calls (`baud_set`,
//! `transfer_mode_set`, `clock_control`) must be serialized against the
//! interrupt handlers by the owner, typically by masking the channel's
//! interrupts around the call.
//!
//! # Buffers
//!
//! Transfer buffers are borrowed into the control block for the `'buf`
//! lifetime, so the caller cannot touch a buffer while its transfer is in
//! flight; a completed or aborted read's buffer comes back out through
//! [`SciSmci::take_rx_buffer`].

#![cfg_attr(not(test), no_std)]

pub mod baud;
mod hardware;

pub use hardware::{RxFault, SmciHardware};

use core::sync::atomic::{AtomicU32, Ordering};

use baud::SpeedRegisters;
use drv_smci_api::{
    EventKind, Smci, SmciCallbackArgs, SmciConfig, SmciError, SmciEvent,
    SmciSpeedParams, SmciState, SmciStatus, SmciTransferMode,
    DefaultCallback, MAX_IRQ_PRIORITY,
};
use enum_map::EnumMap;
use tracebuf::TraceBuf;

/// Number of SCI channels in this peripheral family.
pub const CHANNEL_COUNT: u8 = 10;

const TRACE_DEPTH: usize = 32;

/// One claim bit per hardware channel, shared by every control block in the
/// image. A channel is claimed for the whole open/close session.
static CLAIMED: AtomicU32 = AtomicU32::new(0);

fn claim_channel(channel: u8) -> bool {
    let bit = 1 << u32::from(channel);
    CLAIMED.fetch_or(bit, Ordering::SeqCst) & bit == 0
}

fn release_channel(channel: u8) {
    let bit = 1 << u32::from(channel);
    CLAIMED.fetch_and(!bit, Ordering::SeqCst);
}

/// Trace entries recorded by the engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trace {
    Open { channel: u8 },
    Close { channel: u8 },
    ClockEnable(bool),
    ModeSet,
    SpeedSet { brr: u8, cks: u8 },
    ReadStart { len: u32 },
    WriteStart { len: u32 },
    TransferAborted,
    Event(EventKind),
}

struct Receive<'buf> {
    dest: &'buf mut [u8],
    pos: usize,
}

struct Transmit<'buf> {
    src: &'buf [u8],
    pos: usize,
}

/// SMCI control block for one SCI channel.
pub struct SciSmci<'buf, H, F = DefaultCallback> {
    hw: H,
    open: bool,
    channel: u8,
    state: SmciState,
    mode: SmciTransferMode,
    speed: Option<SpeedRegisters>,
    rx: Option<Receive<'buf>>,
    /// Buffer of the most recently completed or aborted read, waiting to be
    /// handed back to the caller.
    rx_done: Option<&'buf mut [u8]>,
    tx: Option<Transmit<'buf>>,
    bytes_recvd: u32,
    callback: Option<F>,
    /// Single-slot callback argument record, reused for every dispatch.
    args: SmciCallbackArgs,
    counts: EnumMap<EventKind, u32>,
    trace: TraceBuf<Trace, TRACE_DEPTH>,
}

impl<'buf, H, F> SciSmci<'buf, H, F>
where
    H: SmciHardware,
    F: FnMut(&SmciCallbackArgs),
{
    /// Creates a control block over `hw`. The block starts unopened; every
    /// operation but `open` fails with `NotOpen` until `open` succeeds.
    pub fn new(hw: H) -> Self {
        Self {
            hw,
            open: false,
            channel: 0,
            state: SmciState::IdleClockOff,
            mode: SmciTransferMode::default(),
            speed: None,
            rx: None,
            rx_done: None,
            tx: None,
            bytes_recvd: 0,
            callback: None,
            args: SmciCallbackArgs {
                channel: 0,
                event: SmciEvent::RxComplete,
            },
            counts: EnumMap::default(),
            trace: TraceBuf::new(),
        }
    }

    fn check_open(&self) -> Result<(), SmciError> {
        if self.open {
            Ok(())
        } else {
            Err(SmciError::NotOpen)
        }
    }

    /// Validates `cfg`, claims the hardware channel, and brings the
    /// peripheral up with the clock output off.
    pub fn open(&mut self, cfg: SmciConfig<F>) -> Result<(), SmciError> {
        if self.open {
            return Err(SmciError::InvalidState);
        }
        if cfg.channel >= CHANNEL_COUNT {
            return Err(SmciError::InvalidArgument);
        }
        for irq in [&cfg.rxi, &cfg.txi, &cfg.eri] {
            if irq.priority > MAX_IRQ_PRIORITY {
                return Err(SmciError::InvalidArgument);
            }
        }

        if !claim_channel(cfg.channel) {
            return Err(SmciError::ResourceConflict);
        }

        self.hw.setup(cfg.channel, &cfg.rxi, &cfg.txi, &cfg.eri);
        // The receiver listens from the start so that bytes arriving outside
        // a read still surface as RxChar events.
        self.hw.rx_enable(true);
        self.hw.rx_interrupt_enable(true);

        self.channel = cfg.channel;
        self.args.channel = cfg.channel;
        self.callback = cfg.callback;
        self.state = SmciState::IdleClockOff;
        self.bytes_recvd = 0;
        self.counts = EnumMap::default();
        self.open = true;
        self.trace.record(Trace::Open {
            channel: cfg.channel,
        });
        Ok(())
    }

    /// Starts an interrupt-driven read into `dest`.
    pub fn read(&mut self, dest: &'buf mut [u8]) -> Result<(), SmciError> {
        self.check_open()?;
        if dest.is_empty() {
            return Err(SmciError::InvalidArgument);
        }
        if self.state != SmciState::TxRxIdle {
            return Err(SmciError::InvalidState);
        }

        self.trace.record(Trace::ReadStart {
            len: dest.len() as u32,
        });
        self.bytes_recvd = 0;
        self.rx_done = None;
        self.rx = Some(Receive { dest, pos: 0 });
        self.state = SmciState::RxProgressing;
        Ok(())
    }

    /// Starts an interrupt-driven write of `src`, pushing the first byte
    /// immediately.
    pub fn write(&mut self, src: &'buf [u8]) -> Result<(), SmciError> {
        self.check_open()?;
        let (&first, _) = match src.split_first() {
            Some(parts) => parts,
            None => return Err(SmciError::InvalidArgument),
        };
        if self.state != SmciState::TxRxIdle {
            return Err(SmciError::InvalidState);
        }

        self.trace.record(Trace::WriteStart {
            len: src.len() as u32,
        });
        self.state = SmciState::TxProgressing;
        self.tx = Some(Transmit { src, pos: 1 });
        self.hw.tx_interrupt_enable(true);
        self.hw.tx_byte(first);
        Ok(())
    }

    /// Applies protocol, convention, and GSM-mode settings. Legal only
    /// while no transfer is in progress.
    pub fn transfer_mode_set(
        &mut self,
        mode: &SmciTransferMode,
    ) -> Result<(), SmciError> {
        self.check_open()?;
        match self.state {
            SmciState::IdleClockOff | SmciState::TxRxIdle => {}
            _ => return Err(SmciError::InvalidState),
        }

        self.mode = *mode;
        self.hw.apply_mode(mode);
        self.trace.record(Trace::ModeSet);
        Ok(())
    }

    /// Computes and commits baud registers for `params`.
    ///
    /// Any in-progress transfer is aborted without a completion event, and
    /// reception is held off while the new settings are written. On
    /// rejection nothing changes, including the current speed settings.
    pub fn baud_set(
        &mut self,
        params: &SmciSpeedParams,
    ) -> Result<(), SmciError> {
        self.check_open()?;
        let regs = baud::compute(self.hw.pclk_hz(), params, self.mode.gsm_mode)?;

        if matches!(
            self.state,
            SmciState::TxProgressing | SmciState::RxProgressing
        ) {
            self.abort_transfer();
        }

        self.hw.rx_enable(false);
        self.hw.apply_speed(&regs);
        self.hw.rx_enable(true);
        self.speed = Some(regs);
        self.trace.record(Trace::SpeedSet {
            brr: regs.brr,
            cks: regs.cks,
        });
        Ok(())
    }

    /// Reports the state machine state and receive progress.
    pub fn status_get(&self) -> Result<SmciStatus, SmciError> {
        self.check_open()?;
        Ok(SmciStatus {
            state: self.state,
            bytes_recvd: self.bytes_recvd,
        })
    }

    /// Starts or stops the clock output to the card. A no-op if the clock
    /// is already in the requested state; illegal during a transfer.
    pub fn clock_control(&mut self, enable: bool) -> Result<(), SmciError> {
        self.check_open()?;
        match (enable, self.state) {
            (true, SmciState::IdleClockOff) => {
                self.hw.clock_enable(true);
                self.state = SmciState::TxRxIdle;
                self.trace.record(Trace::ClockEnable(true));
            }
            (false, SmciState::TxRxIdle) => {
                self.hw.clock_enable(false);
                self.state = SmciState::IdleClockOff;
                self.trace.record(Trace::ClockEnable(false));
            }
            (true, SmciState::TxRxIdle)
            | (false, SmciState::IdleClockOff) => {}
            _ => return Err(SmciError::InvalidState),
        }
        Ok(())
    }

    /// Replaces the event callback.
    pub fn callback_set(&mut self, callback: F) -> Result<(), SmciError> {
        self.check_open()?;
        self.callback = Some(callback);
        Ok(())
    }

    /// Releases the hardware channel. An in-progress transfer is aborted
    /// without a completion event.
    pub fn close(&mut self) -> Result<(), SmciError> {
        self.check_open()?;

        if matches!(
            self.state,
            SmciState::TxProgressing | SmciState::RxProgressing
        ) {
            self.abort_transfer();
        }
        self.hw.tx_interrupt_enable(false);
        self.hw.rx_interrupt_enable(false);
        self.hw.shutdown();

        self.trace.record(Trace::Close {
            channel: self.channel,
        });
        release_channel(self.channel);
        self.open = false;
        self.state = SmciState::IdleClockOff;
        self.callback = None;
        self.speed = None;
        self.rx_done = None;
        self.bytes_recvd = 0;
        Ok(())
    }

    /// Hands back the buffer of the most recently completed or aborted
    /// read, if it hasn't been taken yet.
    pub fn take_rx_buffer(&mut self) -> Option<&'buf mut [u8]> {
        self.rx_done.take()
    }

    /// Per-event dispatch counts since open.
    pub fn event_counts(&self) -> &EnumMap<EventKind, u32> {
        &self.counts
    }

    /// The engine's trace ring, for debugger or test inspection.
    pub fn trace(&self) -> &TraceBuf<Trace, TRACE_DEPTH> {
        &self.trace
    }

    /// Access to the underlying hardware, for owner-side interrupt
    /// management.
    pub fn hardware(&self) -> &H {
        &self.hw
    }

    /// Feed from the receive interrupt handler: one received byte.
    ///
    /// During an active read the byte lands in the destination buffer;
    /// filling it completes the read. Outside a read the byte is delivered
    /// as an `RxChar` event and nothing else changes.
    pub fn on_rx_interrupt(&mut self, byte: u8) {
        if !self.open {
            return;
        }
        match self.rx.take() {
            Some(mut rx) if self.state == SmciState::RxProgressing => {
                if let Some(slot) = rx.dest.get_mut(rx.pos) {
                    *slot = byte;
                    rx.pos += 1;
                    self.bytes_recvd = rx.pos as u32;
                }
                if rx.pos == rx.dest.len() {
                    self.state = SmciState::TxRxIdle;
                    self.rx_done = Some(rx.dest);
                    self.dispatch(SmciEvent::RxComplete);
                } else {
                    self.rx = Some(rx);
                }
            }
            other => {
                self.rx = other;
                self.dispatch(SmciEvent::RxChar(byte));
            }
        }
    }

    /// Feed from the transmit interrupt handler, which fires once the
    /// previous byte has fully left the shift register: pushes the next
    /// pending byte, or completes the write after the last one.
    pub fn on_tx_interrupt(&mut self) {
        if !self.open {
            return;
        }
        match self.tx.take() {
            Some(mut tx) if self.state == SmciState::TxProgressing => {
                if let Some(&byte) = tx.src.get(tx.pos) {
                    tx.pos += 1;
                    self.tx = Some(tx);
                    self.hw.tx_byte(byte);
                } else {
                    self.hw.tx_interrupt_enable(false);
                    self.state = SmciState::TxRxIdle;
                    self.dispatch(SmciEvent::TxComplete);
                }
            }
            // Spurious interrupt; tolerate it.
            other => self.tx = other,
        }
    }

    /// Feed from the error interrupt handler.
    ///
    /// Faults are reported to the callback and do not abort an in-flight
    /// transfer; recovery is the caller's call, since there is no automatic
    /// retry anywhere in this driver.
    pub fn on_error_interrupt(&mut self, fault: RxFault, byte: u8) {
        if !self.open {
            return;
        }
        let event = match fault {
            RxFault::Parity => SmciEvent::ErrParity(byte),
            RxFault::LowSignal => SmciEvent::ErrLowSignal(byte),
            RxFault::Overrun => SmciEvent::ErrOverrun(byte),
        };
        self.dispatch(event);
    }

    /// Drops any in-flight transfer with no completion event. An aborted
    /// read's buffer becomes reclaimable via `take_rx_buffer`.
    fn abort_transfer(&mut self) {
        self.tx = None;
        if let Some(rx) = self.rx.take() {
            self.rx_done = Some(rx.dest);
        }
        self.hw.tx_interrupt_enable(false);
        self.state = SmciState::TxRxIdle;
        self.trace.record(Trace::TransferAborted);
    }

    fn dispatch(&mut self, event: SmciEvent) {
        self.counts[event.kind()] += 1;
        self.trace.record(Trace::Event(event.kind()));
        self.args.event = event;
        if let Some(callback) = self.callback.as_mut() {
            callback(&self.args);
        }
    }
}

impl<'buf, H, F> Smci<'buf> for SciSmci<'buf, H, F>
where
    H: SmciHardware,
    F: FnMut(&SmciCallbackArgs),
{
    type Callback = F;

    fn open(&mut self, cfg: SmciConfig<F>) -> Result<(), SmciError> {
        SciSmci::open(self, cfg)
    }

    fn read(&mut self, dest: &'buf mut [u8]) -> Result<(), SmciError> {
        SciSmci::read(self, dest)
    }

    fn write(&mut self, src: &'buf [u8]) -> Result<(), SmciError> {
        SciSmci::write(self, src)
    }

    fn transfer_mode_set(
        &mut self,
        mode: &SmciTransferMode,
    ) -> Result<(), SmciError> {
        SciSmci::transfer_mode_set(self, mode)
    }

    fn baud_set(&mut self, params: &SmciSpeedParams) -> Result<(), SmciError> {
        SciSmci::baud_set(self, params)
    }

    fn status_get(&self) -> Result<SmciStatus, SmciError> {
        SciSmci::status_get(self)
    }

    fn clock_control(&mut self, enable: bool) -> Result<(), SmciError> {
        SciSmci::clock_control(self, enable)
    }

    fn callback_set(&mut self, callback: F) -> Result<(), SmciError> {
        SciSmci::callback_set(self, callback)
    }

    fn close(&mut self) -> Result<(), SmciError> {
        SciSmci::close(self)
    }
}

impl<'buf, H, F> Drop for SciSmci<'buf, H, F> {
    fn drop(&mut self) {
        // The claim must not outlive the control block, or the channel
        // would be wedged until reset.
        if self.open {
            release_channel(self.channel);
        }
    }
}
