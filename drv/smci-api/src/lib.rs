// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! API crate for Smart Card Interface (SMCI) drivers.
//!
//! SMCI is an asynchronous, half-duplex, ISO/IEC 7816-3 serial link to a
//! smart card. This crate defines the types shared between SMCI driver
//! implementations and their callers:
//!
//! - the driver state machine ([`SmciState`]) and its observable status,
//! - callback events ([`SmciEvent`]), delivered from interrupt context,
//! - ISO 7816-3 speed parameters (the Fi and Di integers from Tables 7/8 of
//!   the third edition, plus a requested baud rate, where baud = 1/ETU),
//! - session transfer-mode settings (protocol, bit convention, GSM mode),
//! - the [`Smci`] trait, the operation set every SMCI implementation
//!   exposes.
//!
//! Implementations are expected to be interrupt driven: `read` and `write`
//! return immediately and completion is signaled through the registered
//! callback.

#![cfg_attr(not(test), no_std)]

use enum_map::Enum;
use num_derive::FromPrimitive;
use static_assertions::const_assert_eq;

/// Errors returned by SMCI operations.
///
/// Hardware-detected receive faults (parity, overrun, low error signal) are
/// inherently asynchronous and are never returned from a call; they only
/// ever arrive as [`SmciEvent`]s through the callback.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
pub enum SmciError {
    /// Null-ish or out-of-range argument: empty buffer, bad channel number,
    /// out-of-range interrupt priority, zero baud rate.
    InvalidArgument = 1,
    /// The operation is not legal in the current state machine state.
    InvalidState,
    /// The hardware channel is already claimed by another control block.
    ResourceConflict,
    /// Reserved/unsupported Fi or Di index, or no register setting can
    /// approximate the requested baud rate.
    ConfigurationInvalid,
    /// The control block has not been opened (or has been closed).
    NotOpen,
}

/// SMCI driver state machine states.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SmciState {
    /// Idle with no clock output to the card. Initial state after open.
    IdleClockOff,
    /// Clock is active, no transfer in progress.
    TxRxIdle,
    /// Transmission in progress.
    TxProgressing,
    /// Reception in progress.
    RxProgressing,
}

/// Events delivered to the registered callback.
///
/// The link is half-duplex and the hardware reports one condition at a time,
/// so this is a closed enum rather than a bitmask; simultaneous hardware
/// conditions arrive as separate dispatches. Byte-level events carry the
/// received (or offending) byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SmciEvent {
    /// An active read has received all requested bytes.
    RxComplete,
    /// An active write has fully shifted its last byte out on the wire.
    TxComplete,
    /// A byte arrived while no read was active. The byte is not buffered
    /// anywhere; this event is its only delivery.
    RxChar(u8),
    /// Parity error on the wire.
    ErrParity(u8),
    /// The card pulled the I/O line low during the error signal window.
    ErrLowSignal(u8),
    /// A received byte overran the receive data register before the driver
    /// could read it.
    ErrOverrun(u8),
}

/// Payload-free classification of [`SmciEvent`], for event counters and
/// trace entries.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Enum)]
pub enum EventKind {
    RxComplete,
    TxComplete,
    RxChar,
    ErrParity,
    ErrLowSignal,
    ErrOverrun,
}

impl SmciEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SmciEvent::RxComplete => EventKind::RxComplete,
            SmciEvent::TxComplete => EventKind::TxComplete,
            SmciEvent::RxChar(_) => EventKind::RxChar,
            SmciEvent::ErrParity(_) => EventKind::ErrParity,
            SmciEvent::ErrLowSignal(_) => EventKind::ErrLowSignal,
            SmciEvent::ErrOverrun(_) => EventKind::ErrOverrun,
        }
    }
}

/// ISO 7816-3 protocol selection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SmciProtocol {
    /// Character transfer mode (T = 0).
    T0,
    /// Block transfer mode (T = 1).
    T1,
}

/// Bit convention on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SmciConvention {
    /// LSB first, high level = 1.
    Direct,
    /// MSB first, low level = 1.
    Inverse,
}

/// Clock conversion integer Fi, per ISO/IEC 7816-3 (3rd edition) Table 8.
///
/// The index is the value a card reports in the high nibble of TA1 in its
/// ATR. Each supported index fixes the number of base clock cycles per ETU
/// and the maximum card clock frequency. Indices 7, 8, 14, and 15 are not
/// supported by the standard.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum ClockConversion {
    /// 372 cycles per ETU, max 4 MHz.
    F372Max4 = 0,
    /// 372 cycles per ETU, max 5 MHz.
    F372Max5 = 1,
    /// 558 cycles per ETU, max 6 MHz.
    F558Max6 = 2,
    /// 744 cycles per ETU, max 8 MHz.
    F744Max8 = 3,
    /// 1116 cycles per ETU, max 12 MHz.
    F1116Max12 = 4,
    /// 1488 cycles per ETU, max 16 MHz.
    F1488Max16 = 5,
    /// 1860 cycles per ETU, max 20 MHz.
    F1860Max20 = 6,
    Unsupported7 = 7,
    Unsupported8 = 8,
    /// 512 cycles per ETU, max 5 MHz.
    F512Max5 = 9,
    /// 768 cycles per ETU, max 7.5 MHz.
    F768Max7p5 = 10,
    /// 1024 cycles per ETU, max 10 MHz.
    F1024Max10 = 11,
    /// 1536 cycles per ETU, max 15 MHz.
    F1536Max15 = 12,
    /// 2048 cycles per ETU, max 20 MHz.
    F2048Max20 = 13,
    Unsupported14 = 14,
    Unsupported15 = 15,
}

/// Base clock cycles per ETU for each Fi index; `None` marks unsupported
/// indices.
const FI_CYCLES: [Option<u16>; 16] = [
    Some(372),
    Some(372),
    Some(558),
    Some(744),
    Some(1116),
    Some(1488),
    Some(1860),
    None,
    None,
    Some(512),
    Some(768),
    Some(1024),
    Some(1536),
    Some(2048),
    None,
    None,
];

/// Maximum card clock frequency in Hz for each Fi index.
const FI_MAX_HZ: [Option<u32>; 16] = [
    Some(4_000_000),
    Some(5_000_000),
    Some(6_000_000),
    Some(8_000_000),
    Some(12_000_000),
    Some(16_000_000),
    Some(20_000_000),
    None,
    None,
    Some(5_000_000),
    Some(7_500_000),
    Some(10_000_000),
    Some(15_000_000),
    Some(20_000_000),
    None,
    None,
];

const_assert_eq!(FI_CYCLES.len(), 16);
const_assert_eq!(FI_MAX_HZ.len(), 16);

impl ClockConversion {
    /// Base clock cycles per ETU, or `None` for an unsupported index.
    pub fn cycles(&self) -> Option<u16> {
        FI_CYCLES[*self as usize]
    }

    /// Maximum card clock frequency in Hz, or `None` for an unsupported
    /// index.
    pub fn max_card_hz(&self) -> Option<u32> {
        FI_MAX_HZ[*self as usize]
    }
}

/// Baud rate adjustment integer Di, per ISO/IEC 7816-3 (3rd edition)
/// Table 7.
///
/// The index is the value a card reports in the low nibble of TA1 in its
/// ATR. Index 0 and indices 10 through 15 are reserved for future use.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum BaudAdjustment {
    Reserved0 = 0,
    Div1 = 1,
    Div2 = 2,
    Div4 = 3,
    Div8 = 4,
    Div16 = 5,
    Div32 = 6,
    Div64 = 7,
    Div12 = 8,
    Div20 = 9,
    Reserved10 = 10,
    Reserved11 = 11,
    Reserved12 = 12,
    Reserved13 = 13,
    Reserved14 = 14,
    Reserved15 = 15,
}

/// Di divisor values; `None` marks reserved indices.
const DI_DIVISOR: [Option<u16>; 16] = [
    None,
    Some(1),
    Some(2),
    Some(4),
    Some(8),
    Some(16),
    Some(32),
    Some(64),
    Some(12),
    Some(20),
    None,
    None,
    None,
    None,
    None,
    None,
];

const_assert_eq!(DI_DIVISOR.len(), 16);

impl BaudAdjustment {
    /// The Di divisor, or `None` for a reserved index.
    pub fn divisor(&self) -> Option<u16> {
        DI_DIVISOR[*self as usize]
    }
}

/// Session transfer-mode settings, applied before a transaction starts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SmciTransferMode {
    pub protocol: SmciProtocol,
    pub convention: SmciConvention,
    /// GSM 11.11 style operation with fixed ETU timing.
    pub gsm_mode: bool,
}

impl Default for SmciTransferMode {
    fn default() -> Self {
        Self {
            protocol: SmciProtocol::T0,
            convention: SmciConvention::Direct,
            gsm_mode: false,
        }
    }
}

/// Inputs to the baud register calculation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SmciSpeedParams {
    /// Requested bit rate in bits per second (baud = 1/ETU).
    pub baud: u32,
    pub fi: ClockConversion,
    pub di: BaudAdjustment,
}

/// Point-in-time driver status, produced by `status_get`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SmciStatus {
    pub state: SmciState,
    /// Bytes stored into the destination buffer since `read` was called.
    pub bytes_recvd: u32,
}

/// Callback argument record.
///
/// A driver keeps exactly one of these per control block and reuses it for
/// every dispatch, so delivering an event never allocates. The record is
/// only valid for the duration of the callback.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SmciCallbackArgs {
    /// Hardware channel number the event belongs to.
    pub channel: u8,
    pub event: SmciEvent,
}

/// Interrupt wiring for one interrupt source.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IrqConfig {
    /// Interrupt number, as understood by the interrupt controller.
    pub irq: u16,
    /// Priority level, 0 (highest) through [`MAX_IRQ_PRIORITY`].
    pub priority: u8,
}

/// Highest (numerically largest) legal interrupt priority level.
pub const MAX_IRQ_PRIORITY: u8 = 15;

/// Callback type used when a config is built without a callback; a plain fn
/// pointer so that `SmciConfig::new` needs no type annotations.
pub type DefaultCallback = fn(&SmciCallbackArgs);

/// Open-time configuration for an SMCI channel.
///
/// `F` is the callback type; any `FnMut(&SmciCallbackArgs)` works, and
/// captured state takes the place of the user context pointer a C driver
/// would carry alongside the function pointer.
pub struct SmciConfig<F = DefaultCallback> {
    /// Channel number of the hardware.
    pub channel: u8,
    /// Receive interrupt wiring.
    pub rxi: IrqConfig,
    /// Transmit interrupt wiring.
    pub txi: IrqConfig,
    /// Error interrupt wiring.
    pub eri: IrqConfig,
    /// Callback invoked from interrupt context for every event. The
    /// callback must not block.
    pub callback: Option<F>,
}

impl SmciConfig<DefaultCallback> {
    /// Produces a configuration for `channel` with all interrupts at the
    /// lowest priority and no callback.
    pub fn new(channel: u8) -> Self {
        let irq = IrqConfig {
            irq: 0,
            priority: MAX_IRQ_PRIORITY,
        };
        Self {
            channel,
            rxi: irq,
            txi: irq,
            eri: irq,
            callback: None,
        }
    }
}

impl<F: FnMut(&SmciCallbackArgs)> SmciConfig<F> {
    /// Replaces the callback, possibly changing its type.
    pub fn with_callback<G: FnMut(&SmciCallbackArgs)>(
        self,
        callback: G,
    ) -> SmciConfig<G> {
        SmciConfig {
            channel: self.channel,
            rxi: self.rxi,
            txi: self.txi,
            eri: self.eri,
            callback: Some(callback),
        }
    }
}

/// The SMCI operation set.
///
/// This is the moral equivalent of the shared function-pointer interface
/// table a vendor HAL would hand out per peripheral family; callers hold
/// `impl Smci` and don't care which peripheral is behind it.
///
/// `'buf` is the lifetime of caller-supplied transfer buffers. The driver
/// borrows a transfer's buffer for the duration of the transfer, so the
/// caller cannot touch it until the transfer completes or is aborted.
pub trait Smci<'buf> {
    type Callback: FnMut(&SmciCallbackArgs);

    /// Claims the configured hardware channel and initializes the state
    /// machine to [`SmciState::IdleClockOff`].
    fn open(
        &mut self,
        cfg: SmciConfig<Self::Callback>,
    ) -> Result<(), SmciError>;

    /// Starts an interrupt-driven read of `dest.len()` bytes into `dest`.
    ///
    /// Legal only from [`SmciState::TxRxIdle`]. Returns immediately; the
    /// callback fires [`SmciEvent::RxComplete`] when the buffer is full.
    /// Bytes that arrive while no read is active are delivered individually
    /// as [`SmciEvent::RxChar`] instead.
    fn read(&mut self, dest: &'buf mut [u8]) -> Result<(), SmciError>;

    /// Starts an interrupt-driven write of `src`.
    ///
    /// Legal only from [`SmciState::TxRxIdle`]. The buffer is borrowed
    /// until the transfer completes; the callback fires
    /// [`SmciEvent::TxComplete`] once the last byte has fully left the
    /// wire, not merely been queued.
    fn write(&mut self, src: &'buf [u8]) -> Result<(), SmciError>;

    /// Applies protocol, convention, and GSM-mode settings.
    ///
    /// Legal only while no transfer is in progress.
    fn transfer_mode_set(
        &mut self,
        mode: &SmciTransferMode,
    ) -> Result<(), SmciError>;

    /// Computes and commits baud registers for `params`.
    ///
    /// Calling this aborts any in-progress transfer (no completion event is
    /// raised for it) and disables reception until the new settings have
    /// been applied. On rejection the previous speed settings are left
    /// untouched.
    fn baud_set(&mut self, params: &SmciSpeedParams) -> Result<(), SmciError>;

    /// Reports the current state and receive progress. Never changes state.
    fn status_get(&self) -> Result<SmciStatus, SmciError>;

    /// Enables or disables the clock output to the card, moving between
    /// [`SmciState::IdleClockOff`] and [`SmciState::TxRxIdle`]. Illegal
    /// while a transfer is in progress.
    fn clock_control(&mut self, enable: bool) -> Result<(), SmciError>;

    /// Replaces the event callback.
    fn callback_set(&mut self, callback: Self::Callback)
        -> Result<(), SmciError>;

    /// Releases the hardware channel. Legal from any state; an in-progress
    /// transfer is silently aborted. Further operations on this control
    /// block return [`SmciError::NotOpen`].
    fn close(&mut self) -> Result<(), SmciError>;
}
