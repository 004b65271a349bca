// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The register-access seam between the SMCI engine and the SCI silicon.
//!
//! The state machine and I/O engine in this crate are hardware-independent;
//! everything that touches a memory-mapped register goes through
//! [`SmciHardware`]. A board crate implements this over the PAC register
//! block for its SCI instance; tests implement it with a recording fake.

use crate::baud::SpeedRegisters;
use drv_smci_api::{IrqConfig, SmciTransferMode};

/// Register-level primitives the SMCI engine needs from an SCI channel.
///
/// Implementations are thin: each method is expected to be a handful of
/// volatile register accesses with no internal state machine of its own.
pub trait SmciHardware {
    /// Frequency in Hz of the peripheral clock feeding the baud generator.
    fn pclk_hz(&self) -> u32;

    /// Channel bring-up at open time: put the peripheral in smart-card
    /// mode and wire the receive/transmit/error interrupts at the given
    /// priorities. The clock output to the card stays off.
    fn setup(
        &mut self,
        channel: u8,
        rxi: &IrqConfig,
        txi: &IrqConfig,
        eri: &IrqConfig,
    );

    /// Quiesce the channel at close time: mask interrupts, stop the clock
    /// output, release pins.
    fn shutdown(&mut self);

    /// Starts or stops the clock output to the card.
    fn clock_enable(&mut self, enable: bool);

    /// Applies protocol, convention, and GSM-mode settings to the mode
    /// registers.
    fn apply_mode(&mut self, mode: &SmciTransferMode);

    /// Commits computed baud generator settings.
    fn apply_speed(&mut self, regs: &SpeedRegisters);

    /// Enables or disables the receiver.
    fn rx_enable(&mut self, enable: bool);

    /// Unmasks or masks the receive (and receive-error) interrupt sources.
    fn rx_interrupt_enable(&mut self, enable: bool);

    /// Unmasks or masks the transmit interrupt source.
    fn tx_interrupt_enable(&mut self, enable: bool);

    /// Loads one byte into the transmit data register.
    fn tx_byte(&mut self, byte: u8);
}

/// Receive faults the hardware reports through the error interrupt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RxFault {
    /// Parity error on a received character.
    Parity,
    /// The card signaled an error by pulling the line low during the error
    /// signal window (T = 0).
    LowSignal,
    /// The receive data register was overwritten before it was read.
    Overrun,
}
