// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Baud register calculation for the SCI smart-card baud generator.
//!
//! The generator model is
//!
//! ```text
//! baud = pclk / (S * 2^(2n + 1) * (BRR + 1))
//! ```
//!
//! where `S` is the number of base clock cycles per ETU (Fi/Di from the
//! card's ATR, or a fixed 32 in GSM mode), `n` is the 2-bit clock select
//! prescaler, and `BRR` is the 8-bit bit rate register. Given a requested
//! baud rate we scan `n` for the `(n, BRR)` pair whose achieved rate is
//! closest to the request.

use drv_smci_api::{SmciError, SmciSpeedParams};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Computed baud generator settings, ready to commit to the registers.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct SpeedRegisters {
    /// Base clock cycles per ETU (S), rounded to the nearest integer when
    /// Fi/Di doesn't divide evenly.
    pub etu_cycles: u16,
    /// Bit rate register value.
    pub brr: u8,
    /// Clock select prescaler index n, 0 through 3.
    pub cks: u8,
}

/// Permitted deviation of the achieved rate from the request, as a
/// fraction: 1/20 = 5%. Smart cards tolerate a few percent of ETU error;
/// anything beyond that means the requested rate is not reachable from
/// this peripheral clock.
const MAX_ERROR_DENOM: u32 = 20;

/// GSM 11.11 operation uses a fixed 32-cycle ETU regardless of Fi/Di.
const GSM_ETU_CYCLES: u64 = 32;

/// Converts requested speed parameters into register settings.
///
/// Reserved or unsupported Fi/Di indices are rejected with
/// `ConfigurationInvalid`, as is a request whose implied card clock
/// (`baud * Fi / Di`) exceeds the maximum frequency ISO 7816-3 allows for
/// that Fi index, or a rate no `(n, BRR)` pair can approximate within
/// tolerance. A zero baud rate is `InvalidArgument`.
pub fn compute(
    pclk_hz: u32,
    params: &SmciSpeedParams,
    gsm_mode: bool,
) -> Result<SpeedRegisters, SmciError> {
    if params.baud == 0 || pclk_hz == 0 {
        return Err(SmciError::InvalidArgument);
    }

    let fi = params
        .fi
        .cycles()
        .ok_or(SmciError::ConfigurationInvalid)? as u64;
    let max_card_hz = params
        .fi
        .max_card_hz()
        .ok_or(SmciError::ConfigurationInvalid)? as u64;
    let di = params
        .di
        .divisor()
        .ok_or(SmciError::ConfigurationInvalid)? as u64;

    // The card clock implied by this rate must stay within the Fi index's
    // frequency class.
    if params.baud as u64 * fi > max_card_hz * di {
        return Err(SmciError::ConfigurationInvalid);
    }

    // S as a ratio, to avoid losing precision on non-integer Fi/Di.
    let (s_num, s_den) = if gsm_mode { (GSM_ETU_CYCLES, 1) } else { (fi, di) };

    let baud = params.baud as u64;
    let pclk = pclk_hz as u64;

    let mut best: Option<(u64, u8, u8)> = None;
    for cks in 0..=3u8 {
        let scale = 1u64 << (2 * cks + 1);
        // Nearest BRR + 1 for this prescaler, clamped to the register
        // range.
        let denom = s_num * scale * baud;
        let brr_plus_1 = ((pclk * s_den + denom / 2) / denom).clamp(1, 256);
        let achieved = pclk * s_den / (s_num * scale * brr_plus_1);
        let error = achieved.abs_diff(baud);
        if best.map_or(true, |(e, _, _)| error < e) {
            best = Some((error, (brr_plus_1 - 1) as u8, cks));
        }
    }

    match best {
        Some((error, brr, cks))
            if error <= baud / u64::from(MAX_ERROR_DENOM) =>
        {
            Ok(SpeedRegisters {
                etu_cycles: ((s_num + s_den / 2) / s_den) as u16,
                brr,
                cks,
            })
        }
        _ => Err(SmciError::ConfigurationInvalid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_smci_api::{BaudAdjustment, ClockConversion};

    const PCLK: u32 = 24_000_000;

    fn params(
        baud: u32,
        fi: ClockConversion,
        di: BaudAdjustment,
    ) -> SmciSpeedParams {
        SmciSpeedParams { baud, fi, di }
    }

    #[test]
    fn atr_rate_at_3mhz_card_clock() {
        // 3 MHz card clock at Fi = 372, Di = 1 gives 8064.5 baud; with
        // pclk = 24 MHz the generator hits it at n = 0, BRR = 3.
        let regs = compute(
            PCLK,
            &params(8065, ClockConversion::F372Max4, BaudAdjustment::Div1),
            false,
        )
        .unwrap();
        assert_eq!(
            regs,
            SpeedRegisters {
                etu_cycles: 372,
                brr: 3,
                cks: 0,
            }
        );
    }

    #[test]
    fn gsm_mode_forces_32_cycle_etu() {
        // 4.9152 MHz pclk / (32 * 2 * 8) = 9600 baud exactly.
        let regs = compute(
            4_915_200,
            &params(9600, ClockConversion::F372Max4, BaudAdjustment::Div1),
            true,
        )
        .unwrap();
        assert_eq!(
            regs,
            SpeedRegisters {
                etu_cycles: 32,
                brr: 7,
                cks: 0,
            }
        );
    }

    #[test]
    fn fractional_fi_di_ratio() {
        // Fi = 558, Di = 4: S = 139.5. The ratio is carried exactly; only
        // the reported etu_cycles is rounded.
        let regs = compute(
            PCLK,
            &params(21505, ClockConversion::F558Max6, BaudAdjustment::Div4),
            false,
        )
        .unwrap();
        assert_eq!(regs.etu_cycles, 140);
        // 24e6 * 4 / (558 * 2 * (3 + 1)) = 21505.4
        assert_eq!(regs.brr, 3);
        assert_eq!(regs.cks, 0);
    }

    #[test]
    fn zero_baud_is_invalid_argument() {
        assert_eq!(
            compute(
                PCLK,
                &params(0, ClockConversion::F372Max4, BaudAdjustment::Div1),
                false,
            ),
            Err(SmciError::InvalidArgument)
        );
    }

    #[test]
    fn unsupported_fi_rejected() {
        for fi in [
            ClockConversion::Unsupported7,
            ClockConversion::Unsupported8,
            ClockConversion::Unsupported14,
            ClockConversion::Unsupported15,
        ] {
            assert_eq!(
                compute(PCLK, &params(9600, fi, BaudAdjustment::Div1), false),
                Err(SmciError::ConfigurationInvalid)
            );
        }
    }

    #[test]
    fn reserved_di_rejected() {
        for di in [
            BaudAdjustment::Reserved0,
            BaudAdjustment::Reserved10,
            BaudAdjustment::Reserved15,
        ] {
            assert_eq!(
                compute(
                    PCLK,
                    &params(9600, ClockConversion::F372Max4, di),
                    false
                ),
                Err(SmciError::ConfigurationInvalid)
            );
        }
    }

    #[test]
    fn card_clock_class_enforced() {
        // 11 kbaud at Fi = 372 implies a 4.092 MHz card clock, over the
        // 4 MHz ceiling for that index.
        assert_eq!(
            compute(
                PCLK,
                &params(
                    11_000,
                    ClockConversion::F372Max4,
                    BaudAdjustment::Div1
                ),
                false,
            ),
            Err(SmciError::ConfigurationInvalid)
        );
    }

    #[test]
    fn unreachable_rate_rejected() {
        // A 1 MHz pclk can't get anywhere near 600 kbaud at S = 372/64.
        assert_eq!(
            compute(
                1_000_000,
                &params(
                    600_000,
                    ClockConversion::F372Max4,
                    BaudAdjustment::Div64
                ),
                false,
            ),
            Err(SmciError::ConfigurationInvalid)
        );
    }
}
