// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

//! Simulated hardware sitting behind the transport traits, for exercising the target
//! drivers without a probe or a physical device

mod lpc43xx;
mod pdi;

pub use lpc43xx::{
	IapInvocation, LPC43XX_FLASHLESS_CHIPID, LPC43XX_M4_CPUID, LPC4337_CHIPID, Lpc43xxSim, SIM_IAP_ENTRY,
};
pub use pdi::PdiResponder;
