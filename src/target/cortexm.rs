// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

//! Cortex-M debug core support, built purely on 32-bit memory accesses to the
//! core's memory-mapped debug registers

use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::TargetError;
use crate::target::{HaltReason, Target};
use crate::timeout::PlatformTimeout;
use crate::transport::{MemoryAccess, TargetAddr32};

pub const CORTEXM_CPUID: TargetAddr32 = 0xe000ed00;
/// Application Interrupt and Reset Control Register
pub const CORTEXM_AIRCR: TargetAddr32 = 0xe000ed0c;
/// Debug Fault Status Register
pub const CORTEXM_DFSR: TargetAddr32 = 0xe000ed30;
/// Debug Halting Control and Status Register
pub const CORTEXM_DHCSR: TargetAddr32 = 0xe000edf0;
/// Debug Core Register Selector Register
pub const CORTEXM_DCRSR: TargetAddr32 = 0xe000edf4;
/// Debug Core Register Data Register
pub const CORTEXM_DCRDR: TargetAddr32 = 0xe000edf8;

pub const CORTEXM_AIRCR_VECTKEY: u32 = 0x05fa << 16;
pub const CORTEXM_AIRCR_SYSRESETREQ: u32 = 1 << 2;

pub const CORTEXM_DHCSR_DBGKEY: u32 = 0xa05f << 16;
pub const CORTEXM_DHCSR_C_DEBUGEN: u32 = 1 << 0;
pub const CORTEXM_DHCSR_C_HALT: u32 = 1 << 1;
pub const CORTEXM_DHCSR_S_REGRDY: u32 = 1 << 16;
pub const CORTEXM_DHCSR_S_HALT: u32 = 1 << 17;

pub const CORTEXM_DCRSR_REGWNR: u32 = 1 << 16;

pub const CORTEXM_DFSR_HALTED: u32 = 1 << 0;
pub const CORTEXM_DFSR_BKPT: u32 = 1 << 1;
pub const CORTEXM_DFSR_DWTTRAP: u32 = 1 << 2;
pub const CORTEXM_DFSR_VCATCH: u32 = 1 << 3;
pub const CORTEXM_DFSR_EXTERNAL: u32 = 1 << 4;
const CORTEXM_DFSR_ALL: u32 = 0x1f;

const CPUID_PARTNO_MASK: u32 = 0x0000fff0;
const CPUID_PARTNO_SHIFT: u32 = 4;

/// How long the core gets to complete a core register transfer
const REGISTER_TIMEOUT: Duration = Duration::from_millis(100);

/// Core register selectors for DCRSR
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum CoreRegister
{
	R0 = 0,
	R1 = 1,
	R2 = 2,
	R3 = 3,
	Sp = 13,
	Lr = 14,
	Pc = 15,
	Xpsr = 16,
}

/// xPSR with only the Thumb state bit set, which every Cortex-M must run with
pub const XPSR_THUMB: u32 = 1 << 24;

/// A Cortex-M core reached through its memory-mapped debug registers
pub struct CortexM
{
	memory: Arc<dyn MemoryAccess>,
}

/// Signature of the routines that identify a specific part behind a Cortex-M core,
/// given the core's CPUID. They return `Ok(None)` if the part is not theirs.
pub type CortexMProbe = fn(Arc<dyn MemoryAccess>, u32) -> Result<Option<Target>, TargetError>;

/// Read the core's CPUID and offer it to each part probe in turn, returning the target
/// from the first one to claim it
pub fn probe(memory: Arc<dyn MemoryAccess>, families: &[CortexMProbe]) -> Result<Option<Target>, TargetError>
{
	let cpuid = memory.read32(CORTEXM_CPUID)?;
	debug!("Cortex-M CPUID 0x{:08x} ({})", cpuid, core_name(cpuid));
	for family in families {
		if let Some(target) = family(memory.clone(), cpuid)? {
			return Ok(Some(target));
		}
	}
	Ok(None)
}

/// Name the core from the part number field of its CPUID
pub fn core_name(cpuid: u32) -> &'static str
{
	match (cpuid & CPUID_PARTNO_MASK) >> CPUID_PARTNO_SHIFT {
		0xc20 => "M0",
		0xc60 => "M0+",
		0xc23 => "M3",
		0xc24 => "M4",
		0xc27 => "M7",
		0xd21 => "M33",
		_ => "Cortex-M",
	}
}

impl CortexM
{
	pub fn new(memory: Arc<dyn MemoryAccess>) -> Self
	{
		Self {
			memory,
		}
	}

	pub fn memory(&self) -> &dyn MemoryAccess
	{
		self.memory.as_ref()
	}

	/// Enable halting debug and stop the core
	pub fn attach(&self) -> Result<(), TargetError>
	{
		// Clear any stale halt status so the next poll reflects this halt
		self.memory.write32(CORTEXM_DFSR, CORTEXM_DFSR_ALL)?;
		self.halt_request()
	}

	/// Let the core go, disabling halting debug. Best-effort.
	pub fn detach(&self)
	{
		if let Err(error) = self.memory.write32(CORTEXM_DHCSR, CORTEXM_DHCSR_DBGKEY) {
			warn!("Failed to release Cortex-M core: {}", error);
		}
	}

	pub fn halt_request(&self) -> Result<(), TargetError>
	{
		self.memory
			.write32(CORTEXM_DHCSR, CORTEXM_DHCSR_DBGKEY | CORTEXM_DHCSR_C_HALT | CORTEXM_DHCSR_C_DEBUGEN)?;
		Ok(())
	}

	pub fn halt_resume(&self) -> Result<(), TargetError>
	{
		self.memory.write32(CORTEXM_DFSR, CORTEXM_DFSR_ALL)?;
		self.memory
			.write32(CORTEXM_DHCSR, CORTEXM_DHCSR_DBGKEY | CORTEXM_DHCSR_C_DEBUGEN)?;
		Ok(())
	}

	pub fn halt_poll(&self) -> Result<HaltReason, TargetError>
	{
		let dhcsr = self.memory.read32(CORTEXM_DHCSR)?;
		if dhcsr & CORTEXM_DHCSR_S_HALT == 0 {
			return Ok(HaltReason::Running);
		}

		// Find out why we stopped and clear the sticky status bits for next time
		let dfsr = self.memory.read32(CORTEXM_DFSR)?;
		self.memory.write32(CORTEXM_DFSR, dfsr)?;
		trace!("Cortex-M halted, DFSR = 0x{:08x}", dfsr);

		Ok(if dfsr & CORTEXM_DFSR_BKPT != 0 {
			HaltReason::Breakpoint
		} else if dfsr & CORTEXM_DFSR_DWTTRAP != 0 {
			// Finding the triggering comparator is the DWT's business, which we don't manage
			HaltReason::Watchpoint(0)
		} else if dfsr & CORTEXM_DFSR_VCATCH != 0 {
			HaltReason::Fault
		} else if dfsr & (CORTEXM_DFSR_HALTED | CORTEXM_DFSR_EXTERNAL) != 0 {
			HaltReason::Request
		} else {
			HaltReason::Error
		})
	}

	/// Request a system reset through AIRCR
	pub fn reset(&self) -> Result<(), TargetError>
	{
		self.memory
			.write32(CORTEXM_AIRCR, CORTEXM_AIRCR_VECTKEY | CORTEXM_AIRCR_SYSRESETREQ)?;
		Ok(())
	}

	fn wait_register_ready(&self, operation: &'static str) -> Result<(), TargetError>
	{
		let timeout = PlatformTimeout::new(REGISTER_TIMEOUT);
		loop {
			if self.memory.read32(CORTEXM_DHCSR)? & CORTEXM_DHCSR_S_REGRDY != 0 {
				return Ok(());
			}
			if timeout.is_expired() {
				return Err(TargetError::Timeout {
					operation,
				});
			}
		}
	}

	/// Write a core register. The core must be halted
	pub fn write_register(&self, register: CoreRegister, value: u32) -> Result<(), TargetError>
	{
		self.memory.write32(CORTEXM_DCRDR, value)?;
		self.memory
			.write32(CORTEXM_DCRSR, CORTEXM_DCRSR_REGWNR | register as u32)?;
		self.wait_register_ready("writing a core register")
	}

	/// Read a core register. The core must be halted
	pub fn read_register(&self, register: CoreRegister) -> Result<u32, TargetError>
	{
		self.memory.write32(CORTEXM_DCRSR, register as u32)?;
		self.wait_register_ready("reading a core register")?;
		Ok(self.memory.read32(CORTEXM_DCRDR)?)
	}
}
