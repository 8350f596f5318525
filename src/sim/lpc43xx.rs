// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use log::{debug, trace};

use crate::error::TransportError;
use crate::target::cortexm::{
	CORTEXM_AIRCR, CORTEXM_CPUID, CORTEXM_DCRDR, CORTEXM_DCRSR, CORTEXM_DCRSR_REGWNR, CORTEXM_DFSR,
	CORTEXM_DFSR_BKPT, CORTEXM_DFSR_HALTED, CORTEXM_DHCSR, CORTEXM_DHCSR_C_DEBUGEN, CORTEXM_DHCSR_C_HALT,
	CORTEXM_DHCSR_DBGKEY, CORTEXM_DHCSR_S_HALT, CORTEXM_DHCSR_S_REGRDY, CoreRegister,
};
use crate::target::lpc43xx::{LPC43XX_CHIPID, LPC43XX_IAP_ENTRY_PTR, LPC43XX_WDT_MODE};
use crate::target::lpc_iap::{IapCommand, IapStatus};
use crate::transport::{MemoryAccess, TargetAddr32};

/// Chip ID of an LPC4337, which has two banks of Flash
pub const LPC4337_CHIPID: u32 = 0x4906002b;
/// Chip ID of a Flashless LPC4357
pub const LPC43XX_FLASHLESS_CHIPID: u32 = 0x5906002b;
/// CPUID of the LPC43xx's Cortex-M4 core
pub const LPC43XX_M4_CPUID: u32 = 0x410fc241;
/// Where the simulated boot ROM's IAP routine lives
pub const SIM_IAP_ENTRY: TargetAddr32 = 0x10405355;

const FLASH_BANK_BASES: [TargetAddr32; 2] = [0x1a000000, 0x1b000000];
const FLASH_BANK_SIZE: u32 = 0x80000;
const FLASH_SECTORS: u32 = 15;

/// Record of an IAP routine invocation seen by the simulated boot ROM
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IapInvocation
{
	pub command: u32,
	pub params: [u32; 4],
}

impl IapInvocation
{
	pub fn command(&self) -> Option<IapCommand>
	{
		IapCommand::try_from(self.command).ok()
	}

	/// The bank the invocation acts on, for the commands that take one
	pub fn bank(&self) -> Option<u32>
	{
		match self.command()? {
			IapCommand::Prepare => Some(self.params[2]),
			IapCommand::Erase => Some(self.params[3]),
			IapCommand::SetActiveBank => Some(self.params[0]),
			IapCommand::Program => bank_for_addr(self.params[0]),
			_ => None,
		}
	}
}

/// A simulated LPC43xx memory bus, including enough of a Cortex-M debug unit and boot ROM
/// to run IAP calls against
pub struct Lpc43xxSim
{
	state: Mutex<SimState>,
}

struct SimState
{
	chipid: u32,
	cpuid: u32,
	/// Anything written, and anything backing Flash that's been programmed. Flash
	/// reads as erased where there's no entry
	memory: HashMap<TargetAddr32, u32>,
	wdt_mode: u32,

	halted: bool,
	debugen: bool,
	dfsr: u32,
	dcrdr: u32,
	core_registers: HashMap<u32, u32>,

	/// Sectors (bank, sector) prepared for erase/program by the last PREPARE call
	prepared: BTreeSet<(u32, u32)>,
	active_bank: Option<u32>,
	/// Failures to inject, by command and optionally the bank it acts on
	iap_failures: Vec<(IapCommand, Option<u32>, IapStatus)>,
	/// Whether the IAP routine runs off into the weeds rather than returning
	iap_hang: bool,

	invocations: Vec<IapInvocation>,
	writes: Vec<(TargetAddr32, u32)>,
	accesses: usize,
}

fn bank_for_addr(address: TargetAddr32) -> Option<u32>
{
	FLASH_BANK_BASES
		.iter()
		.position(|&base| (base..base + FLASH_BANK_SIZE).contains(&address))
		.map(|bank| bank as u32)
}

/// The address range of a sector within a bank
fn sector_range(bank: u32, sector: u32) -> (TargetAddr32, TargetAddr32)
{
	let base = FLASH_BANK_BASES[bank as usize];
	if sector < 8 {
		let start = base + sector * 0x2000;
		(start, start + 0x2000)
	} else {
		let start = base + 0x10000 + (sector - 8) * 0x10000;
		(start, start + 0x10000)
	}
}

fn sector_for_addr(address: TargetAddr32) -> Option<(u32, u32)>
{
	let bank = bank_for_addr(address)?;
	let offset = address - FLASH_BANK_BASES[bank as usize];
	let sector = if offset < 0x10000 { offset / 0x2000 } else { 8 + (offset - 0x10000) / 0x10000 };
	Some((bank, sector))
}

impl Lpc43xxSim
{
	pub fn new(chipid: u32, cpuid: u32) -> Self
	{
		let mut memory = HashMap::new();
		memory.insert(LPC43XX_IAP_ENTRY_PTR, SIM_IAP_ENTRY);
		Self {
			state: Mutex::new(SimState {
				chipid,
				cpuid,
				memory,
				wdt_mode: 0,
				halted: false,
				debugen: false,
				dfsr: 0,
				dcrdr: 0,
				core_registers: HashMap::new(),
				prepared: BTreeSet::new(),
				active_bank: None,
				iap_failures: Vec::new(),
				iap_hang: false,
				invocations: Vec::new(),
				writes: Vec::new(),
				accesses: 0,
			}),
		}
	}

	/// An LPC4337 with its two banks of Flash
	pub fn lpc4337() -> Self
	{
		Self::new(LPC4337_CHIPID, LPC43XX_M4_CPUID)
	}

	fn state(&self) -> MutexGuard<'_, SimState>
	{
		self.state.lock().unwrap()
	}

	pub fn set_watchdog_mode(&self, mode: u32)
	{
		self.state().wdt_mode = mode;
	}

	/// Have the next and all following calls of `command` (on `bank`, if given) fail with `status`
	pub fn fail_iap(&self, command: IapCommand, bank: Option<u32>, status: IapStatus)
	{
		self.state().iap_failures.push((command, bank, status));
	}

	pub fn hang_iap(&self, hang: bool)
	{
		self.state().iap_hang = hang;
	}

	pub fn invocations(&self) -> Vec<IapInvocation>
	{
		self.state().invocations.clone()
	}

	pub fn writes(&self) -> Vec<(TargetAddr32, u32)>
	{
		self.state().writes.clone()
	}

	/// The values written to a specific address, in order
	pub fn writes_to(&self, address: TargetAddr32) -> Vec<u32>
	{
		self.state()
			.writes
			.iter()
			.filter(|(written, _)| *written == address)
			.map(|(_, value)| *value)
			.collect()
	}

	/// Total number of bus reads and writes made
	pub fn accesses(&self) -> usize
	{
		self.state().accesses
	}

	pub fn active_bank(&self) -> Option<u32>
	{
		self.state().active_bank
	}

	pub fn clear_logs(&self)
	{
		let mut state = self.state();
		state.invocations.clear();
		state.writes.clear();
		state.accesses = 0;
	}

	/// Look at a word of memory without it counting as an access
	pub fn peek(&self, address: TargetAddr32) -> u32
	{
		self.state().load(address)
	}

	/// Set a word of memory without it counting as an access
	pub fn poke(&self, address: TargetAddr32, value: u32)
	{
		self.state().memory.insert(address, value);
	}
}

impl SimState
{
	fn load(&self, address: TargetAddr32) -> u32
	{
		match self.memory.get(&address) {
			Some(value) => *value,
			None if bank_for_addr(address).is_some() => 0xffffffff,
			None => 0,
		}
	}

	fn dhcsr(&self) -> u32
	{
		let mut dhcsr = CORTEXM_DHCSR_S_REGRDY;
		if self.debugen {
			dhcsr |= CORTEXM_DHCSR_C_DEBUGEN;
		}
		if self.halted {
			dhcsr |= CORTEXM_DHCSR_S_HALT | CORTEXM_DHCSR_C_HALT;
		}
		dhcsr
	}

	fn write_dhcsr(&mut self, value: u32)
	{
		if value & 0xffff0000 != CORTEXM_DHCSR_DBGKEY {
			return;
		}
		self.debugen = value & CORTEXM_DHCSR_C_DEBUGEN != 0;
		if value & CORTEXM_DHCSR_C_HALT != 0 {
			if !self.halted {
				self.halted = true;
				self.dfsr |= CORTEXM_DFSR_HALTED;
			}
		} else {
			self.halted = false;
			self.resume();
		}
	}

	fn register(&self, register: CoreRegister) -> u32
	{
		self.core_registers.get(&(register as u32)).copied().unwrap_or(0)
	}

	/// The core has been let go. If it was pointed at the IAP routine, run the routine and
	/// come back to halt on the breakpoint the link register points at
	fn resume(&mut self)
	{
		if self.register(CoreRegister::Pc) != SIM_IAP_ENTRY || self.iap_hang {
			return;
		}
		let command_address = self.register(CoreRegister::R0);
		let status_address = self.register(CoreRegister::R1);
		let command = self.load(command_address);
		let mut params = [0u32; 4];
		for (index, param) in params.iter_mut().enumerate() {
			*param = self.load(command_address + 4 + (index as u32 * 4));
		}

		let invocation = IapInvocation {
			command,
			params,
		};
		debug!("Simulated IAP call {:?}", invocation);
		self.invocations.push(invocation);
		let (status, result) = self.run_iap(&invocation);
		self.memory.insert(status_address, status.into());
		self.memory.insert(status_address + 4, result);

		let lr = self.register(CoreRegister::Lr);
		self.core_registers.insert(CoreRegister::Pc as u32, lr & !1);
		self.halted = true;
		self.dfsr |= CORTEXM_DFSR_BKPT;
	}

	fn run_iap(&mut self, invocation: &IapInvocation) -> (IapStatus, u32)
	{
		let Some(command) = invocation.command() else {
			return (IapStatus::InvalidCommand, 0);
		};
		let bank = invocation.bank();
		let injected = self
			.iap_failures
			.iter()
			.find(|(failing, failing_bank, _)| *failing == command && (failing_bank.is_none() || *failing_bank == bank))
			.map(|(_, _, status)| *status);
		if let Some(status) = injected {
			return (status, 0);
		}

		let params = invocation.params;
		match command {
			IapCommand::Init => (IapStatus::CmdSuccess, 0),
			IapCommand::Prepare => {
				let (start, end, bank) = (params[0], params[1], params[2]);
				if start > end || end >= FLASH_SECTORS || bank as usize >= FLASH_BANK_BASES.len() {
					return (IapStatus::InvalidSector, 0);
				}
				self.prepared.extend((start..=end).map(|sector| (bank, sector)));
				(IapStatus::CmdSuccess, 0)
			},
			IapCommand::Erase => {
				let (start, end, bank) = (params[0], params[1], params[3]);
				if start > end || end >= FLASH_SECTORS || bank as usize >= FLASH_BANK_BASES.len() {
					return (IapStatus::InvalidSector, 0);
				}
				if !(start..=end).all(|sector| self.prepared.contains(&(bank, sector))) {
					return (IapStatus::SectorNotPrepared, 0);
				}
				let ranges: Vec<_> = (start..=end).map(|sector| sector_range(bank, sector)).collect();
				self.memory
					.retain(|address, _| !ranges.iter().any(|(low, high)| (*low..*high).contains(address)));
				self.prepared.clear();
				(IapStatus::CmdSuccess, 0)
			},
			IapCommand::Program => {
				let (dest, src, count) = (params[0], params[1], params[2]);
				let Some(sector) = sector_for_addr(dest) else {
					return (IapStatus::DstAddrNotMapped, 0);
				};
				if !self.prepared.contains(&sector) {
					return (IapStatus::SectorNotPrepared, 0);
				}
				for offset in (0..count).step_by(4) {
					// Programming can only clear bits
					let value = self.load(dest + offset) & self.load(src + offset);
					self.memory.insert(dest + offset, value);
				}
				self.prepared.clear();
				(IapStatus::CmdSuccess, 0)
			},
			IapCommand::SetActiveBank => {
				if params[0] as usize >= FLASH_BANK_BASES.len() {
					return (IapStatus::InvalidFlashUnit, 0);
				}
				self.active_bank = Some(params[0]);
				(IapStatus::CmdSuccess, 0)
			},
			IapCommand::PartId => (IapStatus::CmdSuccess, 0xa000_0830),
		}
	}
}

impl MemoryAccess for Lpc43xxSim
{
	fn read32(&self, address: TargetAddr32) -> Result<u32, TransportError>
	{
		let mut state = self.state();
		state.accesses += 1;
		let value = match address {
			LPC43XX_CHIPID => state.chipid,
			CORTEXM_CPUID => state.cpuid,
			LPC43XX_WDT_MODE => state.wdt_mode,
			CORTEXM_DHCSR => state.dhcsr(),
			CORTEXM_DFSR => state.dfsr,
			CORTEXM_DCRDR => state.dcrdr,
			_ => state.load(address),
		};
		trace!("0x{:08x} -> 0x{:08x}", address, value);
		Ok(value)
	}

	fn write32(&self, address: TargetAddr32, value: u32) -> Result<(), TransportError>
	{
		let mut state = self.state();
		state.accesses += 1;
		state.writes.push((address, value));
		trace!("0x{:08x} <- 0x{:08x}", address, value);
		match address {
			CORTEXM_DHCSR => state.write_dhcsr(value),
			// Write one to clear
			CORTEXM_DFSR => state.dfsr &= !value,
			CORTEXM_DCRDR => state.dcrdr = value,
			CORTEXM_DCRSR => {
				let selector = value & 0x7f;
				if value & CORTEXM_DCRSR_REGWNR != 0 {
					let data = state.dcrdr;
					state.core_registers.insert(selector, data);
				} else {
					state.dcrdr = state.core_registers.get(&selector).copied().unwrap_or(0);
				}
			},
			LPC43XX_WDT_MODE => state.wdt_mode = value,
			CORTEXM_AIRCR | LPC43XX_CHIPID => {},
			// Flash can only be changed through the IAP routines
			_ if bank_for_addr(address).is_some() => {},
			_ => {
				state.memory.insert(address, value);
			},
		}
		Ok(())
	}
}
