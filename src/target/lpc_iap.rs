// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

//! Support for driving the In-Application Programming routines that NXP LPC parts carry in
//! their boot ROM. A call is made by laying out a parameter block in target RAM, pointing the
//! core's registers at it and the ROM entry point, then letting the core run until it returns
//! onto a breakpoint instruction we planted at the start of the block.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{TargetError, TransportError};
use crate::target::cortexm::{CoreRegister, CortexM, XPSR_THUMB};
use crate::target::{FlashRegion, HaltReason};
use crate::timeout::{PlatformTimeout, ProgressTimer};
use crate::transport::{MemoryAccess, TargetAddr32};

/// The IAP routines are told the core is clocked from the 12MHz internal RC oscillator
pub const CPU_CLK_KHZ: u32 = 12000;
/// Size of the chunks Flash is programmed in
pub const IAP_PGM_CHUNKSIZE: usize = 4096;

/// Thumb `BKPT #0`, the routine returns onto this to hand control back to us
const ARM_THUMB_BREAKPOINT: u32 = 0xbe00;

// Layout of the parameter block
const PARAM_OPCODE: u32 = 0x00;
const PARAM_COMMAND: u32 = 0x04;
const PARAM_WORDS: u32 = 0x08;
const PARAM_STATUS: u32 = 0x18;
const PARAM_RESULT: u32 = 0x1c;
pub const PARAM_BLOCK_SIZE: u32 = 0x2c;

/// How long a single IAP call is given to complete by default. Erasing a bank
/// can take several seconds on the larger parts
const IAP_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum IapCommand
{
	Init = 49,
	Prepare = 50,
	Program = 51,
	Erase = 52,
	PartId = 54,
	SetActiveBank = 60,
}

impl TryFrom<u32> for IapCommand
{
	type Error = u32;

	fn try_from(value: u32) -> Result<Self, Self::Error>
	{
		match value {
			49 => Ok(Self::Init),
			50 => Ok(Self::Prepare),
			51 => Ok(Self::Program),
			52 => Ok(Self::Erase),
			54 => Ok(Self::PartId),
			60 => Ok(Self::SetActiveBank),
			_ => Err(value),
		}
	}
}

impl Display for IapCommand
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		let name = match self {
			Self::Init => "INIT",
			Self::Prepare => "PREPARE",
			Self::Program => "PROGRAM",
			Self::Erase => "ERASE",
			Self::PartId => "PART_ID",
			Self::SetActiveBank => "SET_ACTIVE_BANK",
		};
		write!(f, "{} ({})", name, *self as u32)
	}
}

/// Status codes the IAP routines hand back
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IapStatus
{
	CmdSuccess,
	InvalidCommand,
	SrcAddrError,
	DstAddrError,
	SrcAddrNotMapped,
	DstAddrNotMapped,
	CountError,
	InvalidSector,
	SectorNotBlank,
	SectorNotPrepared,
	CompareError,
	Busy,
	ParamError,
	AddrError,
	AddrNotMapped,
	CmdLocked,
	InvalidCode,
	InvalidBaudRate,
	InvalidStopBit,
	CodeReadProtectionEnabled,
	InvalidFlashUnit,
	UserCodeChecksum,
	SettingActivePartition,
	Unknown(u32),
}

const IAP_STATUS_CODES: [IapStatus; 23] = [
	IapStatus::CmdSuccess,
	IapStatus::InvalidCommand,
	IapStatus::SrcAddrError,
	IapStatus::DstAddrError,
	IapStatus::SrcAddrNotMapped,
	IapStatus::DstAddrNotMapped,
	IapStatus::CountError,
	IapStatus::InvalidSector,
	IapStatus::SectorNotBlank,
	IapStatus::SectorNotPrepared,
	IapStatus::CompareError,
	IapStatus::Busy,
	IapStatus::ParamError,
	IapStatus::AddrError,
	IapStatus::AddrNotMapped,
	IapStatus::CmdLocked,
	IapStatus::InvalidCode,
	IapStatus::InvalidBaudRate,
	IapStatus::InvalidStopBit,
	IapStatus::CodeReadProtectionEnabled,
	IapStatus::InvalidFlashUnit,
	IapStatus::UserCodeChecksum,
	IapStatus::SettingActivePartition,
];

impl From<u32> for IapStatus
{
	fn from(value: u32) -> Self
	{
		IAP_STATUS_CODES
			.get(value as usize)
			.copied()
			.unwrap_or(IapStatus::Unknown(value))
	}
}

impl From<IapStatus> for u32
{
	fn from(status: IapStatus) -> Self
	{
		match status {
			IapStatus::Unknown(value) => value,
			status => IAP_STATUS_CODES
				.iter()
				.position(|&code| code == status)
				.map_or(u32::MAX, |index| index as u32),
		}
	}
}

impl Display for IapStatus
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		match self {
			Self::Unknown(value) => write!(f, "unknown status {}", value),
			status => write!(f, "{:?} ({})", status, u32::from(*status)),
		}
	}
}

/// Keeps the target's watchdog from firing while we run long Flash operations
pub type WatchdogKick = fn(&dyn MemoryAccess) -> Result<(), TransportError>;

/// Where one Flash region sits in the IAP's bank and sector numbering
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LpcFlashBank
{
	pub start: TargetAddr32,
	pub length: usize,
	/// Size of each sector in the region
	pub block_size: usize,
	pub bank: u8,
	/// Sector number of the first sector in the region
	pub base_sector: u32,
}

impl LpcFlashBank
{
	/// The generic Flash region this describes
	pub fn region(&self) -> FlashRegion
	{
		FlashRegion::new(self.start, self.length, self.block_size).with_write_size(IAP_PGM_CHUNKSIZE)
	}

	pub fn sector_for_addr(&self, address: TargetAddr32) -> u32
	{
		self.base_sector + (address - self.start) / self.block_size as u32
	}
}

/// The per-family state needed to make IAP calls
#[derive(Clone, Copy, Debug)]
pub struct IapFlash
{
	/// Address of the IAP routine in the boot ROM
	pub iap_entry: TargetAddr32,
	/// Base of the RAM scratch region the parameter block and program buffer live in
	pub iap_ram: TargetAddr32,
	/// Top of the stack the routine runs on, also in the scratch region
	pub iap_msp: TargetAddr32,
	pub bank_count: u8,
	/// Number of sectors in each bank
	pub sector_count: u32,
	pub wdt_kick: Option<WatchdogKick>,
	pub call_timeout: Duration,
}

impl IapFlash
{
	pub fn new(iap_entry: TargetAddr32, iap_ram: TargetAddr32, iap_ram_size: u32) -> Self
	{
		Self {
			iap_entry,
			iap_ram,
			iap_msp: iap_ram + iap_ram_size,
			bank_count: 1,
			sector_count: 0,
			wdt_kick: None,
			call_timeout: IAP_CALL_TIMEOUT,
		}
	}

	/// Where data to be programmed is staged, just after the parameter block
	pub fn buffer_address(&self) -> TargetAddr32
	{
		self.iap_ram + PARAM_BLOCK_SIZE
	}

	/// Run an IAP command, returning the result words if the ROM reports success. Commands
	/// taking fewer than four parameters ignore the trailing words
	pub fn call(
		&self, core: &CortexM, command: IapCommand, params: [u32; 4], mut progress: Option<&mut ProgressTimer>,
	) -> Result<[u32; 4], TargetError>
	{
		trace!("IAP call {} {:x?}", command, params);
		let memory = core.memory();

		// Lay out the parameter block. The status is pre-loaded with something that isn't
		// success so a routine that never gets as far as writing it cannot pass
		memory.write32(self.iap_ram + PARAM_OPCODE, ARM_THUMB_BREAKPOINT)?;
		memory.write32(self.iap_ram + PARAM_COMMAND, command as u32)?;
		for (index, word) in params.iter().enumerate() {
			memory.write32(self.iap_ram + PARAM_WORDS + (index as u32 * 4), *word)?;
		}
		memory.write32(self.iap_ram + PARAM_STATUS, u32::MAX)?;

		// Point the core at the routine, with the link register aimed at the breakpoint
		core.write_register(CoreRegister::R0, self.iap_ram + PARAM_COMMAND)?;
		core.write_register(CoreRegister::R1, self.iap_ram + PARAM_STATUS)?;
		core.write_register(CoreRegister::Sp, self.iap_msp)?;
		core.write_register(CoreRegister::Lr, self.iap_ram | 1)?;
		core.write_register(CoreRegister::Pc, self.iap_entry)?;
		core.write_register(CoreRegister::Xpsr, XPSR_THUMB)?;

		// Start the target and wait for it to come back to us
		core.halt_resume()?;
		let timeout = PlatformTimeout::new(self.call_timeout);
		loop {
			let reason = core.halt_poll()?;
			if reason != HaltReason::Running {
				let pc = core.read_register(CoreRegister::Pc)?;
				if reason != HaltReason::Breakpoint || pc != self.iap_ram {
					warn!("IAP {} stopped unexpectedly at 0x{:08x}: {}", command, pc, reason);
				}
				break;
			}
			if let Some(kick) = self.wdt_kick {
				kick(memory)?;
			}
			if let Some(progress) = progress.as_mut() {
				progress.tick();
			}
			if timeout.is_expired() {
				core.halt_request()?;
				return Err(TargetError::Timeout {
					operation: "running an IAP command",
				});
			}
		}

		let status = IapStatus::from(memory.read32(self.iap_ram + PARAM_STATUS)?);
		if status != IapStatus::CmdSuccess {
			warn!("IAP {} failed: {}", command, status);
			return Err(TargetError::IapCall {
				command,
				status,
			});
		}

		let mut result = [0u32; 4];
		for (index, word) in result.iter_mut().enumerate() {
			*word = memory.read32(self.iap_ram + PARAM_RESULT + (index as u32 * 4))?;
		}
		Ok(result)
	}

	/// Erase the sectors covering the given range of a bank
	pub fn erase(
		&self, core: &CortexM, bank: &LpcFlashBank, address: TargetAddr32, length: usize,
	) -> Result<(), TargetError>
	{
		let start = bank.sector_for_addr(address);
		let end = bank.sector_for_addr(address + (length as u32 - 1));
		debug!("Erasing sectors {}-{} of bank {}", start, end, bank.bank);
		self.call(core, IapCommand::Prepare, [start, end, bank.bank.into(), 0], None)?;
		self.call(core, IapCommand::Erase, [start, end, CPU_CLK_KHZ, bank.bank.into()], None)?;
		Ok(())
	}

	/// Program a chunk of data into a prepared sector of a bank
	pub fn program(
		&self, core: &CortexM, bank: &LpcFlashBank, address: TargetAddr32, data: &[u8],
	) -> Result<(), TargetError>
	{
		let sector = bank.sector_for_addr(address);
		self.call(core, IapCommand::Prepare, [sector, sector, bank.bank.into(), 0], None)?;

		// Stage the payload in target RAM then have the ROM copy it in
		let buffer = self.buffer_address();
		core.memory().write_block(buffer, data)?;
		self.call(core, IapCommand::Program, [address, buffer, data.len() as u32, CPU_CLK_KHZ], None)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn status_decoding()
	{
		assert_eq!(IapStatus::from(0), IapStatus::CmdSuccess);
		assert_eq!(IapStatus::from(9), IapStatus::SectorNotPrepared);
		assert_eq!(IapStatus::from(22), IapStatus::SettingActivePartition);
		assert_eq!(IapStatus::from(0xffff_ffff), IapStatus::Unknown(0xffff_ffff));
		assert_eq!(u32::from(IapStatus::Busy), 11);
		assert_eq!(u32::from(IapStatus::Unknown(99)), 99);
	}

	#[test]
	fn command_decoding()
	{
		assert_eq!(IapCommand::try_from(52), Ok(IapCommand::Erase));
		assert_eq!(IapCommand::try_from(53), Err(53));
		assert_eq!(IapCommand::SetActiveBank.to_string(), "SET_ACTIVE_BANK (60)");
	}

	#[test]
	fn sector_lookup()
	{
		let small = LpcFlashBank {
			start: 0x1b00_0000,
			length: 0x1_0000,
			block_size: 0x2000,
			bank: 1,
			base_sector: 0,
		};
		let large = LpcFlashBank {
			start: 0x1b01_0000,
			length: 0x7_0000,
			block_size: 0x1_0000,
			bank: 1,
			base_sector: 8,
		};
		assert_eq!(small.sector_for_addr(0x1b00_0000), 0);
		assert_eq!(small.sector_for_addr(0x1b00_fffc), 7);
		assert_eq!(large.sector_for_addr(0x1b01_0000), 8);
		assert_eq!(large.sector_for_addr(0x1b07_ffff), 14);
		assert_eq!(large.region().write_size, IAP_PGM_CHUNKSIZE);
	}
}
