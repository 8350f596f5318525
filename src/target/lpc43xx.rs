// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

//! NXP LPC43xx support. Flash on these parts is erased and programmed by calling the
//! IAP routines in the boot ROM, see [`crate::target::lpc_iap`].

use std::io::Write;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{TargetError, TransportError};
use crate::target::cortexm::{self, CortexM};
use crate::target::lpc_iap::{CPU_CLK_KHZ, IapCommand, IapFlash, LpcFlashBank, WatchdogKick};
use crate::target::{FlashRegion, HaltReason, Target, TargetCommand, TargetDriver};
use crate::timeout::ProgressTimer;
use crate::transport::{MemoryAccess, TargetAddr32};

pub const LPC43XX_CHIPID: TargetAddr32 = 0x40043200;
const LPC43XX_CHIPID_FAMILY_MASK: u32 = 0x0fffffff;
const LPC43XX_CHIPID_FAMILY_CODE: u32 = 0x0906002b;
const LPC43XX_CHIPID_CHIP_SHIFT: u32 = 28;

const LPC43XX_CORE_TYPE_MASK: u32 = 0xff0ffff0;
const LPC43XX_CORE_TYPE_M0: u32 = 0x4100c200;
const LPC43XX_CORE_TYPE_M4: u32 = 0x4100c240;

/// Where the boot ROM keeps a pointer to the IAP routine
pub const LPC43XX_IAP_ENTRY_PTR: TargetAddr32 = 0x10400100;
/// The ETB AHB SRAM, which the IAP routines leave alone
pub const LPC43XX_IAP_RAM_BASE: TargetAddr32 = 0x2000c000;
const LPC43XX_IAP_RAM_SIZE: u32 = 16 * 1024;

pub const LPC43XX_CGU_CPU_CLK: TargetAddr32 = 0x4005006c;
pub const LPC43XX_CGU_BASE_CLK_AUTOBLOCK: u32 = 1 << 11;
pub const LPC43XX_CGU_BASE_CLK_SEL_IRC: u32 = 1 << 24;

pub const LPC43XX_WDT_MODE: TargetAddr32 = 0x40080000;
pub const LPC43XX_WDT_CNT: TargetAddr32 = 0x40080004;
pub const LPC43XX_WDT_FEED: TargetAddr32 = 0x40080008;
pub const LPC43XX_WDT_PERIOD_MAX: u32 = 0xffffff;
pub const LPC43XX_WDT_PROTECT: u32 = 1 << 4;

pub const LPC43XX_FLASH_BANKS: u8 = 2;
pub const LPC43XX_FLASH_SECTORS: u32 = 15;

const LPC43XX_COMMANDS: &[TargetCommand] = &[
	TargetCommand {
		name: "reset",
		help: "Reset target",
	},
	TargetCommand {
		name: "mkboot",
		help: "Make flash bank bootable",
	},
];

/// The Flash layout of the parts that have any (LPC4337 and friends)
const LPC43XX_FLASH_MAP: [LpcFlashBank; 4] = [
	LpcFlashBank {
		start: 0x1a000000,
		length: 0x10000,
		block_size: 0x2000,
		bank: 0,
		base_sector: 0,
	},
	LpcFlashBank {
		start: 0x1a010000,
		length: 0x70000,
		block_size: 0x10000,
		bank: 0,
		base_sector: 8,
	},
	LpcFlashBank {
		start: 0x1b000000,
		length: 0x10000,
		block_size: 0x2000,
		bank: 1,
		base_sector: 0,
	},
	LpcFlashBank {
		start: 0x1b010000,
		length: 0x70000,
		block_size: 0x10000,
		bank: 1,
		base_sector: 8,
	},
];

pub struct Lpc43xx
{
	core: CortexM,
	/// IAP state, only present on parts with Flash
	iap: Option<IapFlash>,
	banks: Vec<LpcFlashBank>,
}

/// Check the chip ID to see if the core behind `memory` belongs to an LPC43xx, and if so
/// build a target for it
pub fn probe(memory: Arc<dyn MemoryAccess>, cpuid: u32) -> Result<Option<Target>, TargetError>
{
	let chipid = memory.read32(LPC43XX_CHIPID)?;
	if chipid & LPC43XX_CHIPID_FAMILY_MASK != LPC43XX_CHIPID_FAMILY_CODE {
		return Ok(None);
	}

	let core_name = match cpuid & LPC43XX_CORE_TYPE_MASK {
		LPC43XX_CORE_TYPE_M4 => "M4",
		LPC43XX_CORE_TYPE_M0 => "M0",
		_ => cortexm::core_name(cpuid),
	};
	let chip_code = chipid >> LPC43XX_CHIPID_CHIP_SHIFT;
	debug!("LPC43xx chip ID 0x{:08x}, chip code {}", chipid, chip_code);

	match chip_code {
		// 4 is for parts with on-chip Flash, 7 is undocumented but might be for LM43S parts
		4 | 7 => {
			let iap_entry = memory.read32(LPC43XX_IAP_ENTRY_PTR)?;
			info!("LPC43xx with Flash, IAP entry at 0x{:08x}", iap_entry);

			let mut iap = IapFlash::new(iap_entry, LPC43XX_IAP_RAM_BASE, LPC43XX_IAP_RAM_SIZE);
			iap.bank_count = LPC43XX_FLASH_BANKS;
			iap.sector_count = LPC43XX_FLASH_SECTORS;
			iap.wdt_kick = Some(wdt_kick as WatchdogKick);

			let driver = Lpc43xx {
				core: CortexM::new(memory),
				iap: Some(iap),
				banks: LPC43XX_FLASH_MAP.to_vec(),
			};
			let mut target = Target::new("LPC43xx", core_name, cpuid, chip_code as u16, Box::new(driver));
			target.add_ram(0x00000000, 0x1a000000);
			target.add_flash(LPC43XX_FLASH_MAP[0].region())?;
			target.add_flash(LPC43XX_FLASH_MAP[1].region())?;
			target.add_ram(0x1a080000, 0xf80000);
			target.add_flash(LPC43XX_FLASH_MAP[2].region())?;
			target.add_flash(LPC43XX_FLASH_MAP[3].region())?;
			target.add_ram(0x1b080000, 0xe4f80000);
			Ok(Some(target))
		},
		5 | 6 => {
			info!("Flashless LPC43xx");
			let driver = Lpc43xx {
				core: CortexM::new(memory),
				iap: None,
				banks: Vec::new(),
			};
			Ok(Some(Target::new("LPC43xx", core_name, cpuid, chip_code as u16, Box::new(driver))))
		},
		_ => {
			debug!("Unsupported LPC43xx chip code {}", chip_code);
			Ok(None)
		},
	}
}

/// Extend the watchdog's period if it is running. Once enabled the watchdog cannot be
/// disabled again short of a reset, so stretching the period to its maximum is the only
/// way to buy time for long Flash operations
pub fn wdt_set_period(memory: &dyn MemoryAccess) -> Result<(), TransportError>
{
	let wdt_mode = memory.read32(LPC43XX_WDT_MODE)?;
	if wdt_mode != 0 && wdt_mode & LPC43XX_WDT_PROTECT == 0 {
		debug!("Watchdog running, extending its period");
		memory.write32(LPC43XX_WDT_CNT, LPC43XX_WDT_PERIOD_MAX)?;
	}
	Ok(())
}

/// Feed the watchdog if it's running so it does not reset the target from under us
pub fn wdt_kick(memory: &dyn MemoryAccess) -> Result<(), TransportError>
{
	let wdt_mode = memory.read32(LPC43XX_WDT_MODE)?;
	if wdt_mode != 0 {
		memory.write32(LPC43XX_WDT_FEED, 0xaa)?;
		memory.write32(LPC43XX_WDT_FEED, 0xff)?;
	}
	Ok(())
}

impl Lpc43xx
{
	fn iap(&self) -> Result<&IapFlash, TargetError>
	{
		self.iap.as_ref().ok_or(TargetError::Unsupported {
			driver: "Flashless LPC43xx",
			operation: "Flash operations",
		})
	}

	fn bank_for(&self, region: &FlashRegion) -> Result<LpcFlashBank, TargetError>
	{
		self.banks
			.iter()
			.find(|bank| bank.start == region.start)
			.copied()
			.ok_or(TargetError::NotInFlash {
				address: region.start,
				length: region.length,
			})
	}

	/// Get the Flash controller into a known state ahead of an erase or program. This is
	/// redone every time as the target may have been reclocked or its watchdog started
	/// since the last operation
	fn flash_init(&self) -> Result<&IapFlash, TargetError>
	{
		let iap = self.iap()?;
		let memory = self.core.memory();
		wdt_set_period(memory)?;
		// Run from the internal oscillator so the ROM's timing assumptions hold
		memory.write32(LPC43XX_CGU_CPU_CLK, LPC43XX_CGU_BASE_CLK_AUTOBLOCK | LPC43XX_CGU_BASE_CLK_SEL_IRC)?;
		iap.call(&self.core, IapCommand::Init, [0; 4], None)?;
		Ok(iap)
	}

	/// Have the boot ROM compute and write the signature that makes a bank bootable. This is
	/// kept separate from programming so the user has a chance to verify Flash first
	fn mkboot(&mut self, argv: &[&str], output: &mut dyn Write) -> Result<bool, TargetError>
	{
		if argv.len() != 2 {
			writeln!(output, "Expected bank argument 0 or 1.")?;
			return Ok(false);
		}
		let bank: u32 = match argv[1] {
			"0" => 0,
			"1" => 1,
			_ => {
				writeln!(output, "Unexpected bank number, should be 0 or 1.")?;
				return Ok(false);
			},
		};

		let result = self
			.flash_init()
			.and_then(|iap| iap.call(&self.core, IapCommand::SetActiveBank, [bank, CPU_CLK_KHZ, 0, 0], None));
		match result {
			Ok(_) => {
				writeln!(output, "Set bootable OK.")?;
				Ok(true)
			},
			Err(error @ (TargetError::IapCall { .. } | TargetError::Timeout { .. })) => {
				warn!("Making bank {} bootable failed: {}", bank, error);
				writeln!(output, "Set bootable failed.")?;
				Ok(false)
			},
			Err(error) => Err(error),
		}
	}
}

impl TargetDriver for Lpc43xx
{
	fn attach(&mut self) -> Result<(), TargetError>
	{
		self.core.attach()
	}

	fn detach(&mut self)
	{
		self.core.detach();
	}

	fn reset(&mut self) -> Result<(), TargetError>
	{
		self.core.reset()
	}

	fn halt_request(&mut self) -> Result<(), TargetError>
	{
		self.core.halt_request()
	}

	fn halt_poll(&mut self) -> Result<HaltReason, TargetError>
	{
		self.core.halt_poll()
	}

	fn flash_erase(&mut self, region: &FlashRegion, address: TargetAddr32, length: usize) -> Result<(), TargetError>
	{
		let bank = self.bank_for(region)?;
		let iap = self.flash_init()?;
		iap.erase(&self.core, &bank, address, length)
	}

	fn flash_write(&mut self, region: &FlashRegion, address: TargetAddr32, data: &[u8]) -> Result<(), TargetError>
	{
		let bank = self.bank_for(region)?;
		let iap = self.flash_init()?;
		iap.program(&self.core, &bank, address, data)
	}

	fn mass_erase(&mut self, progress: &mut ProgressTimer) -> Result<(), TargetError>
	{
		let iap = self.flash_init()?;
		let last_sector = iap.sector_count - 1;
		for bank in 0..u32::from(iap.bank_count) {
			debug!("Erasing Flash bank {}", bank);
			iap.call(&self.core, IapCommand::Prepare, [0, last_sector, bank, 0], None)?;
			iap.call(
				&self.core,
				IapCommand::Erase,
				[0, last_sector, CPU_CLK_KHZ, bank],
				Some(&mut *progress),
			)?;
			progress.tick();
		}
		Ok(())
	}

	fn commands(&self) -> &'static [TargetCommand]
	{
		if self.iap.is_some() { LPC43XX_COMMANDS } else { &[] }
	}

	fn run_command(&mut self, argv: &[&str], output: &mut dyn Write) -> Result<bool, TargetError>
	{
		match argv.first().copied() {
			Some("reset") => {
				// Resets everything but the debug logic so we stay attached
				self.core.reset()?;
				Ok(true)
			},
			Some("mkboot") => self.mkboot(argv, output),
			other => Err(TargetError::UnknownCommand(other.unwrap_or_default().to_string())),
		}
	}

	fn name(&self) -> &'static str
	{
		"LPC43xx"
	}
}
