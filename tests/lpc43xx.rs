// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

#[cfg(test)]
mod tests
{
	use std::cell::Cell;
	use std::sync::Arc;
	use std::time::Duration;

	use bmdtarget::error::TargetError;
	use bmdtarget::sim::{IapInvocation, LPC43XX_FLASHLESS_CHIPID, LPC43XX_M4_CPUID, Lpc43xxSim, SIM_IAP_ENTRY};
	use bmdtarget::target::cortexm::{self, CORTEXM_AIRCR, CoreRegister, CortexM};
	use bmdtarget::target::lpc43xx::{
		self, LPC43XX_CGU_CPU_CLK, LPC43XX_WDT_CNT, LPC43XX_WDT_FEED, LPC43XX_WDT_PERIOD_MAX, LPC43XX_WDT_PROTECT,
	};
	use bmdtarget::target::lpc_iap::{CPU_CLK_KHZ, IapCommand, IapFlash, IapStatus, WatchdogKick};
	use bmdtarget::target::{HaltReason, Target};
	use bmdtarget::timeout::ProgressTimer;
	use color_eyre::eyre::{OptionExt, Result};

	fn invocation(command: IapCommand, params: [u32; 4]) -> IapInvocation
	{
		IapInvocation {
			command: command as u32,
			params,
		}
	}

	fn attached(sim: &Arc<Lpc43xxSim>) -> Result<Target>
	{
		let mut target = cortexm::probe(sim.clone(), &[lpc43xx::probe])?.ok_or_eyre("LPC43xx not recognised")?;
		target.attach()?;
		sim.clear_logs();
		Ok(target)
	}

	fn lpc4337() -> Result<(Arc<Lpc43xxSim>, Target)>
	{
		let sim = Arc::new(Lpc43xxSim::lpc4337());
		let target = attached(&sim)?;
		Ok((sim, target))
	}

	fn commands_issued(sim: &Lpc43xxSim) -> Vec<Option<IapCommand>>
	{
		sim.invocations().iter().map(IapInvocation::command).collect()
	}

	#[test]
	fn probe_declares_memory_map() -> Result<()>
	{
		let (_sim, target) = lpc4337()?;
		assert_eq!(target.driver_name(), "LPC43xx");
		assert_eq!(target.core_name(), "M4");
		assert_eq!(target.part_id(), 4);

		let flash: Vec<_> = target
			.flash_regions()
			.iter()
			.map(|region| (region.start, region.length, region.block_size, region.write_size))
			.collect();
		assert_eq!(flash, vec![
			(0x1a00_0000, 0x1_0000, 0x2000, 4096),
			(0x1a01_0000, 0x7_0000, 0x1_0000, 4096),
			(0x1b00_0000, 0x1_0000, 0x2000, 4096),
			(0x1b01_0000, 0x7_0000, 0x1_0000, 4096),
		]);
		let ram: Vec<_> = target
			.ram_regions()
			.iter()
			.map(|region| (region.start, region.length))
			.collect();
		assert_eq!(ram, vec![(0, 0x1a00_0000), (0x1a08_0000, 0xf8_0000), (0x1b08_0000, 0xe4f8_0000)]);

		let commands: Vec<_> = target.commands().iter().map(|command| command.name).collect();
		assert_eq!(commands, vec!["reset", "mkboot"]);
		Ok(())
	}

	#[test]
	fn family_mismatch_stops_at_chip_id() -> Result<()>
	{
		let sim = Arc::new(Lpc43xxSim::new(0x4906_002c, LPC43XX_M4_CPUID));
		assert!(lpc43xx::probe(sim.clone(), LPC43XX_M4_CPUID)?.is_none());
		assert_eq!(sim.accesses(), 1);
		assert!(sim.writes().is_empty());
		Ok(())
	}

	#[test]
	fn unknown_variant_is_not_ours() -> Result<()>
	{
		let sim = Arc::new(Lpc43xxSim::new(0x3906_002b, LPC43XX_M4_CPUID));
		assert!(lpc43xx::probe(sim, LPC43XX_M4_CPUID)?.is_none());
		Ok(())
	}

	#[test]
	fn flashless_part_declares_nothing() -> Result<()>
	{
		let sim = Arc::new(Lpc43xxSim::new(LPC43XX_FLASHLESS_CHIPID, 0x410c_c200));
		let mut target = attached(&sim)?;
		assert_eq!(target.core_name(), "M0");
		assert!(target.flash_regions().is_empty());
		assert!(target.ram_regions().is_empty());
		assert!(target.commands().is_empty());
		assert!(matches!(
			target.flash_erase(0x1a00_0000, 0x100),
			Err(TargetError::NotInFlash { .. })
		));
		assert!(matches!(
			target.mass_erase(&mut ProgressTimer::silent()),
			Err(TargetError::Unsupported { .. })
		));
		Ok(())
	}

	#[test]
	fn attach_halts_core() -> Result<()>
	{
		let (_sim, mut target) = lpc4337()?;
		assert_eq!(target.halt_poll()?, HaltReason::Request);
		Ok(())
	}

	#[test]
	fn mass_erase_both_banks() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		target.flash_write(0x1b07_fff0, &[0; 16])?;
		sim.clear_logs();

		let reports = Cell::new(0);
		let mut progress = ProgressTimer::new(Duration::ZERO, || reports.set(reports.get() + 1));
		target.mass_erase(&mut progress)?;
		drop(progress);

		let last_sector = 14;
		assert_eq!(sim.invocations(), vec![
			invocation(IapCommand::Init, [0; 4]),
			invocation(IapCommand::Prepare, [0, last_sector, 0, 0]),
			invocation(IapCommand::Erase, [0, last_sector, CPU_CLK_KHZ, 0]),
			invocation(IapCommand::Prepare, [0, last_sector, 1, 0]),
			invocation(IapCommand::Erase, [0, last_sector, CPU_CLK_KHZ, 1]),
		]);
		assert_eq!(sim.peek(0x1b07_fff0), 0xffff_ffff);
		assert!(reports.get() >= 2);
		Ok(())
	}

	#[test]
	fn mass_erase_stops_at_failed_bank() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		sim.fail_iap(IapCommand::Erase, Some(0), IapStatus::Busy);

		let result = target.mass_erase(&mut ProgressTimer::silent());
		assert!(matches!(
			result,
			Err(TargetError::IapCall {
				command: IapCommand::Erase,
				status: IapStatus::Busy
			})
		));
		assert!(sim.invocations().iter().all(|call| call.bank() != Some(1)));
		Ok(())
	}

	#[test]
	fn mass_erase_keeps_partial_progress() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		target.flash_write(0x1a00_0000, &[0; 4])?;
		sim.fail_iap(IapCommand::Prepare, Some(1), IapStatus::InvalidSector);

		assert!(target.mass_erase(&mut ProgressTimer::silent()).is_err());
		// Bank 0 went before bank 1 failed, and stays erased
		assert_eq!(sim.peek(0x1a00_0000), 0xffff_ffff);
		Ok(())
	}

	#[test]
	fn flash_init_precedes_erase() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		target.flash_erase(0x1a00_2100, 0x100)?;

		assert_eq!(sim.writes_to(LPC43XX_CGU_CPU_CLK), vec![(1 << 11) | (1 << 24)]);
		assert_eq!(sim.invocations(), vec![
			invocation(IapCommand::Init, [0; 4]),
			invocation(IapCommand::Prepare, [1, 1, 0, 0]),
			invocation(IapCommand::Erase, [1, 1, CPU_CLK_KHZ, 0]),
		]);
		Ok(())
	}

	#[test]
	fn erase_across_regions() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		target.flash_erase(0x1b00_f000, 0x2000)?;
		assert_eq!(commands_issued(&sim), vec![
			Some(IapCommand::Init),
			Some(IapCommand::Prepare),
			Some(IapCommand::Erase),
			Some(IapCommand::Init),
			Some(IapCommand::Prepare),
			Some(IapCommand::Erase),
		]);
		let invocations = sim.invocations();
		assert_eq!(invocations[2], invocation(IapCommand::Erase, [7, 7, CPU_CLK_KHZ, 1]));
		assert_eq!(invocations[5], invocation(IapCommand::Erase, [8, 8, CPU_CLK_KHZ, 1]));
		Ok(())
	}

	#[test]
	fn failed_init_aborts_erase() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		sim.fail_iap(IapCommand::Init, None, IapStatus::InvalidCommand);
		let error = target.flash_erase(0x1a00_0000, 0x2000).err().ok_or_eyre("erase succeeded")?;
		assert!(matches!(error, TargetError::IapCall {
			command: IapCommand::Init,
			..
		}));
		assert_eq!(commands_issued(&sim), vec![Some(IapCommand::Init)]);
		Ok(())
	}

	#[test]
	fn write_programs_through_buffer() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		target.flash_write(0x1b01_0000, &[0x12, 0x34, 0x56, 0x78, 0x9a])?;

		assert_eq!(sim.invocations(), vec![
			invocation(IapCommand::Init, [0; 4]),
			invocation(IapCommand::Prepare, [8, 8, 1, 0]),
			invocation(IapCommand::Program, [0x1b01_0000, 0x2000_c02c, 4096, CPU_CLK_KHZ]),
		]);
		assert_eq!(sim.peek(0x1b01_0000), 0x7856_3412);
		assert_eq!(sim.peek(0x1b01_0004), 0xffff_ff9a);
		assert_eq!(sim.peek(0x1b01_0008), 0xffff_ffff);
		Ok(())
	}

	#[test]
	fn programming_only_clears_bits() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		target.flash_write(0x1a00_0000, &[0x0f])?;
		target.flash_write(0x1a00_0000, &[0xf3])?;
		assert_eq!(sim.peek(0x1a00_0000) & 0xff, 0x03);
		Ok(())
	}

	#[test]
	fn write_outside_flash_rejected() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		let result = target.flash_write(0x1a07_fffe, &[0; 4]);
		assert!(matches!(result, Err(TargetError::NotInFlash { .. })));
		assert!(sim.invocations().is_empty());
		Ok(())
	}

	#[test]
	fn mkboot_rejects_bad_banks() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		let bad_arguments: [&[&str]; 5] =
			[&["mkboot"], &["mkboot", "0", "1"], &["mkboot", "2"], &["mkboot", "01"], &["mkboot", "0x1"]];
		for argv in bad_arguments {
			let mut output: Vec<u8> = Vec::new();
			assert!(!target.run_command(argv, &mut output)?, "{:?} was accepted", argv);
			let output = String::from_utf8(output)?;
			assert!(
				output == "Expected bank argument 0 or 1.\n" || output == "Unexpected bank number, should be 0 or 1.\n",
				"unexpected output {:?}",
				output
			);
		}
		assert!(sim.invocations().is_empty());
		assert!(sim.writes().is_empty());
		Ok(())
	}

	#[test]
	fn mkboot_sets_active_bank() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		let mut output: Vec<u8> = Vec::new();
		assert!(target.run_command(&["mkboot", "1"], &mut output)?);
		assert_eq!(String::from_utf8(output)?, "Set bootable OK.\n");
		assert_eq!(sim.active_bank(), Some(1));
		assert_eq!(sim.invocations(), vec![
			invocation(IapCommand::Init, [0; 4]),
			invocation(IapCommand::SetActiveBank, [1, CPU_CLK_KHZ, 0, 0]),
		]);
		Ok(())
	}

	#[test]
	fn mkboot_reports_failure() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		sim.fail_iap(IapCommand::SetActiveBank, None, IapStatus::InvalidFlashUnit);
		let mut output: Vec<u8> = Vec::new();
		assert!(!target.run_command(&["mkboot", "0"], &mut output)?);
		assert_eq!(String::from_utf8(output)?, "Set bootable failed.\n");
		assert_eq!(sim.active_bank(), None);
		Ok(())
	}

	#[test]
	fn mkboot_reports_failed_init() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		sim.fail_iap(IapCommand::Init, None, IapStatus::InvalidCommand);
		let mut output: Vec<u8> = Vec::new();
		assert!(!target.run_command(&["mkboot", "0"], &mut output)?);
		assert_eq!(String::from_utf8(output)?, "Set bootable failed.\n");
		assert_eq!(commands_issued(&sim), vec![Some(IapCommand::Init)]);
		assert_eq!(sim.active_bank(), None);
		Ok(())
	}

	#[test]
	fn mass_erase_aborts_on_failed_init() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		sim.fail_iap(IapCommand::Init, None, IapStatus::InvalidCommand);
		let error = target
			.mass_erase(&mut ProgressTimer::silent())
			.err()
			.ok_or_eyre("mass erase succeeded")?;
		assert!(matches!(error, TargetError::IapCall {
			command: IapCommand::Init,
			..
		}));
		assert_eq!(commands_issued(&sim), vec![Some(IapCommand::Init)]);
		Ok(())
	}

	#[test]
	fn reset_command_uses_aircr() -> Result<()>
	{
		let (sim, mut target) = lpc4337()?;
		assert!(target.run_command(&["reset"], &mut Vec::<u8>::new())?);
		assert_eq!(sim.writes_to(CORTEXM_AIRCR), vec![0x05fa_0004]);
		Ok(())
	}

	#[test]
	fn watchdog_kick_only_when_enabled() -> Result<()>
	{
		let sim = Lpc43xxSim::lpc4337();
		lpc43xx::wdt_kick(&sim)?;
		assert!(sim.writes().is_empty());

		sim.set_watchdog_mode(1);
		lpc43xx::wdt_kick(&sim)?;
		assert_eq!(sim.writes(), vec![(LPC43XX_WDT_FEED, 0xaa), (LPC43XX_WDT_FEED, 0xff)]);
		Ok(())
	}

	#[test]
	fn watchdog_period_extended_unless_protected() -> Result<()>
	{
		let sim = Lpc43xxSim::lpc4337();
		lpc43xx::wdt_set_period(&sim)?;
		assert!(sim.writes().is_empty());

		sim.set_watchdog_mode(1 | LPC43XX_WDT_PROTECT);
		lpc43xx::wdt_set_period(&sim)?;
		assert!(sim.writes().is_empty());

		sim.set_watchdog_mode(1);
		lpc43xx::wdt_set_period(&sim)?;
		assert_eq!(sim.writes(), vec![(LPC43XX_WDT_CNT, LPC43XX_WDT_PERIOD_MAX)]);
		Ok(())
	}

	#[test]
	fn iap_call_lays_out_parameter_block() -> Result<()>
	{
		let sim = Arc::new(Lpc43xxSim::lpc4337());
		let core = CortexM::new(sim.clone());
		core.attach()?;
		let iap = IapFlash::new(SIM_IAP_ENTRY, 0x2000_c000, 0x4000);

		let result = iap.call(&core, IapCommand::PartId, [0; 4], None)?;
		assert_eq!(result[0], 0xa000_0830);
		assert_eq!(sim.peek(0x2000_c000), 0xbe00);
		assert_eq!(sim.peek(0x2000_c004), IapCommand::PartId as u32);
		assert_eq!(sim.peek(0x2000_c018), 0);
		// The routine returned onto the breakpoint at the start of the block
		assert_eq!(core.read_register(CoreRegister::Pc)?, 0x2000_c000);
		Ok(())
	}

	#[test]
	fn iap_call_passes_all_four_parameters() -> Result<()>
	{
		let sim = Arc::new(Lpc43xxSim::lpc4337());
		let core = CortexM::new(sim.clone());
		core.attach()?;
		let iap = IapFlash::new(SIM_IAP_ENTRY, 0x2000_c000, 0x4000);

		iap.call(&core, IapCommand::Prepare, [2, 5, 1, 0x5a5a_5a5a], None)?;
		let words: Vec<_> = (0..4).map(|index| sim.peek(0x2000_c008 + index * 4)).collect();
		assert_eq!(words, vec![2, 5, 1, 0x5a5a_5a5a]);
		assert_eq!(sim.invocations(), vec![invocation(IapCommand::Prepare, [2, 5, 1, 0x5a5a_5a5a])]);
		assert_eq!(core.read_register(CoreRegister::R0)?, 0x2000_c004);
		assert_eq!(core.read_register(CoreRegister::R1)?, 0x2000_c018);
		assert_eq!(core.read_register(CoreRegister::Sp)?, 0x2001_0000);
		Ok(())
	}

	#[test]
	fn iap_call_times_out_and_kicks_watchdog() -> Result<()>
	{
		let sim = Arc::new(Lpc43xxSim::lpc4337());
		sim.set_watchdog_mode(1);
		sim.hang_iap(true);
		let core = CortexM::new(sim.clone());
		core.attach()?;
		let mut iap = IapFlash::new(SIM_IAP_ENTRY, 0x2000_c000, 0x4000);
		iap.wdt_kick = Some(lpc43xx::wdt_kick as WatchdogKick);
		iap.call_timeout = Duration::from_millis(20);

		let result = iap.call(&core, IapCommand::Init, [0; 4], None);
		assert!(matches!(result, Err(TargetError::Timeout { .. })));
		assert!(!sim.writes_to(LPC43XX_WDT_FEED).is_empty());
		Ok(())
	}

	#[test]
	fn status_read_back_decides_success() -> Result<()>
	{
		let sim = Arc::new(Lpc43xxSim::lpc4337());
		let core = CortexM::new(sim.clone());
		core.attach()?;
		let iap = IapFlash::new(SIM_IAP_ENTRY, 0x2000_c000, 0x4000);

		// Erasing without preparing first is refused by the ROM
		let result = iap.call(&core, IapCommand::Erase, [0, 0, CPU_CLK_KHZ, 0], None);
		assert!(matches!(
			result,
			Err(TargetError::IapCall {
				status: IapStatus::SectorNotPrepared,
				..
			})
		));
		assert_eq!(sim.peek(0x2000_c018), 9);
		Ok(())
	}
}
