// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

#[cfg(test)]
mod tests
{
	use std::sync::Arc;

	use bmdtarget::error::TargetError;
	use bmdtarget::sim::PdiResponder;
	use bmdtarget::target::avr_pdi::{
		self, AvrPdi, IR_BYPASS, IR_PDI, PDI_REG_R3, PDI_REG_R4, PDI_REG_RESET, PDI_REG_STATUS, PDI_RESET,
	};
	use bmdtarget::target::{FlashRegion, HaltReason, Target, TargetDriver};
	use bmdtarget::transport::JtagDev;
	use color_eyre::eyre::{OptionExt, Result};

	const ATXMEGA256A3BU_IDCODE: u32 = 0x6974_203f;

	fn attached_pdi(responder: &Arc<PdiResponder>) -> Result<AvrPdi>
	{
		let mut pdi = AvrPdi::new(responder.clone(), &JtagDev::new(0, ATXMEGA256A3BU_IDCODE));
		pdi.attach()?;
		Ok(pdi)
	}

	fn attached_target(responder: &Arc<PdiResponder>) -> Result<Target>
	{
		let device = JtagDev::new(0, ATXMEGA256A3BU_IDCODE);
		let mut target = avr_pdi::probe(responder.clone(), &device, &[])?.ok_or_eyre("AVR not recognised")?;
		target.attach()?;
		responder.reset_counters();
		Ok(target)
	}

	fn claim_with_flash(target: &mut Target) -> bool
	{
		target
			.add_flash(FlashRegion::new(0x0080_0000, 0x4_0000, 256))
			.is_ok()
	}

	fn never_claim(_target: &mut Target) -> bool
	{
		false
	}

	#[test]
	fn registers_read_back_last_write() -> Result<()>
	{
		let responder = Arc::new(PdiResponder::new(0));
		let pdi = attached_pdi(&responder)?;
		for reg in 0..16 {
			let value = 0xa0 | reg;
			assert!(pdi.reg_write(reg, value), "write of register {} failed", reg);
			assert_eq!(pdi.reg_read(reg), Some(value), "register {}", reg);
		}
		Ok(())
	}

	#[test]
	fn out_of_range_registers_touch_nothing() -> Result<()>
	{
		let responder = Arc::new(PdiResponder::new(0));
		let pdi = attached_pdi(&responder)?;
		responder.reset_counters();
		assert!(!pdi.reg_write(16, 0x12));
		assert_eq!(pdi.reg_read(16), None);
		assert!(!pdi.reg_write(0xff, 0x12));
		assert_eq!(responder.calls(), 0);
		Ok(())
	}

	#[test]
	fn failed_shift_fails_access() -> Result<()>
	{
		let responder = Arc::new(PdiResponder::new(0));
		let pdi = attached_pdi(&responder)?;
		responder.reset_counters();
		responder.fail_shift(1);
		assert!(!pdi.reg_write(PDI_REG_R4, 1));
		responder.reset_counters();
		responder.fail_shift(1);
		assert_eq!(pdi.reg_read(PDI_REG_R4), None);
		Ok(())
	}

	#[test]
	fn probe_builds_target() -> Result<()>
	{
		let responder = Arc::new(PdiResponder::new(2));
		let device = JtagDev::new(2, ATXMEGA256A3BU_IDCODE);
		let mut target = avr_pdi::probe(responder.clone(), &device, &[never_claim])?.ok_or_eyre("AVR not recognised")?;

		assert_eq!(responder.ir(2), Some(IR_BYPASS));
		assert_eq!(target.driver_name(), "Atmel AVR");
		assert_eq!(target.core_name(), "AVR");
		assert_eq!(target.cpuid(), ATXMEGA256A3BU_IDCODE);
		assert_eq!(target.part_id(), 0x9742);
		assert!(target.flash_regions().is_empty());
		assert_eq!(target.halt_poll()?, HaltReason::Running);
		Ok(())
	}

	#[test]
	fn probe_rejects_missing_part_number() -> Result<()>
	{
		let responder = Arc::new(PdiResponder::new(0));
		let device = JtagDev::new(0, 0x6000_003f);
		assert!(avr_pdi::probe(responder.clone(), &device, &[claim_with_flash])?.is_none());
		assert_eq!(responder.calls(), 0);
		Ok(())
	}

	#[test]
	fn family_probe_declares_flash() -> Result<()>
	{
		let responder = Arc::new(PdiResponder::new(0));
		let device = JtagDev::new(0, ATXMEGA256A3BU_IDCODE);
		let mut target =
			avr_pdi::probe(responder, &device, &[never_claim, claim_with_flash])?.ok_or_eyre("AVR not recognised")?;
		assert_eq!(target.flash_regions().len(), 1);
		assert_eq!(target.flash_regions()[0].block_size, 256);
		assert_eq!(target.flash_regions()[0].erased, 0xff);

		// Flash programming for these parts is not implemented by the PDI driver itself
		let result = target.flash_erase(0x0080_0000, 256);
		assert!(matches!(result, Err(TargetError::Unsupported { driver: "Atmel AVR", .. })));
		Ok(())
	}

	#[test]
	fn attach_and_detach_switch_instruction() -> Result<()>
	{
		let responder = Arc::new(PdiResponder::new(0));
		let mut target = attached_target(&responder)?;
		assert_eq!(responder.ir(0), Some(IR_PDI));
		assert!(target.is_attached());
		target.detach();
		assert_eq!(responder.ir(0), Some(IR_BYPASS));
		assert!(!target.is_attached());
		Ok(())
	}

	#[test]
	fn halt_handshake() -> Result<()>
	{
		let responder = Arc::new(PdiResponder::halting(0));
		let mut target = attached_target(&responder)?;
		target.halt_request()?;
		assert_eq!(responder.shifts(), 10);
		assert_eq!(responder.register(PDI_REG_R4), 1);
		assert_eq!(responder.register(PDI_REG_RESET), 0);

		// Polling only ever reports what the handshake found
		responder.reset_counters();
		for _ in 0..5 {
			assert_eq!(target.halt_poll()?, HaltReason::Request);
		}
		assert_eq!(responder.calls(), 0);
		Ok(())
	}

	#[test]
	fn halt_fails_on_any_corrupted_shift() -> Result<()>
	{
		for shift in 0..10 {
			let responder = Arc::new(PdiResponder::halting(0));
			let mut target = attached_target(&responder)?;
			responder.corrupt_shift(shift, 0x01);

			let result = target.halt_request();
			assert!(
				matches!(result, Err(TargetError::IncorrectState { operation: "halting" })),
				"corrupting shift {} was not caught",
				shift
			);
			assert_eq!(target.halt_poll()?, HaltReason::Running);
		}
		Ok(())
	}

	#[test]
	fn halt_fails_on_unexpected_r3_sequence() -> Result<()>
	{
		for script in [[0x10, 0x14, 0x05], [0x10, 0x04, 0x04], [0x00, 0x14, 0x04]] {
			let responder = Arc::new(PdiResponder::new(0));
			responder.script_r3(&script);
			let mut target = attached_target(&responder)?;
			let error = target.halt_request().err().ok_or_eyre("halt succeeded")?;
			assert_eq!(error.to_string(), "Error halting device, device in incorrect state");
			assert_eq!(target.halt_poll()?, HaltReason::Running);
		}
		Ok(())
	}

	#[test]
	fn reset_checks_status() -> Result<()>
	{
		let responder = Arc::new(PdiResponder::new(0));
		let mut target = attached_target(&responder)?;
		target.reset()?;
		assert_eq!(responder.register(PDI_REG_RESET), PDI_RESET);
		assert_eq!(target.halt_poll()?, HaltReason::Running);

		responder.set_register(PDI_REG_STATUS, 0x02);
		let error = target.reset().err().ok_or_eyre("reset succeeded")?;
		assert_eq!(error.to_string(), "Error resetting device, device in incorrect state");
		assert_eq!(target.halt_poll()?, HaltReason::Running);
		Ok(())
	}

	#[test]
	fn reset_leaves_halt_reason_alone() -> Result<()>
	{
		let responder = Arc::new(PdiResponder::halting(0));
		let mut target = attached_target(&responder)?;
		target.halt_request()?;

		target.reset()?;
		assert_eq!(target.halt_poll()?, HaltReason::Request);
		responder.set_register(PDI_REG_STATUS, 0x80);
		assert!(target.reset().is_err());
		assert_eq!(target.halt_poll()?, HaltReason::Request);
		// R3 falls back to its register contents once the script runs dry
		assert_eq!(responder.register(PDI_REG_R3), 0);
		Ok(())
	}
}
