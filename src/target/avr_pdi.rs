// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

//! Support for AVR parts exposing a PDI (Program and Debug Interface) port over JTAG.
//!
//! PDI control/status registers are reached through the PDI JTAG instruction by shifting
//! a one byte command through the data register (`STCS` to store, `LDCS` to load), then a
//! second byte carrying or pumping out the register's value. Each shift reads back the
//! PDI's output, which sits at [`PDI_EMPTY`] whenever the PDI has nothing to say.

use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::error::TargetError;
use crate::log_and_return;
use crate::target::{HaltReason, Target, TargetDriver};
use crate::transport::{JtagAccess, JtagDev};

pub const IR_PDI: u32 = 0x7;
pub const IR_BYPASS: u32 = 0xf;

/// What the PDI shifts back when it has no data to return
pub const PDI_EMPTY: u8 = 0xeb;
/// Load from control/status register
pub const PDI_LDCS: u8 = 0x80;
/// Store to control/status register
pub const PDI_STCS: u8 = 0xc0;

pub const PDI_REG_STATUS: u8 = 0;
pub const PDI_REG_RESET: u8 = 1;
pub const PDI_REG_CTRL: u8 = 2;
pub const PDI_REG_R3: u8 = 3;
pub const PDI_REG_R4: u8 = 4;

/// Number of control/status registers the command encoding can address
const PDI_REG_COUNT: u8 = 16;

/// Writing this to the reset register puts the device in reset
pub const PDI_RESET: u8 = 0x59;

/// R3 readbacks the halt handshake requires at each step
const PDI_R3_RESET_HELD: u8 = 0x10;
const PDI_R3_PAUSE_PENDING: u8 = 0x14;
const PDI_R3_PAUSED: u8 = 0x04;

/// Bits of the IDCODE holding the part number, which is never zero on a PDI capable part
const IDCODE_PART_MASK: u32 = 0x0ffff000;

/// Routines that know how to identify a specific AVR family and declare its memory map
/// on the freshly built target. They return whether they claimed the part
pub type AvrFamilyProbe = fn(&mut Target) -> bool;

/// The AVR PDI driver, holding everything private to the PDI protocol for one device
pub struct AvrPdi
{
	jtag: Arc<dyn JtagAccess>,
	dev_index: u8,
	halt_reason: HaltReason,
}

/// Check whether the JTAG device found at `device` is a PDI capable AVR, and if so build a
/// target for it. Returns `Ok(None)` if the device's IDCODE does not look like one of ours
pub fn probe(
	jtag: Arc<dyn JtagAccess>, device: &JtagDev, family_probes: &[AvrFamilyProbe],
) -> Result<Option<Target>, TargetError>
{
	if device.idcode & IDCODE_PART_MASK == 0 {
		warn!("Invalid PDI idcode {:08x}", device.idcode);
		return Ok(None);
	}
	info!("AVR ID 0x{:08x} (v{})", device.idcode, device.version());
	// Leave the device out of the way until something attaches to it
	jtag.write_ir(device.index, IR_BYPASS)?;

	let driver = AvrPdi::new(jtag, device);
	let mut target = Target::new("Atmel AVR", "AVR", device.idcode, device.part_number(), Box::new(driver));

	if !family_probes.iter().any(|family_probe| family_probe(&mut target)) {
		debug!("No AVR family recognised part 0x{:04x}, Flash map left empty", device.part_number());
	}
	Ok(Some(target))
}

impl AvrPdi
{
	pub fn new(jtag: Arc<dyn JtagAccess>, device: &JtagDev) -> Self
	{
		Self {
			jtag,
			dev_index: device.index,
			halt_reason: HaltReason::Running,
		}
	}

	/// Shift one byte through the PDI and check the PDI had nothing to say back
	fn shift_expecting_empty(&self, value: u8) -> bool
	{
		match self.jtag.shift_dr(self.dev_index, value) {
			Ok(PDI_EMPTY) => true,
			Ok(result) => {
				trace!("PDI shift of 0x{:02x} returned 0x{:02x}", value, result);
				false
			},
			Err(error) => {
				debug!("PDI shift of 0x{:02x} failed: {}", value, error);
				false
			},
		}
	}

	/// Write a PDI control/status register, returning whether the PDI accepted it
	pub fn reg_write(&self, reg: u8, value: u8) -> bool
	{
		if reg >= PDI_REG_COUNT {
			return false;
		}
		self.shift_expecting_empty(PDI_STCS | reg) && self.shift_expecting_empty(value)
	}

	/// Read a PDI control/status register. The second shift repeats the command, which
	/// clocks the register's value out of the PDI
	pub fn reg_read(&self, reg: u8) -> Option<u8>
	{
		if reg >= PDI_REG_COUNT {
			return None;
		}
		let command = PDI_LDCS | reg;
		if !self.shift_expecting_empty(command) {
			return None;
		}
		self.jtag
			.shift_dr(self.dev_index, command)
			.inspect_err(|error| debug!("PDI register read failed: {}", error))
			.ok()
	}
}

impl TargetDriver for AvrPdi
{
	fn attach(&mut self) -> Result<(), TargetError>
	{
		self.jtag.write_ir(self.dev_index, IR_PDI)?;
		Ok(())
	}

	fn detach(&mut self)
	{
		if let Err(error) = self.jtag.write_ir(self.dev_index, IR_BYPASS) {
			warn!("Failed to return AVR to BYPASS: {}", error);
		}
	}

	fn reset(&mut self) -> Result<(), TargetError>
	{
		if !self.reg_write(PDI_REG_RESET, PDI_RESET) || self.reg_read(PDI_REG_STATUS) != Some(0x00) {
			log_and_return!(TargetError::IncorrectState {
				operation: "resetting",
			});
		}
		Ok(())
	}

	fn halt_request(&mut self) -> Result<(), TargetError>
	{
		// Arm a debug pause while the core is held in reset, then release the reset
		// and watch the core walk into the pause
		if !self.reg_write(PDI_REG_R4, 1) ||
			self.reg_read(PDI_REG_R3) != Some(PDI_R3_RESET_HELD) ||
			!self.reg_write(PDI_REG_RESET, 0) ||
			self.reg_read(PDI_REG_R3) != Some(PDI_R3_PAUSE_PENDING) ||
			self.reg_read(PDI_REG_R3) != Some(PDI_R3_PAUSED)
		{
			log_and_return!(TargetError::IncorrectState {
				operation: "halting",
			});
		}
		self.halt_reason = HaltReason::Request;
		Ok(())
	}

	fn halt_poll(&mut self) -> Result<HaltReason, TargetError>
	{
		Ok(self.halt_reason)
	}

	fn name(&self) -> &'static str
	{
		"Atmel AVR"
	}
}

#[cfg(test)]
mod tests
{
	use super::*;
	use crate::error::TransportError;

	/// A JTAG transport that plays back a fixed list of readback bytes
	struct Playback
	{
		readbacks: std::sync::Mutex<Vec<u8>>,
	}

	impl JtagAccess for Playback
	{
		fn write_ir(&self, _dev_index: u8, _ir: u32) -> Result<(), TransportError>
		{
			Ok(())
		}

		fn shift_dr(&self, dev_index: u8, _value: u8) -> Result<u8, TransportError>
		{
			let mut readbacks = self.readbacks.lock().unwrap();
			if readbacks.is_empty() {
				return Err(TransportError::ShiftFailed {
					dev_index,
				});
			}
			Ok(readbacks.remove(0))
		}
	}

	fn driver(readbacks: &[u8]) -> AvrPdi
	{
		let jtag = Arc::new(Playback {
			readbacks: std::sync::Mutex::new(readbacks.to_vec()),
		});
		AvrPdi::new(jtag, &JtagDev::new(0, 0x6974_203f))
	}

	#[test]
	fn read_of_all_ones_is_a_value()
	{
		// 0xff is a perfectly good register value, distinct from a failed read
		assert_eq!(driver(&[PDI_EMPTY, 0xff]).reg_read(PDI_REG_CTRL), Some(0xff));
		assert_eq!(driver(&[0xff, 0xff]).reg_read(PDI_REG_CTRL), None);
	}

	#[test]
	fn write_needs_both_acknowledgements()
	{
		assert!(driver(&[PDI_EMPTY, PDI_EMPTY]).reg_write(PDI_REG_R4, 1));
		assert!(!driver(&[PDI_EMPTY, 0x00]).reg_write(PDI_REG_R4, 1));
		assert!(!driver(&[PDI_EMPTY]).reg_write(PDI_REG_R4, 1));
	}
}
