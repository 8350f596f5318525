// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

use crate::error::TransportError;

pub type TargetAddr32 = u32;

/// Types implementing this trait provide scan-chain level access to devices on a JTAG chain.
/// This is the lowest level the target drivers talk to - everything protocol-wise above
/// the bit level is the job of the driver using it. Transports are shared between targets,
/// possibly across threads, so implementations provide their own synchronisation.
pub trait JtagAccess: Send + Sync
{
	/// Load the instruction register of the device at `dev_index` with `ir`, putting all other
	/// devices on the chain into BYPASS
	fn write_ir(&self, dev_index: u8, ir: u32) -> Result<(), TransportError>;
	/// Shift a byte through the data register of the device at `dev_index`, returning the byte
	/// that was shifted out the other end
	fn shift_dr(&self, dev_index: u8, value: u8) -> Result<u8, TransportError>;
}

/// Types implementing this trait provide 32-bit access to a target's memory bus
pub trait MemoryAccess: Send + Sync
{
	fn read32(&self, address: TargetAddr32) -> Result<u32, TransportError>;
	fn write32(&self, address: TargetAddr32, value: u32) -> Result<(), TransportError>;

	/// Write a block of bytes to the target, word by word, little endian. A trailing partial
	/// word is padded out with 0xff
	fn write_block(&self, address: TargetAddr32, data: &[u8]) -> Result<(), TransportError>
	{
		for (offset, chunk) in data.chunks(4).enumerate() {
			let mut word = [0xffu8; 4];
			word[..chunk.len()].copy_from_slice(chunk);
			self.write32(address + (offset as u32 * 4), u32::from_le_bytes(word))?;
		}
		Ok(())
	}
}

/// Structure representing a device found on the JTAG scan chain, as handed to the
/// family probe routines by the scan
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JtagDev
{
	/// The index of the device on the JTAG chain
	pub index: u8,
	/// The IDCODE read from the device during the scan
	pub idcode: u32,
}

impl JtagDev
{
	pub fn new(index: u8, idcode: u32) -> Self
	{
		Self {
			index,
			idcode,
		}
	}

	/// The version field of the IDCODE
	pub fn version(&self) -> u8
	{
		((self.idcode >> 28) & 0xf) as u8
	}

	/// The part number field of the IDCODE
	pub fn part_number(&self) -> u16
	{
		((self.idcode >> 12) & 0xffff) as u16
	}
}
