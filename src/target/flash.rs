// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

use std::fmt::{self, Display, Formatter};

use crate::transport::TargetAddr32;

/// A region of a target's memory map backed by Flash, along with the geometry
/// information needed to erase and program it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlashRegion
{
	/// Address of the first byte of the region
	pub start: TargetAddr32,
	/// Length of the region in bytes
	pub length: usize,
	/// Size of the smallest unit the region can be erased in
	pub block_size: usize,
	/// Size of the chunks the region is programmed in
	pub write_size: usize,
	/// The value of each byte after an erase
	pub erased: u8,
}

impl FlashRegion
{
	pub fn new(start: TargetAddr32, length: usize, block_size: usize) -> Self
	{
		Self {
			start,
			length,
			block_size,
			write_size: block_size,
			erased: 0xff,
		}
	}

	pub fn with_write_size(mut self, write_size: usize) -> Self
	{
		self.write_size = write_size;
		self
	}

	/// One past the last address in the region. This is 64-bit as a region may
	/// legitimately end right at the top of the 32-bit address space
	pub fn end(&self) -> u64
	{
		u64::from(self.start) + self.length as u64
	}

	pub fn contains(&self, address: u64) -> bool
	{
		address >= u64::from(self.start) && address < self.end()
	}

	pub fn overlaps(&self, other: &FlashRegion) -> bool
	{
		u64::from(self.start) < other.end() && u64::from(other.start) < self.end()
	}

	/// Round an address down to the start of the erase block containing it
	pub fn block_floor(&self, address: u64) -> u64
	{
		let offset = address - u64::from(self.start);
		u64::from(self.start) + offset - (offset % self.block_size as u64)
	}

	/// Round an address up to the next erase block boundary, clamped to the region
	pub fn block_ceil(&self, address: u64) -> u64
	{
		let offset = address - u64::from(self.start);
		let block = self.block_size as u64;
		(u64::from(self.start) + offset.div_ceil(block) * block).min(self.end())
	}

	/// Round an address down to the start of the write chunk containing it
	pub fn write_floor(&self, address: u64) -> u64
	{
		let offset = address - u64::from(self.start);
		u64::from(self.start) + offset - (offset % self.write_size as u64)
	}
}

impl Display for FlashRegion
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		write!(
			f,
			"Flash  0x{:08x}-0x{:08x} ({} KiB, {} byte blocks)",
			self.start,
			self.end() - 1,
			self.length / 1024,
			self.block_size
		)
	}
}

/// A region of a target's memory map that is RAM (or otherwise just directly accessible)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RamRegion
{
	pub start: TargetAddr32,
	pub length: usize,
}

impl RamRegion
{
	pub fn new(start: TargetAddr32, length: usize) -> Self
	{
		Self {
			start,
			length,
		}
	}
}

impl Display for RamRegion
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		let end = u64::from(self.start) + self.length as u64 - 1;
		write!(f, "RAM    0x{:08x}-0x{:08x}", self.start, end)
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn block_rounding()
	{
		let region = FlashRegion::new(0x1a01_0000, 0x7_0000, 0x1_0000);
		assert_eq!(region.block_floor(0x1a01_0000), 0x1a01_0000);
		assert_eq!(region.block_floor(0x1a02_1234), 0x1a02_0000);
		assert_eq!(region.block_ceil(0x1a02_0001), 0x1a03_0000);
		assert_eq!(region.block_ceil(0x1a03_0000), 0x1a03_0000);
		// Rounding up never runs off the end of the region
		assert_eq!(region.block_ceil(0x1a07_ffff), 0x1a08_0000);
	}

	#[test]
	fn overlap_detection()
	{
		let low = FlashRegion::new(0x1a00_0000, 0x1_0000, 0x2000);
		let high = FlashRegion::new(0x1a01_0000, 0x7_0000, 0x1_0000);
		let straddle = FlashRegion::new(0x1a00_f000, 0x2000, 0x1000);
		assert!(!low.overlaps(&high));
		assert!(straddle.overlaps(&low));
		assert!(straddle.overlaps(&high));
	}

	#[test]
	fn region_at_top_of_address_space()
	{
		let region = RamRegion::new(0x1b08_0000, 0xe4f8_0000);
		assert_eq!(region.to_string(), "RAM    0x1b080000-0xffffffff");
	}
}
