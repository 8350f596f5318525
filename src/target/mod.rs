// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

use std::fmt::{self, Display, Formatter};
use std::io::Write;

use log::{debug, info, warn};

use crate::error::TargetError;
use crate::timeout::ProgressTimer;
use crate::transport::TargetAddr32;

pub mod avr_pdi;
pub mod cortexm;
pub mod flash;
pub mod lpc43xx;
pub mod lpc_iap;

pub use flash::{FlashRegion, RamRegion};

/// Why a target is (or is not) halted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HaltReason
{
	/// The target is executing normally
	Running,
	/// The debug machinery could not determine the target's state
	Error,
	/// The target halted because we asked it to
	Request,
	/// The target halted after a single step
	Stepping,
	/// The target hit a breakpoint
	Breakpoint,
	/// The target hit a watchpoint on the contained address
	Watchpoint(TargetAddr32),
	/// The target halted on a fault
	Fault,
}

impl Display for HaltReason
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		match self {
			HaltReason::Running => write!(f, "running"),
			HaltReason::Error => write!(f, "error"),
			HaltReason::Request => write!(f, "halted by request"),
			HaltReason::Stepping => write!(f, "halted after step"),
			HaltReason::Breakpoint => write!(f, "halted on breakpoint"),
			HaltReason::Watchpoint(address) => write!(f, "halted on watchpoint at 0x{:08x}", address),
			HaltReason::Fault => write!(f, "halted on fault"),
		}
	}
}

/// A monitor command a target driver makes available to the user
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetCommand
{
	pub name: &'static str,
	pub help: &'static str,
}

/// Types implementing this trait are the family specific halves of a [`Target`]. They own all
/// state private to the family and are the only things that drive the family's debug protocol.
/// A [`Target`] may be handed to another thread, so drivers must be [`Send`].
pub trait TargetDriver: Send
{
	/// Get the device ready for debug operations
	fn attach(&mut self) -> Result<(), TargetError>;
	/// Return the device to normal operation. This is best-effort and must cope with
	/// the device being in a bad state
	fn detach(&mut self);
	/// Force the core into a known reset state
	fn reset(&mut self) -> Result<(), TargetError>;
	/// Ask the core to enter the debug-halted state
	fn halt_request(&mut self) -> Result<(), TargetError>;
	/// Report why the core is (or isn't) halted
	fn halt_poll(&mut self) -> Result<HaltReason, TargetError>;

	/// Erase a block-aligned range lying entirely within `region`
	fn flash_erase(&mut self, _region: &FlashRegion, _address: TargetAddr32, _length: usize)
	-> Result<(), TargetError>
	{
		Err(TargetError::Unsupported {
			driver: self.name(),
			operation: "Flash erase",
		})
	}

	/// Program one write-chunk-aligned block of data lying entirely within `region`
	fn flash_write(&mut self, _region: &FlashRegion, _address: TargetAddr32, _data: &[u8])
	-> Result<(), TargetError>
	{
		Err(TargetError::Unsupported {
			driver: self.name(),
			operation: "Flash write",
		})
	}

	/// Erase all of the target's Flash in one go
	fn mass_erase(&mut self, _progress: &mut ProgressTimer) -> Result<(), TargetError>
	{
		Err(TargetError::Unsupported {
			driver: self.name(),
			operation: "mass erase",
		})
	}

	/// The monitor commands this driver provides
	fn commands(&self) -> &'static [TargetCommand]
	{
		&[]
	}

	/// Execute one of the monitor commands from [`TargetDriver::commands`]. `argv[0]` is
	/// the command name. Returns whether the command succeeded
	fn run_command(&mut self, argv: &[&str], _output: &mut dyn Write) -> Result<bool, TargetError>
	{
		Err(TargetError::UnknownCommand(argv.first().copied().unwrap_or_default().to_string()))
	}

	fn name(&self) -> &'static str;
}

/// A target device that has been identified by one of the family probe routines
pub struct Target
{
	driver_name: &'static str,
	core_name: &'static str,
	cpuid: u32,
	part_id: u16,
	attached: bool,

	/// Flash regions, kept sorted by start address and guaranteed not to overlap
	flash: Vec<FlashRegion>,
	ram: Vec<RamRegion>,

	driver: Box<dyn TargetDriver>,
}

impl Target
{
	pub fn new(
		driver_name: &'static str, core_name: &'static str, cpuid: u32, part_id: u16, driver: Box<dyn TargetDriver>,
	) -> Self
	{
		Self {
			driver_name,
			core_name,
			cpuid,
			part_id,
			attached: false,
			flash: Vec::new(),
			ram: Vec::new(),
			driver,
		}
	}

	pub fn driver_name(&self) -> &'static str
	{
		self.driver_name
	}

	pub fn core_name(&self) -> &'static str
	{
		self.core_name
	}

	pub fn cpuid(&self) -> u32
	{
		self.cpuid
	}

	pub fn part_id(&self) -> u16
	{
		self.part_id
	}

	pub fn is_attached(&self) -> bool
	{
		self.attached
	}

	pub fn flash_regions(&self) -> &[FlashRegion]
	{
		&self.flash
	}

	pub fn ram_regions(&self) -> &[RamRegion]
	{
		&self.ram
	}

	/// Declare a new Flash region on the target
	pub fn add_flash(&mut self, region: FlashRegion) -> Result<(), TargetError>
	{
		if region.block_size == 0 || region.write_size == 0 {
			return Err(TargetError::InvalidGeometry {
				start: region.start,
				length: region.length,
			});
		}
		if self.flash.iter().any(|existing| existing.overlaps(&region)) {
			return Err(TargetError::RegionOverlap {
				start: region.start,
				length: region.length,
			});
		}
		// Find where this region slots in to keep the list in address order
		let index = self.flash.partition_point(|existing| existing.start < region.start);
		self.flash.insert(index, region);
		Ok(())
	}

	/// Declare a new RAM region on the target
	pub fn add_ram(&mut self, start: TargetAddr32, length: usize)
	{
		let index = self.ram.partition_point(|existing| existing.start < start);
		self.ram.insert(index, RamRegion::new(start, length));
	}

	pub fn attach(&mut self) -> Result<(), TargetError>
	{
		debug!("Attaching to {} target", self.driver_name);
		self.driver.attach()?;
		self.attached = true;
		Ok(())
	}

	pub fn detach(&mut self)
	{
		debug!("Detaching from {} target", self.driver_name);
		self.driver.detach();
		self.attached = false;
	}

	pub fn reset(&mut self) -> Result<(), TargetError>
	{
		self.driver.reset()
	}

	pub fn halt_request(&mut self) -> Result<(), TargetError>
	{
		self.driver.halt_request()
	}

	pub fn halt_poll(&mut self) -> Result<HaltReason, TargetError>
	{
		self.driver.halt_poll()
	}

	/// Break a range up into the spans of it that lie in each Flash region, making sure
	/// the whole range is covered before anything touches the hardware
	fn flash_spans(&self, address: TargetAddr32, length: usize) -> Result<Vec<(FlashRegion, u64, u64)>, TargetError>
	{
		let end = u64::from(address) + length as u64;
		let mut spans = Vec::new();
		let mut current = u64::from(address);
		while current < end {
			let region = self
				.flash
				.iter()
				.find(|region| region.contains(current))
				.ok_or(TargetError::NotInFlash {
					address,
					length,
				})?;
			let span_end = end.min(region.end());
			spans.push((*region, current, span_end));
			current = span_end;
		}
		Ok(spans)
	}

	/// Erase the given range of Flash. The range is rounded out to the erase block
	/// size of the regions it lies in
	pub fn flash_erase(&mut self, address: TargetAddr32, length: usize) -> Result<(), TargetError>
	{
		for (region, start, end) in self.flash_spans(address, length)? {
			let erase_start = region.block_floor(start);
			let erase_end = region.block_ceil(end);
			debug!("Erasing Flash 0x{:08x}-0x{:08x}", erase_start, erase_end - 1);
			self.driver
				.flash_erase(&region, erase_start as TargetAddr32, (erase_end - erase_start) as usize)?;
		}
		Ok(())
	}

	/// Program the given data into Flash at the given address. The data is split into the
	/// write chunks of the regions it lies in, with any part of a chunk not covered by the
	/// data filled with the erased value so it programs as a no-op
	pub fn flash_write(&mut self, address: TargetAddr32, data: &[u8]) -> Result<(), TargetError>
	{
		for (region, start, end) in self.flash_spans(address, data.len())? {
			let mut chunk_start = region.write_floor(start);
			while chunk_start < end {
				let chunk_end = (chunk_start + region.write_size as u64).min(region.end());
				let mut buffer = vec![region.erased; (chunk_end - chunk_start) as usize];

				// Work out which part of the chunk the caller's data covers
				let copy_start = start.max(chunk_start);
				let copy_end = end.min(chunk_end);
				let data_offset = (copy_start - u64::from(address)) as usize;
				let buffer_offset = (copy_start - chunk_start) as usize;
				let count = (copy_end - copy_start) as usize;
				buffer[buffer_offset..buffer_offset + count].copy_from_slice(&data[data_offset..data_offset + count]);

				debug!("Writing Flash 0x{:08x}-0x{:08x}", chunk_start, chunk_end - 1);
				self.driver.flash_write(&region, chunk_start as TargetAddr32, &buffer)?;
				chunk_start = chunk_end;
			}
		}
		Ok(())
	}

	pub fn mass_erase(&mut self, progress: &mut ProgressTimer) -> Result<(), TargetError>
	{
		info!("Erasing all Flash on {} target", self.driver_name);
		self.driver.mass_erase(progress)
	}

	pub fn commands(&self) -> &'static [TargetCommand]
	{
		self.driver.commands()
	}

	/// Run one of the target's monitor commands, writing any output for the user to `output`
	pub fn run_command(&mut self, argv: &[&str], output: &mut dyn Write) -> Result<bool, TargetError>
	{
		let name = argv.first().copied().unwrap_or_default();
		if !self.commands().iter().any(|command| command.name == name) {
			warn!("{} targets have no command '{}'", self.driver_name, name);
			return Err(TargetError::UnknownCommand(name.to_string()));
		}
		self.driver.run_command(argv, output)
	}
}

impl Display for Target
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		write!(f, "{} {} (ID 0x{:08x}, part 0x{:04x})", self.driver_name, self.core_name, self.cpuid, self.part_id)
	}
}
