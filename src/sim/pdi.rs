// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use log::trace;

use crate::error::TransportError;
use crate::target::avr_pdi::{IR_BYPASS, IR_PDI, PDI_EMPTY, PDI_LDCS, PDI_REG_R3, PDI_STCS};
use crate::transport::JtagAccess;

const PDI_COMMAND_MASK: u8 = 0xe0;
const PDI_REG_MASK: u8 = 0x0f;

/// A JTAG scan chain with a single PDI capable AVR on it, modelling the PDI's control/status
/// register interface closely enough to drive the register handshakes against
pub struct PdiResponder
{
	dev_index: u8,
	state: Mutex<PdiState>,
}

struct PdiState
{
	/// Instruction register contents for each device that's had one written
	ir: HashMap<u8, u32>,
	registers: [u8; 16],
	/// The command byte of a register access that is waiting for its second shift
	pending: Option<u8>,
	/// Values R3 reads back as, in order, before falling back to the register's contents
	r3_script: VecDeque<u8>,
	/// XOR masks applied to the readback of specific data register shifts, by shift number
	corruptions: HashMap<usize, u8>,
	/// Data register shifts (by shift number) that fail at the transport level
	failures: HashSet<usize>,
	shifts: usize,
	calls: usize,
}

impl PdiResponder
{
	pub fn new(dev_index: u8) -> Self
	{
		Self {
			dev_index,
			state: Mutex::new(PdiState {
				ir: HashMap::new(),
				registers: [0; 16],
				pending: None,
				r3_script: VecDeque::new(),
				corruptions: HashMap::new(),
				failures: HashSet::new(),
				shifts: 0,
				calls: 0,
			}),
		}
	}

	/// A responder pre-scripted to walk R3 through the sequence a healthy part shows
	/// while being halted
	pub fn halting(dev_index: u8) -> Self
	{
		let responder = Self::new(dev_index);
		responder.script_r3(&[0x10, 0x14, 0x04]);
		responder
	}

	fn state(&self) -> MutexGuard<'_, PdiState>
	{
		self.state.lock().unwrap()
	}

	/// Queue up values for the next reads of R3 to return
	pub fn script_r3(&self, values: &[u8])
	{
		self.state().r3_script.extend(values);
	}

	pub fn set_register(&self, reg: u8, value: u8)
	{
		self.state().registers[usize::from(reg & PDI_REG_MASK)] = value;
	}

	pub fn register(&self, reg: u8) -> u8
	{
		self.state().registers[usize::from(reg & PDI_REG_MASK)]
	}

	/// Flip the bits in `mask` in what the `shift`th data register shift (counting from 0
	/// after the last [`PdiResponder::reset_counters`]) reads back
	pub fn corrupt_shift(&self, shift: usize, mask: u8)
	{
		self.state().corruptions.insert(shift, mask);
	}

	/// Make the `shift`th data register shift fail at the transport level
	pub fn fail_shift(&self, shift: usize)
	{
		self.state().failures.insert(shift);
	}

	/// The instruction register last written for the given device
	pub fn ir(&self, dev_index: u8) -> Option<u32>
	{
		self.state().ir.get(&dev_index).copied()
	}

	/// How many transport operations (IR writes and DR shifts) have been made
	pub fn calls(&self) -> usize
	{
		self.state().calls
	}

	pub fn shifts(&self) -> usize
	{
		self.state().shifts
	}

	pub fn reset_counters(&self)
	{
		let mut state = self.state();
		state.calls = 0;
		state.shifts = 0;
	}
}

impl PdiState
{
	/// Work out what the PDI shifts back for a byte shifted in
	fn respond(&mut self, value: u8) -> u8
	{
		match self.pending.take() {
			None => {
				let command = value & PDI_COMMAND_MASK;
				if command == PDI_STCS || command == PDI_LDCS {
					self.pending = Some(value);
				}
				PDI_EMPTY
			},
			Some(command) => {
				let reg = command & PDI_REG_MASK;
				if command & PDI_COMMAND_MASK == PDI_STCS {
					self.registers[usize::from(reg)] = value;
					PDI_EMPTY
				} else if reg == PDI_REG_R3 {
					self.r3_script.pop_front().unwrap_or(self.registers[usize::from(reg)])
				} else {
					self.registers[usize::from(reg)]
				}
			},
		}
	}
}

impl JtagAccess for PdiResponder
{
	fn write_ir(&self, dev_index: u8, ir: u32) -> Result<(), TransportError>
	{
		let mut state = self.state();
		state.calls += 1;
		trace!("IR[{}] <- 0x{:x}", dev_index, ir);
		state.ir.insert(dev_index, ir);
		// Changing instruction abandons any register access in progress
		state.pending = None;
		Ok(())
	}

	fn shift_dr(&self, dev_index: u8, value: u8) -> Result<u8, TransportError>
	{
		let mut state = self.state();
		state.calls += 1;
		let shift = state.shifts;
		state.shifts += 1;

		if state.failures.contains(&shift) {
			return Err(TransportError::ShiftFailed {
				dev_index,
			});
		}

		// Anything not selected onto the PDI just echoes back what it was given
		let selected = dev_index == self.dev_index && state.ir.get(&dev_index).copied().unwrap_or(IR_BYPASS) == IR_PDI;
		let readback = if selected { state.respond(value) } else { value };
		let readback = readback ^ state.corruptions.get(&shift).copied().unwrap_or(0);
		trace!("DR[{}] 0x{:02x} -> 0x{:02x}", dev_index, value, readback);
		Ok(readback)
	}
}
