// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
//! Module for error handling code.

use thiserror::Error;

use crate::target::lpc_iap::{IapCommand, IapStatus};

/// Failures raised by the transport primitives that reach the target hardware
#[derive(Debug, Error)]
pub enum TransportError
{
	#[error("JTAG data register shift on scan chain device {dev_index} failed")]
	ShiftFailed
	{
		/// Index of the device on the scan chain the shift was addressed to
		dev_index: u8,
	},
}

/// Failures raised by target operations, surfaced through [`crate::target::Target`]
#[derive(Debug, Error)]
pub enum TargetError
{
	/// A debug protocol handshake read back something other than what the sequence demands.
	/// These are never retried as the device is in an unknown state.
	#[error("Error {operation} device, device in incorrect state")]
	IncorrectState
	{
		/// The operation in progress (e.g. `"resetting"`)
		operation: &'static str,
	},

	#[error("IAP command {command} failed with status {status}")]
	IapCall
	{
		command: IapCommand,
		status: IapStatus,
	},

	#[error("Timed out waiting on the target while {operation}")]
	Timeout
	{
		operation: &'static str,
	},

	#[error("Range 0x{address:08x}+0x{length:x} is not covered by the target's flash map")]
	NotInFlash
	{
		address: u32,
		length: usize,
	},

	#[error("Flash region 0x{start:08x}+0x{length:x} overlaps an existing region")]
	RegionOverlap
	{
		start: u32,
		length: usize,
	},

	#[error("Flash region 0x{start:08x}+0x{length:x} has a zero sized erase block or write chunk")]
	InvalidGeometry
	{
		start: u32,
		length: usize,
	},

	#[error("{driver} targets do not support {operation}")]
	Unsupported
	{
		driver: &'static str,
		operation: &'static str,
	},

	#[error("Unknown target command '{0}'")]
	UnknownCommand(String),

	#[error("Failed to write command output")]
	Output(#[from] std::io::Error),

	#[error(transparent)]
	Transport(#[from] TransportError),
}

#[macro_export]
macro_rules! log_and_return
{
	($err:expr) => {
		let err = $err;
		log::error!("{}", err);
		return Err(err.into());
	}
}
