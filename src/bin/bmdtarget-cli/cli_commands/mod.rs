// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

use std::num::ParseIntError;

use bmdtarget::target::Target;
use clap::Subcommand;
use log::info;

use crate::CompletionArguments;
use crate::cli_commands::avr::AvrArguments;
use crate::cli_commands::lpc43xx::Lpc43xxArguments;

pub mod avr;
pub mod lpc43xx;

#[derive(Subcommand)]
pub enum ToplevelCommmands
{
	/// Actions to be performed against a simulated PDI capable AVR
	Avr(AvrArguments),
	/// Actions to be performed against a simulated LPC43xx
	Lpc43xx(Lpc43xxArguments),
	/// Generate completions data for the shell
	Complete(CompletionArguments),
}

/// Parse a number given either in decimal or as hex with a leading `0x`
pub fn parse_number(value: &str) -> Result<u32, ParseIntError>
{
	match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
		Some(hex) => u32::from_str_radix(hex, 16),
		None => value.parse(),
	}
}

/// Parse a string of hex digit pairs into the bytes they represent
pub fn parse_hex_bytes(value: &str) -> Result<Vec<u8>, String>
{
	if value.len() % 2 != 0 {
		return Err("expected an even number of hex digits".into());
	}
	(0..value.len())
		.step_by(2)
		.map(|index| {
			value
				.get(index..index + 2)
				.and_then(|pair| u8::from_str_radix(pair, 16).ok())
				.ok_or_else(|| format!("invalid hex byte at offset {}", index))
		})
		.collect()
}

/// Describe a target and its memory map to the user
pub fn display_target(target: &Target)
{
	info!("Found target: {}", target);
	for region in target.ram_regions() {
		println!("  {}", region);
	}
	for region in target.flash_regions() {
		println!("  {}", region);
	}
	for command in target.commands() {
		println!("  monitor {:<8} {}", command.name, command.help);
	}
}
