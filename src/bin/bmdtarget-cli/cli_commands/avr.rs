// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

use std::sync::Arc;

use bmdtarget::sim::PdiResponder;
use bmdtarget::target::{Target, avr_pdi};
use bmdtarget::transport::JtagDev;
use clap::{Args, Subcommand};
use color_eyre::eyre::{OptionExt, Result};
use log::info;

use crate::cli_commands::{display_target, parse_number};

#[derive(Args)]
pub struct AvrArguments
{
	#[arg(global = true, long = "dev-index", default_value_t = 0)]
	/// Position of the AVR on the JTAG scan chain
	dev_index: u8,
	#[arg(global = true, long = "idcode", default_value = "0x6974203f", value_parser = parse_number)]
	/// IDCODE the simulated AVR reports
	idcode: u32,

	#[command(subcommand)]
	subcommand: AvrCommands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help(true))]
enum AvrCommands
{
	/// Print information about the AVR
	Info,
	/// Put the AVR's core into reset through PDI
	Reset,
	/// Halt the AVR's core through PDI
	Halt,
}

impl AvrArguments
{
	pub fn subcommand(&self) -> Result<()>
	{
		let mut target = self.probe()?;
		match self.subcommand {
			AvrCommands::Info => {
				display_target(&target);
				Ok(())
			},
			AvrCommands::Reset => {
				target.attach()?;
				let result = target.reset();
				target.detach();
				result?;
				info!("Target reset");
				Ok(())
			},
			AvrCommands::Halt => {
				target.attach()?;
				let result = target.halt_request().and_then(|_| target.halt_poll());
				target.detach();
				info!("Target {}", result?);
				Ok(())
			},
		}
	}

	fn probe(&self) -> Result<Target>
	{
		let jtag = Arc::new(PdiResponder::halting(self.dev_index));
		let device = JtagDev::new(self.dev_index, self.idcode);
		avr_pdi::probe(jtag, &device, &[])?.ok_or_eyre("Device is not a PDI capable AVR")
	}
}
