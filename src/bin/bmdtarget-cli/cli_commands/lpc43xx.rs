// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

use std::io::stdout;
use std::sync::Arc;

use bmdtarget::sim::{LPC43XX_FLASHLESS_CHIPID, LPC43XX_M4_CPUID, LPC4337_CHIPID, Lpc43xxSim};
use bmdtarget::target::{Target, cortexm, lpc43xx};
use bmdtarget::timeout::ProgressTimer;
use clap::{Args, Subcommand};
use color_eyre::eyre::{OptionExt, Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};

use crate::cli_commands::{display_target, parse_hex_bytes, parse_number};

#[derive(Args)]
pub struct Lpc43xxArguments
{
	#[arg(global = true, long = "flashless", default_value_t = false)]
	/// Simulate one of the Flashless parts
	flashless: bool,
	#[arg(global = true, long = "watchdog", default_value_t = false)]
	/// Simulate the part with its watchdog running
	watchdog: bool,

	#[command(subcommand)]
	subcommand: Lpc43xxCommands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help(true))]
enum Lpc43xxCommands
{
	/// Print information about the part and its memory map
	Info,
	/// Reset all major systems except debug
	Reset,
	/// Make a Flash bank bootable
	Mkboot
	{
		/// The bank to make bootable, 0 or 1
		bank: String,
	},
	/// Erase all of the part's Flash
	MassErase,
	/// Erase the Flash covering a range of addresses
	Erase
	{
		#[arg(value_parser = parse_number)]
		address: u32,
		#[arg(value_parser = parse_number)]
		length: u32,
	},
	/// Write data into Flash
	Write
	{
		#[arg(value_parser = parse_number)]
		address: u32,
		/// The data to write, as a string of hex digit pairs
		data: String,
	},
}

impl Lpc43xxArguments
{
	pub fn subcommand(&self) -> Result<()>
	{
		let sim = Arc::new(Lpc43xxSim::new(
			if self.flashless { LPC43XX_FLASHLESS_CHIPID } else { LPC4337_CHIPID },
			LPC43XX_M4_CPUID,
		));
		if self.watchdog {
			sim.set_watchdog_mode(1);
		}

		let mut target = cortexm::probe(sim.clone(), &[lpc43xx::probe])?.ok_or_eyre("Device is not an LPC43xx")?;
		if let Lpc43xxCommands::Info = self.subcommand {
			display_target(&target);
			return Ok(());
		}

		target.attach()?;
		let result = self.run(&mut target, &sim);
		target.detach();
		result
	}

	fn run(&self, target: &mut Target, sim: &Lpc43xxSim) -> Result<()>
	{
		match &self.subcommand {
			Lpc43xxCommands::Info => Ok(()),
			Lpc43xxCommands::Reset => monitor(target, &["reset"]),
			Lpc43xxCommands::Mkboot {
				bank,
			} => monitor(target, &["mkboot", bank.as_str()]),
			Lpc43xxCommands::MassErase => mass_erase(target),
			Lpc43xxCommands::Erase {
				address,
				length,
			} => {
				target.flash_erase(*address, *length as usize)?;
				info!("Erased 0x{:08x}+0x{:x}", address, length);
				Ok(())
			},
			Lpc43xxCommands::Write {
				address,
				data,
			} => {
				let data = parse_hex_bytes(data).map_err(|message| eyre!("Invalid data: {}", message))?;
				target.flash_write(*address, &data)?;
				// Read back what landed in Flash so the user can see the result
				let words: Vec<String> = (0..data.len().div_ceil(4))
					.map(|index| format!("{:08x}", sim.peek(address + (index as u32 * 4))))
					.collect();
				info!("Flash at 0x{:08x} now reads {}", address, words.join(" "));
				Ok(())
			},
		}
	}
}

fn monitor(target: &mut Target, argv: &[&str]) -> Result<()>
{
	if target.run_command(argv, &mut stdout())? {
		Ok(())
	} else {
		Err(eyre!("monitor command '{}' failed", argv.join(" ")))
	}
}

fn mass_erase(target: &mut Target) -> Result<()>
{
	let spinner =
		ProgressBar::new_spinner().with_style(ProgressStyle::default_spinner().template("{spinner} {msg} [{elapsed}]")?);
	spinner.set_message("Erasing Flash");
	let mut progress = ProgressTimer::new(ProgressTimer::DEFAULT_PERIOD, || spinner.tick());
	let result = target.mass_erase(&mut progress);
	drop(progress);
	spinner.finish_and_clear();

	match result {
		Ok(()) => {
			info!("Mass erase complete");
			Ok(())
		},
		Err(error) => {
			error!("Mass erase failed, some Flash may already have been erased");
			Err(error.into())
		},
	}
}
