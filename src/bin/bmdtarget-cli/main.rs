// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

mod cli_commands;

use std::io::stdout;

use clap::builder::styling::Styles;
use clap::{Args, CommandFactory, Parser, crate_description, crate_version};
use clap_complete::{Shell, generate};
use color_eyre::config::HookBuilder;
use color_eyre::eyre::Result;
use owo_colors::OwoColorize;

use crate::cli_commands::ToplevelCommmands;

#[derive(Parser)]
#[command(
	version,
	about = format!("{} v{}", crate_description!(), crate_version!()),
	styles(style()),
	disable_colored_help(false),
	arg_required_else_help(true)
)]
struct CliArguments
{
	#[command(subcommand)]
	pub subcommand: ToplevelCommmands,
}

#[derive(Args)]
struct CompletionArguments
{
	shell: Shell,
}

fn install_error_handler() -> Result<()>
{
	// Panics get a pointer on what to include in a report
	HookBuilder::default()
		.display_env_section(false)
		.panic_section(
			"Please report this crash along with the command line and log output that led to it".yellow(),
		)
		.install()
}

/// Clap v3 style (approximate)
/// See https://stackoverflow.com/a/75343828
fn style() -> clap::builder::Styles
{
	Styles::styled()
		.usage(
			anstyle::Style::new()
				.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)))
				.bold(),
		)
		.header(
			anstyle::Style::new()
				.bold()
				.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
		)
		.literal(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))))
}

fn main() -> Result<()>
{
	install_error_handler()?;
	env_logger::Builder::new()
		.filter_level(log::LevelFilter::Info)
		.parse_default_env()
		.init();

	let cli_args = CliArguments::parse();

	match &cli_args.subcommand {
		ToplevelCommmands::Avr(avr_args) => avr_args.subcommand(),
		ToplevelCommmands::Lpc43xx(lpc_args) => lpc_args.subcommand(),
		ToplevelCommmands::Complete(comp_args) => {
			let mut cmd = CliArguments::command();
			generate(comp_args.shell, &mut cmd, "bmdtarget-cli", &mut stdout());
			Ok(())
		},
	}
}
