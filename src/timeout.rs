// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

use std::time::{Duration, Instant};

/// A simple deadline used to bound polling loops against the target
#[derive(Clone, Copy, Debug)]
pub struct PlatformTimeout
{
	deadline: Instant,
}

impl PlatformTimeout
{
	pub fn new(period: Duration) -> Self
	{
		Self {
			deadline: Instant::now() + period,
		}
	}

	pub fn is_expired(&self) -> bool
	{
		Instant::now() >= self.deadline
	}
}

/// Rate-limits progress feedback from long running operations such as a mass erase
/// to the user - the callback fires at most once per period, when `tick()` is called
/// after the period has elapsed
pub struct ProgressTimer<'a>
{
	period: Duration,
	timeout: PlatformTimeout,
	report: Box<dyn FnMut() + 'a>,
}

impl<'a> ProgressTimer<'a>
{
	/// The cadence progress is reported at by default
	pub const DEFAULT_PERIOD: Duration = Duration::from_millis(500);

	pub fn new(period: Duration, report: impl FnMut() + 'a) -> Self
	{
		Self {
			period,
			timeout: PlatformTimeout::new(period),
			report: Box::new(report),
		}
	}

	/// A timer that never reports anything
	pub fn silent() -> Self
	{
		Self::new(Self::DEFAULT_PERIOD, || {})
	}

	pub fn tick(&mut self)
	{
		if self.timeout.is_expired() {
			(self.report)();
			self.timeout = PlatformTimeout::new(self.period);
		}
	}
}
