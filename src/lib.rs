// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>

pub mod error;
#[cfg(feature = "sim")]
pub mod sim;
pub mod target;
pub mod timeout;
pub mod transport;
