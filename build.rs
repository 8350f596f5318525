// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
//! This build script only exists so the CLI links the Visual C runtime statically on
//! Windows, giving a binary that runs without the redistributable installed.

fn main()
{
	static_vcruntime::metabuild();
}
