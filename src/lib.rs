// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_inception)]
#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::new_without_default)]

pub mod analyzers;
pub mod burst;
pub mod cli;
pub mod config;
pub mod discriminator;
pub mod errors;
pub mod finding;
pub mod fingerprint;
pub mod orchestrator;
pub mod passive;
pub mod probe;
pub mod race_cli;
pub mod report;
