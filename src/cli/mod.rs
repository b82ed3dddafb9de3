// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Terminal front-end: arguments, input and rendering

pub mod args;
pub mod console;
pub mod input;

pub use args::*;
pub use console::{format_usage, ConsoleListener, ConsoleStreamer};
pub use input::{parse_args, ConsoleInput};
