// SPDX-License-Identifier: Apache-2.0

mod config;
mod finder;
mod reader;
mod tail;

pub use config::{StartAt, TailConfig};
pub use finder::FileFinder;
pub use reader::TailReader;
pub use tail::{TailEnd, TailHandle};
