// SPDX-License-Identifier: Apache-2.0

pub mod file;

pub use file::{FileFinder, StartAt, TailConfig, TailEnd, TailHandle, TailReader};
