// SPDX-License-Identifier: Apache-2.0

//! Push path to an open-falcon style agent: a JSON array of counter samples POSTed once per
//! flush interval.

pub mod pusher;
pub mod scheduler;

pub use pusher::{MetricsPusher, PushError};
pub use scheduler::{FlushConfig, PushScheduler, default_max_in_flight};
