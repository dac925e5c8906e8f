// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Chain Monitors 🕸️
//!
//! Background tasks that read the source chains and record what they find
//! in the store:
//!
//! * [`DepositMonitor`] scans the EVM sidechain or Poly for cross-chain
//!   events and records them as pending proofs.
//! * [`SpanMonitor`] follows the Heimdall spans, at the tip and backwards
//!   from a configured span.
//!
//! Both are [`PollingTask`](polygon_event_watcher_traits::PollingTask)s and
//! advance their cursor only after everything below it is durably recorded.

mod deposit_monitor;
mod span_monitor;

pub use deposit_monitor::DepositMonitor;
pub use span_monitor::{SpanMode, SpanMonitor};
