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

#![warn(missing_docs)]
//! # Relayer Transaction Queue 🕸️
//!
//! Submits the finality proofs of the recorded events.
//!
//! ## Overview
//!
//! The chain monitors fill the pending set. For every source chain, a
//! [`DepositProcessor`] works that set off, then lets its [`RetryWorker`]
//! re-attempt the submissions that failed with a retryable error. Both
//! stages hand each item to the same [`SubmissionPipeline`], which moves it
//! between the store partitions in single atomic steps:
//!
//! ```text
//! pending ──► submitted
//!    │  └───► abandoned
//!    └──► retrying ──► submitted
//!              └─────► abandoned
//! ```
//!
//! Both stages run one after the other in the processor's task, so the
//! submissions to a destination chain never overlap.

mod pipeline;
mod processor;
mod retry_worker;

pub use pipeline::{Outcome, Stage, SubmissionPipeline};
pub use processor::DepositProcessor;
pub use retry_worker::RetryWorker;
