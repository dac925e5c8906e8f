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

/// The default port the status API will listen on. Defaults to 9955.
pub const fn port() -> u16 {
    9955
}
/// The print progress interval is set to `7_000` by default.
pub const fn print_progress_interval() -> u64 {
    7_000
}
/// A single request to a chain endpoint gives up after `30_000` ms.
pub const fn request_timeout() -> u64 {
    30_000
}
/// EVM blocks scanned per step, `100` by default.
pub const fn headers_per_batch() -> u64 {
    100
}
/// Confirmations required on the EVM chain, `12` by default.
pub const fn eth_block_confirmations() -> u64 {
    12
}
/// Poly blocks scanned per step, `100` by default.
pub const fn blocks_per_batch() -> u64 {
    100
}
/// Confirmations required on Poly, which has instant finality.
pub const fn poly_block_confirmations() -> u64 {
    1
}
/// Monitors poll their chain every `1_000` ms by default.
pub const fn monitor_interval() -> u64 {
    1_000
}
/// Heimdall is polled for spans every `60_000` ms by default.
pub const fn span_interval() -> u64 {
    60_000
}
/// At most `10` spans are fetched per step.
pub const fn spans_per_step() -> u64 {
    10
}
/// The processor works its queue every `5_000` ms by default.
pub const fn processor_interval() -> u64 {
    5_000
}
/// A retry batch runs every `30_000` ms by default.
pub const fn retry_interval() -> u64 {
    30_000
}
/// Items handled per processor step, `100` by default.
pub const fn batch_size() -> usize {
    100
}
/// Tasks get `10_000` ms to stop after a shutdown signal.
pub const fn shutdown_grace_period() -> u64 {
    10_000
}
