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

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use polygon_event_watcher_traits::PollStatus;
use polygon_relayer_context::Shutdown;
use polygon_relayer_store::RelayStore;
use polygon_relayer_types::RetryKey;
use polygon_relayer_utils::Error;
use typed_builder::TypedBuilder;

use crate::pipeline::{Stage, SubmissionPipeline};

/// Re-attempts the submissions of one source chain that failed with a
/// retryable error.
///
/// Before submitting again it asks the destination whether the transaction
/// was relayed in the meantime, by this relayer or another one.
///
/// The worker is a stage of the [`DepositProcessor`](crate::DepositProcessor)
/// of its chain and runs in the same task, after the pending batch. Each
/// batch resumes after the last entry the previous one handled, and starts
/// over at the beginning of the chain's key range once it reached the end.
#[derive(TypedBuilder)]
pub struct RetryWorker<S> {
    pipeline: SubmissionPipeline<S>,
    #[builder(default = 100)]
    batch_size: usize,
    /// Time between two batches once a batch found nothing more to do.
    #[builder(default = Duration::from_secs(30))]
    polling_interval: Duration,
    #[builder(default, setter(skip))]
    resume_after: Mutex<Option<Vec<u8>>>,
    #[builder(default, setter(skip))]
    next_due: Mutex<Option<Instant>>,
}

impl<S: RelayStore> RetryWorker<S> {
    /// Whether the next batch should run now.
    pub fn is_due(&self) -> bool {
        let next_due = *self.next_due.lock();
        next_due.map_or(true, |due| Instant::now() >= due)
    }

    /// Collects the next retry keys of this chain, and whether the scan
    /// reached the end of the chain's key range.
    fn next_batch(
        &self,
        start: Option<&[u8]>,
    ) -> polygon_relayer_utils::Result<(Vec<Vec<u8>>, bool)> {
        let chain = self.pipeline.chain();
        // retry keys start with the chain tag, the keys of this chain
        // are the ones right after the bare tag.
        let prefix = RetryKey::chain_prefix(chain);
        let from = start.unwrap_or(prefix.as_slice());
        let page = self
            .pipeline
            .store()
            .list_retry_after(Some(from), self.batch_size)?;
        let mut reached_end = !page.is_truncated();
        let mut keys = Vec::with_capacity(page.len());
        for key in page.items {
            if key.first() != Some(&chain.tag()) {
                reached_end = true;
                break;
            }
            keys.push(key);
        }
        Ok((keys, reached_end))
    }

    /// Handles one batch of retry entries.
    ///
    /// Returns [`PollStatus::Busy`] when entries left the retry set and more
    /// of them wait after this batch. Entries that fail again stay queued
    /// and do not count.
    #[tracing::instrument(skip_all, fields(chain = %self.pipeline.chain()))]
    pub async fn run_batch(
        &self,
        shutdown: &mut Shutdown,
    ) -> polygon_relayer_utils::Result<PollStatus> {
        let store = self.pipeline.store();
        let mut resume = self.resume_after.lock().take();
        let (keys, reached_end) = self.next_batch(resume.as_deref())?;
        let mut settled = 0;
        let mut seen = 0;
        for key in keys {
            if shutdown.is_shutdown() {
                *self.resume_after.lock() = resume;
                return Ok(PollStatus::Idle);
            }
            seen += 1;
            match RetryKey::try_from(key.as_slice()) {
                Ok(retry_key) => match self
                    .pipeline
                    .process(Stage::Retry, retry_key.tx_id, None)
                    .await
                {
                    Ok(outcome) if outcome.is_settled() => settled += 1,
                    Ok(_) => {}
                    Err(Error::Client(e)) => {
                        tracing::warn!(tx_id = %retry_key.tx_id, "retry failed: {}", e);
                    }
                    Err(e) => return Err(e),
                },
                Err(e) => {
                    tracing::warn!("dropping undecodable retry entry: {}", e);
                    store.dequeue_retry(&key)?;
                }
            }
            resume = Some(key);
        }
        tracing::trace!("{} retry entries handled, {} settled", seen, settled);

        *self.resume_after.lock() = if reached_end { None } else { resume };
        if !reached_end && settled > 0 {
            *self.next_due.lock() = None;
            Ok(PollStatus::Busy)
        } else {
            *self.next_due.lock() = Some(Instant::now() + self.polling_interval);
            Ok(PollStatus::Idle)
        }
    }
}
