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

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use polygon_relayer_context::Shutdown;
use polygon_relayer_utils::metric::Metrics;
use polygon_relayer_utils::{ClientError, Error};
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::{PollStatus, PollingTask};

type Step = polygon_relayer_utils::Result<PollStatus>;

/// A task replaying scripted steps, then staying idle.
struct ScriptedTask {
    steps: Mutex<VecDeque<Step>>,
    polls: Mutex<usize>,
    interval: Duration,
}

impl ScriptedTask {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            polls: Mutex::new(0),
            interval: Duration::from_millis(10),
        }
    }

    fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn polls(&self) -> usize {
        *self.polls.lock()
    }
}

#[async_trait::async_trait]
impl PollingTask for ScriptedTask {
    const TAG: &'static str = "Scripted Task";

    fn polling_interval(&self) -> Duration {
        self.interval
    }

    async fn poll_once(&self, _shutdown: &mut Shutdown) -> Step {
        *self.polls.lock() += 1;
        self.steps.lock().pop_front().unwrap_or(Ok(PollStatus::Idle))
    }
}

fn signal() -> (broadcast::Sender<()>, Shutdown) {
    let (tx, rx) = broadcast::channel(1);
    (tx, Shutdown::new(rx))
}

#[tokio::test]
#[tracing_test::traced_test]
async fn transient_failures_back_off_and_continue() {
    let task = Arc::new(ScriptedTask::new(vec![
        Err(Error::Client(ClientError::Timeout)),
        Ok(PollStatus::Busy),
        Ok(PollStatus::Busy),
    ]));
    let metrics = Arc::new(Metrics::new().unwrap());
    let (tx, shutdown) = signal();
    let handle = {
        let task = task.clone();
        let metrics = metrics.clone();
        tokio::spawn(
            async move { task.run(shutdown, metrics).await }.in_current_span(),
        )
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(metrics.monitor_back_off.get() as u64, 1);
    assert!(task.polls() >= 4);
    assert!(logs_contain("retrying"));
}

#[tokio::test]
#[tracing_test::traced_test]
async fn fatal_failure_stops_the_task() {
    let task = ScriptedTask::new(vec![
        Ok(PollStatus::Busy),
        Err(Error::Client(ClientError::Malformed("bad event".into()))),
        Ok(PollStatus::Busy),
    ]);
    let metrics = Arc::new(Metrics::new().unwrap());
    let (_tx, shutdown) = signal();
    let result = task.run(shutdown, metrics.clone()).await;
    assert!(matches!(result, Err(Error::Client(ClientError::Malformed(_)))));
    assert_eq!(task.polls(), 2);
    assert_eq!(metrics.monitor_back_off.get() as u64, 0);
    assert!(logs_contain("stopped"));
}

#[tokio::test]
async fn shutdown_before_start_runs_no_step() {
    let task = ScriptedTask::new(vec![]);
    let (tx, shutdown) = signal();
    tx.send(()).unwrap();
    task.run(shutdown, Arc::new(Metrics::new().unwrap()))
        .await
        .unwrap();
    assert_eq!(task.polls(), 0);
}

#[tokio::test]
async fn first_step_runs_before_the_first_sleep() {
    let task = Arc::new(
        ScriptedTask::new(vec![]).with_interval(Duration::from_secs(3600)),
    );
    let (tx, shutdown) = signal();
    let handle = {
        let task = task.clone();
        let metrics = Arc::new(Metrics::new().unwrap());
        tokio::spawn(async move { task.run(shutdown, metrics).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(task.polls(), 1);

    // the sleep is cut short by the shutdown signal.
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(task.polls(), 1);
}
