// Worker threads that send upload jobs.
//
// Each worker owns a `ScriptRuntime` and a blocking HTTP client for its
// whole life; the job queue is the only thing workers share. A failed job is
// logged and reported in its `JobOutcome`, and the worker moves on to the
// next one.

use crate::config::PoolConfig;
use crate::error::{GsharerError, Result};
use crate::interpret::ResponseInterpreter;
use crate::job::UploadJob;
use crate::runtime::ScriptRuntime;
use crate::scripts::EmbeddedScripts;
use crate::ui::ProgressDisplay;
use indicatif::ProgressBar;
use reqwest::blocking::{Body, Client};
use reqwest::header::CONTENT_TYPE;
use std::io::Cursor;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, error, info};

/// One runtime and one HTTP client, used by a single thread.
pub struct Worker {
    id: usize,
    runtime: ScriptRuntime,
    client: Client,
}

impl Worker {
    pub fn new(id: usize, config: &PoolConfig, scripts: Arc<EmbeddedScripts>) -> Result<Self> {
        let runtime = ScriptRuntime::with_scripts(scripts)?;
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout);
        if !config.proxy_from_env {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|err| GsharerError::Network(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            id,
            runtime,
            client,
        })
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    /// Send `job`, counting body bytes on `bar`, and interpret the answer.
    pub fn upload(&self, job: UploadJob, bar: &ProgressBar) -> Result<String> {
        let UploadJob {
            method,
            url,
            content_type,
            body,
            handler,
            ..
        } = job;

        let length = body.len() as u64;
        bar.set_length(length);
        let reader = bar.wrap_read(Cursor::new(body));

        let response = self
            .client
            .request(method, url)
            .header(CONTENT_TYPE, content_type)
            .body(Body::sized(reader, length))
            .send()
            .map_err(|err| GsharerError::Network(describe(&err)))?;
        let status = response.status();
        let body = response
            .bytes()
            .map_err(|err| GsharerError::Network(describe(&err)))?;
        debug!(worker = self.id, status = status.as_u16(), bytes = body.len(), "response received");

        ResponseInterpreter::new(&self.runtime).interpret(&handler, status.as_u16(), &body)
    }
}

fn describe(err: &reqwest::Error) -> String {
    match std::error::Error::source(err) {
        Some(source) => format!("{err}: {source}"),
        None => err.to_string(),
    }
}

/// What happened to one submitted job.
#[derive(Debug)]
pub struct JobOutcome {
    /// Position of the job in the submitted list.
    pub job: usize,
    /// Worker that ran it; `None` if no worker ever picked it up.
    pub worker: Option<usize>,
    pub files: Vec<String>,
    pub result: Result<String>,
}

struct QueuedJob {
    index: usize,
    job: UploadJob,
}

pub struct WorkerPool {
    config: PoolConfig,
    scripts: Arc<EmbeddedScripts>,
    display: ProgressDisplay,
}

impl WorkerPool {
    pub fn new(config: PoolConfig, display: ProgressDisplay) -> Self {
        Self {
            config,
            scripts: Arc::new(EmbeddedScripts::bundled()),
            display,
        }
    }

    /// Scripts each worker runtime is built from.
    pub fn with_scripts(mut self, scripts: Arc<EmbeddedScripts>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn worker_count(&self, jobs: usize) -> usize {
        self.config.threads.max(1).min(jobs)
    }

    /// Run every job and wait for all workers to exit.
    ///
    /// Returns exactly one outcome per job, in completion order.
    pub fn run(&self, jobs: Vec<UploadJob>) -> Vec<JobOutcome> {
        let workers = self.worker_count(jobs.len());
        if workers == 0 {
            return Vec::new();
        }
        info!(jobs = jobs.len(), workers, "starting uploads");

        let (job_tx, job_rx) = mpsc::channel::<QueuedJob>();
        let queue = Mutex::new(job_rx);
        let (outcome_tx, outcome_rx) = mpsc::channel::<JobOutcome>();

        thread::scope(|scope| {
            for id in 0..workers {
                let queue = &queue;
                let outcomes = outcome_tx.clone();
                scope.spawn(move || self.work(id, queue, outcomes));
            }
            for (index, job) in jobs.into_iter().enumerate() {
                // The receiver outlives this scope, so sending cannot fail.
                let _ = job_tx.send(QueuedJob { index, job });
            }
            drop(job_tx);
        });
        drop(outcome_tx);

        let mut outcomes: Vec<JobOutcome> = outcome_rx.into_iter().collect();

        let leftover = queue.into_inner().unwrap_or_else(PoisonError::into_inner);
        for QueuedJob { index, job } in leftover.try_iter() {
            error!(job = index, files = ?job.files, "no worker was available for this upload");
            outcomes.push(JobOutcome {
                job: index,
                worker: None,
                files: job.files,
                result: Err(GsharerError::Init("no worker could be started".into())),
            });
        }
        outcomes
    }

    fn work(&self, id: usize, queue: &Mutex<Receiver<QueuedJob>>, outcomes: Sender<JobOutcome>) {
        let worker = match Worker::new(id, &self.config, Arc::clone(&self.scripts)) {
            Ok(worker) => worker,
            Err(err) => {
                error!(worker = id, "worker failed to start: {err}");
                return;
            }
        };
        debug!(worker = id, "worker started");

        while let Some(QueuedJob { index, job }) = next_job(queue) {
            let files = job.files.clone();
            let label = job.label();
            debug!(worker = id, job = index, %label, bytes = job.content_length(), "uploading");

            let bar = self.display.upload_bar(job.content_length(), &label);
            let result = worker.upload(job, &bar);
            self.display.finish(&bar);

            match &result {
                Ok(line) => {
                    self.display.println(line);
                    debug!(worker = id, job = index, "upload finished");
                }
                Err(err) => error!(worker = id, job = index, files = ?files, "upload failed: {err}"),
            }
            let _ = outcomes.send(JobOutcome {
                job: index,
                worker: Some(id),
                files,
                result,
            });
        }
        debug!(worker = id, "worker done");
    }
}

/// Blocks until a job arrives; `None` once the queue is empty and closed.
fn next_job(queue: &Mutex<Receiver<QueuedJob>>) -> Option<QueuedJob> {
    let receiver = queue.lock().unwrap_or_else(PoisonError::into_inner);
    receiver.recv().ok()
}
