//! In-memory collaborators for pipeline tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use futures::future;

use crate::{
    notify::{Notification, Notifier},
    ocr::{OcrClient, OperationHandle, StatusReport},
    prelude::*,
    retry::{ClientRetryResult, retry_result_fatal, retry_result_ok, retry_result_transient},
    storage::{BlobLocation, BlobStore},
};

/// One scripted answer to a status query.
#[derive(Clone, Debug)]
pub enum StatusStep {
    Report(StatusReport),
    Transient(&'static str),
    Fatal(&'static str),
}

/// An OCR client that plays back a script. The last step repeats forever.
#[derive(Debug)]
pub struct ScriptedOcrClient {
    reject_submissions: Option<&'static str>,
    hang_submissions: bool,
    steps: Mutex<VecDeque<StatusStep>>,
    submissions: Mutex<Vec<Vec<u8>>>,
    status_calls: Mutex<usize>,
}

impl ScriptedOcrClient {
    pub fn new(steps: Vec<StatusStep>) -> Self {
        Self {
            reject_submissions: None,
            hang_submissions: false,
            steps: Mutex::new(steps.into()),
            submissions: Mutex::new(vec![]),
            status_calls: Mutex::new(0),
        }
    }

    pub fn rejecting_submissions(reason: &'static str) -> Self {
        Self {
            reject_submissions: Some(reason),
            ..Self::new(vec![])
        }
    }

    /// Submissions never get an answer.
    pub fn hanging_submissions() -> Self {
        Self {
            hang_submissions: true,
            ..Self::new(vec![])
        }
    }

    pub fn status_calls(&self) -> usize {
        *self.status_calls.lock().unwrap()
    }

    pub fn submissions(&self) -> Vec<Vec<u8>> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrClient for ScriptedOcrClient {
    async fn submit(&self, image: &[u8]) -> ClientRetryResult<OperationHandle> {
        if let Some(reason) = self.reject_submissions {
            return retry_result_fatal(anyhow!(reason));
        }
        if self.hang_submissions {
            return future::pending().await;
        }
        self.submissions.lock().unwrap().push(image.to_vec());
        retry_result_ok(OperationHandle::new("scripted-op"))
    }

    async fn job_status(&self, _handle: &OperationHandle) -> ClientRetryResult<StatusReport> {
        *self.status_calls.lock().unwrap() += 1;
        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().cloned()
            }
        };
        match step.expect("script has no steps") {
            StatusStep::Report(report) => retry_result_ok(report),
            StatusStep::Transient(reason) => retry_result_transient(anyhow!(reason)),
            StatusStep::Fatal(reason) => retry_result_fatal(anyhow!(reason)),
        }
    }
}

/// A blob store kept in a map. Can be told to fail every write.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<BlobLocation, Vec<u8>>>,
    puts: Mutex<usize>,
    fail_puts: bool,
    hang_gets: bool,
}

impl MemoryBlobStore {
    pub fn with_blob(location: BlobLocation, data: &[u8]) -> Self {
        let store = Self::default();
        store.blobs.lock().unwrap().insert(location, data.to_vec());
        store
    }

    pub fn failing_puts(mut self) -> Self {
        self.fail_puts = true;
        self
    }

    /// Reads never finish.
    pub fn hanging_gets(mut self) -> Self {
        self.hang_gets = true;
        self
    }

    pub fn blob(&self, location: &BlobLocation) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(location).cloned()
    }

    pub fn blobs_in(&self, container: &str) -> usize {
        self.blobs
            .lock()
            .unwrap()
            .keys()
            .filter(|location| location.container == container)
            .count()
    }

    pub fn put_calls(&self) -> usize {
        *self.puts.lock().unwrap()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>> {
        if self.hang_gets {
            return future::pending().await;
        }
        self.blob(location)
            .ok_or_else(|| anyhow!("BlobNotFound: {location}"))
    }

    async fn put(
        &self,
        location: &BlobLocation,
        data: Vec<u8>,
        _content_type: &str,
    ) -> Result<()> {
        *self.puts.lock().unwrap() += 1;
        if self.fail_puts {
            return Err(anyhow!("AuthorizationPermissionMismatch"));
        }
        self.blobs.lock().unwrap().insert(location.clone(), data);
        Ok(())
    }
}

/// A notifier that remembers what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
    hang: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Records each notification, then never finishes sending it.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.hang {
            return future::pending().await;
        }
        if self.fail {
            return Err(anyhow!("535 Authentication failed"));
        }
        Ok(())
    }
}
