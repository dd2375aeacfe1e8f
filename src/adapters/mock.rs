//! In-memory collaborators for tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::*;
use crate::error::SettlementError;

type PublishPredicate = Box<dyn Fn(&str, &[u8]) -> bool + Send>;

/// Records every publish and serves the consumer side from per-topic queues.
#[derive(Default)]
pub struct MockBus {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    /// Publishes rejected so far
    failed_count: AtomicUsize,
    fail_all: AtomicBool,
    fail_topic: Mutex<HashMap<String, usize>>,
    fail_when: Mutex<Option<PublishPredicate>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Reject the next `times` publishes to `topic`.
    pub fn set_fail_topic(&self, topic: &str, times: usize) {
        self.fail_topic
            .lock()
            .unwrap()
            .insert(topic.to_string(), times);
    }

    /// Reject every publish matching `predicate` until cleared.
    pub fn set_fail_when(&self, predicate: impl Fn(&str, &[u8]) -> bool + Send + 'static) {
        *self.fail_when.lock().unwrap() = Some(Box::new(predicate));
    }

    pub fn clear_failures(&self) {
        self.set_fail_all(false);
        self.fail_topic.lock().unwrap().clear();
        *self.fail_when.lock().unwrap() = None;
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count.load(Ordering::SeqCst)
    }

    /// Successfully published payloads on `topic`, in publish order.
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn published_json<T: DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.published(topic)
            .iter()
            .map(|p| serde_json::from_slice(p).unwrap())
            .collect()
    }

    pub fn pending(&self, topic: &str) -> usize {
        self.queues
            .lock()
            .unwrap()
            .get(topic)
            .map_or(0, |q| q.len())
    }

    fn should_fail(&self, topic: &str, payload: &[u8]) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(remaining) = self.fail_topic.lock().unwrap().get_mut(topic)
            && *remaining > 0
        {
            *remaining -= 1;
            return true;
        }
        self.fail_when
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|predicate| predicate(topic, payload))
    }
}

#[async_trait]
impl MessageBus for MockBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> SettlementResult<()> {
        if self.should_fail(topic, &payload) {
            self.failed_count.fetch_add(1, Ordering::SeqCst);
            return Err(SettlementError::Bus(format!(
                "mock publish failure on {}",
                topic
            )));
        }
        self.queues
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push_back(payload.clone());
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for MockBus {
    async fn poll(&self, topic: &str, handler: &dyn MessageHandler) -> SettlementResult<bool> {
        let next = self
            .queues
            .lock()
            .unwrap()
            .get_mut(topic)
            .and_then(|q| q.pop_front());
        let Some(payload) = next else {
            return Ok(false);
        };
        match handler.handle(&payload).await {
            Ok(()) => Ok(true),
            Err(e) => {
                self.queues
                    .lock()
                    .unwrap()
                    .entry(topic.to_string())
                    .or_default()
                    .push_front(payload);
                Err(e)
            }
        }
    }
}

/// In-memory blob store
#[derive(Default)]
pub struct MockBlobStore {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_upload: AtomicBool,
    fail_move: AtomicBool,
    upload_count: AtomicUsize,
    move_count: AtomicUsize,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn set_fail_upload(&self, fail: bool) {
        self.fail_upload.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_move(&self, fail: bool) {
        self.fail_move.store(fail, Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> usize {
        self.upload_count.load(Ordering::SeqCst)
    }

    pub fn move_count(&self) -> usize {
        self.move_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn upload(&self, path: &str, content: &[u8]) -> SettlementResult<()> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(SettlementError::Blob("mock upload failure".to_string()));
        }
        self.upload_count.fetch_add(1, Ordering::SeqCst);
        self.put(path, content);
        Ok(())
    }

    async fn list(&self, folder: &str) -> SettlementResult<Vec<String>> {
        let prefix = format!("{}/", folder.trim_end_matches('/'));
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|p| p.starts_with(&prefix) && !p[prefix.len()..].contains('/'))
            .cloned()
            .collect())
    }

    async fn read(&self, path: &str) -> SettlementResult<Vec<u8>> {
        self.get(path)
            .ok_or_else(|| SettlementError::Blob(format!("no such file: {}", path)))
    }

    async fn move_file(&self, src: &str, dst: &str) -> SettlementResult<()> {
        if self.fail_move.load(Ordering::SeqCst) {
            return Err(SettlementError::Blob("mock move failure".to_string()));
        }
        let mut files = self.files.lock().unwrap();
        let content = files
            .remove(src)
            .ok_or_else(|| SettlementError::Blob(format!("no such file: {}", src)))?;
        files.insert(dst.to_string(), content);
        self.move_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Reversible cipher: ciphertext is `enc:` + plaintext.
#[derive(Default)]
pub struct MockCipher {
    fail: AtomicBool,
}

impl MockCipher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl AccountCipher for MockCipher {
    fn encrypt(&self, plaintext: &str) -> SettlementResult<String> {
        Ok(format!("enc:{}", plaintext))
    }

    fn decrypt(&self, ciphertext: &str) -> SettlementResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SettlementError::Cipher("mock decrypt failure".to_string()));
        }
        ciphertext
            .strip_prefix("enc:")
            .map(str::to_string)
            .ok_or_else(|| SettlementError::Cipher(format!("not encrypted: {}", ciphertext)))
    }
}

pub struct FixedClock(DateTime<Utc>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        seen: StdMutex<Vec<Vec<u8>>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, payload: &[u8]) -> SettlementResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SettlementError::Bus("handler".into()));
            }
            self.seen.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_mock_bus_redelivers_after_handler_error() {
        let bus = MockBus::new();
        bus.publish("t", b"a".to_vec()).await.unwrap();
        bus.publish("t", b"b".to_vec()).await.unwrap();

        let handler = Recorder {
            seen: StdMutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        };
        assert!(bus.poll("t", &handler).await.is_err());
        assert_eq!(bus.pending("t"), 2);

        handler.fail.store(false, Ordering::SeqCst);
        while bus.poll("t", &handler).await.unwrap() {}
        assert_eq!(
            handler.seen.lock().unwrap().as_slice(),
            &[b"a".to_vec(), b"b".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_mock_bus_fail_topic_counts_down() {
        let bus = MockBus::new();
        bus.set_fail_topic("t", 1);
        assert!(bus.publish("t", b"1".to_vec()).await.is_err());
        assert!(bus.publish("t", b"2".to_vec()).await.is_ok());
        assert_eq!(bus.failed_count(), 1);
        assert_eq!(bus.published("t").len(), 1);
    }

    #[tokio::test]
    async fn test_mock_blob_list_is_shallow() {
        let blobs = MockBlobStore::new();
        blobs.put("in/a.txt", b"1");
        blobs.put("in/sub/b.txt", b"2");
        blobs.put("inbox/c.txt", b"3");
        assert_eq!(blobs.list("in").await.unwrap(), vec!["in/a.txt"]);
    }
}
