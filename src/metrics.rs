use bytes::Bytes;
use futures::stream::{BoxStream, Stream};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::SystemTime;

#[derive(Debug, Clone, Default)]
struct Counters {
    last_served: Option<SystemTime>,
    received: u64,
    served: u64,
    bytes_served: u64,
}

/// 请求计数器，所有连接和隧道共用一份
#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<Counters>,
    active_tasks: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub last_served: Option<SystemTime>,
    pub received: u64,
    pub served: u64,
    pub bytes_served: u64,
    pub active_tasks: usize,
}

impl MetricsSnapshot {
    /// 尚未完成的请求数，不会小于0
    pub fn outstanding(&self) -> u64 {
        self.received.saturating_sub(self.served)
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.received += 1;
    }

    pub fn record_served(&self, bytes: u64) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.served += 1;
        counters.bytes_served += bytes;
        counters.last_served = Some(SystemTime::now());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        MetricsSnapshot {
            last_served: counters.last_served,
            received: counters.received,
            served: counters.served,
            bytes_served: counters.bytes_served,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
        }
    }

    /// 登记一个正在运行的任务，guard被drop时注销
    pub fn track_task(self: &Arc<Self>) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::Relaxed);
        TaskGuard {
            metrics: self.clone(),
        }
    }
}

pub struct TaskGuard {
    metrics: Arc<Metrics>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.metrics.active_tasks.fetch_sub(1, Ordering::Relaxed);
    }
}

/// 统计实际发送字节数的响应体流，传输结束或客户端断开时记一次served
pub struct MeteredStream {
    inner: BoxStream<'static, io::Result<Bytes>>,
    metrics: Arc<Metrics>,
    sent: u64,
}

impl MeteredStream {
    pub fn new<S>(inner: S, metrics: Arc<Metrics>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        MeteredStream {
            inner: Box::pin(inner),
            metrics,
            sent: 0,
        }
    }
}

impl Stream for MeteredStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &poll {
            let len = chunk.len() as u64;
            self.sent += len;
        }
        poll
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        self.metrics.record_served(self.sent);
    }
}
