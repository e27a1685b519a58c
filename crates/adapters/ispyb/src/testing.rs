//! 测试用的隧道和会话替身

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use taa_common::RetryConfig;

use crate::config::ConnectionSettings;
use crate::error::{IspybError, IspybResult};
use crate::session::{RemoteRecord, Session, SessionFactory};
use crate::tunnel::{Tunnel, TunnelFactory};

pub(crate) fn settings() -> ConnectionSettings {
    ConnectionSettings {
        handshake_retry: RetryConfig::fixed(5, Duration::from_millis(1)),
        inactivity: Duration::from_secs(360),
    }
}

#[derive(Default)]
pub(crate) struct FakeTunnels {
    fail: bool,
    started: AtomicU32,
    closed: Arc<AtomicU32>,
}

impl FakeTunnels {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub(crate) fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeTunnel {
    closed: Arc<AtomicU32>,
}

#[async_trait]
impl Tunnel for FakeTunnel {
    fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 13306))
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TunnelFactory for FakeTunnels {
    async fn start(&self) -> IspybResult<Box<dyn Tunnel>> {
        if self.fail {
            return Err(IspybError::tunnel("bastion unreachable"));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTunnel {
            closed: self.closed.clone(),
        }))
    }
}

#[derive(Default)]
struct SessionCounters {
    connects: AtomicU32,
    calls: AtomicU32,
    closed: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    failing_calls: AtomicU32,
}

#[derive(Default)]
pub(crate) struct FakeSessions {
    failing_connects: u32,
    rows: Vec<RemoteRecord>,
    call_delay: Duration,
    counters: Arc<SessionCounters>,
}

impl FakeSessions {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn rebuild(self: Arc<Self>, update: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut fake = Self {
            failing_connects: self.failing_connects,
            rows: self.rows.clone(),
            call_delay: self.call_delay,
            counters: self.counters.clone(),
        };
        update(&mut fake);
        Arc::new(fake)
    }

    /// 前 n 次握手失败
    pub(crate) fn failing_connects(self: Arc<Self>, n: u32) -> Arc<Self> {
        self.rebuild(|fake| fake.failing_connects = n)
    }

    /// 前 n 次调用失败
    pub(crate) fn failing_calls(self: Arc<Self>, n: u32) -> Arc<Self> {
        self.counters.failing_calls.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_rows(self: Arc<Self>, rows: Vec<RemoteRecord>) -> Arc<Self> {
        self.rebuild(|fake| fake.rows = rows)
    }

    pub(crate) fn with_call_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        self.rebuild(|fake| fake.call_delay = delay)
    }

    pub(crate) fn connects(&self) -> u32 {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> u32 {
        self.counters.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> u32 {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent_calls(&self) -> u32 {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for FakeSessions {
    async fn connect(&self, _addr: SocketAddr) -> IspybResult<Box<dyn Session>> {
        let attempt = self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failing_connects {
            return Err(IspybError::connection("access denied"));
        }
        Ok(Box::new(FakeSession {
            rows: self.rows.clone(),
            call_delay: self.call_delay,
            counters: self.counters.clone(),
        }))
    }
}

struct FakeSession {
    rows: Vec<RemoteRecord>,
    call_delay: Duration,
    counters: Arc<SessionCounters>,
}

#[async_trait]
impl Session for FakeSession {
    async fn call(&mut self, _procedure: &str, _args: &[&str]) -> IspybResult<Vec<RemoteRecord>> {
        let counters = &self.counters;
        counters.calls.fetch_add(1, Ordering::SeqCst);
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = counters
            .failing_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(IspybError::retrieve("lost connection to MySQL server"));
        }
        Ok(self.rows.clone())
    }

    async fn close(self: Box<Self>) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}
