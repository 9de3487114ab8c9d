use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::models::{Order, OrderAccrual, OrderStatus};
use crate::storage::AgentStore;

// ============================================================================
// Test Doubles
// ============================================================================
//
// MemStore stands in for Postgres; MockOracle stands in for the accrual
// service. The oracle is a real TCP listener speaking just enough HTTP/1.1
// for the client, scripted per order number and instrumented with an
// in-flight high-water mark so tests can observe the concurrency bound.
//
// ============================================================================

pub struct MemStore {
    orders: Mutex<Vec<Order>>,
    batches: Mutex<Vec<Vec<OrderAccrual>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::with_orders([])
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        Self {
            orders: Mutex::new(orders.into_iter().collect()),
            batches: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn order_status(&self, number: i64) -> Option<OrderStatus> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .find(|order| order.number == number)
            .map(|order| order.status)
    }

    /// Every successfully persisted batch, in write order.
    pub fn update_batches(&self) -> Vec<Vec<OrderAccrual>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentStore for MemStore {
    async fn pending_orders(&self, limit: i64) -> Result<Vec<Order>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("injected read failure");
        }

        // Insertion order doubles as upload order.
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|order| {
                matches!(order.status, OrderStatus::New | OrderStatus::Processing)
            })
            .take(limit as usize)
            .copied()
            .collect())
    }

    async fn update_order_accruals(&self, updates: &[OrderAccrual]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("injected write failure");
        }

        let mut orders = self.orders.lock().unwrap();
        for update in updates {
            if let Some(order) = orders.iter_mut().find(|o| o.number == update.number) {
                order.status = update.status;
            }
        }

        self.batches.lock().unwrap().push(updates.to_vec());
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub enum OracleReply {
    /// 200 with a JSON body; `accrual` is the literal number text, omitted
    /// from the body when `None`.
    Accrual {
        status: String,
        accrual: Option<String>,
    },
    NoContent,
    RateLimited {
        retry_after_secs: u64,
    },
    ServerError,
    /// 200 with a body that is not JSON.
    Garbage,
}

impl OracleReply {
    pub fn accrual(status: &str, accrual: Option<&str>) -> Self {
        OracleReply::Accrual {
            status: status.to_string(),
            accrual: accrual.map(str::to_string),
        }
    }
}

struct OracleState {
    replies: Mutex<HashMap<i64, OracleReply>>,
    requests: AtomicU64,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
    delay: Duration,
}

pub struct MockOracle {
    addr: std::net::SocketAddr,
    state: Arc<OracleState>,
}

impl MockOracle {
    pub async fn start() -> Self {
        Self::start_with_delay(Duration::ZERO).await
    }

    /// Start the fixture; every request is held for `delay` before it is
    /// answered, widening the window in which concurrency is observable.
    pub async fn start_with_delay(delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(OracleState {
            replies: Mutex::new(HashMap::new()),
            requests: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            max_in_flight: AtomicU64::new(0),
            delay,
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_state.clone()));
            }
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Script the reply for one order number. Unscripted numbers get 204.
    pub fn respond(&self, number: i64, reply: OracleReply) {
        self.state.replies.lock().unwrap().insert(number, reply);
    }

    pub fn request_count(&self) -> u64 {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u64 {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

async fn serve(mut stream: TcpStream, state: Arc<OracleState>) {
    // Read the request head; GET requests carry no body.
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        head.extend_from_slice(&chunk[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    // Request line: GET /api/orders/{number} HTTP/1.1
    let head = String::from_utf8_lossy(&head);
    let number: Option<i64> = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|path| path.rsplit('/').next())
        .and_then(|raw| raw.parse().ok());

    state.requests.fetch_add(1, Ordering::SeqCst);
    let now_in_flight = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }

    let reply = number.and_then(|n| state.replies.lock().unwrap().get(&n).cloned());
    let response = match reply {
        None | Some(OracleReply::NoContent) => {
            "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_string()
        }
        Some(OracleReply::Accrual { status, accrual }) => {
            let number = number.unwrap_or_default();
            let body = match accrual {
                Some(amount) => format!(
                    "{{\"order\":\"{number}\",\"status\":\"{status}\",\"accrual\":{amount}}}"
                ),
                None => format!("{{\"order\":\"{number}\",\"status\":\"{status}\"}}"),
            };
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
        }
        Some(OracleReply::RateLimited { retry_after_secs }) => format!(
            "HTTP/1.1 429 Too Many Requests\r\nRetry-After: {retry_after_secs}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        ),
        Some(OracleReply::ServerError) => {
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string()
        }
        Some(OracleReply::Garbage) => {
            let body = "accrual pending, come back later";
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
        }
    };

    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;

    state.in_flight.fetch_sub(1, Ordering::SeqCst);
}
