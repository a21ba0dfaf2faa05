#![allow(dead_code)]

use async_trait::async_trait;
use boxoffice::application::SagaPorts;
use boxoffice::application::dispatch::TicketDispatcher;
use boxoffice::application::locks::SaleLocks;
use boxoffice::application::reconciliation::ReconciliationSweeper;
use boxoffice::application::saga::{NewSaleRequest, SaleSaga};
use boxoffice::config::SalePolicy;
use boxoffice::domain::money::Money;
use boxoffice::domain::performance::{ExternalPerformanceId, Performance, PerformanceId, SeatId};
use boxoffice::domain::ports::{
    BookingClient, BookingSnapshot, PaymentClient, PaymentRequest, SaleStore, TicketNotifier,
};
use boxoffice::domain::sale::{
    BookingId, Buyer, PaymentOrder, PaymentOrderId, PaymentStatus, Reservation, Sale, Secret,
    Ticket,
};
use boxoffice::error::{RemoteError, ReservationFailure};
use boxoffice::infrastructure::in_memory::{InMemoryPerformanceCatalog, InMemorySaleStore};
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const ON_SALE: PerformanceId = PerformanceId(1);
pub const INACTIVE: PerformanceId = PerformanceId(2);
pub const STARTING_SOON: PerformanceId = PerformanceId(3);

fn rejected(message: &str) -> RemoteError {
    RemoteError::Rejected {
        code: "1".to_string(),
        message: message.to_string(),
    }
}

#[derive(Default)]
struct BookingState {
    next_id: u64,
    reservations: HashMap<BookingId, Vec<SeatId>>,
    approved: HashMap<BookingId, Vec<Ticket>>,
    /// Reserving the seat at this position fails.
    fail_reserve_at: Option<usize>,
    fail_cancel: bool,
    /// Cancels are refused while the booking stays in place.
    reject_cancel: bool,
    approve_failures: usize,
    fail_query: bool,
    /// Approvals that succeed without returning tickets.
    approve_returns_no_tickets: bool,
    cancels: Vec<BookingId>,
    approves: Vec<BookingId>,
    approve_secrets: Vec<Secret>,
    queries: usize,
}

/// A Booking System double. Every seat costs 500.
pub struct FakeBooking {
    state: Mutex<BookingState>,
    approve_delay: Mutex<Option<std::time::Duration>>,
}

impl FakeBooking {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BookingState {
                next_id: 9000,
                ..BookingState::default()
            }),
            approve_delay: Mutex::new(None),
        }
    }

    pub fn fail_reserve_at(&self, position: usize) {
        self.state.lock().unwrap().fail_reserve_at = Some(position);
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.state.lock().unwrap().fail_cancel = fail;
    }

    pub fn reject_cancel(&self, reject: bool) {
        self.state.lock().unwrap().reject_cancel = reject;
    }

    pub fn fail_next_approvals(&self, count: usize) {
        self.state.lock().unwrap().approve_failures = count;
    }

    pub fn fail_query(&self, fail: bool) {
        self.state.lock().unwrap().fail_query = fail;
    }

    pub fn approve_returns_no_tickets(&self) {
        self.state.lock().unwrap().approve_returns_no_tickets = true;
    }

    pub fn slow_approvals(&self, delay: std::time::Duration) {
        *self.approve_delay.lock().unwrap() = Some(delay);
    }

    /// Approves a reservation behind the saga's back.
    pub fn approve_remotely(&self, booking_id: BookingId) {
        let mut state = self.state.lock().unwrap();
        let tickets = Self::issue(&state, booking_id);
        state.approved.insert(booking_id, tickets);
    }

    pub fn cancels(&self) -> Vec<BookingId> {
        self.state.lock().unwrap().cancels.clone()
    }

    pub fn approves(&self) -> Vec<BookingId> {
        self.state.lock().unwrap().approves.clone()
    }

    /// External references sent with each approval.
    pub fn approve_secrets(&self) -> Vec<Secret> {
        self.state.lock().unwrap().approve_secrets.clone()
    }

    pub fn reservations(&self) -> usize {
        self.state.lock().unwrap().reservations.len()
    }

    fn issue(state: &BookingState, booking_id: BookingId) -> Vec<Ticket> {
        state
            .reservations
            .get(&booking_id)
            .map(|seats| {
                seats
                    .iter()
                    .map(|seat| Ticket {
                        row: "1".to_string(),
                        seat: seat.to_string(),
                        price: Money::new(dec!(500)),
                        external_code: format!("T{booking_id}-{seat}"),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl BookingClient for FakeBooking {
    async fn reserve(
        &self,
        _performance: ExternalPerformanceId,
        seats: &[SeatId],
    ) -> Result<Reservation, ReservationFailure> {
        let mut state = self.state.lock().unwrap();
        let mut opened: Option<BookingId> = None;
        for (position, seat) in seats.iter().enumerate() {
            if state.fail_reserve_at == Some(position) {
                return Err(ReservationFailure {
                    partial: opened,
                    cause: rejected("place is busy"),
                });
            }
            let id = match opened {
                Some(id) => id,
                None => {
                    state.next_id += 1;
                    let id = BookingId(state.next_id);
                    opened = Some(id);
                    id
                }
            };
            state.reservations.entry(id).or_default().push(*seat);
        }
        let booking_id = opened.ok_or_else(|| ReservationFailure {
            partial: None,
            cause: rejected("no seats"),
        })?;
        Ok(Reservation {
            booking_id,
            amount: seats.iter().map(|_| Money::new(dec!(500))).sum(),
        })
    }

    async fn cancel(&self, booking_id: BookingId) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.cancels.push(booking_id);
        if state.fail_cancel {
            return Err(RemoteError::Transport("connection reset".to_string()));
        }
        if state.reject_cancel {
            return Err(rejected("sale is locked"));
        }
        state.approved.remove(&booking_id);
        match state.reservations.remove(&booking_id) {
            Some(_) => Ok(()),
            None => Err(rejected("sale not found")),
        }
    }

    async fn approve(
        &self,
        booking_id: BookingId,
        secret: &Secret,
        _buyer: &Buyer,
    ) -> Result<Vec<Ticket>, RemoteError> {
        let delay = *self.approve_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.approves.push(booking_id);
        state.approve_secrets.push(secret.clone());
        if state.approve_failures > 0 {
            state.approve_failures -= 1;
            return Err(rejected("reservation expired"));
        }
        let tickets = Self::issue(&state, booking_id);
        state.approved.insert(booking_id, tickets.clone());
        if state.approve_returns_no_tickets {
            return Ok(Vec::new());
        }
        Ok(tickets)
    }

    async fn query(&self, booking_id: BookingId) -> Result<BookingSnapshot, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.queries += 1;
        if state.fail_query {
            return Err(RemoteError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        match state.approved.get(&booking_id) {
            Some(tickets) => Ok(BookingSnapshot {
                tickets: tickets.clone(),
                paid_on_remote: true,
            }),
            None if state.reservations.contains_key(&booking_id) => Ok(BookingSnapshot {
                tickets: Vec::new(),
                paid_on_remote: false,
            }),
            None => Err(rejected("sale not found")),
        }
    }
}

#[derive(Default)]
struct GatewayState {
    orders: HashMap<String, PaymentOrder>,
    statuses: HashMap<PaymentOrderId, PaymentStatus>,
    requests: Vec<PaymentRequest>,
    refunds: HashMap<String, (PaymentOrderId, Money)>,
    refund_attempts: usize,
    fail_create: bool,
    fail_status: bool,
    fail_refund: bool,
}

/// A Payment Gateway double honoring idempotency keys.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<GatewayState>,
}

impl FakeGateway {
    pub fn fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn fail_status(&self, fail: bool) {
        self.state.lock().unwrap().fail_status = fail;
    }

    pub fn fail_refund(&self, fail: bool) {
        self.state.lock().unwrap().fail_refund = fail;
    }

    /// Simulates the buyer paying (or abandoning) the order.
    pub fn settle(&self, order_id: &PaymentOrderId, status: PaymentStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(order_id.clone(), status);
    }

    pub fn orders(&self) -> usize {
        self.state.lock().unwrap().orders.len()
    }

    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn refunds(&self) -> HashMap<String, (PaymentOrderId, Money)> {
        self.state.lock().unwrap().refunds.clone()
    }

    pub fn refund_attempts(&self) -> usize {
        self.state.lock().unwrap().refund_attempts
    }
}

#[async_trait]
impl PaymentClient for FakeGateway {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentOrder, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        if state.fail_create {
            return Err(rejected("payment declined"));
        }
        if let Some(order) = state.orders.get(&request.idempotency_key) {
            return Ok(order.clone());
        }
        let id = PaymentOrderId(format!("pay-{}", state.orders.len() + 1));
        let order = PaymentOrder {
            id: id.clone(),
            confirmation_url: format!("https://gateway.test/confirm/{id}"),
        };
        state.statuses.insert(id, PaymentStatus::Pending);
        state
            .orders
            .insert(request.idempotency_key.clone(), order.clone());
        Ok(order)
    }

    async fn check_status(&self, order_id: &PaymentOrderId) -> Result<PaymentStatus, RemoteError> {
        let state = self.state.lock().unwrap();
        if state.fail_status {
            return Err(RemoteError::Transport("timeout".to_string()));
        }
        state
            .statuses
            .get(order_id)
            .copied()
            .ok_or_else(|| rejected("unknown payment"))
    }

    async fn refund(
        &self,
        order_id: &PaymentOrderId,
        amount: Money,
        idempotency_key: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.refund_attempts += 1;
        if state.fail_refund {
            return Err(rejected("refund declined"));
        }
        state
            .refunds
            .entry(idempotency_key.to_string())
            .or_insert((order_id.clone(), amount));
        state.statuses.insert(order_id.clone(), PaymentStatus::Canceled);
        Ok(())
    }
}

/// Records delivered emails; the first `failures` sends fail.
#[derive(Default)]
pub struct RecordingNotifier {
    failures: AtomicUsize,
    sent: Mutex<Vec<Secret>>,
}

impl RecordingNotifier {
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Secret> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TicketNotifier for RecordingNotifier {
    async fn send_ticket_email(&self, sale: &Sale) -> bool {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return false;
        }
        self.sent.lock().unwrap().push(sale.secret().clone());
        true
    }
}

/// The saga, both sweepers and every double, wired together.
pub struct Harness {
    pub store: Arc<InMemorySaleStore>,
    pub booking: Arc<FakeBooking>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub saga: Arc<SaleSaga>,
    pub sweeper: Arc<ReconciliationSweeper>,
    pub dispatcher: Arc<TicketDispatcher>,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(InMemorySaleStore::new());
        let booking = Arc::new(FakeBooking::new());
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let catalog = Arc::new(InMemoryPerformanceCatalog::new());
        let now = Utc::now();
        for (id, starts_at, is_active) in [
            (ON_SALE, now + Duration::days(1), true),
            (INACTIVE, now + Duration::days(1), false),
            (STARTING_SOON, now + Duration::minutes(20), true),
        ] {
            catalog
                .insert(Performance {
                    id,
                    external_id: ExternalPerformanceId(id.0 * 100),
                    starts_at,
                    is_active,
                })
                .await;
        }

        let ports = SagaPorts {
            store: store.clone(),
            booking: booking.clone(),
            payment: gateway.clone(),
        };
        let policy = SalePolicy::default();
        let locks = SaleLocks::new();

        let saga = Arc::new(SaleSaga::new(
            ports.clone(),
            catalog,
            locks.clone(),
            policy.clone(),
        ));
        let sweeper = Arc::new(ReconciliationSweeper::new(
            ports,
            locks.clone(),
            policy.reconciliation_window(),
        ));
        let dispatcher = Arc::new(TicketDispatcher::new(
            store.clone(),
            notifier.clone(),
            locks,
            policy.reconciliation_window(),
        ));

        Self {
            store,
            booking,
            gateway,
            notifier,
            saga,
            sweeper,
            dispatcher,
        }
    }

    pub fn request(performance_id: PerformanceId, seats: &[u64]) -> NewSaleRequest {
        NewSaleRequest {
            performance_id,
            seats: seats.iter().copied().map(SeatId).collect(),
            buyer: Buyer::new("viewer@example.com", "Jane Doe", "+7 900 123-45-67"),
        }
    }

    pub async fn sale(&self, secret: &Secret) -> Sale {
        self.store.load(secret).await.unwrap().unwrap()
    }

    /// Creates a sale for seats A1 and A2 and returns its record.
    pub async fn open_sale(&self) -> Sale {
        let created = self
            .saga
            .create_sale(Self::request(ON_SALE, &[1, 2]))
            .await
            .unwrap();
        self.sale(&created.secret).await
    }

    /// Creates a sale, pays it and completes the callback.
    pub async fn paid_sale(&self) -> Sale {
        let sale = self.open_sale().await;
        self.gateway
            .settle(sale.payment_order_id(), PaymentStatus::Succeeded);
        self.saga.handle_payment_return(sale.secret()).await.unwrap();
        self.sale(sale.secret()).await
    }

    /// Moves a stored sale's creation time into the past.
    pub async fn age(&self, secret: &Secret, minutes: i64) {
        let mut sale = self.sale(secret).await;
        sale.created_at = Utc::now() - Duration::minutes(minutes);
        self.store.save(sale).await.unwrap();
    }
}

pub fn distinct<T: std::hash::Hash + Eq>(items: impl IntoIterator<Item = T>) -> usize {
    items.into_iter().collect::<HashSet<_>>().len()
}
