//! In-memory fakes of the [`Service`] collaborators.

#![allow(dead_code, reason = "not every test uses every helper")]

use std::{
    cell::{RefCell, RefMut},
    collections::HashMap,
    rc::Rc,
    time::Duration,
};

use common::{
    operations::{
        By, Cancel, Commit, Debit, Insert, Refund, Rent, Reserve, Select,
        Update,
    },
    Currency, DateTime, Money,
};
use service::{
    domain::{
        rental::{
            self, ExternalId, PhoneNumber, ServiceCode, ServiceName, Status,
            Transition,
        },
        user,
        wallet::{
            Capture, Charge, Hold, HoldId, HoldStatus, RefundReason, Release,
            Reservation, Reserved,
        },
        Rental,
    },
    infra::{
        database, ledger,
        provider::{self, ActivationStatus, Number, Order, Price, PriceList},
        Database, Ledger, Provider,
    },
    task, Config,
};
use tracerr::Traced;

/// [`service::Service`] built of in-memory fakes.
pub type Service = service::Service<Store, Wallets, Numbers>;

/// Returns an amount of US cents.
pub fn usd(cents: i64) -> Money {
    Money::from_minor(cents, Currency::Usd)
}

/// Returns a [`ServiceCode`] of a well-known service.
pub fn tg() -> ServiceCode {
    ServiceCode::new("tg").unwrap()
}

/// Returns a [`Config`] with the default values.
pub fn config() -> Config {
    Config {
        jwt_decoding_key: jsonwebtoken::DecodingKey::from_secret(b"secret"),
        rental_ttl: Duration::from_secs(15 * 60),
        max_price_drift: "10".parse().unwrap(),
        quote_ttl: Duration::from_secs(30),
        refund_retry_delay: Duration::from_millis(500),
        sweep_expired_rentals: task::sweep_expired_rentals::Config::default(),
        poll_rentals: task::poll_rentals::Config::default(),
    }
}

/// Test environment: a [`Service`] along with handles to its fakes.
pub struct Env {
    pub service: Service,
    pub store: Store,
    pub wallets: Wallets,
    pub numbers: Numbers,
    pub user_id: user::Id,
}

impl Env {
    /// Creates a new [`Env`] with a user having the provided `balance` (in
    /// cents) and a provider quoting the `tg` service at `cost` cents.
    pub fn new(balance: i64, cost: i64) -> Self {
        let user_id = user::Id::new();
        let store = Store::default();
        let wallets = Wallets::default();
        let numbers = Numbers::default();

        _ = wallets.state().balances.insert(user_id, balance);
        numbers.state().prices.push(Price {
            service: tg(),
            name: ServiceName::new("Telegram"),
            cost: usd(cost),
            count: 10,
            ttl: None,
        });

        Self {
            service: service::Service::new(
                config(),
                store.clone(),
                wallets.clone(),
                numbers.clone(),
            ),
            store,
            wallets,
            numbers,
            user_id,
        }
    }

    /// Returns the current balance of the user (in cents).
    pub fn balance(&self) -> i64 {
        self.wallets.state().balances[&self.user_id]
    }

    /// Returns the stored [`Rental`] with the provided [`rental::Id`].
    pub fn rental(&self, id: rental::Id) -> Rental {
        self.store.state().rentals[&id].clone()
    }

    /// Stores an active [`Rental`] of the user which expired a while ago,
    /// reserving its price in a [`Hold`] if `with_hold` is set.
    pub fn expired_rental(&self, with_hold: bool) -> Rental {
        let id = rental::Id::new();
        let price = usd(200);
        let hold_id = with_hold.then(|| {
            let mut wallets = self.wallets.state();
            let hold_id = HoldId::new();
            *wallets.balances.get_mut(&self.user_id).unwrap() -= 200;
            _ = wallets.holds.insert(
                hold_id,
                Hold {
                    id: hold_id,
                    user_id: self.user_id,
                    reference: id,
                    amount: price,
                    status: HoldStatus::Reserved,
                },
            );
            hold_id
        });

        let now = DateTime::now();
        let external_id = {
            let mut numbers = self.numbers.state();
            let id = numbers.next_external_id();
            _ = numbers
                .statuses
                .insert(id.clone(), ActivationStatus::Waiting);
            id
        };
        let rental = Rental {
            id,
            user_id: self.user_id,
            external_id,
            service: tg(),
            service_name: ServiceName::from(&tg()),
            phone_number: PhoneNumber::new("+79990001122").unwrap(),
            original_price: usd(100),
            price,
            status: Status::Active,
            code: None,
            created_at: (now - Duration::from_secs(20 * 60)).coerce(),
            expires_at: (now - Duration::from_secs(5 * 60)).coerce(),
            hold_id,
        };
        _ = self.store.state().rentals.insert(id, rental.clone());
        rental
    }
}

/// Injected [`Provider`] failure.
#[derive(Clone, Copy, Debug)]
pub enum Fault {
    /// No numbers are available.
    NoNumbers,

    /// Request is rejected.
    Rejected,
}

impl Fault {
    fn error(self) -> Traced<provider::Error> {
        tracerr::new!(match self {
            Self::NoNumbers => provider::Error::NoNumbers,
            Self::Rejected => provider::Error::Rejected("injected".into()),
        })
    }
}

/// In-memory rentals [`Database`].
#[derive(Clone, Debug, Default)]
pub struct Store(Rc<RefCell<StoreState>>);

/// State of a [`Store`].
#[derive(Debug, Default)]
pub struct StoreState {
    pub rentals: HashMap<rental::Id, Rental>,
    pub fail_inserts: bool,
    pub transitions: usize,

    /// Snapshot returned by user listings instead of the current rentals.
    pub listing: Option<Vec<Rental>>,
}

impl Store {
    pub fn state(&self) -> RefMut<'_, StoreState> {
        self.0.borrow_mut()
    }
}

impl Database<Insert<Rental>> for Store {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(rental): Insert<Rental>,
    ) -> Result<Self::Ok, Self::Err> {
        let mut state = self.state();
        if state.fail_inserts {
            return Err(tracerr::new!(database::Error::Rejected(
                "injected".into(),
            )));
        }
        _ = state.rentals.insert(rental.id, rental);
        Ok(())
    }
}

impl Database<Update<Transition>> for Store {
    type Ok = bool;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Update(transition): Update<Transition>,
    ) -> Result<Self::Ok, Self::Err> {
        let mut state = self.state();
        state.transitions += 1;
        let Some(rental) = state.rentals.get_mut(&transition.rental_id)
        else {
            return Ok(false);
        };
        if !rental.is_active() {
            return Ok(false);
        }
        rental.settle(transition.outcome);
        Ok(true)
    }
}

impl Database<Select<By<Option<Rental>, rental::Id>>> for Store {
    type Ok = Option<Rental>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Rental>, rental::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        Ok(self.state().rentals.get(&by.into_inner()).cloned())
    }
}

impl Database<Select<By<Vec<Rental>, user::Id>>> for Store {
    type Ok = Vec<Rental>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Vec<Rental>, user::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let user_id = by.into_inner();
        if let Some(listing) = self.state().listing.clone() {
            return Ok(listing);
        }
        let mut rentals = self
            .state()
            .rentals
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        rentals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rentals)
    }
}

/// In-memory wallet [`Ledger`] keeping balances in cents.
#[derive(Clone, Debug, Default)]
pub struct Wallets(Rc<RefCell<WalletsState>>);

/// State of [`Wallets`].
#[derive(Debug, Default)]
pub struct WalletsState {
    pub balances: HashMap<user::Id, i64>,
    pub holds: HashMap<HoldId, Hold>,
    pub refund_reasons: HashMap<HoldId, RefundReason>,
    pub debits: HashMap<rental::Id, i64>,
    pub calls: LedgerCalls,

    /// Number of upcoming refunds to reject as unauthorized.
    pub unauthorized_refunds: usize,

    /// Whether every refund fails.
    pub fail_refunds: bool,

    /// Time every commit takes before it's applied.
    pub commit_delay: Option<Duration>,
}

/// Counters of [`Wallets`] calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct LedgerCalls {
    pub balance: usize,
    pub reserve: usize,
    pub commit: usize,
    pub refund: usize,
    pub debit: usize,
}

impl Wallets {
    pub fn state(&self) -> RefMut<'_, WalletsState> {
        self.0.borrow_mut()
    }

    /// Returns the [`Hold`] reserved for the [`Rental`] with the provided
    /// [`rental::Id`].
    pub fn hold_of(&self, reference: rental::Id) -> Option<Hold> {
        self.state()
            .holds
            .values()
            .find(|h| h.reference == reference)
            .copied()
    }
}

impl WalletsState {
    fn balance(&self, user_id: user::Id) -> i64 {
        self.balances.get(&user_id).copied().unwrap_or_default()
    }
}

impl Ledger<Select<By<Money, user::Id>>> for Wallets {
    type Ok = Money;
    type Err = Traced<ledger::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Money, user::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let mut state = self.state();
        state.calls.balance += 1;
        Ok(usd(state.balance(by.into_inner())))
    }
}

impl Ledger<Select<By<Option<Hold>, rental::Id>>> for Wallets {
    type Ok = Option<Hold>;
    type Err = Traced<ledger::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Hold>, rental::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        Ok(self.hold_of(by.into_inner()))
    }
}

impl Ledger<Reserve<Reservation>> for Wallets {
    type Ok = Reserved;
    type Err = Traced<ledger::Error>;

    async fn execute(
        &self,
        Reserve(reservation): Reserve<Reservation>,
    ) -> Result<Self::Ok, Self::Err> {
        let Reservation {
            user_id,
            amount,
            reference,
        } = reservation;
        let mut state = self.state();
        state.calls.reserve += 1;

        let balance = state.balance(user_id);
        if let Some(hold) =
            state.holds.values().find(|h| h.reference == reference)
        {
            return Ok(Reserved {
                hold_id: hold.id,
                balance: usd(balance),
            });
        }

        let units = amount.minor_units().unwrap();
        if balance < units {
            return Err(tracerr::new!(ledger::Error::InsufficientFunds {
                balance: usd(balance),
                required: amount,
            }));
        }

        let hold_id = HoldId::new();
        _ = state.holds.insert(
            hold_id,
            Hold {
                id: hold_id,
                user_id,
                reference,
                amount,
                status: HoldStatus::Reserved,
            },
        );
        _ = state.balances.insert(user_id, balance - units);
        Ok(Reserved {
            hold_id,
            balance: usd(balance - units),
        })
    }
}

impl Ledger<Commit<Capture>> for Wallets {
    type Ok = Money;
    type Err = Traced<ledger::Error>;

    async fn execute(
        &self,
        Commit(capture): Commit<Capture>,
    ) -> Result<Self::Ok, Self::Err> {
        let Capture { user_id, hold_id } = capture;
        let delay = self.state().commit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.calls.commit += 1;

        let balance = state.balance(user_id);
        let Some(hold) = state.holds.get_mut(&hold_id) else {
            return Err(tracerr::new!(ledger::Error::HoldNotFound(hold_id)));
        };
        if hold.user_id != user_id {
            return Err(tracerr::new!(ledger::Error::Unauthorized));
        }
        match hold.status {
            HoldStatus::Reserved => hold.status = HoldStatus::Committed,
            HoldStatus::Committed => {}
            HoldStatus::Refunded => {
                return Err(tracerr::new!(ledger::Error::HoldSettled(hold_id)));
            }
        }
        Ok(usd(balance))
    }
}

impl Ledger<Refund<Release>> for Wallets {
    type Ok = Money;
    type Err = Traced<ledger::Error>;

    async fn execute(
        &self,
        Refund(release): Refund<Release>,
    ) -> Result<Self::Ok, Self::Err> {
        let Release {
            user_id,
            hold_id,
            reason,
        } = release;
        let mut guard = self.state();
        let state = &mut *guard;
        state.calls.refund += 1;

        if state.unauthorized_refunds > 0 {
            state.unauthorized_refunds -= 1;
            return Err(tracerr::new!(ledger::Error::Unauthorized));
        }
        if state.fail_refunds {
            return Err(tracerr::new!(ledger::Error::HoldNotFound(hold_id)));
        }

        let balance = state.balance(user_id);
        let Some(hold) = state.holds.get_mut(&hold_id) else {
            return Err(tracerr::new!(ledger::Error::HoldNotFound(hold_id)));
        };
        if hold.user_id != user_id {
            return Err(tracerr::new!(ledger::Error::Unauthorized));
        }
        match hold.status {
            HoldStatus::Reserved => {
                hold.status = HoldStatus::Refunded;
                let units = hold.amount.minor_units().unwrap();
                _ = state.refund_reasons.insert(hold_id, reason);
                _ = state.balances.insert(user_id, balance + units);
                Ok(usd(balance + units))
            }
            HoldStatus::Refunded => Ok(usd(balance)),
            HoldStatus::Committed => {
                Err(tracerr::new!(ledger::Error::HoldSettled(hold_id)))
            }
        }
    }
}

impl Ledger<Debit<Charge>> for Wallets {
    type Ok = Money;
    type Err = Traced<ledger::Error>;

    async fn execute(
        &self,
        Debit(charge): Debit<Charge>,
    ) -> Result<Self::Ok, Self::Err> {
        let Charge {
            user_id,
            amount,
            reference,
        } = charge;
        let mut state = self.state();
        state.calls.debit += 1;

        let balance = state.balance(user_id);
        if state.debits.contains_key(&reference) {
            return Ok(usd(balance));
        }
        let units = amount.minor_units().unwrap();
        if balance < units {
            return Err(tracerr::new!(ledger::Error::InsufficientFunds {
                balance: usd(balance),
                required: amount,
            }));
        }
        _ = state.debits.insert(reference, units);
        _ = state.balances.insert(user_id, balance - units);
        Ok(usd(balance - units))
    }
}

/// In-memory phone numbers [`Provider`].
#[derive(Clone, Debug, Default)]
pub struct Numbers(Rc<RefCell<NumbersState>>);

/// State of [`Numbers`].
#[derive(Debug, Default)]
pub struct NumbersState {
    pub prices: Vec<Price>,
    pub statuses: HashMap<ExternalId, ActivationStatus>,
    pub cancelled: Vec<ExternalId>,
    pub rent_fault: Option<Fault>,
    pub status_fault: Option<Fault>,
    pub cancel_fault: Option<Fault>,
    pub calls: ProviderCalls,
    last_id: u64,
}

/// Counters of [`Numbers`] calls.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProviderCalls {
    pub prices: usize,
    pub rent: usize,
    pub status: usize,
    pub cancel: usize,
}

impl Numbers {
    pub fn state(&self) -> RefMut<'_, NumbersState> {
        self.0.borrow_mut()
    }

    /// Makes the provider report the provided `code` for the provided
    /// [`ExternalId`].
    pub fn deliver(&self, external_id: &ExternalId, code: &str) {
        _ = self.state().statuses.insert(
            external_id.clone(),
            ActivationStatus::CodeDelivered(rental::Code::new(code).unwrap()),
        );
    }
}

impl NumbersState {
    fn next_external_id(&mut self) -> ExternalId {
        self.last_id += 1;
        ExternalId::new(format!("{}", 1000 + self.last_id)).unwrap()
    }
}

impl Provider<Select<By<Vec<Price>, PriceList>>> for Numbers {
    type Ok = Vec<Price>;
    type Err = Traced<provider::Error>;

    async fn execute(
        &self,
        _: Select<By<Vec<Price>, PriceList>>,
    ) -> Result<Self::Ok, Self::Err> {
        let mut state = self.state();
        state.calls.prices += 1;
        Ok(state.prices.clone())
    }
}

impl Provider<Rent<Order>> for Numbers {
    type Ok = Number;
    type Err = Traced<provider::Error>;

    async fn execute(
        &self,
        Rent(order): Rent<Order>,
    ) -> Result<Self::Ok, Self::Err> {
        let mut state = self.state();
        state.calls.rent += 1;
        if let Some(fault) = state.rent_fault {
            return Err(fault.error());
        }
        assert_eq!(order.service, tg());

        let external_id = state.next_external_id();
        _ = state
            .statuses
            .insert(external_id.clone(), ActivationStatus::Waiting);
        Ok(Number {
            phone_number: PhoneNumber::new(format!("+7999{external_id}"))
                .unwrap(),
            external_id,
            ttl: None,
        })
    }
}

impl Provider<Select<By<ActivationStatus, ExternalId>>> for Numbers {
    type Ok = ActivationStatus;
    type Err = Traced<provider::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<ActivationStatus, ExternalId>>,
    ) -> Result<Self::Ok, Self::Err> {
        let mut state = self.state();
        state.calls.status += 1;
        if let Some(fault) = state.status_fault {
            return Err(fault.error());
        }
        Ok(state
            .statuses
            .get(&by.into_inner())
            .cloned()
            .unwrap_or_else(|| {
                ActivationStatus::Unknown("NO_ACTIVATION".into())
            }))
    }
}

impl Provider<Cancel<ExternalId>> for Numbers {
    type Ok = bool;
    type Err = Traced<provider::Error>;

    async fn execute(
        &self,
        Cancel(external_id): Cancel<ExternalId>,
    ) -> Result<Self::Ok, Self::Err> {
        let mut state = self.state();
        state.calls.cancel += 1;
        if let Some(fault) = state.cancel_fault {
            return Err(fault.error());
        }
        _ = state
            .statuses
            .insert(external_id.clone(), ActivationStatus::Cancelled);
        state.cancelled.push(external_id);
        Ok(true)
    }
}
