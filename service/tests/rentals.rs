//! Lifecycle of [`Rental`]s driven by user commands.
//!
//! [`Rental`]: service::domain::Rental

mod support;

use service::{
    command::{
        cancel_rental, check_rental, purchase_rental, CancelRental,
        CheckRental, PurchaseRental,
    },
    domain::{
        rental::{self, Code, ServiceCode, Status},
        user,
        wallet::{HoldStatus, RefundReason},
    },
    infra::{
        ledger,
        provider::{self, ActivationStatus},
    },
    query, Command as _,
};

use self::support::{tg, usd, Env, Fault};

fn purchase(env: &Env) -> PurchaseRental {
    PurchaseRental {
        rental_id: rental::Id::new(),
        user_id: env.user_id,
        service: tg(),
    }
}

#[tokio::test]
async fn purchase_reserves_billed_price() {
    let env = Env::new(500, 100);
    let mut changes = env.service.balance_changes();

    let rental = env.service.execute(purchase(&env)).await.unwrap();

    assert_eq!(rental.status, Status::Active);
    assert_eq!(rental.original_price, usd(100));
    assert_eq!(rental.price, usd(200));
    assert_eq!(rental.code, None);
    assert_eq!(env.rental(rental.id), rental);
    assert_eq!(env.balance(), 300);

    let hold = env.wallets.hold_of(rental.id).unwrap();
    assert_eq!(rental.hold_id, Some(hold.id));
    assert_eq!(hold.status, HoldStatus::Reserved);
    assert_eq!(hold.amount, usd(200));

    let changed = changes.try_recv().unwrap();
    assert_eq!(changed.user_id, env.user_id);
    assert_eq!(changed.balance, usd(300));
}

#[tokio::test]
async fn provider_failure_refunds_reservation() {
    let env = Env::new(500, 100);
    env.numbers.state().rent_fault = Some(Fault::NoNumbers);

    let err = env.service.execute(purchase(&env)).await.unwrap_err();

    assert!(
        matches!(
            err.as_ref(),
            purchase_rental::ExecutionError::Provider(
                provider::Error::NoNumbers,
            ),
        ),
        "unexpected error: {err}",
    );
    assert_eq!(env.balance(), 500);
    assert!(env.store.state().rentals.is_empty());

    let wallets = env.wallets.state();
    assert_eq!(wallets.calls.reserve, 1);
    let (hold_id, hold) = wallets.holds.iter().next().unwrap();
    assert_eq!(hold.status, HoldStatus::Refunded);
    assert_eq!(
        wallets.refund_reasons[hold_id],
        RefundReason::ProviderRejected,
    );
}

#[tokio::test]
async fn store_failure_refunds_and_releases_number() {
    let env = Env::new(500, 100);
    env.store.state().fail_inserts = true;

    let err = env.service.execute(purchase(&env)).await.unwrap_err();

    assert!(
        matches!(err.as_ref(), purchase_rental::ExecutionError::Db(_)),
        "unexpected error: {err}",
    );
    assert_eq!(env.balance(), 500);
    assert!(env.store.state().rentals.is_empty());
    assert_eq!(env.numbers.state().cancelled.len(), 1);

    let wallets = env.wallets.state();
    let (hold_id, _) = wallets.holds.iter().next().unwrap();
    assert_eq!(
        wallets.refund_reasons[hold_id],
        RefundReason::PersistenceFailed,
    );
}

#[tokio::test]
async fn repeated_purchase_returns_same_rental() {
    let env = Env::new(500, 100);
    let cmd = purchase(&env);

    let first = env.service.execute(cmd.clone()).await.unwrap();
    let second = env.service.execute(cmd.clone()).await.unwrap();

    assert_eq!(first.id, cmd.rental_id);
    assert_eq!(second, first);
    assert_eq!(env.balance(), 300);
    assert_eq!(env.numbers.state().calls.rent, 1);
    assert_eq!(env.wallets.state().holds.len(), 1);
    assert_eq!(env.store.state().rentals.len(), 1);

    let err = env
        .service
        .execute(PurchaseRental {
            user_id: user::Id::new(),
            ..cmd
        })
        .await
        .unwrap_err();
    assert!(
        matches!(
            err.as_ref(),
            purchase_rental::ExecutionError::RentalExists(id)
                if *id == first.id,
        ),
        "unexpected error: {err}",
    );
}

#[tokio::test]
async fn retry_after_refund_does_not_rent_unpaid_number() {
    let env = Env::new(500, 100);
    let cmd = purchase(&env);
    env.numbers.state().rent_fault = Some(Fault::NoNumbers);
    _ = env.service.execute(cmd.clone()).await.unwrap_err();

    env.numbers.state().rent_fault = None;
    let err = env.service.execute(cmd).await.unwrap_err();

    assert!(
        matches!(
            err.as_ref(),
            purchase_rental::ExecutionError::Ledger(
                ledger::Error::HoldSettled(_),
            ),
        ),
        "unexpected error: {err}",
    );
    assert_eq!(env.balance(), 500);
    assert_eq!(env.numbers.state().calls.rent, 1);
    assert_eq!(env.wallets.state().calls.reserve, 1);
    assert!(env.store.state().rentals.is_empty());
}

#[tokio::test]
async fn zero_balance_is_rejected_before_reservation() {
    let env = Env::new(0, 100);

    let err = env.service.execute(purchase(&env)).await.unwrap_err();

    assert!(
        matches!(
            err.as_ref(),
            purchase_rental::ExecutionError::InsufficientFunds(b)
                if *b == usd(0),
        ),
        "unexpected error: {err}",
    );
    assert_eq!(env.wallets.state().calls.reserve, 0);
    assert_eq!(env.numbers.state().calls.prices, 0);
    assert_eq!(env.numbers.state().calls.rent, 0);
}

#[tokio::test]
async fn balance_below_price_is_rejected_before_reservation() {
    let env = Env::new(150, 100);

    let err = env.service.execute(purchase(&env)).await.unwrap_err();

    assert!(
        matches!(
            err.as_ref(),
            purchase_rental::ExecutionError::InsufficientFunds(b)
                if *b == usd(150),
        ),
        "unexpected error: {err}",
    );
    assert_eq!(env.wallets.state().calls.reserve, 0);
    assert_eq!(env.numbers.state().calls.rent, 0);
    assert_eq!(env.balance(), 150);
}

#[tokio::test]
async fn unavailable_service_is_rejected() {
    let env = Env::new(500, 100);
    env.numbers.state().prices[0].count = 0;

    let err = env.service.execute(purchase(&env)).await.unwrap_err();
    assert!(
        matches!(
            err.as_ref(),
            purchase_rental::ExecutionError::ServiceUnavailable(s)
                if *s == tg(),
        ),
        "unexpected error: {err}",
    );

    let err = env
        .service
        .execute(PurchaseRental {
            rental_id: rental::Id::new(),
            user_id: env.user_id,
            service: ServiceCode::new("wa").unwrap(),
        })
        .await
        .unwrap_err();
    assert!(
        matches!(
            err.as_ref(),
            purchase_rental::ExecutionError::ServiceUnavailable(_),
        ),
        "unexpected error: {err}",
    );

    assert_eq!(env.wallets.state().calls.reserve, 0);
    assert_eq!(env.numbers.state().calls.prices, 1);
}

#[tokio::test]
async fn delivered_code_completes_and_bills_once() {
    let env = Env::new(500, 100);
    let rental = env.service.execute(purchase(&env)).await.unwrap();
    let check = CheckRental {
        rental_id: rental.id,
        user_id: env.user_id,
    };

    let waiting = env.service.execute(check).await.unwrap();
    assert_eq!(waiting.status, Status::Active);

    env.numbers.deliver(&rental.external_id, "482913");
    let completed = env.service.execute(check).await.unwrap();

    assert_eq!(completed.status, Status::Completed);
    assert_eq!(completed.code, Code::new("482913"));
    assert_eq!(env.rental(rental.id), completed);
    assert_eq!(
        env.wallets.hold_of(rental.id).unwrap().status,
        HoldStatus::Committed,
    );

    let again = env.service.execute(check).await.unwrap();
    assert_eq!(again, completed);
    assert_eq!(env.wallets.state().calls.commit, 1);
    assert_eq!(env.balance(), 300);
}

#[tokio::test]
async fn unusable_activation_status_keeps_rental_active() {
    let env = Env::new(1000, 100);

    for (fault, status) in [
        (Some(Fault::Rejected), None),
        (None, Some(ActivationStatus::Cancelled)),
        (None, Some(ActivationStatus::Unknown("NO_ACTIVATION".into()))),
    ] {
        let rental = env.service.execute(purchase(&env)).await.unwrap();
        {
            let mut numbers = env.numbers.state();
            numbers.status_fault = fault;
            if let Some(status) = status.clone() {
                _ = numbers.statuses.insert(rental.external_id.clone(), status);
            }
        }

        let checked = env
            .service
            .execute(CheckRental {
                rental_id: rental.id,
                user_id: env.user_id,
            })
            .await
            .unwrap();

        assert_eq!(checked.status, Status::Active, "{fault:?} {status:?}");
        assert_eq!(checked.code, None);
        assert_eq!(env.rental(rental.id), checked);
        assert_eq!(
            env.wallets.hold_of(rental.id).unwrap().status,
            HoldStatus::Reserved,
        );
    }
    assert_eq!(env.numbers.state().calls.status, 3);
    assert_eq!(env.wallets.state().calls.commit, 0);
    assert_eq!(env.balance(), 1000 - 3 * 200);
}

#[tokio::test]
async fn foreign_rental_is_not_visible() {
    let env = Env::new(500, 100);
    let rental = env.service.execute(purchase(&env)).await.unwrap();
    let stranger = user::Id::new();

    let err = env
        .service
        .execute(CheckRental {
            rental_id: rental.id,
            user_id: stranger,
        })
        .await
        .unwrap_err();
    assert!(
        matches!(
            err.as_ref(),
            check_rental::ExecutionError::RentalNotExists(id)
                if *id == rental.id,
        ),
        "unexpected error: {err}",
    );

    let err = env
        .service
        .execute(CancelRental {
            rental_id: rental.id,
            user_id: stranger,
        })
        .await
        .unwrap_err();
    assert!(
        matches!(
            err.as_ref(),
            cancel_rental::ExecutionError::RentalNotExists(_),
        ),
        "unexpected error: {err}",
    );
    assert_eq!(env.rental(rental.id).status, Status::Active);
}

#[tokio::test]
async fn cancel_refunds_and_releases_number() {
    let env = Env::new(500, 100);
    let rental = env.service.execute(purchase(&env)).await.unwrap();
    let cancel = CancelRental {
        rental_id: rental.id,
        user_id: env.user_id,
    };

    assert!(env.service.execute(cancel).await.unwrap());

    assert_eq!(env.rental(rental.id).status, Status::Cancelled);
    assert_eq!(env.balance(), 500);
    assert_eq!(env.numbers.state().cancelled, [rental.external_id.clone()]);
    let hold = env.wallets.hold_of(rental.id).unwrap();
    assert_eq!(hold.status, HoldStatus::Refunded);
    assert_eq!(
        env.wallets.state().refund_reasons[&hold.id],
        RefundReason::Cancelled,
    );

    assert!(!env.service.execute(cancel).await.unwrap());
    assert_eq!(env.wallets.state().calls.refund, 1);
    assert_eq!(env.balance(), 500);
}

#[tokio::test]
async fn completed_rental_is_not_cancelled() {
    let env = Env::new(500, 100);
    let rental = env.service.execute(purchase(&env)).await.unwrap();
    env.numbers.deliver(&rental.external_id, "1234");
    _ = env
        .service
        .execute(CheckRental {
            rental_id: rental.id,
            user_id: env.user_id,
        })
        .await
        .unwrap();

    let cancelled = env
        .service
        .execute(CancelRental {
            rental_id: rental.id,
            user_id: env.user_id,
        })
        .await
        .unwrap();

    assert!(!cancelled);
    assert_eq!(env.rental(rental.id).status, Status::Completed);
    assert_eq!(env.balance(), 300);
}

#[tokio::test(start_paused = true)]
async fn cancel_retries_rejected_refund_once() {
    let env = Env::new(500, 100);
    let rental = env.service.execute(purchase(&env)).await.unwrap();
    env.wallets.state().unauthorized_refunds = 1;

    let cancelled = env
        .service
        .execute(CancelRental {
            rental_id: rental.id,
            user_id: env.user_id,
        })
        .await
        .unwrap();

    assert!(cancelled);
    assert_eq!(env.wallets.state().calls.refund, 2);
    assert_eq!(env.balance(), 500);
}

#[tokio::test(start_paused = true)]
async fn cancel_fails_when_refund_is_rejected_twice() {
    let env = Env::new(500, 100);
    let rental = env.service.execute(purchase(&env)).await.unwrap();
    env.wallets.state().unauthorized_refunds = 2;

    let err = env
        .service
        .execute(CancelRental {
            rental_id: rental.id,
            user_id: env.user_id,
        })
        .await
        .unwrap_err();

    assert!(
        matches!(
            err.as_ref(),
            cancel_rental::ExecutionError::Ledger(
                ledger::Error::Unauthorized,
            ),
        ),
        "unexpected error: {err}",
    );
    assert_eq!(env.wallets.state().calls.refund, 2);
    assert_eq!(env.rental(rental.id).status, Status::Active);
    assert_eq!(env.balance(), 300);
}

#[tokio::test]
async fn cancel_looks_up_hold_of_legacy_rental() {
    let env = Env::new(500, 100);
    let rental = env.expired_rental(true);
    env.store
        .state()
        .rentals
        .get_mut(&rental.id)
        .unwrap()
        .hold_id = None;

    let cancelled = env
        .service
        .execute(CancelRental {
            rental_id: rental.id,
            user_id: env.user_id,
        })
        .await
        .unwrap();

    assert!(cancelled);
    assert_eq!(env.balance(), 500);
    assert_eq!(
        env.wallets.hold_of(rental.id).unwrap().status,
        HoldStatus::Refunded,
    );
}

#[tokio::test]
async fn lists_rentals_and_balance() {
    let env = Env::new(500, 100);
    let first = env.service.execute(purchase(&env)).await.unwrap();
    let second = env.service.execute(purchase(&env)).await.unwrap();

    let rentals = env
        .service
        .execute(query::rental::ByUser::by(env.user_id))
        .await
        .unwrap();
    let balance = env
        .service
        .execute(query::wallet::Balance::by(env.user_id))
        .await
        .unwrap();

    assert_eq!(rentals.len(), 2);
    assert!(rentals.iter().any(|r| r.id == first.id));
    assert!(rentals.iter().any(|r| r.id == second.id));
    assert_eq!(balance, usd(100));
    assert!(env
        .service
        .execute(query::rental::ByUser::by(user::Id::new()))
        .await
        .unwrap()
        .is_empty());
}
