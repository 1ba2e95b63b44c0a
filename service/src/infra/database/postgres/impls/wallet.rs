//! Wallet-related [`Ledger`] implementations.
//!
//! Every mutating operation runs in a single transaction locking the wallet
//! row (and the hold row, if any) with `SELECT ... FOR UPDATE`, so concurrent
//! operations on the same wallet are serialized by Postgres.

use common::{
    operations::{By, Commit, Debit, Refund, Reserve, Select},
    Currency, Money,
};
use deadpool_postgres::Transaction;
use tokio_postgres::Row;
use tracerr::Traced;

use crate::{
    domain::{
        rental, user,
        wallet::{
            Capture, Charge, Hold, HoldId, HoldStatus, RefundReason, Release,
            Reservation, Reserved,
        },
    },
    infra::{ledger::Error as E, postgres, Ledger, Postgres},
};

/// Columns of the `wallet_holds` table a [`Hold`] is built from.
const HOLD_COLUMNS: &str = "id, user_id, reference, amount, currency, status";

/// Builds a [`Hold`] out of the provided `wallet_holds` [`Row`].
fn hold_from_row(row: &Row) -> Hold {
    Hold {
        id: row.get("id"),
        user_id: row.get("user_id"),
        reference: row.get("reference"),
        amount: Money::from_minor(row.get("amount"), row.get("currency")),
        status: row.get("status"),
    }
}

/// Converts the provided [`Money`] into minor units of the wallet
/// [`Currency`].
fn minor_units(money: Money, currency: Currency) -> Result<i64, Traced<E>> {
    money
        .minor_units()
        .filter(|units| money.currency == currency && *units >= 0)
        .ok_or_else(|| tracerr::new!(E::InvalidAmount(money)))
}

impl Postgres {
    /// Retrieves a pooled connection for a ledger operation.
    async fn ledger_connection(
        &self,
    ) -> Result<deadpool_postgres::Object, Traced<E>> {
        self.connection()
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))
    }

    /// Locks the wallet of the provided [`user::Id`] in the provided
    /// [`Transaction`], creating an empty one if it doesn't exist yet.
    ///
    /// Returns the current balance in minor units.
    async fn lock_wallet(
        &self,
        tx: &Transaction<'_>,
        user_id: user::Id,
    ) -> Result<i64, Traced<E>> {
        const UPSERT_SQL: &str = "\
            INSERT INTO wallets (user_id, balance, currency) \
            VALUES ($1::UUID, 0, $2::INT2) \
            ON CONFLICT (user_id) DO NOTHING";
        _ = tx
            .execute(UPSERT_SQL, &[&user_id, &self.currency])
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?;

        const SQL: &str = "\
            SELECT balance \
            FROM wallets \
            WHERE user_id = $1::UUID \
            FOR UPDATE";
        Ok(tx
            .query_one(SQL, &[&user_id])
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?
            .get("balance"))
    }

    /// Locks the [`Hold`] with the provided [`HoldId`] in the provided
    /// [`Transaction`], checking it's owned by the provided [`user::Id`].
    async fn lock_hold(
        tx: &Transaction<'_>,
        hold_id: HoldId,
        user_id: user::Id,
    ) -> Result<Hold, Traced<E>> {
        let sql = format!(
            "SELECT {HOLD_COLUMNS} \
             FROM wallet_holds \
             WHERE id = $1::UUID \
             FOR UPDATE"
        );
        let hold = tx
            .query_opt(sql.as_str(), &[&hold_id])
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?
            .as_ref()
            .map(hold_from_row)
            .ok_or_else(|| tracerr::new!(E::HoldNotFound(hold_id)))?;
        if hold.user_id != user_id {
            return Err(tracerr::new!(E::Unauthorized));
        }
        Ok(hold)
    }

    /// Marks the [`Hold`] with the provided [`HoldId`] as settled with the
    /// provided [`HoldStatus`].
    async fn settle_hold(
        tx: &Transaction<'_>,
        hold_id: HoldId,
        status: HoldStatus,
        reason: Option<RefundReason>,
    ) -> Result<(), Traced<E>> {
        const SQL: &str = "\
            UPDATE wallet_holds \
            SET status = $2::INT2, \
                refund_reason = $3::INT2, \
                settled_at = NOW() \
            WHERE id = $1::UUID";
        _ = tx
            .execute(SQL, &[&hold_id, &status, &reason])
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?;
        Ok(())
    }

    /// Commits the provided [`Transaction`].
    async fn commit_tx(tx: Transaction<'_>) -> Result<(), Traced<E>> {
        tx.commit()
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)
    }
}

impl Ledger<Select<By<Money, user::Id>>> for Postgres {
    type Ok = Money;
    type Err = Traced<E>;

    async fn execute(
        &self,
        Select(by): Select<By<Money, user::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let user_id = by.into_inner();

        const SQL: &str = "\
            SELECT balance, currency \
            FROM wallets \
            WHERE user_id = $1::UUID";
        let conn = self.ledger_connection().await?;
        Ok(conn
            .query_opt(SQL, &[&user_id])
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?
            .map_or_else(
                || Money::zero(self.currency),
                |row| {
                    Money::from_minor(row.get("balance"), row.get("currency"))
                },
            ))
    }
}

impl Ledger<Select<By<Option<Hold>, rental::Id>>> for Postgres {
    type Ok = Option<Hold>;
    type Err = Traced<E>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Hold>, rental::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let reference = by.into_inner();

        let sql = format!(
            "SELECT {HOLD_COLUMNS} \
             FROM wallet_holds \
             WHERE reference = $1::UUID \
             LIMIT 1"
        );
        let conn = self.ledger_connection().await?;
        Ok(conn
            .query_opt(sql.as_str(), &[&reference])
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?
            .as_ref()
            .map(hold_from_row))
    }
}

impl Ledger<Reserve<Reservation>> for Postgres {
    type Ok = Reserved;
    type Err = Traced<E>;

    async fn execute(
        &self,
        Reserve(reservation): Reserve<Reservation>,
    ) -> Result<Self::Ok, Self::Err> {
        let Reservation {
            user_id,
            amount,
            reference,
        } = reservation;
        let units = minor_units(amount, self.currency)?;

        let mut conn = self.ledger_connection().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?;

        let balance = self.lock_wallet(&tx, user_id).await?;

        let sql = format!(
            "SELECT {HOLD_COLUMNS} \
             FROM wallet_holds \
             WHERE reference = $1::UUID \
             FOR UPDATE"
        );
        let existing = tx
            .query_opt(sql.as_str(), &[&reference])
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?
            .as_ref()
            .map(hold_from_row);
        if let Some(hold) = existing {
            if hold.user_id != user_id {
                return Err(tracerr::new!(E::Unauthorized));
            }
            return Ok(Reserved {
                hold_id: hold.id,
                balance: Money::from_minor(balance, self.currency),
            });
        }

        if balance < units {
            return Err(tracerr::new!(E::InsufficientFunds {
                balance: Money::from_minor(balance, self.currency),
                required: amount,
            }));
        }

        let hold_id = HoldId::new();
        const INSERT_SQL: &str = "\
            INSERT INTO wallet_holds (\
                id, user_id, reference, amount, currency, status, created_at\
            ) VALUES (\
                $1::UUID, $2::UUID, $3::UUID, $4::INT8, $5::INT2, $6::INT2, \
                NOW()\
            )";
        _ = tx
            .execute(
                INSERT_SQL,
                &[
                    &hold_id,
                    &user_id,
                    &reference,
                    &units,
                    &self.currency,
                    &HoldStatus::Reserved,
                ],
            )
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?;

        const UPDATE_SQL: &str = "\
            UPDATE wallets \
            SET balance = balance - $2::INT8 \
            WHERE user_id = $1::UUID \
            RETURNING balance";
        let balance: i64 = tx
            .query_one(UPDATE_SQL, &[&user_id, &units])
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?
            .get("balance");

        Self::commit_tx(tx).await?;

        Ok(Reserved {
            hold_id,
            balance: Money::from_minor(balance, self.currency),
        })
    }
}

impl Ledger<Commit<Capture>> for Postgres {
    /// Wallet balance after the commit.
    type Ok = Money;
    type Err = Traced<E>;

    async fn execute(
        &self,
        Commit(capture): Commit<Capture>,
    ) -> Result<Self::Ok, Self::Err> {
        let Capture { user_id, hold_id } = capture;

        let mut conn = self.ledger_connection().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?;

        let balance = self.lock_wallet(&tx, user_id).await?;
        let hold = Self::lock_hold(&tx, hold_id, user_id).await?;
        match hold.status {
            HoldStatus::Reserved => {
                Self::settle_hold(&tx, hold_id, HoldStatus::Committed, None)
                    .await?;
            }
            HoldStatus::Committed => {}
            HoldStatus::Refunded => {
                return Err(tracerr::new!(E::HoldSettled(hold_id)));
            }
        }

        Self::commit_tx(tx).await?;

        Ok(Money::from_minor(balance, self.currency))
    }
}

impl Ledger<Refund<Release>> for Postgres {
    /// Wallet balance after the refund.
    type Ok = Money;
    type Err = Traced<E>;

    async fn execute(
        &self,
        Refund(release): Refund<Release>,
    ) -> Result<Self::Ok, Self::Err> {
        let Release {
            user_id,
            hold_id,
            reason,
        } = release;

        let mut conn = self.ledger_connection().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?;

        let mut balance = self.lock_wallet(&tx, user_id).await?;
        let hold = Self::lock_hold(&tx, hold_id, user_id).await?;
        match hold.status {
            HoldStatus::Reserved => {
                Self::settle_hold(
                    &tx,
                    hold_id,
                    HoldStatus::Refunded,
                    Some(reason),
                )
                .await?;

                let units = minor_units(hold.amount, self.currency)?;
                const SQL: &str = "\
                    UPDATE wallets \
                    SET balance = balance + $2::INT8 \
                    WHERE user_id = $1::UUID \
                    RETURNING balance";
                balance = tx
                    .query_one(SQL, &[&user_id, &units])
                    .await
                    .map_err(tracerr::from_and_wrap!(=> postgres::Error))
                    .map_err(tracerr::map_from)?
                    .get("balance");
            }
            HoldStatus::Refunded => {}
            HoldStatus::Committed => {
                return Err(tracerr::new!(E::HoldSettled(hold_id)));
            }
        }

        Self::commit_tx(tx).await?;

        Ok(Money::from_minor(balance, self.currency))
    }
}

impl Ledger<Debit<Charge>> for Postgres {
    /// Wallet balance after the debit.
    type Ok = Money;
    type Err = Traced<E>;

    async fn execute(
        &self,
        Debit(charge): Debit<Charge>,
    ) -> Result<Self::Ok, Self::Err> {
        let Charge {
            user_id,
            amount,
            reference,
        } = charge;
        let units = minor_units(amount, self.currency)?;

        let mut conn = self.ledger_connection().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?;

        let balance = self.lock_wallet(&tx, user_id).await?;

        const SELECT_SQL: &str = "\
            SELECT user_id \
            FROM wallet_debits \
            WHERE reference = $1::UUID";
        let debited_by = tx
            .query_opt(SELECT_SQL, &[&reference])
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?
            .map(|row| row.get::<_, user::Id>("user_id"));
        match debited_by {
            Some(owner) if owner == user_id => {
                return Ok(Money::from_minor(balance, self.currency));
            }
            Some(_) => return Err(tracerr::new!(E::Unauthorized)),
            None => {}
        }

        if balance < units {
            return Err(tracerr::new!(E::InsufficientFunds {
                balance: Money::from_minor(balance, self.currency),
                required: amount,
            }));
        }

        const INSERT_SQL: &str = "\
            INSERT INTO wallet_debits (\
                reference, user_id, amount, currency, created_at\
            ) VALUES (\
                $1::UUID, $2::UUID, $3::INT8, $4::INT2, NOW()\
            )";
        _ = tx
            .execute(
                INSERT_SQL,
                &[&reference, &user_id, &units, &self.currency],
            )
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?;

        const UPDATE_SQL: &str = "\
            UPDATE wallets \
            SET balance = balance - $2::INT8 \
            WHERE user_id = $1::UUID \
            RETURNING balance";
        let balance: i64 = tx
            .query_one(UPDATE_SQL, &[&user_id, &units])
            .await
            .map_err(tracerr::from_and_wrap!(=> postgres::Error))
            .map_err(tracerr::map_from)?
            .get("balance");

        Self::commit_tx(tx).await?;

        Ok(Money::from_minor(balance, self.currency))
    }
}
