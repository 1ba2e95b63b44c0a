//! [`Rental`]-related [`Database`] implementations.

use common::{
    operations::{By, Insert, Select, Update},
    Money,
};
use tokio_postgres::Row;
use tracerr::Traced;

use crate::{
    domain::{
        rental::{self, Outcome, Status, Transition},
        user, Rental,
    },
    infra::{database, Database, Postgres},
};

/// Columns of the `rentals` table a [`Rental`] is built from.
const COLUMNS: &str = "\
    id, user_id, external_id, \
    service, service_name, phone_number, \
    original_price, original_price_currency, \
    price, price_currency, \
    status, code, \
    created_at, expires_at, \
    hold_id";

/// Builds a [`Rental`] out of the provided `rentals` [`Row`].
fn from_row(row: &Row) -> Rental {
    Rental {
        id: row.get("id"),
        user_id: row.get("user_id"),
        external_id: row.get("external_id"),
        service: row.get("service"),
        service_name: row.get("service_name"),
        phone_number: row.get("phone_number"),
        original_price: Money {
            amount: row.get("original_price"),
            currency: row.get("original_price_currency"),
        },
        price: Money {
            amount: row.get("price"),
            currency: row.get("price_currency"),
        },
        status: row.get("status"),
        code: row.get("code"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        hold_id: row.get("hold_id"),
    }
}

impl Database<Select<By<Option<Rental>, rental::Id>>> for Postgres {
    type Ok = Option<Rental>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<Rental>, rental::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let id = by.into_inner();

        let sql = format!(
            "SELECT {COLUMNS} \
             FROM rentals \
             WHERE id = $1::UUID \
             LIMIT 1"
        );
        Ok(self
            .query_opt(sql.as_str(), &[&id])
            .await
            .map_err(tracerr::wrap!())?
            .as_ref()
            .map(from_row))
    }
}

impl Database<Select<By<Vec<Rental>, user::Id>>> for Postgres {
    type Ok = Vec<Rental>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Vec<Rental>, user::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let user_id = by.into_inner();

        let sql = format!(
            "SELECT {COLUMNS} \
             FROM rentals \
             WHERE user_id = $1::UUID \
             ORDER BY created_at DESC, id DESC"
        );
        Ok(self
            .query(sql.as_str(), &[&user_id])
            .await
            .map_err(tracerr::wrap!())?
            .iter()
            .map(from_row)
            .collect())
    }
}

impl Database<Insert<Rental>> for Postgres {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(rental): Insert<Rental>,
    ) -> Result<Self::Ok, Self::Err> {
        let Rental {
            id,
            user_id,
            external_id,
            service,
            service_name,
            phone_number,
            original_price,
            price,
            status,
            code,
            created_at,
            expires_at,
            hold_id,
        } = rental;

        const SQL: &str = "\
            INSERT INTO rentals (\
                id, user_id, external_id, \
                service, service_name, phone_number, \
                original_price, original_price_currency, \
                price, price_currency, \
                status, code, \
                created_at, expires_at, \
                hold_id\
            ) VALUES (\
                $1::UUID, $2::UUID, $3::VARCHAR, \
                $4::VARCHAR, $5::VARCHAR, $6::VARCHAR, \
                $7::NUMERIC, $8::INT2, \
                $9::NUMERIC, $10::INT2, \
                $11::INT2, $12::VARCHAR, \
                $13::TIMESTAMPTZ, $14::TIMESTAMPTZ, \
                $15::UUID\
            )";
        let inserted = self
            .exec(
                SQL,
                &[
                    &id,
                    &user_id,
                    &external_id,
                    &service,
                    &service_name,
                    &phone_number,
                    &original_price.amount,
                    &original_price.currency,
                    &price.amount,
                    &price.currency,
                    &status,
                    &code,
                    &created_at,
                    &expires_at,
                    &hold_id,
                ],
            )
            .await;
        match inserted {
            Ok(_) => Ok(()),
            Err(e)
                if matches!(
                    e.as_ref(),
                    database::Error::Postgres(pg)
                        if pg.is_unique_violation(None),
                ) =>
            {
                Err(tracerr::new!(database::Error::Rejected(
                    format!("`Rental(id: {id})` already exists").into(),
                )))
            }
            Err(e) => Err(e),
        }
    }
}

impl Database<Update<Transition>> for Postgres {
    /// Whether the [`Transition`] was applied by this call.
    type Ok = bool;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Update(transition): Update<Transition>,
    ) -> Result<Self::Ok, Self::Err> {
        let Transition { rental_id, outcome } = transition;
        let status = outcome.status();
        let code = match outcome {
            Outcome::Completed(code) => Some(code),
            Outcome::Cancelled => None,
        };

        const SQL: &str = "\
            UPDATE rentals \
            SET status = $2::INT2, \
                code = COALESCE($3::VARCHAR, code), \
                settled_at = NOW() \
            WHERE id = $1::UUID \
              AND status = $4::INT2";
        let updated = self
            .exec(SQL, &[&rental_id, &status, &code, &Status::Active])
            .await
            .map_err(tracerr::wrap!())?;
        Ok(updated == 1)
    }
}
