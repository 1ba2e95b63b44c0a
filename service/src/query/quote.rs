//! [`Query`] collection related to [`Quote`]s.

use std::sync::Arc;

use common::operations::{By, Select};
use tokio::{sync::Mutex, time::Instant};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        quote::{Quote, Quotes},
        rental::ServiceCode,
    },
    infra::{
        provider::{self, Price, PriceList},
        Provider,
    },
    Service,
};

use super::Query;

/// Cached [`Quotes`] along with the [`Instant`] they were fetched at.
#[derive(Clone, Debug, Default)]
pub struct Cache(Arc<Mutex<Option<(Instant, Quotes)>>>);

/// Queries [`Quotes`] of all the [`Provider`] services.
///
/// [`Quotes`] are cached for the configured time and re-fetched from the
/// [`Provider`] on a miss.
#[derive(Clone, Copy, Debug)]
pub struct All;

/// Queries a [`Quote`] of a single [`Provider`] service.
#[derive(Clone, Debug)]
pub struct ByService(pub ServiceCode);

impl<Db, Ld, Pr> Query<All> for Service<Db, Ld, Pr>
where
    Pr: Provider<
        Select<By<Vec<Price>, PriceList>>,
        Ok = Vec<Price>,
        Err = Traced<provider::Error>,
    >,
{
    type Ok = Quotes;
    type Err = Traced<provider::Error>;

    async fn execute(&self, _: All) -> Result<Self::Ok, Self::Err> {
        // Held during the fetch, so concurrent misses fetch only once.
        let mut cache = self.quotes.0.lock().await;
        if let Some((fetched_at, quotes)) = cache.as_ref() {
            if fetched_at.elapsed() < self.config().quote_ttl {
                return Ok(quotes.clone());
            }
        }

        let quotes = self
            .provider()
            .execute(Select(By::new(PriceList)))
            .await
            .map_err(tracerr::wrap!())?
            .into_iter()
            .map(|price| {
                let Price {
                    service,
                    name,
                    cost,
                    count,
                    ttl,
                } = price;
                (service.clone(), Quote::new(service, name, cost, count, ttl))
            })
            .collect::<Quotes>();
        log::debug!("fetched {} quotes", quotes.len());

        *cache = Some((Instant::now(), quotes.clone()));
        Ok(quotes)
    }
}

impl<Db, Ld, Pr> Query<ByService> for Service<Db, Ld, Pr>
where
    Self: Query<All, Ok = Quotes, Err = Traced<provider::Error>>,
{
    type Ok = Option<Quote>;
    type Err = Traced<provider::Error>;

    async fn execute(
        &self,
        ByService(service): ByService,
    ) -> Result<Self::Ok, Self::Err> {
        Ok(self
            .execute(All)
            .await
            .map_err(tracerr::wrap!())?
            .remove(&service))
    }
}

#[cfg(test)]
mod spec {
    use std::{cell::Cell, rc::Rc, time::Duration};

    use common::{
        operations::{By, Select},
        Currency, Money,
    };
    use tracerr::Traced;

    use crate::{
        domain::rental::ServiceCode,
        infra::{
            provider::{self, Price, PriceList},
            Provider,
        },
        Query as _,
    };

    use super::{All, ByService};

    #[derive(Clone, Debug, Default)]
    struct Prices {
        calls: Rc<Cell<usize>>,
    }

    impl Provider<Select<By<Vec<Price>, PriceList>>> for Prices {
        type Ok = Vec<Price>;
        type Err = Traced<provider::Error>;

        async fn execute(
            &self,
            _: Select<By<Vec<Price>, PriceList>>,
        ) -> Result<Self::Ok, Self::Err> {
            self.calls.set(self.calls.get() + 1);
            Ok(vec![Price {
                service: ServiceCode::new("tg").unwrap(),
                name: None,
                cost: Money::from_minor(100, Currency::Usd),
                count: 3,
                ttl: None,
            }])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn caches_quotes_for_configured_time() {
        let prices = Prices::default();
        let service = crate::Service::new(
            crate::spec::config(),
            (),
            (),
            prices.clone(),
        );

        let quotes = service.execute(All).await.unwrap();
        assert_eq!(quotes.len(), 1);
        _ = service.execute(All).await.unwrap();
        assert_eq!(prices.calls.get(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let quote = service
            .execute(ByService(ServiceCode::new("tg").unwrap()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prices.calls.get(), 2);
        assert_eq!(quote.price, Money::from_minor(200, Currency::Usd));
    }

    #[tokio::test]
    async fn misses_unknown_service() {
        let service = crate::Service::new(
            crate::spec::config(),
            (),
            (),
            Prices::default(),
        );

        let quote = service
            .execute(ByService(ServiceCode::new("wa").unwrap()))
            .await
            .unwrap();

        assert_eq!(quote, None);
    }
}
