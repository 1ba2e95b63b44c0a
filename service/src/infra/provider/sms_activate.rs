//! [`SmsActivate`] [`Provider`] implementation.
//!
//! Speaks the `handler_api.php` text protocol: every call is a `GET` request
//! with an `action` query parameter, answered with either a plain
//! `TAG[:payload]` string or a JSON document.

use std::{collections::HashMap, sync::Arc, time::Duration};

use common::{
    operations::{By, Cancel, Rent, Select},
    Currency, Money,
};
use derive_more::Debug;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use tracerr::Traced;
use tracing as log;

use crate::domain::rental::{
    Code, ExternalId, PhoneNumber, ServiceCode, ServiceName,
};

use super::{
    ActivationStatus, Error, Number, Order, Price, PriceList, Provider,
};

/// [`SmsActivate`] configuration.
#[derive(Debug)]
pub struct Config {
    /// URL of the `handler_api.php` endpoint.
    pub base_url: String,

    /// API key of the provider account.
    #[debug(skip)]
    pub api_key: SecretString,

    /// Country to rent phone numbers in.
    ///
    /// [`None`] lets the provider pick any country.
    pub country: Option<u16>,

    /// [`Currency`] the provider account is billed in.
    pub currency: Currency,

    /// Timeout of a single HTTP request.
    pub timeout: Duration,
}

/// HTTP client of an SMS-Activate compatible provider.
#[derive(Clone, Debug)]
pub struct SmsActivate {
    /// Underlying HTTP client.
    client: reqwest::Client,

    /// [`Config`] of this client.
    config: Arc<Config>,
}

impl SmsActivate {
    /// Creates a new [`SmsActivate`] client with the provided [`Config`].
    ///
    /// # Errors
    ///
    /// If failed to build the underlying HTTP client.
    pub fn new(config: Config) -> Result<Self, Traced<Error>> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(tracerr::from_and_wrap!(=> Error))?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Performs the provided `action` with the provided query `params`,
    /// returning the raw response body.
    async fn call(
        &self,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<String, Traced<Error>> {
        let mut query = vec![
            ("api_key", self.config.api_key.expose_secret().to_owned()),
            ("action", action.to_owned()),
        ];
        query.extend(params.iter().map(|(k, v)| (*k, v.clone())));
        if let Some(country) = self.config.country {
            query.push(("country", country.to_string()));
        }

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&query)
            .send()
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))?;
        if !status.is_success() {
            return Err(tracerr::new!(Error::Rejected(format!(
                "HTTP {status}: {body}",
            ))));
        }

        log::debug!("provider `{action}` responded: {body}");
        Ok(body.trim().to_owned())
    }
}

impl Provider<Rent<Order>> for SmsActivate {
    type Ok = Number;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Rent(order): Rent<Order>,
    ) -> Result<Self::Ok, Self::Err> {
        let Order { service, max_price } = order;

        let body = self
            .call(
                "getNumber",
                &[
                    ("service", service.to_string()),
                    ("maxPrice", max_price.amount.normalize().to_string()),
                ],
            )
            .await
            .map_err(tracerr::wrap!())?;

        parse_number(&body).map_err(tracerr::wrap!())
    }
}

impl Provider<Select<By<ActivationStatus, ExternalId>>> for SmsActivate {
    type Ok = ActivationStatus;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Select(by): Select<By<ActivationStatus, ExternalId>>,
    ) -> Result<Self::Ok, Self::Err> {
        let id = by.into_inner();

        let body = self
            .call("getStatus", &[("id", id.to_string())])
            .await
            .map_err(tracerr::wrap!())?;

        Ok(parse_status(&body))
    }
}

impl Provider<Cancel<ExternalId>> for SmsActivate {
    type Ok = bool;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        Cancel(id): Cancel<ExternalId>,
    ) -> Result<Self::Ok, Self::Err> {
        /// `setStatus` value cancelling an activation.
        const CANCEL: &str = "8";

        let body = self
            .call(
                "setStatus",
                &[("id", id.to_string()), ("status", CANCEL.to_owned())],
            )
            .await
            .map_err(tracerr::wrap!())?;

        Ok(body == "ACCESS_CANCEL")
    }
}

impl Provider<Select<By<Vec<Price>, PriceList>>> for SmsActivate {
    type Ok = Vec<Price>;
    type Err = Traced<Error>;

    async fn execute(
        &self,
        _: Select<By<Vec<Price>, PriceList>>,
    ) -> Result<Self::Ok, Self::Err> {
        let body = self
            .call("getPrices", &[])
            .await
            .map_err(tracerr::wrap!())?;

        parse_prices(&body, self.config.country, self.config.currency)
            .map_err(tracerr::wrap!())
    }
}

/// Parses a `getNumber` response.
fn parse_number(body: &str) -> Result<Number, Error> {
    match body.split(':').collect::<Vec<_>>().as_slice() {
        ["ACCESS_NUMBER", id, phone] => Ok(Number {
            external_id: ExternalId::new(*id)
                .ok_or_else(|| Error::Malformed(body.to_owned()))?,
            phone_number: PhoneNumber::new(normalize_phone(phone))
                .ok_or_else(|| Error::Malformed(body.to_owned()))?,
            ttl: None,
        }),
        ["ACCESS_NUMBER", ..] => Err(Error::Malformed(body.to_owned())),
        ["NO_NUMBERS"] => Err(Error::NoNumbers),
        ["NO_BALANCE"] => Err(Error::NoMoney),
        ["WRONG_MAX_PRICE", rest @ ..] => Err(Error::MaxPriceExceeded {
            min: rest.first().and_then(|min| min.parse().ok()),
        }),
        _ => Err(Error::Rejected(body.to_owned())),
    }
}

/// Prepends `+` to a phone number reported without it.
fn normalize_phone(phone: &str) -> String {
    if phone.starts_with('+') {
        phone.to_owned()
    } else {
        format!("+{phone}")
    }
}

/// Parses a `getStatus` response.
fn parse_status(body: &str) -> ActivationStatus {
    use ActivationStatus as S;

    let (tag, payload) = body.split_once(':').unwrap_or((body, ""));
    match tag {
        "STATUS_WAIT_CODE" | "STATUS_WAIT_RETRY" | "STATUS_WAIT_RESEND" => {
            S::Waiting
        }
        "STATUS_OK" => Code::new(payload)
            .map_or_else(|| S::Unknown(body.to_owned()), S::CodeDelivered),
        "STATUS_CANCEL" => S::Cancelled,
        _ => S::Unknown(body.to_owned()),
    }
}

/// Entry of a `getPrices` response.
#[derive(Debug, Deserialize)]
struct PriceEntry {
    /// Price per phone number.
    cost: Decimal,

    /// Number of available phone numbers.
    count: u32,

    /// Validity window of a phone number, in seconds.
    #[serde(default)]
    ttl: Option<u64>,

    /// Human-readable name of the service.
    #[serde(default)]
    name: Option<String>,
}

/// Parses a `getPrices` response of `{country: {service: entry}}` shape.
///
/// If no `country` is specified, the cheapest available offer across all
/// countries is picked for every service.
fn parse_prices(
    body: &str,
    country: Option<u16>,
    currency: Currency,
) -> Result<Vec<Price>, Error> {
    let countries: HashMap<String, HashMap<String, PriceEntry>> =
        serde_json::from_str(body)
            .map_err(|e| Error::Malformed(format!("{e}: {body}")))?;

    let country = country.map(|c| c.to_string());
    let offers = countries
        .into_iter()
        .filter(|(c, _)| country.as_ref().map_or(true, |country| c == country))
        .flat_map(|(_, services)| services);

    let mut prices = HashMap::<ServiceCode, Price>::new();
    for (code, entry) in offers {
        let Some(service) = ServiceCode::new(code) else {
            log::debug!("skipping price of invalid service code");
            continue;
        };
        let price = Price {
            name: entry.name.as_deref().and_then(ServiceName::new),
            cost: Money {
                amount: entry.cost,
                currency,
            },
            count: entry.count,
            ttl: entry.ttl.map(Duration::from_secs),
            service,
        };
        let better = prices.get(&price.service).map_or(true, |known| {
            (price.count > 0 && known.count == 0)
                || (price.count > 0 && price.cost.amount < known.cost.amount)
        });
        if better {
            drop(prices.insert(price.service.clone(), price));
        }
    }

    let mut prices = prices.into_values().collect::<Vec<_>>();
    prices.sort_by(|a, b| a.service.cmp(&b.service));
    Ok(prices)
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use common::{Currency, Money};
    use rust_decimal::Decimal;

    use crate::{
        domain::rental::{Code, ServiceCode},
        infra::provider::{ActivationStatus, Error},
    };

    use super::{parse_number, parse_prices, parse_status};

    #[test]
    fn parses_granted_number() {
        let number = parse_number("ACCESS_NUMBER:123456:79991112233").unwrap();

        assert_eq!(number.external_id.to_string(), "123456");
        assert_eq!(number.phone_number.to_string(), "+79991112233");
        assert_eq!(number.ttl, None);
    }

    #[test]
    fn parses_rent_rejections() {
        assert!(matches!(parse_number("NO_NUMBERS"), Err(Error::NoNumbers)));
        assert!(matches!(parse_number("NO_BALANCE"), Err(Error::NoMoney)));
        assert!(matches!(
            parse_number("WRONG_MAX_PRICE:12.5"),
            Err(Error::MaxPriceExceeded { min: Some(min) })
                if min == Decimal::new(125, 1),
        ));
        assert!(matches!(
            parse_number("ACCESS_NUMBER:1"),
            Err(Error::Malformed(_)),
        ));
        assert!(matches!(parse_number("BAD_KEY"), Err(Error::Rejected(_))));
    }

    #[test]
    fn parses_activation_status() {
        assert_eq!(parse_status("STATUS_WAIT_CODE"), ActivationStatus::Waiting);
        assert_eq!(
            parse_status("STATUS_WAIT_RETRY:48291"),
            ActivationStatus::Waiting,
        );
        assert_eq!(
            parse_status("STATUS_OK:482913"),
            ActivationStatus::CodeDelivered(Code::new("482913").unwrap()),
        );
        assert_eq!(parse_status("STATUS_CANCEL"), ActivationStatus::Cancelled);
        assert_eq!(
            parse_status("NO_ACTIVATION"),
            ActivationStatus::Unknown("NO_ACTIVATION".to_owned()),
        );
        assert_eq!(
            parse_status("STATUS_OK:"),
            ActivationStatus::Unknown("STATUS_OK:".to_owned()),
        );
    }

    #[test]
    fn parses_prices_of_configured_country() {
        let body = r#"{
            "0": {"tg": {"cost": 1.5, "count": 10, "ttl": 1200}},
            "6": {"tg": {"cost": 0.5, "count": 3}}
        }"#;

        let prices = parse_prices(body, Some(0), Currency::Usd).unwrap();

        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].service, ServiceCode::new("tg").unwrap());
        assert_eq!(prices[0].cost, Money::from_minor(150, Currency::Usd));
        assert_eq!(prices[0].ttl, Some(Duration::from_secs(1200)));
    }

    #[test]
    fn picks_cheapest_available_offer_across_countries() {
        let body = r#"{
            "0": {"tg": {"cost": 1.5, "count": 10}, "wa": {"cost": 2, "count": 0}},
            "6": {"tg": {"cost": 0.5, "count": 3}, "wa": {"cost": 3, "count": 1}},
            "7": {"tg": {"cost": 0.1, "count": 0}}
        }"#;

        let prices = parse_prices(body, None, Currency::Usd).unwrap();

        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].cost, Money::from_minor(50, Currency::Usd));
        assert_eq!(prices[1].cost, Money::from_minor(300, Currency::Usd));
    }

    #[test]
    fn rejects_non_json_prices() {
        assert!(matches!(
            parse_prices("BAD_KEY", None, Currency::Usd),
            Err(Error::Malformed(_)),
        ));
    }
}
