#![warn(clippy::nursery, clippy::pedantic)]

//! Contains common functions and structures used by the server and the CLI

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use headers::{Header, HeaderName, HeaderValue};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use thiserror::Error;
pub use url::Url;

/// JSON API for creating and reading pastes.
pub const API_ENDPOINT: &str = "/api/pastes";
/// Plain-text preview route. Reads through this route never consume a view.
pub const VIEW_ENDPOINT: &str = "/p";
pub const HEALTH_ENDPOINT: &str = "/api/healthz";

const VIEW_SEGMENT: &str = "p";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreatePasteRequest {
    pub content: String,
    #[serde(
        default,
        deserialize_with = "whole_number::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub ttl_seconds: Option<i64>,
    #[serde(
        default,
        deserialize_with = "whole_number::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_views: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreatePasteResponse {
    pub id: String,
    pub url: String,
}

/// The externally visible state of a paste after a successful read.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PasteView {
    pub content: String,
    pub remaining_views: Option<u32>,
    #[serde(with = "iso8601")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Display for PasteView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.remaining_views {
            Some(0) => write!(f, "This was the last view. You now have the only copy.")?,
            Some(1) => write!(f, "This paste can be viewed 1 more time.")?,
            Some(n) => write!(f, "This paste can be viewed {} more times.", n)?,
            None => write!(f, "This paste has no view limit.")?,
        }

        match self.expires_at {
            Some(time) => write!(
                f,
                " {}",
                time.format("It will expire on %A, %B %-d, %Y at %T %Z.")
            ),
            None => write!(f, " It will not expire."),
        }
    }
}

/// Serializes timestamps the way browsers print them: RFC 3339 in UTC with
/// millisecond precision, e.g. `2024-01-01T00:00:00.000Z`.
pub mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => {
                serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|time| time.with_timezone(&Utc))
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

/// Reads optional integers that may arrive written as floats, such as `3.0`.
/// Anything with a fractional part is rejected.
pub mod whole_number {
    use std::fmt;

    use serde::de::{self, Deserializer, Unexpected, Visitor};

    struct WholeNumber;

    impl<'de> Visitor<'de> for WholeNumber {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an integer")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(|_| E::invalid_value(Unexpected::Unsigned(v), &self))
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            // i64::MAX rounds up to 2^63 as a float, which is out of range
            if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
                Ok(v as i64)
            } else {
                Err(E::invalid_value(Unexpected::Float(v), &self))
            }
        }
    }

    struct OptionalWholeNumber;

    impl<'de> Visitor<'de> for OptionalWholeNumber {
        type Value = Option<i64>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an integer or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(WholeNumber).map(Some)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_option(OptionalWholeNumber)
    }
}

lazy_static! {
    pub static ref TEST_NOW_HEADER_NAME: HeaderName = HeaderName::from_static("x-test-now-ms");
}

/// Overrides the server's clock for a single request. Only honored when the
/// server runs in test mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TestNow(pub DateTime<Utc>);

impl Header for TestNow {
    fn name() -> &'static HeaderName {
        &*TEST_NOW_HEADER_NAME
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        values
            .next()
            .ok_or_else(headers::Error::invalid)?
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .map(Self)
            .ok_or_else(headers::Error::invalid)
    }

    fn encode<E: Extend<HeaderValue>>(&self, container: &mut E) {
        container.extend(std::iter::once(HeaderValue::from(self.0.timestamp_millis())));
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseUrlError {
    #[error("The provided url was bad")]
    BadUrl,
    #[error("The url does not point to a paste")]
    MissingId,
}

/// Builds the human-facing link for a paste, `<base>/p/<id>`.
///
/// # Errors
///
/// Returns an error if `base` cannot carry a path, such as `mailto:` urls.
pub fn paste_url(base: &Url, id: &str) -> Result<Url, ParseUrlError> {
    join_segments(base, &[VIEW_SEGMENT, id])
}

/// Builds the endpoint pastes are created at, `<base>/api/pastes`.
///
/// # Errors
///
/// Returns an error if `base` cannot carry a path.
pub fn create_url(base: &Url) -> Result<Url, ParseUrlError> {
    join_segments(base, &api_segments())
}

/// Builds the JSON API location for a paste, `<base>/api/pastes/<id>`.
///
/// # Errors
///
/// Returns an error if `base` cannot carry a path.
pub fn api_url(base: &Url, id: &str) -> Result<Url, ParseUrlError> {
    let mut segments = api_segments();
    segments.push(id);
    join_segments(base, &segments)
}

fn api_segments() -> Vec<&'static str> {
    API_ENDPOINT.split('/').filter(|s| !s.is_empty()).collect()
}

fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, ParseUrlError> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| ParseUrlError::BadUrl)?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// A paste link split back into the instance it lives on and its id.
#[derive(Debug, PartialEq, Eq)]
pub struct PasteUrl {
    pub base: Url,
    pub id: String,
}

impl FromStr for PasteUrl {
    type Err = ParseUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut base = Url::from_str(s).map_err(|_| ParseUrlError::BadUrl)?;
        base.set_query(None);
        base.set_fragment(None);

        let mut segments: Vec<String> = base
            .path_segments()
            .ok_or(ParseUrlError::BadUrl)?
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();

        let id = segments.pop().ok_or(ParseUrlError::MissingId)?;
        if segments.pop().as_deref() != Some(VIEW_SEGMENT) {
            return Err(ParseUrlError::MissingId);
        }

        base.set_path(&segments.join("/"));

        Ok(Self { base, id })
    }
}
