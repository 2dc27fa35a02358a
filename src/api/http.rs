//! An HTTP client for the backend.
use std::sync::Arc;

use reqwest::{blocking::Response, header, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};

use super::{FetchOptions, RecordSender, SegmentFetcher, SplitFetcher};
use crate::{
    models::{
        ChangeNumber, Event, Impression, ImpressionCount, SegmentChanges, SplitChanges, UniqueKeys,
    },
    storage::{Resource, TelemetryStats, TelemetryStorage},
    Error, Result,
};

const SDK_VERSION: &str = concat!("rust-", env!("CARGO_PKG_VERSION"));

/// Configuration for [`HttpApi`].
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    /// Key authenticating every request.
    pub api_key: String,
    /// Base URL of the split and segment changes endpoints.
    pub sdk_url: String,
    /// Base URL where impressions and events are shipped.
    pub events_url: String,
    /// Base URL where telemetry and unique keys are shipped.
    pub telemetry_url: String,
}

/// A client that talks to the backend over HTTP.
///
/// Implements every backend contract: [`SplitFetcher`], [`SegmentFetcher`] and
/// [`RecordSender`] for each record type. Failed requests and successful synchronizations are
/// recorded in [`TelemetryStorage`].
pub struct HttpApi {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    api_key: String,
    sdk_url: Url,
    events_url: Url,
    telemetry_url: Url,
    telemetry: Arc<TelemetryStorage>,
}

impl HttpApi {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] if any of the base URLs is not valid.
    pub fn new(config: HttpApiConfig, telemetry: Arc<TelemetryStorage>) -> Result<HttpApi> {
        Ok(HttpApi {
            client: reqwest::blocking::Client::new(),
            api_key: config.api_key,
            sdk_url: parse_base_url(&config.sdk_url)?,
            events_url: parse_base_url(&config.events_url)?,
            telemetry_url: parse_base_url(&config.telemetry_url)?,
            telemetry,
        })
    }

    pub(crate) fn split_changes_url(&self, since: ChangeNumber, options: &FetchOptions) -> Url {
        let mut url = endpoint(&self.sdk_url, &["splitChanges"]);
        {
            let mut query = url.query_pairs_mut();
            if let Some(spec) = options.spec {
                query.append_pair("s", spec);
            }
            query.append_pair("since", &since.to_string());
            if let Some(till) = options.till {
                query.append_pair("till", &till.to_string());
            }
        }
        url
    }

    pub(crate) fn segment_changes_url(
        &self,
        segment_name: &str,
        since: ChangeNumber,
        options: &FetchOptions,
    ) -> Url {
        let mut url = endpoint(&self.sdk_url, &["segmentChanges", segment_name]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("since", &since.to_string());
            if let Some(till) = options.till {
                query.append_pair("till", &till.to_string());
            }
        }
        url
    }

    fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        options: &FetchOptions,
        resource: Resource,
    ) -> Result<T> {
        let mut request = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .header("SplitSDKVersion", SDK_VERSION);
        if options.cache_control_headers {
            request = request.header(header::CACHE_CONTROL, "no-cache");
        }

        let response = self.check_status(request.send()?, resource)?;
        let body = response.json()?;

        self.telemetry.record_successful_sync(resource);
        Ok(body)
    }

    fn post<T: Serialize + ?Sized>(&self, url: Url, body: &T, resource: Resource) -> Result<()> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("SplitSDKVersion", SDK_VERSION)
            .json(body)
            .send()?;
        self.check_status(response, resource)?;

        self.telemetry.record_successful_sync(resource);
        Ok(())
    }

    fn check_status(&self, response: Response, resource: Resource) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        self.telemetry.record_http_error(resource, status.as_u16());
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            log::warn!(target: "splitsync", "client is not authorized. Check your API key");
            return Err(Error::Unauthorized);
        }
        log::warn!(target: "splitsync", status = status.as_u16(); "received non-2xx response from the backend: {:?}", resource);
        Err(Error::Api {
            status: status.as_u16(),
        })
    }
}

impl SplitFetcher for HttpApi {
    fn fetch(&self, since: ChangeNumber, options: &FetchOptions) -> Result<SplitChanges> {
        log::debug!(target: "splitsync", since; "fetching split changes");
        self.get(
            self.split_changes_url(since, options),
            options,
            Resource::Splits,
        )
    }
}

impl SegmentFetcher for HttpApi {
    fn fetch(
        &self,
        segment_name: &str,
        since: ChangeNumber,
        options: &FetchOptions,
    ) -> Result<SegmentChanges> {
        log::debug!(target: "splitsync", segment = segment_name, since; "fetching segment changes");
        self.get(
            self.segment_changes_url(segment_name, since, options),
            options,
            Resource::Segments,
        )
    }
}

impl RecordSender<Impression> for HttpApi {
    fn send(&self, records: &[Impression]) -> Result<()> {
        let url = endpoint(&self.events_url, &["testImpressions", "bulk"]);
        self.post(url, records, Resource::Impressions)
    }
}

impl RecordSender<ImpressionCount> for HttpApi {
    fn send(&self, records: &[ImpressionCount]) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            pf: &'a [ImpressionCount],
        }

        let url = endpoint(&self.events_url, &["testImpressions", "count"]);
        self.post(url, &Body { pf: records }, Resource::ImpressionCounts)
    }
}

impl RecordSender<Event> for HttpApi {
    fn send(&self, records: &[Event]) -> Result<()> {
        let url = endpoint(&self.events_url, &["events", "bulk"]);
        self.post(url, records, Resource::Events)
    }
}

impl RecordSender<UniqueKeys> for HttpApi {
    fn send(&self, records: &[UniqueKeys]) -> Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            keys: &'a [UniqueKeys],
        }

        let url = endpoint(&self.telemetry_url, &["v1", "keys", "ss"]);
        self.post(url, &Body { keys: records }, Resource::UniqueKeys)
    }
}

impl RecordSender<TelemetryStats> for HttpApi {
    fn send(&self, records: &[TelemetryStats]) -> Result<()> {
        let url = endpoint(&self.telemetry_url, &["v1", "metrics", "usage"]);
        for stats in records {
            self.post(url.clone(), stats, Resource::Telemetry)?;
        }
        Ok(())
    }
}

fn parse_base_url(url: &str) -> Result<Url> {
    let url = Url::parse(url).map_err(Error::InvalidBaseUrl)?;
    if url.cannot_be_a_base() {
        return Err(Error::InvalidBaseUrl(
            url::ParseError::RelativeUrlWithCannotBeABaseBase,
        ));
    }
    Ok(url)
}

/// Append path segments to `base`. `base` must have been validated by [`parse_base_url`].
fn endpoint(base: &Url, path: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().extend(path);
    }
    url
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{HttpApi, HttpApiConfig};
    use crate::{api::FetchOptions, storage::TelemetryStorage, Error};

    fn api(sdk_url: &str) -> crate::Result<HttpApi> {
        HttpApi::new(
            HttpApiConfig {
                api_key: "api-key".to_owned(),
                sdk_url: sdk_url.to_owned(),
                events_url: "https://events.example.com/api".to_owned(),
                telemetry_url: "https://telemetry.example.com/api".to_owned(),
            },
            Arc::new(TelemetryStorage::new()),
        )
    }

    #[test]
    fn split_changes_url_embeds_till_only_for_cdn_bypass() {
        let api = api("https://sdk.example.com/api/").unwrap();

        assert_eq!(
            api.split_changes_url(-1, &FetchOptions::no_cache()).as_str(),
            "https://sdk.example.com/api/splitChanges?s=1.1&since=-1"
        );
        assert_eq!(
            api.split_changes_url(100, &FetchOptions::cdn_bypass(150))
                .as_str(),
            "https://sdk.example.com/api/splitChanges?s=1.1&since=100&till=150"
        );
    }

    #[test]
    fn segment_names_are_escaped_in_path() {
        let api = api("https://sdk.example.com/api").unwrap();

        assert_eq!(
            api.segment_changes_url("beta testers", 5, &FetchOptions::no_cache())
                .as_str(),
            "https://sdk.example.com/api/segmentChanges/beta%20testers?since=5"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(matches!(api("not a url"), Err(Error::InvalidBaseUrl(_))));
        assert!(matches!(
            api("mailto:someone@example.com"),
            Err(Error::InvalidBaseUrl(_))
        ));
    }
}
