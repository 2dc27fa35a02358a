//! Backend contracts consumed by the synchronizers.
//!
//! Every trait is implemented for plain closures, which makes it easy to plug in alternative
//! transports (or fakes in tests). [`HttpApi`] implements all of them over HTTP.
use crate::{
    models::{ChangeNumber, SegmentChanges, SplitChanges},
    Result,
};

mod http;

pub use http::{HttpApi, HttpApiConfig};

/// Protocol version of the split changes endpoint.
pub const SPEC_VERSION: &str = "1.1";

/// Options for a single fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Ask intermediate caches for a fresh response (`Cache-Control: no-cache`).
    pub cache_control_headers: bool,
    /// Target change number, sent as a query parameter so the request bypasses CDN caches.
    pub till: Option<ChangeNumber>,
    /// Protocol spec version.
    pub spec: Option<&'static str>,
}

impl FetchOptions {
    /// Options asking for a fresh (uncached) response.
    pub fn no_cache() -> FetchOptions {
        FetchOptions {
            cache_control_headers: true,
            till: None,
            spec: Some(SPEC_VERSION),
        }
    }

    /// Options asking for a fresh response, with `till` in the query string to defeat CDN
    /// caching.
    pub fn cdn_bypass(till: ChangeNumber) -> FetchOptions {
        FetchOptions {
            till: Some(till),
            ..FetchOptions::no_cache()
        }
    }
}

impl Default for FetchOptions {
    fn default() -> FetchOptions {
        FetchOptions {
            cache_control_headers: false,
            till: None,
            spec: Some(SPEC_VERSION),
        }
    }
}

/// Fetches pages of split changes.
pub trait SplitFetcher: Send + Sync {
    /// Fetch the changes that happened after `since`.
    fn fetch(&self, since: ChangeNumber, options: &FetchOptions) -> Result<SplitChanges>;
}

impl<F> SplitFetcher for F
where
    F: Fn(ChangeNumber, &FetchOptions) -> Result<SplitChanges> + Send + Sync,
{
    fn fetch(&self, since: ChangeNumber, options: &FetchOptions) -> Result<SplitChanges> {
        self(since, options)
    }
}

/// Fetches pages of segment changes.
pub trait SegmentFetcher: Send + Sync {
    /// Fetch the changes of `segment_name` that happened after `since`.
    fn fetch(
        &self,
        segment_name: &str,
        since: ChangeNumber,
        options: &FetchOptions,
    ) -> Result<SegmentChanges>;
}

impl<F> SegmentFetcher for F
where
    F: Fn(&str, ChangeNumber, &FetchOptions) -> Result<SegmentChanges> + Send + Sync,
{
    fn fetch(
        &self,
        segment_name: &str,
        since: ChangeNumber,
        options: &FetchOptions,
    ) -> Result<SegmentChanges> {
        self(segment_name, since, options)
    }
}

/// Ships a batch of records to the backend in a single call.
pub trait RecordSender<R>: Send + Sync {
    /// Ship `records`. On error, nothing is assumed to have been received.
    fn send(&self, records: &[R]) -> Result<()>;
}

impl<R, F> RecordSender<R> for F
where
    F: Fn(&[R]) -> Result<()> + Send + Sync,
{
    fn send(&self, records: &[R]) -> Result<()> {
        self(records)
    }
}
