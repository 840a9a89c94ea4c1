//! The filtering access layer: a read-only view of the served storage
//! locations with a content filter spliced into the intercepted operations.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use lifewire_store::ObjectStore;
use lifewire_types::{AccessFeature, FilterConfiguration, ObjectReference, OperationKind};

use crate::content::{ContentFilter, ReadRequest};
use crate::error::AccessError;
use crate::range::ByteRange;

/// Per-read options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Byte range of the (transformed) body.
    pub range: Option<ByteRange>,
    /// Part number; objects are single-part so only `1` is valid.
    pub part_number: Option<u32>,
    /// Deadline for the whole read. Falls back to the layer's default.
    pub timeout: Option<Duration>,
}

/// Result of a `HeadObject` through the access layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// Length of the body a `GetObject` with the same options would return.
    pub content_length: u64,
    /// Digest of the stored bytes.
    pub etag: String,
    /// When the stored object was last written.
    pub last_modified: DateTime<Utc>,
}

/// Composes an [`ObjectStore`] and a [`ContentFilter`] into a single read
/// interface.
///
/// The layer serves its configuration's `supporting_location` plus any
/// location added with [`FilteringAccessLayer::serving`]; reads elsewhere
/// fail with [`AccessError::UnknownLocation`].
pub struct FilteringAccessLayer {
    store: Arc<dyn ObjectStore>,
    filter: Arc<dyn ContentFilter>,
    config: FilterConfiguration,
    locations: BTreeSet<String>,
    permitted_accounts: BTreeSet<String>,
    default_timeout: Duration,
}

impl FilteringAccessLayer {
    /// Builds a layer admitting only callers in `permitted_accounts`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        filter: Arc<dyn ContentFilter>,
        config: FilterConfiguration,
        permitted_accounts: impl IntoIterator<Item = String>,
        default_timeout: Duration,
    ) -> Self {
        let locations = BTreeSet::from([config.supporting_location.clone()]);
        Self {
            store,
            filter,
            config,
            locations,
            permitted_accounts: permitted_accounts.into_iter().collect(),
            default_timeout,
        }
    }

    /// Also serves `locations`, under the same filter and boundary.
    pub fn serving(mut self, locations: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.locations.extend(locations.into_iter().map(Into::into));
        self
    }

    /// Returns `true` if reads on `location` are served.
    pub fn serves(&self, location: &str) -> bool {
        self.locations.contains(location)
    }

    /// The configuration this layer enforces.
    pub fn config(&self) -> &FilterConfiguration {
        &self.config
    }

    /// Reads an object. Intercepted reads return
    /// `filter.transform(object, raw, request)`; others return the stored
    /// bytes (ranged if asked).
    ///
    /// # Errors
    ///
    /// `AccessDenied` comes first and never touches the store or the filter.
    /// Feature and part-number checks follow, then store and filter errors.
    /// A read that outlives its deadline fails with the retryable
    /// [`AccessError::Timeout`].
    pub async fn get(
        &self,
        caller: &str,
        object: &ObjectReference,
        options: ReadOptions,
    ) -> Result<Bytes, AccessError> {
        let request = self.admit(caller, object, OperationKind::GetObject, &options)?;
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        self.with_deadline(timeout, self.read_body(object, &request))
            .await
    }

    /// Returns the metadata a `GetObject` with the same options would see.
    ///
    /// # Errors
    ///
    /// Same as [`FilteringAccessLayer::get`].
    pub async fn head(
        &self,
        caller: &str,
        object: &ObjectReference,
        options: ReadOptions,
    ) -> Result<ObjectHead, AccessError> {
        let request = self.admit(caller, object, OperationKind::HeadObject, &options)?;
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        self.with_deadline(timeout, async {
            let meta = self.store.head_object(object).await?;
            let content_length = if self.config.intercepts(OperationKind::HeadObject) {
                self.read_body(object, &request).await?.len() as u64
            } else if let Some(range) = request.range {
                let window = range.resolve(meta.size)?;
                window.end - window.start
            } else {
                meta.size
            };
            Ok::<_, AccessError>(ObjectHead {
                content_length,
                etag: meta.etag,
                last_modified: meta.last_modified,
            })
        })
        .await
    }

    /// Lists the keys under `prefix` visible to `caller`.
    ///
    /// For an intercepted listing each candidate is read and kept only if
    /// the filter admits it; objects deleted mid-listing are skipped.
    ///
    /// # Errors
    ///
    /// `AccessDenied` for callers outside the boundary,
    /// [`AccessError::InvalidRequest`] when `operation` is not a listing,
    /// otherwise store, filter and timeout errors.
    pub async fn list(
        &self,
        caller: &str,
        location: &str,
        prefix: &str,
        operation: OperationKind,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>, AccessError> {
        self.authorize(caller)?;
        self.check_location(location)?;
        if !operation.is_list() {
            return Err(AccessError::InvalidRequest(format!(
                "{operation} is not a listing operation"
            )));
        }
        let timeout = timeout.unwrap_or(self.default_timeout);
        self.with_deadline(timeout, async {
            let candidates = self.store.list_objects(location, prefix).await?;
            if !self.config.intercepts(operation) {
                return Ok(candidates.into_iter().map(|m| m.key).collect());
            }
            let mut visible = Vec::with_capacity(candidates.len());
            for meta in candidates {
                let object = ObjectReference::new(location, meta.key.as_str());
                let raw = match self.store.get_object(&object).await {
                    Ok(raw) => raw,
                    Err(lifewire_store::StoreError::NotFound(_)) => continue,
                    Err(e) => return Err(e.into()),
                };
                if self.filter.admits(&object, &raw)? {
                    visible.push(meta.key);
                }
            }
            Ok::<_, AccessError>(visible)
        })
        .await
    }

    fn authorize(&self, caller: &str) -> Result<(), AccessError> {
        if self.permitted_accounts.contains(caller) {
            Ok(())
        } else {
            tracing::warn!(caller, "read rejected: caller outside permitted accounts");
            Err(AccessError::AccessDenied {
                caller: caller.to_string(),
            })
        }
    }

    fn check_location(&self, location: &str) -> Result<(), AccessError> {
        if self.serves(location) {
            Ok(())
        } else {
            Err(AccessError::UnknownLocation(location.to_string()))
        }
    }

    fn require(&self, feature: Option<AccessFeature>) -> Result<(), AccessError> {
        match feature {
            Some(feature) if self.config.allows(feature) => Ok(()),
            Some(feature) => Err(AccessError::UnsupportedFeature(feature)),
            None => Ok(()),
        }
    }

    /// Validates a single-object read and turns it into a filter request.
    fn admit(
        &self,
        caller: &str,
        object: &ObjectReference,
        operation: OperationKind,
        options: &ReadOptions,
    ) -> Result<ReadRequest, AccessError> {
        self.authorize(caller)?;
        self.check_location(&object.storage_location)?;

        if options.range.is_some() {
            self.require(AccessFeature::range_for(operation))?;
        }
        if let Some(part) = options.part_number {
            self.require(AccessFeature::part_number_for(operation))?;
            if options.range.is_some() {
                return Err(AccessError::InvalidRequest(
                    "range and part number cannot be combined".to_string(),
                ));
            }
            if part != 1 {
                return Err(AccessError::InvalidPartNumber(part));
            }
        }

        Ok(ReadRequest {
            operation,
            range: options.range,
            part_number: options.part_number,
        })
    }

    async fn read_body(
        &self,
        object: &ObjectReference,
        request: &ReadRequest,
    ) -> Result<Bytes, AccessError> {
        let raw = self.store.get_object(object).await?;
        if self.config.intercepts(request.operation) {
            tracing::debug!(
                object = %object,
                operation = %request.operation,
                transform = self.filter.name(),
                "applying content filter"
            );
            return Ok(self.filter.transform(object, &raw, request)?);
        }
        match request.range {
            Some(range) => {
                let window = range.resolve(raw.len() as u64)?;
                Ok(raw.slice(window.start as usize..window.end as usize))
            }
            None => Ok(raw),
        }
    }

    async fn with_deadline<T>(
        &self,
        timeout: Duration,
        read: impl Future<Output = Result<T, AccessError>>,
    ) -> Result<T, AccessError> {
        match tokio::time::timeout(timeout, read).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "read timed out");
                Err(AccessError::Timeout(timeout))
            }
        }
    }
}
