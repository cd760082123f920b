//! Helm coverage repair for tbc/wrath armor metadata.
//!
//! The tbc and wrath model viewer data sets set `Item.HideGeosetMale` and
//! `Item.HideGeosetFemale` on helms that should not hide any geoset. Before
//! such a payload is cached, both flags are nulled when either
//!
//! - the item id is in the [`KnownBadIds`] table, or
//! - the classic data set's document for the same item has a falsy
//!   `Item.HideGeosetMale` (absent, `null`, `false`, `0` or `""`).
//!
//! If the classic document cannot be fetched the payload is kept as-is; a
//! correction is only made when there is something to compare against. A
//! classic document that arrives but is not JSON aborts the repair, so
//! nothing gets cached for that target.

use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::http::request::split_query;
use crate::upstream::{FetchOutcome, Fetcher};

mod known_bad;

pub use known_bad::{KNOWN_BAD_HELM_IDS, KnownBadIds};

/// Variant whose metadata is treated as the reference.
pub const REFERENCE_VARIANT: &str = "classic";

const MARKER: &[u8] = b"HideGeosetMale";

static HELM_ROUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/modelviewer/(?:tbc|wrath)(/meta/armor/1/(\d+)\.json)$").unwrap()
});

/// Errors that abort a repair.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("payload for {target} is not valid JSON: {source}")]
    MalformedPayload {
        target: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("reference {reference} for {target} is not valid JSON: {source}")]
    MalformedReference {
        target: String,
        reference: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A request target that falls under the repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmRoute {
    /// Item id from the trailing path segment; `None` if it overflows `u64`.
    pub id: Option<u64>,
    /// The same target with the variant segment swapped for the reference variant.
    pub reference_target: String,
}

impl HelmRoute {
    /// Matches `/modelviewer/{tbc|wrath}/meta/armor/1/{digits}.json` against
    /// the path component of `target`.
    pub fn parse(target: &str) -> Option<Self> {
        let (path, query) = split_query(target);
        let caps = HELM_ROUTE.captures(path)?;

        let mut reference_target = format!("/modelviewer/{REFERENCE_VARIANT}{}", &caps[1]);
        if let Some(query) = query {
            reference_target.push('?');
            reference_target.push_str(query);
        }

        Some(Self {
            id: caps[2].parse().ok(),
            reference_target,
        })
    }
}

/// The repair policy: which ids are always cleared.
#[derive(Debug, Clone, Default)]
pub struct HelmRepair {
    known_bad: KnownBadIds,
}

impl HelmRepair {
    pub fn new(known_bad: KnownBadIds) -> Self {
        Self { known_bad }
    }

    /// Returns `true` if payloads for `target` go through [`repair`](Self::repair).
    pub fn applies_to(&self, target: &str) -> bool {
        HelmRoute::parse(target).is_some()
    }

    /// Returns the payload to cache for `target`.
    ///
    /// Payloads for other routes, and payloads that never mention the marker
    /// field, come back untouched without being parsed. At most one reference
    /// fetch is issued, and only for ids outside the known-bad table.
    ///
    /// # Errors
    ///
    /// [`RepairError::MalformedReference`] if the reference document was
    /// fetched but is not valid JSON, and [`RepairError::MalformedPayload`]
    /// if the flags must be cleared but the payload itself is not valid JSON.
    pub async fn repair<F: Fetcher>(
        &self,
        fetcher: &F,
        target: &str,
        payload: Bytes,
    ) -> Result<Bytes, RepairError> {
        let Some(route) = HelmRoute::parse(target) else {
            return Ok(payload);
        };

        if !contains_marker(&payload) {
            debug!(target = %target, "no geoset flags in payload");
            return Ok(payload);
        }

        let should_clear = if route.id.is_some_and(|id| self.known_bad.contains(id)) {
            true
        } else {
            match fetcher.fetch(&route.reference_target).await {
                FetchOutcome::Success(reference) => {
                    let hides = reference_hides_geoset(&reference).map_err(|source| {
                        RepairError::MalformedReference {
                            target: target.to_owned(),
                            reference: route.reference_target.clone(),
                            source,
                        }
                    })?;
                    !hides
                }
                FetchOutcome::Failure(status) => {
                    debug!(
                        target = %target,
                        reference = %route.reference_target,
                        status = status.as_u16(),
                        "reference unavailable, keeping payload"
                    );
                    return Ok(payload);
                }
            }
        };

        if !should_clear {
            return Ok(payload);
        }

        let repaired =
            clear_geoset_flags(&payload).map_err(|source| RepairError::MalformedPayload {
                target: target.to_owned(),
                source,
            })?;
        info!(target = %target, id = ?route.id, "cleared helm geoset flags");
        Ok(repaired)
    }
}

fn contains_marker(payload: &[u8]) -> bool {
    payload.windows(MARKER.len()).any(|w| w == MARKER)
}

// A missing `Item` or flag counts as not hiding anything.
fn reference_hides_geoset(reference: &[u8]) -> Result<bool, serde_json::Error> {
    let doc: Value = serde_json::from_slice(reference)?;
    Ok(doc
        .get("Item")
        .and_then(|item| item.get("HideGeosetMale"))
        .is_some_and(is_truthy))
}

/// JavaScript truthiness, which is what the upstream data was authored against.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn clear_geoset_flags(payload: &[u8]) -> Result<Bytes, serde_json::Error> {
    let mut doc: Value = serde_json::from_slice(payload)?;
    if let Some(item) = doc.get_mut("Item").and_then(Value::as_object_mut) {
        item.insert("HideGeosetMale".to_owned(), Value::Null);
        item.insert("HideGeosetFemale".to_owned(), Value::Null);
    }
    Ok(Bytes::from(serde_json::to_vec(&doc)?))
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::http::StatusCode;

    struct StubFetcher {
        outcome: FetchOutcome,
        seen: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        fn answering(outcome: FetchOutcome) -> Self {
            Self {
                outcome,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn reference(doc: Value) -> Self {
            Self::answering(FetchOutcome::Success(Bytes::from(doc.to_string())))
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Fetcher for StubFetcher {
        fn fetch(&self, target: &str) -> impl Future<Output = FetchOutcome> + Send {
            self.seen.lock().unwrap().push(target.to_owned());
            let outcome = self.outcome.clone();
            async move { outcome }
        }

        fn url(&self, target: &str) -> String {
            format!("http://stub{target}")
        }
    }

    const HIDDEN: &[u8] = br#"{"Item":{"HideGeosetMale":true,"HideGeosetFemale":true}}"#;
    const CLEARED: &[u8] = br#"{"Item":{"HideGeosetMale":null,"HideGeosetFemale":null}}"#;

    async fn run(fetcher: &StubFetcher, target: &str, payload: &'static [u8]) -> Bytes {
        HelmRepair::default()
            .repair(fetcher, target, Bytes::from_static(payload))
            .await
            .unwrap()
    }

    #[test]
    fn route_matches_affected_variants_only() {
        let route = HelmRoute::parse("/modelviewer/tbc/meta/armor/1/15372.json").unwrap();
        assert_eq!(route.id, Some(15372));
        assert_eq!(
            route.reference_target,
            "/modelviewer/classic/meta/armor/1/15372.json"
        );

        let route = HelmRoute::parse("/modelviewer/wrath/meta/armor/1/7.json?v=3").unwrap();
        assert_eq!(
            route.reference_target,
            "/modelviewer/classic/meta/armor/1/7.json?v=3"
        );

        for target in [
            "/modelviewer/classic/meta/armor/1/15372.json",
            "/modelviewer/retail/meta/armor/1/15372.json",
            "/modelviewer/tbc/meta/armor/2/15372.json",
            "/modelviewer/tbc/meta/item/1/15372.json",
            "/modelviewer/tbc/meta/armor/1/abc.json",
            "/modelviewer/tbc/meta/armor/1/15372.json/extra",
            "/prefix/modelviewer/tbc/meta/armor/1/15372.json",
        ] {
            assert_eq!(HelmRoute::parse(target), None, "{target}");
        }
    }

    #[test]
    fn oversized_id_is_not_in_the_table() {
        let route = HelmRoute::parse("/modelviewer/tbc/meta/armor/1/99999999999999999999999.json")
            .unwrap();
        assert_eq!(route.id, None);
    }

    #[test]
    fn truthiness_follows_javascript() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!("")] {
            assert!(!is_truthy(&falsy), "{falsy}");
        }
        for truthy in [json!(true), json!(1), json!(-2.5), json!("0"), json!([]), json!({})] {
            assert!(is_truthy(&truthy), "{truthy}");
        }
    }

    #[tokio::test]
    async fn known_bad_id_is_cleared_without_reference_fetch() {
        let fetcher = StubFetcher::answering(FetchOutcome::Failure(StatusCode::NOT_FOUND));
        let out = run(&fetcher, "/modelviewer/tbc/meta/armor/1/15372.json", HIDDEN).await;
        assert_eq!(out.as_ref(), CLEARED);
        assert!(fetcher.seen().is_empty());
    }

    #[tokio::test]
    async fn reference_hiding_keeps_payload() {
        let fetcher = StubFetcher::reference(json!({"Item": {"HideGeosetMale": true}}));
        let out = run(&fetcher, "/modelviewer/wrath/meta/armor/1/100.json", HIDDEN).await;
        assert_eq!(out.as_ref(), HIDDEN);
        assert_eq!(fetcher.seen(), vec!["/modelviewer/classic/meta/armor/1/100.json"]);
    }

    #[tokio::test]
    async fn reference_not_hiding_clears_payload() {
        let fetcher = StubFetcher::reference(json!({"Item": {"HideGeosetMale": false}}));
        let out = run(&fetcher, "/modelviewer/wrath/meta/armor/1/100.json", HIDDEN).await;
        assert_eq!(out.as_ref(), CLEARED);
    }

    #[tokio::test]
    async fn reference_without_field_clears_payload() {
        let fetcher = StubFetcher::reference(json!({"Item": {"Slot": 1}}));
        let out = run(&fetcher, "/modelviewer/tbc/meta/armor/1/100.json", HIDDEN).await;
        assert_eq!(out.as_ref(), CLEARED);
    }

    #[tokio::test]
    async fn malformed_reference_aborts_repair() {
        let fetcher =
            StubFetcher::answering(FetchOutcome::Success(Bytes::from_static(b"<html>oops")));
        let err = HelmRepair::default()
            .repair(
                &fetcher,
                "/modelviewer/tbc/meta/armor/1/100.json",
                Bytes::from_static(HIDDEN),
            )
            .await
            .unwrap_err();
        match err {
            RepairError::MalformedReference { reference, .. } => {
                assert_eq!(reference, "/modelviewer/classic/meta/armor/1/100.json");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn failed_reference_keeps_payload() {
        let fetcher = StubFetcher::answering(FetchOutcome::Failure(StatusCode::REQUEST_TIMEOUT));
        let out = run(&fetcher, "/modelviewer/tbc/meta/armor/1/100.json", HIDDEN).await;
        assert_eq!(out.as_ref(), HIDDEN);
        assert_eq!(fetcher.seen().len(), 1);
    }

    #[tokio::test]
    async fn other_routes_pass_through() {
        let fetcher = StubFetcher::reference(json!({}));
        let out = run(&fetcher, "/modelviewer/classic/meta/armor/1/15372.json", HIDDEN).await;
        assert_eq!(out.as_ref(), HIDDEN);
        assert!(fetcher.seen().is_empty());
        assert!(!HelmRepair::default().applies_to("/modelviewer/classic/meta/item/1/123.json"));
    }

    #[tokio::test]
    async fn payload_without_marker_is_not_parsed() {
        let fetcher = StubFetcher::reference(json!({}));
        let out = run(&fetcher, "/modelviewer/tbc/meta/armor/1/15372.json", b"not json at all").await;
        assert_eq!(out.as_ref(), b"not json at all");
        assert!(fetcher.seen().is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_fatal_when_clearing() {
        let fetcher = StubFetcher::reference(json!({}));
        let err = HelmRepair::default()
            .repair(
                &fetcher,
                "/modelviewer/tbc/meta/armor/1/15372.json",
                Bytes::from_static(b"{\"HideGeosetMale\": tru"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepairError::MalformedPayload { .. }));
    }

    #[tokio::test]
    async fn key_order_and_other_fields_survive() {
        let fetcher = StubFetcher::reference(json!({}));
        let payload: &'static [u8] =
            br#"{"Model":5,"Item":{"Slot":1,"HideGeosetMale":1,"HideGeosetFemale":1,"Textures":{"a":"b"}},"Zeta":[1,2]}"#;
        let out = run(&fetcher, "/modelviewer/tbc/meta/armor/1/100.json", payload).await;
        assert_eq!(
            out.as_ref(),
            br#"{"Model":5,"Item":{"Slot":1,"HideGeosetMale":null,"HideGeosetFemale":null,"Textures":{"a":"b"}},"Zeta":[1,2]}"#
        );
    }

    #[tokio::test]
    async fn non_object_item_is_left_alone() {
        let fetcher = StubFetcher::reference(json!({}));
        let payload: &'static [u8] = br#"{"Item":null, "HideGeosetMale":true}"#;
        let out = run(&fetcher, "/modelviewer/tbc/meta/armor/1/15372.json", payload).await;
        // Still re-serialized compactly, but nothing to clear.
        assert_eq!(out.as_ref(), br#"{"Item":null,"HideGeosetMale":true}"#);
    }

    #[tokio::test]
    async fn custom_table_replaces_builtin() {
        let fetcher = StubFetcher::reference(json!({"Item": {"HideGeosetMale": true}}));
        let repair = HelmRepair::new(KnownBadIds::new([100]));
        let out = repair
            .repair(&fetcher, "/modelviewer/tbc/meta/armor/1/100.json", Bytes::from_static(HIDDEN))
            .await
            .unwrap();
        assert_eq!(out.as_ref(), CLEARED);
        assert!(fetcher.seen().is_empty());
    }
}
