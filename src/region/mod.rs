//! Region and subscription resolution
//!
//! Decides which regions each API is scanned in and whether the tenancy is
//! actually subscribed to a region. Checks skip, rather than fail, regions the
//! tenancy has not subscribed to.

use crate::cache::{CacheEntry, CacheKey, ResourceCache, SourceTrace};
use crate::config::ScanSettings;
use std::collections::HashMap;

/// Service and operation holding the tenancy's region subscriptions
const SUBSCRIPTION_SERVICE: &str = "regionSubscription";
const SUBSCRIPTION_OPERATION: &str = "list";

/// Commercial realm regions
const COMMERCIAL_REGIONS: &[&str] = &[
    // Americas
    "us-ashburn-1",
    "us-phoenix-1",
    "us-sanjose-1",
    "us-chicago-1",
    "ca-toronto-1",
    "ca-montreal-1",
    "sa-saopaulo-1",
    "sa-vinhedo-1",
    "sa-santiago-1",
    "mx-queretaro-1",
    // Europe
    "uk-london-1",
    "uk-cardiff-1",
    "eu-frankfurt-1",
    "eu-zurich-1",
    "eu-amsterdam-1",
    "eu-milan-1",
    "eu-marseille-1",
    "eu-stockholm-1",
    "eu-paris-1",
    "eu-madrid-1",
    // Middle East & Africa
    "me-jeddah-1",
    "me-dubai-1",
    "me-abudhabi-1",
    "il-jerusalem-1",
    "af-johannesburg-1",
    // Asia Pacific
    "ap-mumbai-1",
    "ap-hyderabad-1",
    "ap-seoul-1",
    "ap-chuncheon-1",
    "ap-tokyo-1",
    "ap-osaka-1",
    "ap-singapore-1",
    "ap-sydney-1",
    "ap-melbourne-1",
];

/// Government realm regions
const GOVCLOUD_REGIONS: &[&str] = &[
    "us-langley-1",
    "us-luke-1",
    "us-gov-ashburn-1",
    "us-gov-chicago-1",
    "us-gov-phoenix-1",
];

/// Services whose collection is pinned to the home region
const HOME_REGION_SERVICES: &[&str] = &["regionSubscription", "user", "group", "policy", "tenancy"];

/// Ordered region lists per API service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSet {
    default: Vec<String>,
    by_service: HashMap<String, Vec<String>>,
}

impl RegionSet {
    /// Build the region set of a realm
    pub fn for_realm(govcloud: bool) -> Self {
        let regions = if govcloud {
            GOVCLOUD_REGIONS
        } else {
            COMMERCIAL_REGIONS
        };
        Self::new(regions.iter().map(|r| r.to_string()).collect())
    }

    /// A region set that scans every service in `regions`
    pub fn new(regions: Vec<String>) -> Self {
        Self {
            default: regions,
            by_service: HashMap::new(),
        }
    }

    /// Override the region list of one service
    pub fn with_service(mut self, service: &str, regions: Vec<String>) -> Self {
        self.by_service.insert(service.to_string(), regions);
        self
    }

    /// Regions to scan for `service`, in scan order
    pub fn regions_for(&self, service: &str) -> &[String] {
        self.by_service
            .get(service)
            .map(|r| r.as_slice())
            .unwrap_or(&self.default)
    }

    /// Every region of the realm
    pub fn all(&self) -> &[String] {
        &self.default
    }
}

/// Resolves region sets and region subscriptions for one scan
#[derive(Debug, Clone)]
pub struct RegionResolver {
    regions: RegionSet,
    home_region: String,
}

impl RegionResolver {
    /// Create a resolver for the realm and home region named in `settings`
    pub fn new(settings: &ScanSettings) -> Self {
        Self::with_regions(RegionSet::for_realm(settings.govcloud), settings.home_region.clone())
    }

    /// Create a resolver over an explicit region set
    pub fn with_regions(regions: RegionSet, home_region: Option<String>) -> Self {
        let home_region = home_region
            .or_else(|| regions.all().first().cloned())
            .unwrap_or_default();

        let mut regions = regions;
        for service in HOME_REGION_SERVICES {
            if !regions.by_service.contains_key(*service) {
                regions = regions.with_service(service, vec![home_region.clone()]);
            }
        }

        Self {
            regions,
            home_region,
        }
    }

    pub fn home_region(&self) -> &str {
        &self.home_region
    }

    /// Regions to scan for `service`, in scan order
    pub fn regions_for(&self, service: &str) -> &[String] {
        self.regions.regions_for(service)
    }

    /// Whether the tenancy is subscribed to `region`
    ///
    /// Without usable subscription data nothing is excluded; a region is only
    /// skipped when the subscription list exists and does not name it as ready.
    pub fn check_region_subscription(
        &self,
        cache: &ResourceCache,
        source: &mut SourceTrace,
        region: &str,
    ) -> bool {
        let key = CacheKey::new(SUBSCRIPTION_SERVICE, SUBSCRIPTION_OPERATION, &self.home_region);
        let entry = source.add_source(cache, key);

        let subscribed = match entry.as_ref() {
            CacheEntry::Missing | CacheEntry::Errored(_) => true,
            CacheEntry::Ready(subscriptions) => subscriptions.iter().any(|sub| {
                let name_matches = sub.get("regionName").and_then(|v| v.as_str()) == Some(region);
                let ready = sub
                    .get("status")
                    .and_then(|v| v.as_str())
                    .map(|s| s.eq_ignore_ascii_case("READY"))
                    .unwrap_or(true);
                name_matches && ready
            }),
        };

        if !subscribed {
            tracing::debug!("Region {} is not subscribed, skipping", region);
        }
        subscribed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscriptions(items: serde_json::Value) -> ResourceCache {
        ResourceCache::from_json(json!({
            "regionSubscription": { "list": { "us-ashburn-1": { "data": items } } }
        }))
        .unwrap()
    }

    #[test]
    fn test_commercial_and_govcloud_sets_differ() {
        let commercial = RegionSet::for_realm(false);
        let gov = RegionSet::for_realm(true);
        assert!(commercial.all().contains(&"us-ashburn-1".to_string()));
        assert!(gov.all().contains(&"us-langley-1".to_string()));
        assert!(!commercial.all().contains(&"us-langley-1".to_string()));
    }

    #[test]
    fn test_home_region_defaults_to_first_region() {
        let resolver = RegionResolver::new(&ScanSettings {
            govcloud: true,
            ..ScanSettings::default()
        });
        assert_eq!(resolver.home_region(), "us-langley-1");
        assert_eq!(resolver.regions_for("regionSubscription"), ["us-langley-1"]);
        assert_eq!(resolver.regions_for("bootVolume").len(), GOVCLOUD_REGIONS.len());
    }

    #[test]
    fn test_service_override_keeps_order() {
        let regions = RegionSet::new(vec!["a".into(), "b".into()])
            .with_service("bootVolume", vec!["b".into(), "a".into()]);
        assert_eq!(regions.regions_for("bootVolume"), ["b", "a"]);
        assert_eq!(regions.regions_for("instance"), ["a", "b"]);
    }

    #[test]
    fn test_subscription_list_filters_regions() {
        let cache = subscriptions(json!([
            { "regionName": "us-ashburn-1", "status": "READY" },
            { "regionName": "us-phoenix-1", "status": "IN_PROGRESS" }
        ]));
        let resolver = RegionResolver::new(&ScanSettings::default());
        let mut source = SourceTrace::new();

        assert!(resolver.check_region_subscription(&cache, &mut source, "us-ashburn-1"));
        assert!(!resolver.check_region_subscription(&cache, &mut source, "us-phoenix-1"));
        assert!(!resolver.check_region_subscription(&cache, &mut source, "uk-london-1"));
        assert!(source.contains(&CacheKey::new("regionSubscription", "list", "us-ashburn-1")));
    }

    #[test]
    fn test_no_subscription_data_excludes_nothing() {
        let resolver = RegionResolver::new(&ScanSettings::default());
        let mut source = SourceTrace::new();
        assert!(resolver.check_region_subscription(&ResourceCache::new(), &mut source, "ap-tokyo-1"));

        let errored = ResourceCache::from_json(json!({
            "regionSubscription": { "list": { "us-ashburn-1": { "err": "denied" } } }
        }))
        .unwrap();
        assert!(resolver.check_region_subscription(&errored, &mut source, "ap-tokyo-1"));
    }
}
