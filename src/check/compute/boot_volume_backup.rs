//! Boot Volume Backup Enabled
//!
//! Every boot volume should be assigned a backup policy so it can be restored
//! after a compromise or hardware failure.

use crate::cache::{format_error, CacheEntry};
use crate::check::{for_each_region, Check, CheckContext, CheckMetadata, CheckOutput, RegionScope, Status};
use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashSet;

const METADATA: CheckMetadata = CheckMetadata {
    id: "bootVolumeBackupEnabled",
    title: "Boot Volume Backup Enabled",
    category: "Compute",
    description: "Ensures boot volumes have a backup policy.",
    more_info: "Enabling a boot volume backup policy ensures that the boot volumes can be \
                restored in the event of a compromised system or hardware failure.",
    recommended_action: "Ensure all boot volumes have a backup policy.",
    link: "https://docs.cloud.oracle.com/iaas/Content/Block/Concepts/bootvolumes.htm",
    apis: &["bootVolume:list", "volumeBackupPolicyAssignment:bootVolume"],
};

/// Assignment fields that may carry the boot volume id
const ASSIGNMENT_VOLUME_FIELDS: &[&str] = &["assetId", "bootVolumeId"];

pub struct BootVolumeBackupEnabled {
    metadata: CheckMetadata,
}

impl BootVolumeBackupEnabled {
    pub fn new() -> Self {
        Self { metadata: METADATA }
    }
}

impl Default for BootVolumeBackupEnabled {
    fn default() -> Self {
        Self::new()
    }
}

impl Check for BootVolumeBackupEnabled {
    fn metadata(&self) -> &CheckMetadata {
        &self.metadata
    }

    fn run<'a>(&'a self, ctx: &'a CheckContext) -> BoxFuture<'a, Result<CheckOutput>> {
        async move { Ok(for_each_region(ctx, "bootVolume", check_region).await) }.boxed()
    }
}

async fn check_region(mut scope: RegionScope) -> RegionScope {
    let boot_volumes = scope.add_source("bootVolume", "list");
    let volumes = match boot_volumes.as_ref() {
        CacheEntry::Missing => return scope,
        CacheEntry::Errored(_) => {
            let message = format!("Unable to query for boot volume attachments: {}", format_error(&boot_volumes));
            scope.add_result(Status::Error, message);
            return scope;
        }
        CacheEntry::Ready(volumes) => volumes,
    };

    if volumes.is_empty() {
        scope.add_result(Status::Pass, "No boot volumes found");
        return scope;
    }

    let volume_ids = unique_ids(volumes);

    let assignments = scope.add_source("volumeBackupPolicyAssignment", "bootVolume");
    let assignments = match assignments.as_ref() {
        CacheEntry::Missing => return scope,
        CacheEntry::Errored(_) => {
            let message = format!(
                "Unable to query for boot volume backups: {}",
                format_error(&assignments)
            );
            scope.add_result(Status::Error, message);
            return scope;
        }
        CacheEntry::Ready(assignments) => assignments,
    };

    let covered: HashSet<&str> = assignments.iter().filter_map(assigned_volume).collect();
    let unprotected: Vec<&str> = volume_ids
        .into_iter()
        .filter(|id| !covered.contains(id))
        .collect();

    tracing::debug!(
        "{}: {} boot volumes without a backup policy",
        scope.region(),
        unprotected.len()
    );

    if unprotected.is_empty() {
        scope.add_result(Status::Pass, "All boot volumes have a backup policy");
    } else {
        let message = format!(
            "The following boot volumes do not have a backup policy: {}",
            unprotected.join(", ")
        );
        scope.add_result(Status::Fail, message);
    }
    scope
}

/// Boot volume ids in first-seen order, without duplicates
fn unique_ids(volumes: &[Value]) -> Vec<&str> {
    let mut seen = HashSet::new();
    volumes
        .iter()
        .filter_map(|v| v.get("id").and_then(|id| id.as_str()))
        .filter(|id| seen.insert(*id))
        .collect()
}

/// The boot volume an assignment points at
fn assigned_volume(assignment: &Value) -> Option<&str> {
    ASSIGNMENT_VOLUME_FIELDS
        .iter()
        .find_map(|field| assignment.get(*field).and_then(|v| v.as_str()))
}
