//! Compute service checks

mod boot_volume_backup;

pub use boot_volume_backup::BootVolumeBackupEnabled;
