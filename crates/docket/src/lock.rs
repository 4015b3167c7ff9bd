//! Tenant execution lock.
//!
//! One run per coordination triplet at a time: scheduler ticks and manual
//! executes both acquire this lock before touching the portal. The lock
//! file carries pid/hostname/timestamp JSON so a stale holder can be
//! diagnosed and taken over.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LOCK_FILE: &str = "execution.lock";

/// Information stored in the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

/// Lock handle that releases on Drop.
#[derive(Debug)]
pub struct TenantLock {
    path: PathBuf,
}

impl TenantLock {
    /// Acquire the lock under `tenant_root`. Fails if a non-stale lock is
    /// already held.
    pub fn acquire(tenant_root: &Path) -> Result<Self> {
        let lock_path = tenant_root.join(LOCK_FILE);
        fs::create_dir_all(tenant_root)
            .with_context(|| format!("failed to create tenant dir {}", tenant_root.display()))?;

        if lock_path.exists() {
            let info = read_lock_info(&lock_path)?;
            bail!(
                "execution lock already held by pid {} on {} since {} (plan_id: {:?})",
                info.pid,
                info.hostname,
                info.acquired_at,
                info.plan_id
            );
        }

        let info = LockInfo {
            pid: std::process::id(),
            hostname: hostname(),
            acquired_at: Utc::now(),
            plan_id: None,
        };
        write_lock_atomic(&lock_path, &info)?;

        Ok(Self { path: lock_path })
    }

    /// Acquire, taking over locks older than `stale_after` or unreadable.
    pub fn acquire_with_takeover(tenant_root: &Path, stale_after: Duration) -> Result<Self> {
        let lock_path = tenant_root.join(LOCK_FILE);

        if lock_path.exists() {
            match read_lock_info(&lock_path) {
                Ok(info) => {
                    let age = Utc::now() - info.acquired_at;
                    if age.num_seconds().unsigned_abs() > stale_after.as_secs() {
                        fs::remove_file(&lock_path).with_context(|| {
                            format!("failed to remove stale lock {}", lock_path.display())
                        })?;
                    } else {
                        bail!(
                            "execution lock already held by pid {} on {} since {} (age: {:?})",
                            info.pid,
                            info.hostname,
                            info.acquired_at,
                            age
                        );
                    }
                }
                Err(_) => {
                    // Corrupt lock file; remove it.
                    fs::remove_file(&lock_path).with_context(|| {
                        format!("failed to remove corrupt lock {}", lock_path.display())
                    })?;
                }
            }
        }

        Self::acquire(tenant_root)
    }

    pub fn set_plan_id(&self, plan_id: &str) -> Result<()> {
        let mut info = read_lock_info(&self.path)?;
        info.plan_id = Some(plan_id.to_string());
        write_lock_atomic(&self.path, &info)
    }

    pub fn release(&mut self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove lock {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn is_locked(tenant_root: &Path) -> bool {
        tenant_root.join(LOCK_FILE).exists()
    }

    pub fn read_info(tenant_root: &Path) -> Result<LockInfo> {
        read_lock_info(&tenant_root.join(LOCK_FILE))
    }
}

impl Drop for TenantLock {
    fn drop(&mut self) {
        // Best effort.
        let _ = self.release();
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

fn read_lock_info(path: &Path) -> Result<LockInfo> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read lock file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse lock JSON from {}", path.display()))
}

fn write_lock_atomic(path: &Path, info: &LockInfo) -> Result<()> {
    let json = serde_json::to_string_pretty(info).context("failed to serialize lock info")?;
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("failed to create lock tmp {}", tmp_path.display()))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("failed to write lock tmp {}", tmp_path.display()))?;
        file.sync_all().context("failed to sync lock file")?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename lock into {}", path.display()))?;
    Ok(())
}
