//! Station identity: the key this host is listed under in the station table.
//!
//! Resolution order: explicit override, `dmidecode -s system-uuid`, then the
//! kernel's copy in `/sys/class/dmi/id/product_uuid`. The value is compared
//! against the catalog verbatim, so catalogs should be generated with the
//! same tool that the station uses.

use std::io;
use std::process::{ExitStatus, Output};

use thiserror::Error;

const PRODUCT_UUID_PATH: &str = "/sys/class/dmi/id/product_uuid";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("dmidecode {dmidecode}; cannot read {path}: {source}")]
    Unreadable {
        dmidecode: DmidecodeFailure,
        path: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("dmidecode {dmidecode}; {path} is empty")]
    Empty {
        dmidecode: DmidecodeFailure,
        path: &'static str,
    },
}

/// Why `dmidecode` did not yield a system UUID.
#[derive(Debug, Error)]
pub enum DmidecodeFailure {
    #[error("is not available: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed ({status}): {stderr}")]
    Status { status: ExitStatus, stderr: String },
    #[error("printed no UUID")]
    Blank,
}

pub async fn station_id(override_id: Option<&str>) -> Result<String, IdentityError> {
    if let Some(id) = override_id {
        return Ok(id.to_string());
    }

    let output = tokio::process::Command::new("dmidecode")
        .args(["-s", "system-uuid"])
        .output()
        .await;
    let dmidecode = match system_uuid(output) {
        Ok(id) => return Ok(id),
        Err(e) => e,
    };
    tracing::debug!(reason = %dmidecode, path = PRODUCT_UUID_PATH, "falling back to sysfs");

    match tokio::fs::read_to_string(PRODUCT_UUID_PATH).await {
        Ok(raw) => non_empty(&raw).ok_or(IdentityError::Empty {
            dmidecode,
            path: PRODUCT_UUID_PATH,
        }),
        Err(source) => Err(IdentityError::Unreadable {
            dmidecode,
            path: PRODUCT_UUID_PATH,
            source,
        }),
    }
}

/// Interpret the result of running `dmidecode -s system-uuid`.
fn system_uuid(output: io::Result<Output>) -> Result<String, DmidecodeFailure> {
    let output = output.map_err(DmidecodeFailure::Spawn)?;
    if !output.status.success() {
        return Err(DmidecodeFailure::Status {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    non_empty(&String::from_utf8_lossy(&output.stdout)).ok_or(DmidecodeFailure::Blank)
}

fn non_empty(raw: &str) -> Option<String> {
    let id = raw.trim();
    (!id.is_empty()).then(|| id.to_string())
}
