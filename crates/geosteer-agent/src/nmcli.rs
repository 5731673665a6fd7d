//! NetworkManager backend driven through `nmcli`.
//!
//! All queries use terse mode (`-t`), where fields are separated by `:` and
//! literal colons / backslashes inside values are escaped with `\`.
//! Profile changes are made with `--temporary` so they never reach disk.

use std::collections::HashMap;

use geosteer_core::{
    BackendError, Bssid, ConnectionHandle, ConnectionManager, DeviceDiscovery, DeviceHandle,
    ObservedBssid, WifiProfile, WifiScanner, WifiSlave,
};

const BOND_TYPE: &str = "bond";
const WIFI_TYPE: &str = "802-11-wireless";
const BSSID_PROPERTY: &str = "802-11-wireless.bssid";
const SLAVE_PROPERTIES: &str = "connection.uuid,connection.interface-name,connection.slave-type,\
    connection.master,802-11-wireless.mode,802-11-wireless.ssid";

/// NetworkManager access for one bond master interface.
pub struct NmCli {
    bond_interface: String,
}

/// One row of `nmcli -t -f UUID,TYPE,DEVICE connection show --active`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveConnection {
    uuid: String,
    kind: String,
    device: String,
}

/// The active connection owning the default route, if it is a bond master.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BondMaster {
    uuid: String,
}

impl NmCli {
    pub fn new(bond_interface: impl Into<String>) -> Self {
        Self {
            bond_interface: bond_interface.into(),
        }
    }

    async fn primary_bond(&self) -> Result<BondMaster, BackendError> {
        let out = nmcli(&["-t", "-f", "UUID,TYPE,DEVICE", "connection", "show", "--active"]).await?;
        let mut primary = None;
        for connection in parse_active(&out) {
            if owns_default_route(&connection.uuid).await? {
                primary = Some(connection);
                break;
            }
        }
        primary_bond(primary.as_ref(), &self.bond_interface)
    }

    /// Saved wireless profiles enslaved to `bond`, in NetworkManager order.
    async fn wifi_slaves(&self, bond: &BondMaster) -> Result<Vec<WifiProfile>, BackendError> {
        let out = nmcli(&["-t", "-f", "UUID,TYPE", "connection", "show"]).await?;
        let mut slaves = Vec::new();
        for row in out.lines().map(split_terse) {
            let [uuid, kind] = row.as_slice() else {
                continue;
            };
            if kind != WIFI_TYPE {
                continue;
            }
            let props = nmcli(&[
                "-t",
                "-f",
                SLAVE_PROPERTIES,
                "connection",
                "show",
                uuid.as_str(),
            ])
            .await?;
            let props = parse_properties(&props);
            if let Some(profile) = bond_slave_profile(&props, &bond.uuid, &self.bond_interface) {
                slaves.push(profile);
            }
        }
        Ok(slaves)
    }
}

impl DeviceDiscovery for NmCli {
    async fn find_primary_bonded_wifi_slave(&self) -> Result<WifiSlave, BackendError> {
        let bond = self.primary_bond().await?;
        let profile = self
            .wifi_slaves(&bond)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::NoWifiSlave(self.bond_interface.clone()))?;

        Ok(WifiSlave {
            connection: ConnectionHandle(profile.uuid.clone()),
            device: DeviceHandle(profile.interface.clone()),
            profile,
        })
    }

    async fn list_wifi_slave_interfaces(&self) -> Result<Vec<String>, BackendError> {
        let bond = self.primary_bond().await?;
        Ok(self
            .wifi_slaves(&bond)
            .await?
            .into_iter()
            .map(|p| p.interface)
            .collect())
    }
}

impl WifiScanner for NmCli {
    async fn rescan(&self, device: &DeviceHandle, ssid: &str) -> Result<(), BackendError> {
        nmcli(&["device", "wifi", "rescan", "ifname", &device.0, "ssid", ssid]).await?;
        Ok(())
    }

    async fn list_visible_bssids(
        &self,
        device: &DeviceHandle,
        ssid: &str,
    ) -> Result<Vec<ObservedBssid>, BackendError> {
        let out = nmcli(&[
            "-t",
            "-f",
            "BSSID,SSID,RATE",
            "device",
            "wifi",
            "list",
            "ifname",
            &device.0,
            "--rescan",
            "no",
        ])
        .await?;
        Ok(parse_scan(&out, ssid))
    }
}

impl ConnectionManager for NmCli {
    async fn bssid_override(&self, profile: &WifiProfile) -> Result<Option<Bssid>, BackendError> {
        let out = nmcli(&["-t", "-f", BSSID_PROPERTY, "connection", "show", &profile.uuid]).await?;
        let props = parse_properties(&out);
        match property(&props, BSSID_PROPERTY) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|e| BackendError::Parse {
                command: format!("nmcli connection show {}", profile.uuid),
                detail: format!("{BSSID_PROPERTY} {raw:?}: {e}"),
            }),
        }
    }

    async fn set_bssid_override(
        &self,
        profile: &WifiProfile,
        bssid: Option<Bssid>,
    ) -> Result<(), BackendError> {
        let value = bssid.map(|b| b.to_string()).unwrap_or_default();
        nmcli(&[
            "connection",
            "modify",
            "--temporary",
            &profile.uuid,
            BSSID_PROPERTY,
            &value,
        ])
        .await?;
        Ok(())
    }

    async fn apply_profile(
        &self,
        _profile: &WifiProfile,
        connection: &ConnectionHandle,
    ) -> Result<(), BackendError> {
        nmcli(&["connection", "up", "uuid", &connection.0]).await?;
        Ok(())
    }

    async fn list_active_connections(&self) -> Result<Vec<ConnectionHandle>, BackendError> {
        let out = nmcli(&["-t", "-f", "UUID", "connection", "show", "--active"]).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| ConnectionHandle(l.to_string()))
            .collect())
    }
}

/// Whether the active connection `uuid` holds the IPv4 default route.
async fn owns_default_route(uuid: &str) -> Result<bool, BackendError> {
    let out = nmcli(&["-g", "GENERAL.DEFAULT", "connection", "show", "uuid", uuid]).await?;
    Ok(is_default(&out))
}

/// `nmcli -g GENERAL.DEFAULT` prints `yes` or `no`.
fn is_default(out: &str) -> bool {
    out.trim() == "yes"
}

/// Run `nmcli` with a fixed locale and return its stdout.
async fn nmcli(args: &[&str]) -> Result<String, BackendError> {
    tracing::trace!(?args, "nmcli");
    let output = tokio::process::Command::new("nmcli")
        .args(args)
        .env("LC_ALL", "C")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| BackendError::Command {
            command: command_line(args),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BackendError::Command {
            command: command_line(args),
            message: format!("{} ({})", stderr.trim(), output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn command_line(args: &[&str]) -> String {
    format!("nmcli {}", args.join(" "))
}

/// Split one terse-mode line into unescaped fields.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.extend(chars.next()),
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parse `property:value` lines from `nmcli -t -f <props> connection show <id>`.
fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            let value = split_terse(value).join(":");
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// A property value, treating NetworkManager's unset markers as absent.
fn property<'a>(props: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    props
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty() && *v != "--")
}

fn parse_active(text: &str) -> Vec<ActiveConnection> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let row = split_terse(line);
            let [uuid, kind, device] = row.as_slice() else {
                tracing::warn!(line, "skipping malformed active connection row");
                return None;
            };
            Some(ActiveConnection {
                uuid: uuid.clone(),
                kind: kind.clone(),
                device: device.clone(),
            })
        })
        .collect()
}

fn primary_bond(
    primary: Option<&ActiveConnection>,
    bond_interface: &str,
) -> Result<BondMaster, BackendError> {
    let Some(primary) = primary else {
        return Err(BackendError::UnsupportedTopology("no primary connection".into()));
    };
    if primary.uuid.is_empty() || primary.kind != BOND_TYPE || primary.device != bond_interface {
        return Err(BackendError::UnsupportedTopology(format!(
            "primary connection is {} on {}, expected {BOND_TYPE} on {bond_interface}",
            primary.kind, primary.device
        )));
    }
    Ok(BondMaster {
        uuid: primary.uuid.clone(),
    })
}

/// Build a profile from a wireless connection's properties if it is an
/// infrastructure-mode slave of the given bond.
fn bond_slave_profile(
    props: &HashMap<String, String>,
    bond_uuid: &str,
    bond_interface: &str,
) -> Option<WifiProfile> {
    let uuid = property(props, "connection.uuid")?;
    let interface = property(props, "connection.interface-name")?;
    let master = property(props, "connection.master")?;
    let ssid = property(props, "802-11-wireless.ssid")?;

    let enslaved = property(props, "connection.slave-type") == Some(BOND_TYPE)
        && (master == bond_uuid || master == bond_interface);
    let infrastructure = property(props, "802-11-wireless.mode") == Some("infrastructure");
    if !enslaved || !infrastructure {
        return None;
    }

    Some(WifiProfile {
        uuid: uuid.to_string(),
        interface: interface.to_string(),
        ssid: ssid.to_string(),
    })
}

/// Parse `BSSID:SSID:RATE` rows, keeping those advertising `ssid`.
fn parse_scan(text: &str, ssid: &str) -> Vec<ObservedBssid> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let row = split_terse(line);
            let [bssid, row_ssid, rate] = row.as_slice() else {
                tracing::warn!(line, "skipping malformed scan row");
                return None;
            };
            if row_ssid != ssid {
                return None;
            }
            let address = match bssid.parse() {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(bssid = %bssid, error = %e, "skipping unparseable BSSID");
                    return None;
                }
            };
            let max_bitrate = parse_rate(rate).unwrap_or_else(|| {
                tracing::debug!(bssid = %bssid, rate = %rate, "unknown rate; treating as 0");
                0
            });
            Some(ObservedBssid {
                address,
                max_bitrate,
            })
        })
        .collect()
}

/// `"540 Mbit/s"` → 540.
fn parse_rate(rate: &str) -> Option<u32> {
    rate.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terse_split_unescapes_colons_and_backslashes() {
        assert_eq!(
            split_terse(r"AA\:BB\:CC\:DD\:EE\:10:lab\\net\:5G:540 Mbit/s"),
            vec!["AA:BB:CC:DD:EE:10", r"lab\net:5G", "540 Mbit/s"]
        );
        assert_eq!(split_terse(""), vec![""]);
        assert_eq!(split_terse("a::b"), vec!["a", "", "b"]);
    }

    // Captured from `nmcli -t -f UUID,TYPE,DEVICE connection show --active`
    // on a station with a bonded wireless slave.
    const ACTIVE: &str = "\
1e7c5a80-0000-4000-8000-000000000001:bond:master
3c3f1b0e-0000-4000-8000-000000000002:802-11-wireless:wlan0
8a41c2d4-0000-4000-8000-000000000004:loopback:lo
";

    #[test]
    fn active_rows_parse_in_listing_order() {
        let rows = parse_active(ACTIVE);
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            ActiveConnection {
                uuid: "1e7c5a80-0000-4000-8000-000000000001".into(),
                kind: "bond".into(),
                device: "master".into(),
            }
        );
        assert_eq!(rows[1].kind, WIFI_TYPE);
        assert!(parse_active("\n").is_empty());
        assert!(parse_active("only-two:fields\n").is_empty());
    }

    #[test]
    fn primary_bond_requires_bond_on_configured_interface() {
        let rows = parse_active(ACTIVE);
        assert_eq!(
            primary_bond(rows.first(), "master").unwrap(),
            BondMaster {
                uuid: "1e7c5a80-0000-4000-8000-000000000001".into()
            }
        );
        assert!(matches!(
            primary_bond(rows.first(), "bond0"),
            Err(BackendError::UnsupportedTopology(_))
        ));
    }

    #[test]
    fn default_route_flag() {
        assert!(is_default("yes\n"));
        assert!(!is_default("no\n"));
        assert!(!is_default(""));
    }

    #[test]
    fn primary_bond_rejects_non_bond_primary() {
        let rows = parse_active("5f1e0000-0000-4000-8000-000000000003:802-3-ethernet:eth0\n");
        assert!(matches!(
            primary_bond(rows.first(), "master"),
            Err(BackendError::UnsupportedTopology(_))
        ));
        assert!(matches!(
            primary_bond(None, "master"),
            Err(BackendError::UnsupportedTopology(_))
        ));
    }

    fn slave_props(master: &str, mode: &str) -> HashMap<String, String> {
        parse_properties(&format!(
            "connection.uuid:3c3f1b0e-0000-4000-8000-000000000002\n\
             connection.interface-name:wlan0\n\
             connection.slave-type:bond\n\
             connection.master:{master}\n\
             802-11-wireless.mode:{mode}\n\
             802-11-wireless.ssid:plant\\:floor\n"
        ))
    }

    #[test]
    fn bond_slave_profile_accepts_master_by_uuid_or_interface() {
        let bond = "1e7c5a80-0000-4000-8000-000000000001";
        let by_uuid = bond_slave_profile(&slave_props(bond, "infrastructure"), bond, "master");
        assert_eq!(
            by_uuid,
            Some(WifiProfile {
                uuid: "3c3f1b0e-0000-4000-8000-000000000002".into(),
                interface: "wlan0".into(),
                ssid: "plant:floor".into(),
            })
        );
        let by_iface = bond_slave_profile(&slave_props("master", "infrastructure"), bond, "master");
        assert!(by_iface.is_some());
    }

    #[test]
    fn bond_slave_profile_rejects_other_masters_and_modes() {
        let bond = "1e7c5a80-0000-4000-8000-000000000001";
        assert!(bond_slave_profile(&slave_props("other-bond", "infrastructure"), bond, "master").is_none());
        assert!(bond_slave_profile(&slave_props(bond, "ap"), bond, "master").is_none());
        assert!(bond_slave_profile(&slave_props("--", "infrastructure"), bond, "master").is_none());
    }

    #[test]
    fn scan_keeps_matching_ssid_and_parses_rate() {
        let out = "\
AA\\:BB\\:CC\\:DD\\:EE\\:18:plant-floor:540 Mbit/s
AA\\:BB\\:CC\\:DD\\:EE\\:19:guest:540 Mbit/s
A2\\:BB\\:CC\\:DD\\:EE\\:1A:plant-floor:270 Mbit/s
not-a-bssid:plant-floor:54 Mbit/s
";
        let scan = parse_scan(out, "plant-floor");
        assert_eq!(
            scan,
            vec![
                ObservedBssid {
                    address: "AA:BB:CC:DD:EE:18".parse().unwrap(),
                    max_bitrate: 540,
                },
                ObservedBssid {
                    address: "A2:BB:CC:DD:EE:1A".parse().unwrap(),
                    max_bitrate: 270,
                },
            ]
        );
    }

    #[test]
    fn unset_bssid_property_reads_as_none() {
        let props = parse_properties("802-11-wireless.bssid:\n");
        assert_eq!(property(&props, BSSID_PROPERTY), None);
        let props = parse_properties("802-11-wireless.bssid:--\n");
        assert_eq!(property(&props, BSSID_PROPERTY), None);
        let props = parse_properties("802-11-wireless.bssid:AA\\:BB\\:CC\\:DD\\:EE\\:10\n");
        assert_eq!(property(&props, BSSID_PROPERTY), Some("AA:BB:CC:DD:EE:10"));
    }

    #[test]
    fn rate_parsing() {
        assert_eq!(parse_rate("540 Mbit/s"), Some(540));
        assert_eq!(parse_rate("54"), Some(54));
        assert_eq!(parse_rate("--"), None);
        assert_eq!(parse_rate(""), None);
    }
}
