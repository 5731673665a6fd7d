//! Geolocation catalog of known stations and access points.
//!
//! Both tables are plain CSV with an `id,x,y` header and are loaded once at
//! startup. After loading, the catalog is only ever read.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::bssid::Bssid;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {table} table: {source}")]
    Csv {
        table: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("station {0} is not in the catalog")]
    UnknownStation(String),
    #[error("station {id} appears {count} times in the catalog")]
    DuplicateStation { id: String, count: usize },
}

/// A point on the site plan. Units are whatever the catalog uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn distance(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A known station (this daemon runs on one of them).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Node {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

impl Node {
    pub fn position(&self) -> Position {
        Position {
            x: self.x,
            y: self.y,
        }
    }
}

/// A physical access point, keyed by its base BSSID pattern.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApTargetRecord {
    pub id: Bssid,
    pub x: f64,
    pub y: f64,
}

impl ApTargetRecord {
    pub fn position(&self) -> Position {
        Position {
            x: self.x,
            y: self.y,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeoCatalog {
    nodes: Vec<Node>,
    access_points: Vec<ApTargetRecord>,
}

impl GeoCatalog {
    pub fn new(nodes: Vec<Node>, access_points: Vec<ApTargetRecord>) -> Self {
        Self {
            nodes,
            access_points,
        }
    }

    /// Load the station table and the access-point table from disk.
    pub fn load(stations: &Path, access_points: &Path) -> Result<Self, CatalogError> {
        let open = |path: &Path| {
            File::open(path).map_err(|source| CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })
        };
        let catalog = Self::from_readers(open(stations)?, open(access_points)?)?;
        tracing::info!(
            stations = catalog.nodes.len(),
            access_points = catalog.access_points.len(),
            "geolocation catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_readers<S: Read, A: Read>(stations: S, access_points: A) -> Result<Self, CatalogError> {
        Ok(Self {
            nodes: read_table(stations, "station")?,
            access_points: read_table(access_points, "access point")?,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Access points in file row order. Match resolution depends on this order.
    pub fn access_points(&self) -> &[ApTargetRecord] {
        &self.access_points
    }

    /// Resolve a station's position. Exactly one row must carry `id`.
    pub fn station_position(&self, id: &str) -> Result<Position, CatalogError> {
        let mut rows = self.nodes.iter().filter(|n| n.id == id);
        let first = rows
            .next()
            .ok_or_else(|| CatalogError::UnknownStation(id.to_string()))?;
        let extra = rows.count();
        if extra > 0 {
            return Err(CatalogError::DuplicateStation {
                id: id.to_string(),
                count: extra + 1,
            });
        }
        Ok(first.position())
    }
}

fn read_table<T, R>(reader: R, table: &'static str) -> Result<Vec<T>, CatalogError>
where
    T: for<'de> Deserialize<'de>,
    R: Read,
{
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|source| CatalogError::Csv { table, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATIONS: &str = "id,x,y\n\
        4c4c4544-0042-3510-8052-b4c04f4e4d32,0.0,0.0\n\
        4c4c4544-0042-3510-8052-b4c04f4e4d33,10.5,-2\n";
    const APS: &str = "id,x,y\n\
        AA:BB:CC:DD:EE:10,2,2\n\
        aabbccddff20, 3.5 , 4\n";

    fn catalog() -> GeoCatalog {
        GeoCatalog::from_readers(STATIONS.as_bytes(), APS.as_bytes()).unwrap()
    }

    #[test]
    fn loads_both_tables_in_row_order() {
        let cat = catalog();
        assert_eq!(cat.nodes().len(), 2);
        assert_eq!(cat.access_points().len(), 2);
        assert_eq!(
            cat.access_points()[0].id,
            Bssid::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x10])
        );
        assert_eq!(
            cat.access_points()[1].id,
            Bssid::new([0xAA, 0xBB, 0xCC, 0xDD, 0xFF, 0x20])
        );
        assert!((cat.access_points()[1].x - 3.5).abs() < 1e-9);
    }

    #[test]
    fn station_position_resolves_exact_id() {
        let cat = catalog();
        let pos = cat
            .station_position("4c4c4544-0042-3510-8052-b4c04f4e4d33")
            .unwrap();
        assert_eq!(pos, Position { x: 10.5, y: -2.0 });
    }

    #[test]
    fn unknown_station_fails() {
        let err = catalog().station_position("nope").unwrap_err();
        assert!(matches!(err, CatalogError::UnknownStation(id) if id == "nope"));
    }

    #[test]
    fn duplicated_station_fails() {
        let stations = "id,x,y\nnode-a,0,0\nnode-a,1,1\n";
        let cat = GeoCatalog::from_readers(stations.as_bytes(), APS.as_bytes()).unwrap();
        let err = cat.station_position("node-a").unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateStation { count: 2, .. }));
    }

    #[test]
    fn malformed_access_point_id_is_rejected() {
        let aps = "id,x,y\nnot-a-mac,1,1\n";
        let err = GeoCatalog::from_readers(STATIONS.as_bytes(), aps.as_bytes()).unwrap_err();
        assert!(matches!(err, CatalogError::Csv { table: "access point", .. }));
    }

    #[test]
    fn missing_file_reports_path() {
        let missing = std::env::temp_dir().join("geosteer-missing-stations.csv");
        let err = GeoCatalog::load(&missing, &missing).unwrap_err();
        assert!(matches!(err, CatalogError::Io { path, .. } if path == missing));
    }

    #[test]
    fn distance_is_euclidean() {
        let a = Position { x: 0.0, y: 0.0 };
        let b = Position { x: 3.0, y: 4.0 };
        assert!((a.distance(&b) - 5.0).abs() < 1e-12);
    }
}
