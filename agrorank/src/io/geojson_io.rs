//! GeoJSON boundary / grid reading and ranked grid writing

use geo::{Geometry as GeoGeometry, MultiPolygon};
use geojson::{feature::Id, Feature, FeatureCollection, GeoJson, JsonObject, JsonValue};
use serde_json::json;

use crate::error::{Error, Result};
use crate::geo_core::Crs;
use crate::geometric::ranking::{RankedCell, RankedGrid};
use crate::vector::{Boundary, CellFeature, Grid};

/// Parse GeoJSON text into features plus the CRS declared by the legacy `crs` member
fn parse(text: &str) -> Result<(Vec<Feature>, Option<Crs>)> {
    let geojson: GeoJson = text.parse()?;
    Ok(match geojson {
        GeoJson::FeatureCollection(fc) => {
            let crs = fc.foreign_members.as_ref().and_then(crs_member);
            (fc.features, crs)
        }
        GeoJson::Feature(feature) => {
            let crs = feature.foreign_members.as_ref().and_then(crs_member);
            (vec![feature], crs)
        }
        GeoJson::Geometry(geometry) => {
            let crs = geometry.foreign_members.as_ref().and_then(crs_member);
            let feature = Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: None,
                foreign_members: None,
            };
            (vec![feature], crs)
        }
    })
}

/// CRS from `{"crs": {"type": "name", "properties": {"name": ...}}}`,
/// also accepting the older `{"type": "EPSG", "properties": {"code": ...}}`
fn crs_member(members: &JsonObject) -> Option<Crs> {
    let properties = members.get("crs")?.get("properties")?;
    if let Some(name) = properties.get("name").and_then(JsonValue::as_str) {
        return Some(Crs::parse(name));
    }
    properties
        .get("code")
        .and_then(JsonValue::as_u64)
        .map(|code| Crs::from_epsg(code as u32))
}

fn to_multipolygon(feature: &Feature) -> Result<MultiPolygon<f64>> {
    let geometry = feature
        .geometry
        .as_ref()
        .ok_or_else(|| Error::Geometry("Feature has no geometry".to_string()))?;
    let geo_geom: GeoGeometry<f64> = geometry.try_into()?;
    match geo_geom {
        GeoGeometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
        GeoGeometry::MultiPolygon(mp) => Ok(mp),
        other => Err(Error::Geometry(format!(
            "Expected Polygon or MultiPolygon, found {}",
            geometry_name(&other)
        ))),
    }
}

fn geometry_name(geom: &GeoGeometry<f64>) -> &'static str {
    match geom {
        GeoGeometry::Point(_) => "Point",
        GeoGeometry::MultiPoint(_) => "MultiPoint",
        GeoGeometry::LineString(_) | GeoGeometry::Line(_) => "LineString",
        GeoGeometry::MultiLineString(_) => "MultiLineString",
        GeoGeometry::GeometryCollection(_) => "GeometryCollection",
        _ => "non-polygonal geometry",
    }
}

/// Read a field boundary: the union of every polygon feature in the document
pub fn read_boundary(text: &str) -> Result<Boundary> {
    let (features, crs) = parse(text)?;
    let mut polygons = Vec::new();
    for feature in &features {
        polygons.extend(to_multipolygon(feature)?.0);
    }
    log::info!(
        "Read boundary with {} polygon(s) from {} feature(s)",
        polygons.len(),
        features.len()
    );
    Boundary::new(MultiPolygon(polygons), crs)
}

/// Integral identifier from the `id` property, falling back to the feature id
fn cell_id(feature: &Feature) -> Option<i64> {
    let from_value = |v: &JsonValue| match v {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    };

    feature
        .properties
        .as_ref()
        .and_then(|p| p.get("id"))
        .and_then(from_value)
        .or_else(|| match &feature.id {
            Some(Id::Number(n)) => from_value(&JsonValue::Number(n.clone())),
            Some(Id::String(s)) => s.trim().parse().ok(),
            None => None,
        })
}

/// Read a grid of sub-parcel cells
pub fn read_grid(text: &str) -> Result<Grid> {
    let (features, crs) = parse(text)?;
    let cells = features
        .iter()
        .map(|feature| {
            Ok(CellFeature {
                id: cell_id(feature),
                geometry: to_multipolygon(feature)?,
                properties: feature.properties.clone().unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    log::info!("Read grid with {} cell(s)", cells.len());
    Grid::from_features(cells, crs)
}

fn crs_json(crs: &Crs) -> JsonValue {
    let name = match crs.epsg() {
        Some(code) => format!("urn:ogc:def:crs:EPSG::{}", code),
        None => crs.to_string(),
    };
    json!({ "type": "name", "properties": { "name": name } })
}

fn ranked_properties(cell: &RankedCell) -> JsonObject {
    let mut props = cell.cell.properties.clone();
    let stats = cell.stats.as_ref();
    let rank = cell.rank.as_ref();

    props.insert("id".to_string(), json!(cell.cell.id));
    props.insert("min".to_string(), json!(stats.map(|s| s.min)));
    props.insert("max".to_string(), json!(stats.map(|s| s.max)));
    props.insert("mean".to_string(), json!(stats.map(|s| s.mean)));
    props.insert("median".to_string(), json!(stats.map(|s| s.median)));
    props.insert("std".to_string(), json!(stats.map(|s| s.std)));
    props.insert("count".to_string(), json!(stats.map_or(0, |s| s.count)));
    props.insert("rank".to_string(), json!(rank.map(|r| r.rank)));
    props.insert("percentile".to_string(), json!(rank.map(|r| r.percentile)));
    props.insert("category".to_string(), json!(rank.map(|r| r.category)));
    props
}

/// Ranked grid as a FeatureCollection, one feature per cell in grid order
pub fn ranked_grid_to_geojson(grid: &RankedGrid) -> GeoJson {
    let features = grid
        .cells()
        .iter()
        .map(|cell| Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(
                &cell.cell.geometry,
            ))),
            id: Some(Id::Number(cell.cell.id.into())),
            properties: Some(ranked_properties(cell)),
            foreign_members: None,
        })
        .collect();

    let foreign_members = grid.crs().map(|crs| {
        let mut members = JsonObject::new();
        members.insert("crs".to_string(), crs_json(crs));
        members
    });

    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    })
}

/// Serialise a ranked grid to GeoJSON text
pub fn write_ranked_grid(grid: &RankedGrid) -> String {
    ranked_grid_to_geojson(grid).to_string()
}
