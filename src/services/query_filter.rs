//! Caller query → canonical [`QueryFilter`].
//!
//! Validation happens in one place and fails fast: a conflicting or
//! incomplete geographic filter never reaches the cache or the upstream.
//! Everything else is parsed permissively, so a numeric field that does not
//! parse is simply dropped.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::time::{self, TimeConvention};

const RECTANGLE_FIELDS: [&str; 4] = ["minlat", "maxlat", "minlon", "maxlon"];
const RADIAL_FIELDS: [&str; 4] = ["lat", "lon", "maxrad", "minrad"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("invalid parameter `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("rectangle bounds ({rectangle}) cannot be combined with radial bounds ({radial})")]
    Conflict { rectangle: String, radial: String },
}

impl ParamError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Limits and defaults applied while normalising a query.
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    pub upstream_max_limit: u32,
    pub safe_limit: u32,
    pub default_limit: u32,
    pub default_window: chrono::Duration,
    pub time_convention: TimeConvention,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            upstream_max_limit: 2500,
            safe_limit: 1000,
            default_limit: 1000,
            default_window: chrono::Duration::days(7),
            time_convention: TimeConvention::Utc,
        }
    }
}

/// Raw query parameters exactly as the caller sent them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventQuery {
    /// Window start; RFC 3339 or `YYYY-MM-DDThh:mm:ss`. Defaults to `end` minus the default window.
    pub start: Option<String>,
    /// Window end. Defaults to now.
    pub end: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub minlat: Option<String>,
    pub maxlat: Option<String>,
    pub minlon: Option<String>,
    pub maxlon: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub maxrad: Option<String>,
    pub minrad: Option<String>,
    pub mindepth: Option<String>,
    pub maxdepth: Option<String>,
    pub minmag: Option<String>,
    pub maxmag: Option<String>,
    pub magtype: Option<String>,
    pub eventid: Option<String>,
    /// `timedesc` (default) or `timeasc`.
    pub orderby: Option<String>,
    pub format: Option<String>,
    /// `true` or `1` skips the cache read.
    pub nocache: Option<String>,
}

impl EventQuery {
    /// Parses a raw query string. Repeated keys keep their last value and
    /// unknown keys are ignored.
    pub fn from_query_string(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        Self::from_pairs(url::form_urlencoded::parse(raw.as_bytes()))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = Self::default();
        for (key, value) in pairs {
            if let Some(slot) = query.slot_mut(&key.as_ref().to_ascii_lowercase()) {
                *slot = Some(value.as_ref().to_string());
            }
        }
        query
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        let slot = match key {
            "start" => &mut self.start,
            "end" => &mut self.end,
            "limit" => &mut self.limit,
            "offset" => &mut self.offset,
            "minlat" => &mut self.minlat,
            "maxlat" => &mut self.maxlat,
            "minlon" => &mut self.minlon,
            "maxlon" => &mut self.maxlon,
            "lat" => &mut self.lat,
            "lon" => &mut self.lon,
            "maxrad" => &mut self.maxrad,
            "minrad" => &mut self.minrad,
            "mindepth" => &mut self.mindepth,
            "maxdepth" => &mut self.maxdepth,
            "minmag" => &mut self.minmag,
            "maxmag" => &mut self.maxmag,
            "magtype" => &mut self.magtype,
            "eventid" => &mut self.eventid,
            "orderby" => &mut self.orderby,
            "format" => &mut self.format,
            "nocache" => &mut self.nocache,
            _ => return None,
        };
        Some(slot)
    }

    fn field(&self, key: &str) -> Option<&str> {
        let value = match key {
            "minlat" => &self.minlat,
            "maxlat" => &self.maxlat,
            "minlon" => &self.minlon,
            "maxlon" => &self.maxlon,
            "lat" => &self.lat,
            "lon" => &self.lon,
            "maxrad" => &self.maxrad,
            "minrad" => &self.minrad,
            _ => return None,
        };
        non_blank(value)
    }

    pub fn bypass_cache(&self) -> bool {
        matches!(non_blank(&self.nocache), Some("true" | "1"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, utoipa::ToSchema)]
pub struct TimeRange {
    #[serde(with = "time::upstream_format")]
    #[schema(value_type = String, example = "2024-01-01T00:00:00")]
    pub start: NaiveDateTime,
    #[serde(with = "time::upstream_format")]
    #[schema(value_type = String, example = "2024-01-02T00:00:00")]
    pub end: NaiveDateTime,
}

/// At most one geographic restriction; a box and a circle cannot coexist.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GeoFilter {
    #[default]
    None,
    Rectangle {
        #[serde(rename = "minLat")]
        min_lat: Option<f64>,
        #[serde(rename = "maxLat")]
        max_lat: Option<f64>,
        #[serde(rename = "minLon")]
        min_lon: Option<f64>,
        #[serde(rename = "maxLon")]
        max_lon: Option<f64>,
    },
    Radial {
        lat: f64,
        lon: f64,
        #[serde(rename = "minRadius")]
        min_radius: Option<f64>,
        #[serde(rename = "maxRadius")]
        max_radius: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, utoipa::ToSchema)]
pub struct ValueRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ValueRange {
    fn from_bounds(min: Option<f64>, max: Option<f64>) -> Option<Self> {
        if min.is_none() && max.is_none() {
            None
        } else {
            Some(Self { min, max })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    TimeAscending,
    #[default]
    TimeDescending,
}

impl SortOrder {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "timedesc" | "time-descending" | "desc" => Some(Self::TimeDescending),
            "timeasc" | "time-ascending" | "asc" => Some(Self::TimeAscending),
            _ => None,
        }
    }

    pub fn upstream_token(self) -> &'static str {
        match self {
            Self::TimeAscending => "timeasc",
            Self::TimeDescending => "timedesc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    pub time_range: TimeRange,
    #[schema(value_type = Object)]
    pub geo_filter: GeoFilter,
    pub depth_range: Option<ValueRange>,
    pub magnitude_range: Option<ValueRange>,
    pub magnitude_type: Option<String>,
    pub event_id: Option<i64>,
    pub pagination: Pagination,
    pub sort_order: SortOrder,
    pub format: String,
}

impl QueryFilter {
    /// The query parameters sent upstream, keyed by upstream name.
    pub fn upstream_params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        params.insert("start", time::format_upstream(self.time_range.start));
        params.insert("end", time::format_upstream(self.time_range.end));
        params.insert("orderby", self.sort_order.upstream_token().to_string());
        params.insert("format", self.format.clone());
        params.insert("limit", self.pagination.limit.to_string());
        params.insert("offset", self.pagination.offset.to_string());

        match self.geo_filter {
            GeoFilter::None => {}
            GeoFilter::Rectangle {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
            } => {
                insert_f64(&mut params, "minlat", min_lat);
                insert_f64(&mut params, "maxlat", max_lat);
                insert_f64(&mut params, "minlon", min_lon);
                insert_f64(&mut params, "maxlon", max_lon);
            }
            GeoFilter::Radial {
                lat,
                lon,
                min_radius,
                max_radius,
            } => {
                insert_f64(&mut params, "lat", Some(lat));
                insert_f64(&mut params, "lon", Some(lon));
                insert_f64(&mut params, "minrad", min_radius);
                insert_f64(&mut params, "maxrad", Some(max_radius));
            }
        }

        if let Some(range) = self.depth_range {
            insert_f64(&mut params, "mindepth", range.min);
            insert_f64(&mut params, "maxdepth", range.max);
        }
        if let Some(range) = self.magnitude_range {
            insert_f64(&mut params, "minmag", range.min);
            insert_f64(&mut params, "maxmag", range.max);
        }
        if let Some(magtype) = &self.magnitude_type {
            params.insert("magtype", magtype.clone());
        }
        if let Some(event_id) = self.event_id {
            params.insert("eventid", event_id.to_string());
        }
        params
    }

    /// Canonical cache key: the sorted, form-encoded upstream parameters.
    pub fn cache_key(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.upstream_params())
            .finish()
    }
}

fn insert_f64(params: &mut BTreeMap<&'static str, String>, key: &'static str, value: Option<f64>) {
    if let Some(value) = value {
        params.insert(key, value.to_string());
    }
}

pub fn normalize_query(raw: &EventQuery, policy: &FilterPolicy) -> Result<QueryFilter, ParamError> {
    normalize_query_at(raw, policy, policy.time_convention.now())
}

/// Same as [`normalize_query`] with an explicit "now" on the policy's wall clock.
pub fn normalize_query_at(
    raw: &EventQuery,
    policy: &FilterPolicy,
    now: NaiveDateTime,
) -> Result<QueryFilter, ParamError> {
    // Conflicts are judged on what the caller supplied, before any parsing or defaulting.
    let rectangle: Vec<&str> = present_fields(raw, &RECTANGLE_FIELDS);
    let radial: Vec<&str> = present_fields(raw, &RADIAL_FIELDS);
    if !rectangle.is_empty() && !radial.is_empty() {
        return Err(ParamError::Conflict {
            rectangle: rectangle.join(","),
            radial: radial.join(","),
        });
    }

    let time_range = resolve_time_range(raw, policy, now)?;
    let geo_filter = if radial.is_empty() {
        rectangle_filter(raw)
    } else {
        radial_filter(raw)?
    };

    let depth_range = ValueRange::from_bounds(
        parse_f64(non_blank(&raw.mindepth)),
        parse_f64(non_blank(&raw.maxdepth)),
    );
    let magnitude_range = ValueRange::from_bounds(
        parse_f64(non_blank(&raw.minmag)),
        parse_f64(non_blank(&raw.maxmag)),
    );

    let requested_limit = parse_i64(non_blank(&raw.limit))
        .filter(|limit| *limit > 0)
        .map(|limit| u32::try_from(limit).unwrap_or(u32::MAX))
        .unwrap_or(policy.default_limit);
    // Upstream cap first, proxy cap second.
    let limit = requested_limit
        .min(policy.upstream_max_limit)
        .min(policy.safe_limit)
        .max(1);
    let offset = parse_i64(non_blank(&raw.offset))
        .filter(|offset| *offset > 0)
        .map(|offset| u32::try_from(offset).unwrap_or(u32::MAX))
        .unwrap_or(0);

    let sort_order = non_blank(&raw.orderby)
        .and_then(SortOrder::parse)
        .unwrap_or_default();

    Ok(QueryFilter {
        time_range,
        geo_filter,
        depth_range,
        magnitude_range,
        magnitude_type: non_blank(&raw.magtype).map(str::to_string),
        event_id: parse_i64(non_blank(&raw.eventid)),
        pagination: Pagination { limit, offset },
        sort_order,
        format: non_blank(&raw.format).unwrap_or("json").to_string(),
    })
}

fn resolve_time_range(
    raw: &EventQuery,
    policy: &FilterPolicy,
    now: NaiveDateTime,
) -> Result<TimeRange, ParamError> {
    let end = match non_blank(&raw.end) {
        Some(value) => parse_time("end", value, policy.time_convention)?,
        None => time::truncate_to_minute(now),
    };
    let start = match non_blank(&raw.start) {
        Some(value) => parse_time("start", value, policy.time_convention)?,
        None => end
            .checked_sub_signed(policy.default_window)
            .ok_or_else(|| ParamError::invalid("end", "too early to derive a default start"))?,
    };
    if start > end {
        return Err(ParamError::invalid(
            "start",
            format!(
                "start {} is after end {}",
                time::format_upstream(start),
                time::format_upstream(end)
            ),
        ));
    }
    Ok(TimeRange { start, end })
}

fn parse_time(
    field: &'static str,
    value: &str,
    convention: TimeConvention,
) -> Result<NaiveDateTime, ParamError> {
    time::parse_timestamp(value)
        .map(|parsed| convention.wall_clock(parsed))
        .ok_or_else(|| ParamError::invalid(field, format!("unrecognised date/time {value:?}")))
}

fn rectangle_filter(raw: &EventQuery) -> GeoFilter {
    let min_lat = parse_f64(non_blank(&raw.minlat));
    let max_lat = parse_f64(non_blank(&raw.maxlat));
    let min_lon = parse_f64(non_blank(&raw.minlon));
    let max_lon = parse_f64(non_blank(&raw.maxlon));
    if min_lat.is_none() && max_lat.is_none() && min_lon.is_none() && max_lon.is_none() {
        return GeoFilter::None;
    }
    GeoFilter::Rectangle {
        min_lat,
        max_lat,
        min_lon,
        max_lon,
    }
}

fn radial_filter(raw: &EventQuery) -> Result<GeoFilter, ParamError> {
    Ok(GeoFilter::Radial {
        lat: required_f64("lat", non_blank(&raw.lat))?,
        lon: required_f64("lon", non_blank(&raw.lon))?,
        min_radius: parse_f64(non_blank(&raw.minrad)),
        max_radius: required_f64("maxrad", non_blank(&raw.maxrad))?,
    })
}

fn required_f64(field: &'static str, value: Option<&str>) -> Result<f64, ParamError> {
    let Some(value) = value else {
        return Err(ParamError::invalid(
            field,
            "lat, lon and maxrad are required together for a radial search",
        ));
    };
    parse_f64(Some(value))
        .ok_or_else(|| ParamError::invalid(field, format!("{value:?} is not a number")))
}

fn present_fields<'a>(raw: &EventQuery, fields: &[&'a str]) -> Vec<&'a str> {
    fields
        .iter()
        .copied()
        .filter(|field| raw.field(field).is_some())
        .collect()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

fn parse_f64(value: Option<&str>) -> Option<f64> {
    value?.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn parse_i64(value: Option<&str>) -> Option<i64> {
    let value = value?;
    value.parse::<i64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(|value| value.trunc() as i64)
    })
}
