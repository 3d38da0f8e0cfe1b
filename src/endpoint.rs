//! Parser for the dotted request grammar carried in `DataRequested` events:
//! `BASE.TARGET.TYPE[.SUBTYPE[.SUPP1[.SUPP2[.SUPP3]]]]`.

use std::fmt;

use phf::{phf_map, phf_set};

use crate::error::OracleError;

/// Longest adhoc history, in minutes.
pub const MAX_ADHOC_MINUTES: u64 = 60;
pub const DEFAULT_WINDOW: &str = "1H";
pub const DEFAULT_DMAX: u64 = 3;

/// Subtype -> URI path template. `{window}` and `{dmax}` are substituted.
static SUBTYPE_PATHS: phf::Map<&'static str, &'static str> = phf_map! {
    "AVG" => "average/{window}",
    "AVI" => "average/interquartile/{window}",
    "AVP" => "average/percentile/{window}",
    "AVC" => "average/chauvenet/{window}/{dmax}",
    "LAT" => "latest",
};

static WINDOWS: phf::Set<&'static str> = phf_set! {
    "5M", "10M", "30M", "1H", "2H", "6H", "12H", "24H", "48H",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiSubtype {
    Avg,
    Avi,
    Avp,
    Avc,
    Lat,
}

impl ApiSubtype {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "AVG" => Some(Self::Avg),
            "AVI" => Some(Self::Avi),
            "AVP" => Some(Self::Avp),
            "AVC" => Some(Self::Avc),
            "LAT" => Some(Self::Lat),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avg => "AVG",
            Self::Avi => "AVI",
            Self::Avp => "AVP",
            Self::Avc => "AVC",
            Self::Lat => "LAT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointKind {
    /// Centralized price API.
    Api {
        subtype: ApiSubtype,
        window: &'static str,
        dmax: u64,
    },
    /// DEX aggregation over the last `minutes` minutes.
    Adhoc { minutes: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub base: String,
    pub target: String,
    pub kind: EndpointKind,
}

impl Endpoint {
    pub fn is_adhoc(&self) -> bool {
        matches!(self.kind, EndpointKind::Adhoc { .. })
    }

    /// Path below `currency/<pair-name>/` for API endpoints.
    pub fn uri_suffix(&self) -> Option<String> {
        match &self.kind {
            EndpointKind::Api {
                subtype,
                window,
                dmax,
            } => SUBTYPE_PATHS.get(subtype.as_str()).map(|template| {
                template
                    .replace("{window}", &window.to_lowercase())
                    .replace("{dmax}", &dmax.to_string())
            }),
            EndpointKind::Adhoc { .. } => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EndpointKind::Api {
                subtype,
                window,
                dmax,
            } => write!(
                f,
                "{}.{}.PR.{}.{}.{}",
                self.base,
                self.target,
                subtype.as_str(),
                window,
                dmax
            ),
            EndpointKind::Adhoc { minutes } => {
                write!(f, "{}.{}.AD.{}", self.base, self.target, minutes)
            }
        }
    }
}

/// Decodes the 32-byte on-chain payload: ASCII, right-zero-trimmed.
pub fn decode_endpoint_bytes(raw: &[u8]) -> String {
    let end = raw.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

pub fn parse(text: &str) -> Result<Endpoint, OracleError> {
    let fields: Vec<String> = text
        .trim()
        .split('.')
        .map(|f| f.trim().to_ascii_uppercase())
        .collect();

    if fields.len() < 3 {
        return Err(OracleError::Endpoint(format!(
            "{text:?}: expected at least BASE.TARGET.TYPE"
        )));
    }
    if fields[0].is_empty() || fields[1].is_empty() {
        return Err(OracleError::Endpoint(format!(
            "{text:?}: empty base or target"
        )));
    }

    let kind = match fields[2].as_str() {
        "AD" => EndpointKind::Adhoc {
            minutes: parse_minutes(fields.get(3)),
        },
        "PR" => {
            let subtype = match fields.get(3) {
                None => ApiSubtype::Lat,
                Some(s) => ApiSubtype::parse(s).ok_or_else(|| {
                    OracleError::Endpoint(format!("{text:?}: unknown subtype {s}"))
                })?,
            };
            let window = fields
                .get(4)
                .and_then(|w| WINDOWS.get_key(w.as_str()))
                .copied()
                .unwrap_or(DEFAULT_WINDOW);
            let dmax = fields
                .get(5)
                .and_then(|d| d.parse::<u64>().ok())
                .filter(|d| *d > 0)
                .unwrap_or(DEFAULT_DMAX);
            EndpointKind::Api {
                subtype,
                window,
                dmax,
            }
        }
        other => {
            return Err(OracleError::Endpoint(format!(
                "{text:?}: unknown type {other}"
            )))
        }
    };

    Ok(Endpoint {
        base: fields[0].clone(),
        target: fields[1].clone(),
        kind,
    })
}

/// Minute count of an adhoc query, clamped to `[0, 60]`. Garbage means "current price only".
fn parse_minutes(field: Option<&String>) -> u64 {
    let Some(field) = field else {
        return 0;
    };
    match field.parse::<i64>() {
        Ok(m) => m.clamp(0, MAX_ADHOC_MINUTES as i64) as u64,
        // Too many digits for an i64 is still "more than an hour".
        Err(_) if !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit()) => {
            MAX_ADHOC_MINUTES
        }
        Err(_) => 0,
    }
}
